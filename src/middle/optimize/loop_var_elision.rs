//! Unused loop variable elision
//!
//! A static-range loop whose variable is never read is rebound to `_`. The
//! search scope is the whole enclosing function (or the module), which covers
//! the loop body, its else-block and every statement after the loop, plus
//! closures that could observe the variable.

use std::collections::BTreeSet;

use log::trace;

use crate::middle::ir::{Expr, IterPlan, Module, Stmt, StmtKind, TargetPlan, WILDCARD};
use crate::middle::visit::block_has_dynamic_name_access;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

pub struct UnusedLoopVarElisionPass;

impl UnusedLoopVarElisionPass {
    pub fn new() -> Self {
        Self
    }

    /// Process `stmts` as one scope, nested function bodies as their own
    fn elide_in_scope(stmts: &mut [Stmt]) -> usize {
        let mut count = 0;
        for stmt in stmts.iter_mut() {
            count += Self::elide_in_nested_functions(stmt);
        }

        if block_has_dynamic_name_access(stmts) {
            return count;
        }
        let mut candidates = Vec::new();
        collect_static_loop_vars(stmts, &mut candidates);
        let unused: BTreeSet<String> = candidates
            .into_iter()
            .filter(|id| id != WILDCARD && name_refs(stmts, id) == 1)
            .collect();
        if unused.is_empty() {
            return count;
        }
        count + rename_loop_vars(stmts, &unused)
    }

    fn elide_in_nested_functions(stmt: &mut Stmt) -> usize {
        if let StmtKind::FunctionDef { body, .. } = &mut stmt.kind {
            return Self::elide_in_scope(body);
        }
        stmt.blocks_mut()
            .into_iter()
            .flatten()
            .map(Self::elide_in_nested_functions)
            .sum()
    }
}

/// Loop variables of static-range loops in this scope
fn collect_static_loop_vars(stmts: &[Stmt], out: &mut Vec<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::FunctionDef { .. } => continue,
            StmtKind::ForCore { iter_plan: IterPlan::StaticRange { .. }, target_plan, .. } => {
                if let Some(id) = target_plan.name_id() {
                    out.push(id.to_string());
                }
            }
            _ => {}
        }
        for block in stmt.blocks() {
            collect_static_loop_vars(block, out);
        }
    }
}

fn expr_refs(expr: &Expr, id: &str) -> usize {
    let own = usize::from(expr.name_id() == Some(id));
    own + expr.children().into_iter().map(|child| expr_refs(child, id)).sum::<usize>()
}

/// Names bound by a target plan; expression targets are counted with the
/// statement's own expressions
fn plan_refs(plan: &TargetPlan, id: &str) -> usize {
    match plan {
        TargetPlan::NameTarget { id: name, .. } => usize::from(name == id),
        TargetPlan::TupleTarget { elements, .. } => elements.iter().map(|e| plan_refs(e, id)).sum(),
        TargetPlan::ExprTarget { .. } => 0,
    }
}

/// Every occurrence of `id`, binding sites of loop targets included
fn name_refs(stmts: &[Stmt], id: &str) -> usize {
    let mut count = 0;
    for stmt in stmts {
        if let StmtKind::ForCore { target_plan, .. } = &stmt.kind {
            count += plan_refs(target_plan, id);
        }
        count += stmt.exprs().into_iter().map(|e| expr_refs(e, id)).sum::<usize>();
        count += stmt.blocks().into_iter().map(|b| name_refs(b, id)).sum::<usize>();
    }
    count
}

fn rename_loop_vars(stmts: &mut [Stmt], unused: &BTreeSet<String>) -> usize {
    let mut count = 0;
    for stmt in stmts.iter_mut() {
        match &mut stmt.kind {
            StmtKind::FunctionDef { .. } => continue,
            StmtKind::ForCore {
                iter_plan: IterPlan::StaticRange { .. },
                target_plan: TargetPlan::NameTarget { id, .. },
                ..
            } if unused.contains(id.as_str()) => {
                trace!("loop variable '{}' is never read", id);
                *id = WILDCARD.to_string();
                count += 1;
            }
            _ => {}
        }
        for block in stmt.blocks_mut() {
            count += rename_loop_vars(block, unused);
        }
    }
    count
}

impl OptimizationPass for UnusedLoopVarElisionPass {
    fn name(&self) -> &'static str {
        "UnusedLoopVarElisionPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = Self::elide_in_scope(&mut module.body);
        Ok(PassResult::from_count(count))
    }
}

impl Default for UnusedLoopVarElisionPass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::middle::ir::{BinOp, Param};
    use crate::types::TypeName;
    use pretty_assertions::assert_eq;

    fn print(arg: Expr) -> Stmt {
        Stmt::expr(Expr::call("print", vec![arg], "None"))
    }

    fn target_of(stmt: &Stmt) -> &str {
        match &stmt.kind {
            StmtKind::ForCore { target_plan, .. } => target_plan.name_id().unwrap_or("<tuple>"),
            _ => panic!("Expected ForCore"),
        }
    }

    fn run(m: &mut Module) -> PassResult {
        UnusedLoopVarElisionPass::new().run(m, &PassContext::new(1)).unwrap()
    }

    #[test]
    fn test_unused_var_renamed() {
        let body = vec![assign("y", Expr::int(5))];
        let mut m = module(vec![static_loop("i", 0, 5, 1, body)]);
        assert_eq!(run(&mut m).change_count, 1);
        assert_eq!(target_of(&m.body[0]), WILDCARD);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_read_in_body_or_after_loop_is_kept() {
        let used_in_body = static_loop("i", 0, 3, 1, vec![print(Expr::name("i", "int64"))]);
        let mut m = module(vec![used_in_body]);
        assert!(!run(&mut m).changed);

        let mut m = module(vec![
            static_loop("j", 0, 3, 1, vec![]),
            assign("last", Expr::binop(Expr::name("j", "int64"), BinOp::Add, Expr::int(1), "int64")),
        ]);
        assert!(!run(&mut m).changed);
        assert_eq!(target_of(&m.body[0]), "j");
    }

    #[test]
    fn test_read_after_enclosing_block_is_kept() {
        let guarded = Stmt::new(StmtKind::If {
            test: Expr::name("flag", "bool"),
            body: vec![static_loop("k", 0, 3, 1, vec![])],
            orelse: vec![],
        });
        let mut m = module(vec![guarded, print(Expr::name("k", "int64"))]);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_read_in_else_block_is_kept() {
        let mut lp = static_loop("i", 0, 3, 1, vec![]);
        if let StmtKind::ForCore { orelse, .. } = &mut lp.kind {
            orelse.push(print(Expr::name("i", "int64")));
        }
        let mut m = module(vec![lp]);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_dynamic_namespace_access_blocks_elision() {
        let body = vec![print(Expr::call("locals", vec![], "dict[str, object]"))];
        let mut m = module(vec![static_loop("i", 0, 3, 1, body)]);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_runtime_loops_untouched() {
        let xs = Expr::name("xs", "list[int64]");
        let mut m = module(vec![runtime_loop(xs, TargetPlan::name("x", TypeName::int64()), vec![])]);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_function_scopes_are_separate() {
        let func = Stmt::new(StmtKind::FunctionDef {
            name: "f".to_string(),
            params: vec![Param { name: "n".to_string(), annotation: TypeName::int64() }],
            returns: TypeName::none(),
            body: vec![static_loop("i", 0, 4, 1, vec![])],
            escape_summary: None,
        });
        let mut m = module(vec![func, static_loop("i", 0, 2, 1, vec![print(Expr::name("i", "int64"))])]);
        assert_eq!(run(&mut m).change_count, 1);
        match &m.body[0].kind {
            StmtKind::FunctionDef { body, .. } => assert_eq!(target_of(&body[0]), WILDCARD),
            _ => panic!("Expected FunctionDef"),
        }
        assert_eq!(target_of(&m.body[1]), "i");
    }
}
