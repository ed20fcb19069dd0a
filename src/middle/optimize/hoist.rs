//! Loop-invariant hoisting (lite)

use std::collections::BTreeSet;

use log::trace;

use crate::middle::ir::{BinOp, Expr, ExprKind, IterPlan, Literal, Module, Stmt, StmtKind, TargetPlan, UnaryOp};
use crate::middle::visit::{block_has_dynamic_name_access, collect_assigned_names, visit_blocks};
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

/// Moves the first statement of a static-range loop to the preheader when it
/// is a plain assignment of a loop-invariant arithmetic expression.
///
/// Only loops whose constant bounds prove at least one iteration qualify, so
/// the hoisted statement runs exactly when it ran before. At most one
/// statement per loop moves per run.
pub struct LoopInvariantHoistLitePass;

impl LoopInvariantHoistLitePass {
    pub fn new() -> Self {
        Self
    }

    fn hoist_in_block(stmts: &mut Vec<Stmt>) -> usize {
        let mut count = 0;
        let mut idx = 0;
        while idx < stmts.len() {
            if let Some(hoisted) = Self::take_invariant(&mut stmts[idx]) {
                stmts.insert(idx, hoisted);
                count += 1;
                idx += 1;
            }
            idx += 1;
        }
        count
    }

    fn take_invariant(stmt: &mut Stmt) -> Option<Stmt> {
        let StmtKind::ForCore { iter_plan, target_plan, body, .. } = &mut stmt.kind else {
            return None;
        };
        if !matches!(iter_plan, IterPlan::StaticRange { .. }) || !iter_plan.is_statically_non_empty() {
            return None;
        }
        let TargetPlan::NameTarget { id: loop_var, .. } = &*target_plan else {
            return None;
        };
        let (first, rest) = body.split_first()?;
        let (target, value) = match &first.kind {
            StmtKind::Assign { target, value } => (target, value),
            StmtKind::AnnAssign { target, value: Some(value), .. } => (target, value),
            _ => return None,
        };
        let target = target.name_id()?;
        if target == loop_var || block_has_dynamic_name_access(body) {
            return None;
        }

        let mut assigned = BTreeSet::new();
        collect_assigned_names(rest, &mut assigned);
        if assigned.contains(target) {
            return None;
        }
        if !is_invariant(value, loop_var, target, &assigned) {
            return None;
        }
        trace!("hoisting '{}' out of loop over '{}'", target, loop_var);
        Some(body.remove(0))
    }
}

/// Pure arithmetic over constants and names the loop never rebinds
fn is_invariant(expr: &Expr, loop_var: &str, target: &str, assigned: &BTreeSet<String>) -> bool {
    match &expr.kind {
        ExprKind::Constant { value } => matches!(value, Literal::Int(_) | Literal::Float(_) | Literal::Bool(_)),
        ExprKind::Name { id } => id != loop_var && id != target && !assigned.contains(id.as_str()),
        ExprKind::UnaryOp { op: UnaryOp::UAdd | UnaryOp::USub, operand } => {
            is_invariant(operand, loop_var, target, assigned)
        }
        ExprKind::BinOp { left, op: BinOp::Add | BinOp::Sub | BinOp::Mult | BinOp::Div, right } => {
            is_invariant(left, loop_var, target, assigned) && is_invariant(right, loop_var, target, assigned)
        }
        _ => false,
    }
}

impl OptimizationPass for LoopInvariantHoistLitePass {
    fn name(&self) -> &'static str {
        "LoopInvariantHoistLitePass"
    }

    fn min_opt_level(&self) -> u8 {
        2
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = visit_blocks(&mut module.body, &mut Self::hoist_in_block);
        Ok(PassResult::from_count(count))
    }
}

impl Default for LoopInvariantHoistLitePass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::types::TypeName;
    use pretty_assertions::assert_eq;

    fn run(m: &mut Module) -> PassResult {
        LoopInvariantHoistLitePass::new().run(m, &PassContext::new(2)).unwrap()
    }

    fn body_len(stmt: &Stmt) -> usize {
        match &stmt.kind {
            StmtKind::ForCore { body, .. } => body.len(),
            _ => panic!("Expected ForCore"),
        }
    }

    fn scale() -> Expr {
        Expr::binop(Expr::name("a", "float64"), BinOp::Mult, Expr::float(2.0), "float64")
    }

    #[test]
    fn test_hoists_invariant_assignment() {
        let body = vec![
            assign("k", scale()),
            Stmt::expr(Expr::call("use", vec![Expr::name("k", "float64")], "None")),
        ];
        let mut m = module(vec![static_loop("i", 0, 10, 1, body)]);
        assert_eq!(run(&mut m).change_count, 1);
        assert_eq!(m.body.len(), 2);
        assert_eq!(m.body[0].simple_assign_target(), Some("k"));
        assert_eq!(body_len(&m.body[1]), 1);
    }

    #[test]
    fn test_empty_loop_untouched() {
        let mut m = module(vec![
            static_loop("i", 0, 0, 1, vec![assign("k", scale())]),
            static_loop("i", 0, 5, -1, vec![assign("k", scale())]),
        ]);
        assert!(!run(&mut m).changed);
        assert_eq!(m.body.len(), 2);
    }

    #[test]
    fn test_loop_var_reference_not_hoisted() {
        let uses_i = Expr::binop(Expr::name("i", "int64"), BinOp::Add, Expr::int(1), "int64");
        let mut m = module(vec![static_loop("i", 0, 5, 1, vec![assign("k", uses_i)])]);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_reassigned_operands_not_hoisted() {
        let body = vec![
            assign("k", scale()),
            assign("a", Expr::float(3.0)),
        ];
        let mut m = module(vec![static_loop("i", 0, 5, 1, body)]);
        assert!(!run(&mut m).changed);

        let body = vec![
            assign("k", scale()),
            Stmt::new(StmtKind::AugAssign {
                target: Expr::name("k", "float64"),
                op: BinOp::Add,
                value: Expr::float(1.0),
            }),
        ];
        let mut m = module(vec![static_loop("i", 0, 5, 1, body)]);
        assert!(!run(&mut m).changed);

        let accumulate = Expr::binop(Expr::name("k", "float64"), BinOp::Add, Expr::float(1.0), "float64");
        let mut m = module(vec![static_loop("i", 0, 5, 1, vec![assign("k", accumulate)])]);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_calls_not_hoisted() {
        let call = Expr::call("random", vec![], "float64");
        let mut m = module(vec![static_loop("i", 0, 5, 1, vec![assign("k", call)])]);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_runtime_loop_untouched() {
        let xs = Expr::name("xs", "list[int64]");
        let mut m = module(vec![runtime_loop(xs, TargetPlan::name("x", TypeName::int64()), vec![assign("k", Expr::int(1))])]);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_one_statement_per_loop() {
        let body = vec![assign("k", Expr::int(1)), assign("m", Expr::int(2))];
        let mut m = module(vec![static_loop("i", 0, 3, 1, body)]);
        assert_eq!(run(&mut m).change_count, 1);
        assert_eq!(body_len(&m.body[1]), 1);
    }
}
