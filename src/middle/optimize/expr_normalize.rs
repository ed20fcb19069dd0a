//! Normalized expression metadata
//!
//! Every BinOp and Compare node carries a deep clone of itself under
//! `hints.normalized_expr`, tagged with [`NORMALIZED_EXPR_VERSION`]. Static
//! range loops over a named variable get their continuation test in
//! `normalized_cond`. Clones never carry nested normalization metadata, so a
//! second run compares equal and reports nothing.

use crate::middle::ir::{CmpOp, Expr, ExprKind, IterPlan, Module, RangeMode, Stmt, StmtKind, TargetPlan, WILDCARD};
use crate::middle::visit::{visit_block_exprs, visit_block_stmts};
use crate::types::TypeName;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

pub const NORMALIZED_EXPR_VERSION: &str = "east3_expr_v1";

pub struct ExpressionNormalizationPass;

impl ExpressionNormalizationPass {
    pub fn new() -> Self {
        Self
    }

    fn tag_expr(expr: &mut Expr) -> usize {
        if !matches!(expr.kind, ExprKind::BinOp { .. } | ExprKind::Compare { .. }) {
            return 0;
        }
        let normalized = clone_without_normalization(expr);
        let mut changed = 0;
        if expr.hints.normalized_expr_version.as_deref() != Some(NORMALIZED_EXPR_VERSION) {
            expr.hints.normalized_expr_version = Some(NORMALIZED_EXPR_VERSION.to_string());
            changed += 1;
        }
        if expr.hints.normalized_expr.as_deref() != Some(&normalized) {
            expr.hints.normalized_expr = Some(Box::new(normalized));
            changed += 1;
        }
        changed
    }

    fn tag_loop(stmt: &mut Stmt) -> usize {
        let StmtKind::ForCore { iter_plan, target_plan, normalized_cond, .. } = &mut stmt.kind else {
            return 0;
        };
        let Some(cond) = loop_condition(iter_plan, target_plan) else {
            return 0;
        };
        if normalized_cond.as_ref() == Some(&cond) {
            return 0;
        }
        *normalized_cond = Some(cond);
        1
    }
}

fn strip_normalization(expr: &mut Expr) {
    expr.hints.normalized_expr = None;
    expr.hints.normalized_expr_version = None;
    for child in expr.children_mut() {
        strip_normalization(child);
    }
}

fn clone_without_normalization(expr: &Expr) -> Expr {
    let mut cloned = expr.clone();
    strip_normalization(&mut cloned);
    cloned
}

fn compare(left: Expr, op: CmpOp, right: Expr) -> Expr {
    Expr::new(
        ExprKind::Compare { left: Box::new(left), ops: vec![op], comparators: vec![right] },
        TypeName::bool(),
    )
}

/// `i < stop`, `i > stop`, or a step-sign dispatch between the two
fn loop_condition(iter_plan: &IterPlan, target_plan: &TargetPlan) -> Option<Expr> {
    let IterPlan::StaticRange { stop, step, range_mode, .. } = iter_plan else {
        return None;
    };
    let TargetPlan::NameTarget { id, target_type } = target_plan else {
        return None;
    };
    if id.is_empty() || id == WILDCARD {
        return None;
    }
    let var_type = if target_type.is_unknown() { TypeName::int64() } else { target_type.clone() };
    let var = Expr::name(id, var_type);
    let stop = clone_without_normalization(stop);

    let cond = match range_mode {
        RangeMode::Ascending => compare(var, CmpOp::Lt, stop),
        RangeMode::Descending => compare(var, CmpOp::Gt, stop),
        RangeMode::Dynamic => {
            let positive = compare(clone_without_normalization(step), CmpOp::Gt, Expr::int(0));
            let ascending = compare(var.clone(), CmpOp::Lt, stop.clone());
            let descending = compare(var, CmpOp::Gt, stop);
            Expr::new(
                ExprKind::IfExp {
                    test: Box::new(positive),
                    body: Box::new(ascending),
                    orelse: Box::new(descending),
                },
                TypeName::bool(),
            )
        }
    };
    Some(cond)
}

impl OptimizationPass for ExpressionNormalizationPass {
    fn name(&self) -> &'static str {
        "ExpressionNormalizationPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let mut count = visit_block_exprs(&mut module.body, &mut Self::tag_expr);
        count += visit_block_stmts(&mut module.body, &mut Self::tag_loop);
        Ok(PassResult::from_count(count))
    }
}

impl Default for ExpressionNormalizationPass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::middle::ir::BinOp;
    use pretty_assertions::assert_eq;

    fn run(m: &mut Module) -> PassResult {
        ExpressionNormalizationPass::new().run(m, &PassContext::new(1)).unwrap()
    }

    fn cond_of(stmt: &Stmt) -> Option<&Expr> {
        match &stmt.kind {
            StmtKind::ForCore { normalized_cond, .. } => normalized_cond.as_ref(),
            _ => panic!("Expected ForCore"),
        }
    }

    #[test]
    fn test_binop_tagged_once() {
        let inner = Expr::binop(Expr::name("a", "int64"), BinOp::Add, Expr::int(1), "int64");
        let outer = Expr::binop(inner, BinOp::Mult, Expr::name("b", "int64"), "int64");
        let mut m = module(vec![assign("x", outer)]);
        assert_eq!(run(&mut m).change_count, 4);

        let StmtKind::Assign { value, .. } = &m.body[0].kind else {
            panic!("Expected assignment");
        };
        assert_eq!(value.hints.normalized_expr_version.as_deref(), Some(NORMALIZED_EXPR_VERSION));
        let clone = value.hints.normalized_expr.as_deref().unwrap();
        let ExprKind::BinOp { left, .. } = &clone.kind else {
            panic!("Expected BinOp clone");
        };
        assert!(clone.hints.normalized_expr.is_none());
        assert!(left.hints.normalized_expr.is_none());

        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_loop_conditions_by_mode() {
        let mut m = module(vec![static_loop("i", 0, 10, 1, vec![]), static_loop("j", 10, 0, -1, vec![])]);
        assert_eq!(run(&mut m).change_count, 2);
        match &cond_of(&m.body[0]).unwrap().kind {
            ExprKind::Compare { left, ops, comparators } => {
                assert_eq!(left.name_id(), Some("i"));
                assert_eq!(ops, &vec![CmpOp::Lt]);
                assert_eq!(comparators[0].const_int(), Some(10));
            }
            _ => panic!("Expected Compare"),
        }
        match &cond_of(&m.body[1]).unwrap().kind {
            ExprKind::Compare { ops, .. } => assert_eq!(ops, &vec![CmpOp::Gt]),
            _ => panic!("Expected Compare"),
        }
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_dynamic_step_uses_conditional() {
        let mut lp = static_loop("i", 0, 10, 1, vec![]);
        if let StmtKind::ForCore { iter_plan: IterPlan::StaticRange { step, range_mode, .. }, .. } = &mut lp.kind {
            *step = Expr::name("s", "int64");
            *range_mode = RangeMode::Dynamic;
        }
        let mut m = module(vec![lp]);
        assert!(run(&mut m).changed);
        assert!(matches!(cond_of(&m.body[0]).unwrap().kind, ExprKind::IfExp { .. }));
    }

    #[test]
    fn test_wildcard_and_runtime_loops_skipped() {
        let xs = Expr::name("xs", "list[int64]");
        let mut m = module(vec![
            static_loop(WILDCARD, 0, 3, 1, vec![]),
            runtime_loop(xs, TargetPlan::name("x", TypeName::int64()), vec![]),
        ]);
        assert!(!run(&mut m).changed);
        assert!(cond_of(&m.body[0]).is_none());
    }
}
