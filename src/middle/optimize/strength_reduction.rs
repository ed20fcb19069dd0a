//! Float division strength reduction in static-range loops

use crate::middle::ir::{BinOp, Expr, ExprKind, IterPlan, Literal, Module, Stmt, StmtKind};
use crate::middle::visit::{rewrite_block_exprs, visit_block_stmts};
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

const MANTISSA_MASK: u64 = (1 << 52) - 1;

/// Rewrites floating-point `x / k` inside static-range loop bodies to
/// `x * (1 / k)` when `k` is a power-of-two literal; the reciprocal is exact,
/// so the product rounds identically.
pub struct StrengthReductionFloatLoopPass;

impl StrengthReductionFloatLoopPass {
    pub fn new() -> Self {
        Self
    }

    /// Exact reciprocal of a finite, non-zero power-of-two literal
    fn exact_reciprocal(literal: &Literal) -> Option<f64> {
        let value = literal.as_f64()?;
        if !value.is_finite() || value == 0.0 {
            return None;
        }
        let bits = value.abs().to_bits();
        let exponent = bits >> 52;
        let mantissa = bits & MANTISSA_MASK;
        let power_of_two = if exponent == 0 {
            mantissa.is_power_of_two()
        } else {
            mantissa == 0
        };
        if !power_of_two {
            return None;
        }
        let reciprocal = 1.0 / value;
        (reciprocal.is_finite() && reciprocal * value == 1.0).then_some(reciprocal)
    }

    fn try_reduce(expr: &mut Expr) -> Option<Expr> {
        let ExprKind::BinOp { left, op: BinOp::Div, right } = &mut expr.kind else {
            return None;
        };
        if !expr.resolved_type.canonical().is_float() {
            return None;
        }
        let reciprocal = Self::exact_reciprocal(right.literal()?)?;
        let mut factor = Expr::float(reciprocal);
        factor.source_span = right.source_span;
        let mut reduced = Expr::binop(left.take(), BinOp::Mult, factor, expr.resolved_type.clone());
        reduced.source_span = expr.source_span;
        reduced.casts = std::mem::take(&mut expr.casts);
        Some(reduced)
    }

    fn reduce_loop(stmt: &mut Stmt) -> usize {
        match &mut stmt.kind {
            StmtKind::ForCore { iter_plan: IterPlan::StaticRange { .. }, body, .. } => {
                rewrite_block_exprs(body, &mut Self::try_reduce)
            }
            _ => 0,
        }
    }
}

impl OptimizationPass for StrengthReductionFloatLoopPass {
    fn name(&self) -> &'static str {
        "StrengthReductionFloatLoopPass"
    }

    fn min_opt_level(&self) -> u8 {
        2
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = visit_block_stmts(&mut module.body, &mut Self::reduce_loop);
        Ok(PassResult::from_count(count))
    }
}

impl Default for StrengthReductionFloatLoopPass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::middle::ir::TargetPlan;
    use crate::types::TypeName;
    use pretty_assertions::assert_eq;

    fn div(k: Expr) -> Expr {
        Expr::binop(Expr::name("x", "float64"), BinOp::Div, k, "float64")
    }

    fn reduced_value(m: &Module) -> &Expr {
        let StmtKind::ForCore { body, .. } = &m.body[0].kind else {
            panic!("Expected ForCore");
        };
        match &body[0].kind {
            StmtKind::Assign { value, .. } => value,
            _ => panic!("Expected assignment"),
        }
    }

    fn run(m: &mut Module) -> PassResult {
        StrengthReductionFloatLoopPass::new().run(m, &PassContext::new(2)).unwrap()
    }

    #[test]
    fn test_power_of_two_divisor() {
        let mut m = module(vec![static_loop("i", 0, 8, 1, vec![assign("y", div(Expr::float(4.0)))])]);
        assert_eq!(run(&mut m).change_count, 1);
        match &reduced_value(&m).kind {
            ExprKind::BinOp { op, right, .. } => {
                assert_eq!(*op, BinOp::Mult);
                assert_eq!(right.literal(), Some(&Literal::Float(0.25)));
            }
            _ => panic!("Expected BinOp"),
        }
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_other_divisors_untouched() {
        for k in [Expr::float(3.0), Expr::float(0.0), Expr::float(f64::MIN_POSITIVE / 4.0), Expr::name("k", "float64")] {
            let mut m = module(vec![static_loop("i", 0, 8, 1, vec![assign("y", div(k))])]);
            assert!(!run(&mut m).changed);
        }
    }

    #[test]
    fn test_int_divisor_and_negative_power() {
        let mut m = module(vec![static_loop(
            "i",
            0,
            8,
            1,
            vec![assign("y", div(Expr::int(2))), assign("z", div(Expr::float(-0.5)))],
        )]);
        assert_eq!(run(&mut m).change_count, 2);
    }

    #[test]
    fn test_requires_float_result_and_static_loop() {
        let int_div = Expr::binop(Expr::name("n", "int64"), BinOp::FloorDiv, Expr::int(4), "int64");
        let mut m = module(vec![static_loop("i", 0, 8, 1, vec![assign("q", int_div)])]);
        assert!(!run(&mut m).changed);

        let mut m = module(vec![assign("y", div(Expr::float(4.0)))]);
        assert!(!run(&mut m).changed);

        let xs = Expr::name("xs", "list[float64]");
        let mut m = module(vec![runtime_loop(
            xs,
            TargetPlan::name("v", TypeName::float64()),
            vec![assign("y", div(Expr::float(4.0)))],
        )]);
        assert!(!run(&mut m).changed);
    }
}
