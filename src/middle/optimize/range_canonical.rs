//! Range-loop canonicalization
//!
//! Turns runtime-protocol loops over `range(...)` with constant integer
//! arguments into static range plans. Later loop passes only look at static
//! plans, so this runs before them.

use log::trace;

use crate::middle::ir::{Expr, IterMode, IterPlan, Module, RangeMode, RuntimeCall, Stmt, StmtKind, TargetPlan};
use crate::middle::visit::visit_block_stmts;
use crate::types::TypeName;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

pub struct RangeForCanonicalizationPass;

impl RangeForCanonicalizationPass {
    pub fn new() -> Self {
        Self
    }

    fn is_range_call(expr: &Expr) -> bool {
        match expr.builtin() {
            Some(builtin) => builtin.runtime_call == RuntimeCall::PyRange,
            None => false,
        }
    }

    /// `(start, stop, step)` as constant nodes, filling the defaults
    fn static_bounds(iter_expr: &Expr) -> Option<(Expr, Expr, Expr)> {
        if !Self::is_range_call(iter_expr) {
            return None;
        }
        let args = iter_expr.call_args();
        if args.is_empty() || args.len() > 3 || args.iter().any(|a| a.const_int().is_none()) {
            return None;
        }
        let (start, stop, step) = match args {
            [stop] => (Expr::int(0), stop.clone(), Expr::int(1)),
            [start, stop] => (start.clone(), stop.clone(), Expr::int(1)),
            [start, stop, step] => (start.clone(), stop.clone(), step.clone()),
            _ => return None,
        };
        if step.const_int() == Some(0) {
            return None;
        }
        Some((start, stop, step))
    }

    fn try_rewrite(stmt: &mut Stmt) -> usize {
        let StmtKind::ForCore { iter_mode, iter_plan, target_plan, .. } = &mut stmt.kind else {
            return 0;
        };
        let IterPlan::RuntimeIter { iter_expr, .. } = &*iter_plan else {
            return 0;
        };
        let TargetPlan::NameTarget { id, target_type } = target_plan else {
            return 0;
        };
        let Some((start, stop, step)) = Self::static_bounds(iter_expr) else {
            return 0;
        };
        let range_mode = step.const_int().map_or(RangeMode::Dynamic, RangeMode::from_step);
        trace!("canonicalizing range loop over '{}' ({})", id, range_mode.as_str());
        *iter_plan = IterPlan::StaticRange { start, stop, step, range_mode };
        *iter_mode = IterMode::StaticFastpath;
        if target_type.is_unknown() {
            *target_type = TypeName::int64();
        }
        1
    }
}

impl OptimizationPass for RangeForCanonicalizationPass {
    fn name(&self) -> &'static str {
        "RangeForCanonicalizationPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = visit_block_stmts(&mut module.body, &mut Self::try_rewrite);
        Ok(PassResult::from_count(count))
    }
}

impl Default for RangeForCanonicalizationPass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use pretty_assertions::assert_eq;

    fn range(args: Vec<Expr>) -> Expr {
        Expr::builtin_call("range", RuntimeCall::PyRange, args, "range")
    }

    fn run(m: &mut Module) -> PassResult {
        RangeForCanonicalizationPass::new().run(m, &PassContext::new(1)).unwrap()
    }

    fn plan_of(m: &Module) -> &IterPlan {
        match &m.body[0].kind {
            StmtKind::ForCore { iter_plan, .. } => iter_plan,
            _ => panic!("Expected ForCore"),
        }
    }

    #[test]
    fn test_descending_step() {
        let iter = range(vec![Expr::int(10), Expr::int(0), Expr::int(-2)]);
        let mut m = module(vec![runtime_loop(iter, TargetPlan::name("i", TypeName::unknown()), vec![])]);
        assert_eq!(run(&mut m).change_count, 1);
        match plan_of(&m) {
            IterPlan::StaticRange { range_mode, .. } => assert_eq!(*range_mode, RangeMode::Descending),
            _ => panic!("Expected StaticRange plan"),
        }
        match &m.body[0].kind {
            StmtKind::ForCore { iter_mode, .. } => assert_eq!(*iter_mode, IterMode::StaticFastpath),
            _ => panic!("Expected ForCore"),
        }
        assert_eq!(plan_of(&m).const_bounds(), Some((10, 0, -2)));

        let before = m.clone();
        assert!(!run(&mut m).changed);
        assert_eq!(m, before);
    }

    #[test]
    fn test_single_arg_defaults() {
        let mut m = module(vec![runtime_loop(range(vec![Expr::int(5)]), TargetPlan::name("i", TypeName::unknown()), vec![])]);
        run(&mut m);
        assert_eq!(plan_of(&m).const_bounds(), Some((0, 5, 1)));
        match &m.body[0].kind {
            StmtKind::ForCore { target_plan, .. } => assert_eq!(*target_plan.target_type(), TypeName::int64()),
            _ => panic!("Expected ForCore"),
        }
    }

    #[test]
    fn test_guards() {
        let target = || TargetPlan::name("i", TypeName::int64());
        let mut m = module(vec![
            runtime_loop(range(vec![Expr::int(0), Expr::int(5), Expr::int(0)]), target(), vec![]),
            runtime_loop(range(vec![Expr::name("n", "int64")]), target(), vec![]),
            runtime_loop(range(vec![]), target(), vec![]),
            runtime_loop(Expr::call("range", vec![Expr::int(3)], "range"), target(), vec![]),
            runtime_loop(
                range(vec![Expr::int(3)]),
                TargetPlan::tuple(vec![target(), TargetPlan::name("j", TypeName::int64())]),
                vec![],
            ),
        ]);
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_nested_loops() {
        let inner = runtime_loop(range(vec![Expr::int(2)]), TargetPlan::name("j", TypeName::int64()), vec![]);
        let mut m = module(vec![runtime_loop(
            range(vec![Expr::int(3)]),
            TargetPlan::name("i", TypeName::int64()),
            vec![inner],
        )]);
        assert_eq!(run(&mut m).change_count, 2);
    }
}
