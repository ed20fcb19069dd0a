//! Capacity hints for counted append loops
//!
//! A static-range loop whose body appends to one list exactly once per
//! iteration, with no branching, gets a `StaticRangeReserveHint` carrying a
//! trip-count expression. Loops that stop qualifying lose their hints.

use std::collections::BTreeSet;

use log::trace;

use crate::middle::ir::{
    BinOp, CmpOp, Expr, ExprKind, IterPlan, Module, RangeMode, ReserveHint, Stmt, StmtKind,
};
use crate::middle::visit::{collect_assigned_names, visit_block_stmts};
use crate::types::TypeName;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

pub const COUNT_KIND: &str = "static_range_trip_count";
pub const COUNT_EXPR_VERSION: &str = "east3_expr_v1";
pub const SAFETY_PROVEN_APPEND: &str = "proven_unconditional_append";

pub struct SafeReserveHintPass;

impl SafeReserveHintPass {
    pub fn new() -> Self {
        Self
    }

    fn tag_loop(stmt: &mut Stmt) -> usize {
        let StmtKind::ForCore { iter_plan, body, reserve_hints, .. } = &mut stmt.kind else {
            return 0;
        };
        let hints: Vec<ReserveHint> = Self::reserve_hint(iter_plan, body).into_iter().collect();
        if *reserve_hints == hints {
            return 0;
        }
        *reserve_hints = hints;
        1
    }

    fn reserve_hint(plan: &IterPlan, body: &[Stmt]) -> Option<ReserveHint> {
        let IterPlan::StaticRange { start, stop, step, range_mode } = plan else {
            return None;
        };
        if body.is_empty() {
            return None;
        }
        let step = step.const_int().filter(|s| *s != 0)?;
        if RangeMode::from_step(step) != *range_mode {
            return None;
        }

        let mut mutated = BTreeSet::new();
        collect_assigned_names(body, &mut mutated);
        if !is_simple_bound(start, &mutated) || !is_simple_bound(stop, &mutated) {
            return None;
        }
        let owner = single_append_owner(body)?;
        if mutated.contains(&owner) {
            return None;
        }
        let count_expr = trip_count_expr(start, stop, step);
        trace!("reserve hint for '{}' ({})", owner, range_mode.as_str());
        Some(ReserveHint {
            owner,
            count_kind: COUNT_KIND.to_string(),
            count_expr_version: COUNT_EXPR_VERSION.to_string(),
            count_expr,
            safe: true,
            safety: SAFETY_PROVEN_APPEND.to_string(),
        })
    }
}

/// Integer constant or a name the body never rebinds
fn is_simple_bound(expr: &Expr, mutated: &BTreeSet<String>) -> bool {
    match &expr.kind {
        ExprKind::Name { id } => !mutated.contains(id),
        _ => expr.const_int().is_some(),
    }
}

/// Owner of the only top-level `owner.append(...)`, if the body is branch-free
fn single_append_owner(body: &[Stmt]) -> Option<String> {
    let mut owner: Option<&str> = None;
    let mut appends = 0;
    for stmt in body {
        match &stmt.kind {
            StmtKind::If { .. }
            | StmtKind::While { .. }
            | StmtKind::For { .. }
            | StmtKind::ForRange { .. }
            | StmtKind::ForCore { .. }
            | StmtKind::Try { .. } => return None,
            StmtKind::Expr { value } => {
                let ExprKind::Call { func, .. } = &value.kind else {
                    continue;
                };
                let ExprKind::Attribute { value: receiver, attr } = &func.kind else {
                    continue;
                };
                if attr != "append" {
                    continue;
                }
                let id = receiver.name_id()?;
                if owner.map_or(false, |seen| seen != id) {
                    return None;
                }
                owner = Some(id);
                appends += 1;
            }
            _ => {}
        }
    }
    if appends != 1 {
        return None;
    }
    owner.map(str::to_string)
}

fn int_op(left: Expr, op: BinOp, right: Expr) -> Expr {
    Expr::binop(left, op, right, TypeName::int64())
}

fn compare(left: Expr, op: CmpOp, right: Expr) -> Expr {
    Expr::new(
        ExprKind::Compare { left: Box::new(left), ops: vec![op], comparators: vec![right] },
        TypeName::bool(),
    )
}

/// `0` when the range is empty, otherwise `ceil(|hi - lo| / |step|)`
fn trip_count_expr(start: &Expr, stop: &Expr, step: i64) -> Expr {
    let step_abs = step.unsigned_abs();
    let (empty_op, hi, lo) = if step > 0 {
        (CmpOp::LtE, stop, start)
    } else {
        (CmpOp::GtE, start, stop)
    };
    let test = compare(stop.clone(), empty_op, start.clone());
    let positive = if step_abs == 1 {
        if lo.const_int() == Some(0) {
            hi.clone()
        } else {
            int_op(hi.clone(), BinOp::Sub, lo.clone())
        }
    } else {
        let step_abs = i64::try_from(step_abs).unwrap_or(i64::MAX);
        let diff = int_op(hi.clone(), BinOp::Sub, lo.clone());
        let numer = int_op(diff, BinOp::Add, Expr::int(step_abs - 1));
        int_op(numer, BinOp::FloorDiv, Expr::int(step_abs))
    };
    Expr::new(
        ExprKind::IfExp { test: Box::new(test), body: Box::new(Expr::int(0)), orelse: Box::new(positive) },
        TypeName::int64(),
    )
}

impl OptimizationPass for SafeReserveHintPass {
    fn name(&self) -> &'static str {
        "SafeReserveHintPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = visit_block_stmts(&mut module.body, &mut Self::tag_loop);
        Ok(PassResult::from_count(count))
    }
}

impl Default for SafeReserveHintPass {
    fn default() -> Self {
        Self::new()
    }
}
