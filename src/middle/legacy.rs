//! Legacy-compat normalization
//!
//! Generators that predate stage 3 read stage-2 shapes. This module rebuilds
//! a lowered tree with every lowered-only node replaced by the equivalent
//! older shape: boxing disappears, object operations become builtin calls
//! and `ForCore` splits back into `ForRange` / `For`. The input tree is not
//! modified.

use log::debug;

use super::ir::{Expr, ExprKind, IterPlan, Module, Stmt, StmtKind, TargetPlan, TypeRef};
use super::visit::{rewrite_block_exprs, rewrite_expr, visit_block_stmts};
use crate::types::TypeName;

/// Build a legacy-shaped copy of `module`, stamped with `module_stage`
pub fn normalize_to_legacy(module: &Module, module_stage: u8) -> Module {
    let mut out = module.clone();
    let loops = visit_block_stmts(&mut out.body, &mut legacy_loop);
    let exprs = rewrite_block_exprs(&mut out.body, &mut legacy_expr);
    out.east_stage = module_stage;
    debug!(
        "legacy normalization: {} loops, {} expressions rewritten (stage {})",
        loops, exprs, module_stage
    );
    out
}

fn compat_call(name: &str, args: Vec<Expr>, original: &Expr) -> Expr {
    let mut call = Expr::call(name, args, original.resolved_type.clone());
    call.source_span = original.source_span;
    call
}

fn type_name_ref(expected: &TypeRef) -> Expr {
    Expr::name(&expected.name, TypeName::unknown())
}

/// Replacement for a lowered-only expression node; children are already done
fn legacy_expr(expr: &mut Expr) -> Option<Expr> {
    if let Some(normalized) = expr.hints.normalized_expr.as_deref_mut() {
        rewrite_expr(normalized, &mut legacy_expr);
    }
    let replacement = match &mut expr.kind {
        ExprKind::Boxed { value } | ExprKind::Unbox { value, .. } | ExprKind::CastOrRaise { value, .. } => {
            value.take()
        }
        ExprKind::ObjBool { value } => {
            let value = value.take();
            compat_call("bool", vec![value], expr)
        }
        ExprKind::ObjLen { value } => {
            let value = value.take();
            compat_call("len", vec![value], expr)
        }
        ExprKind::ObjStr { value } => {
            let value = value.take();
            compat_call("str", vec![value], expr)
        }
        ExprKind::ObjIterInit { value } => {
            let value = value.take();
            compat_call("iter", vec![value], expr)
        }
        ExprKind::ObjIterNext { iter } => {
            let iter = iter.take();
            compat_call("next", vec![iter], expr)
        }
        ExprKind::ObjTypeId { value } => {
            let value = value.take();
            compat_call("py_runtime_type_id", vec![value], expr)
        }
        ExprKind::IsInstance { value, expected } => {
            let args = vec![value.take(), type_name_ref(expected)];
            compat_call("isinstance", args, expr)
        }
        ExprKind::IsSubclass { actual, expected } => {
            let args = vec![actual.take(), Expr::int(i64::from(expected.id))];
            compat_call("py_issubclass", args, expr)
        }
        ExprKind::IsSubtype { actual, expected } => {
            let args = vec![actual.take(), Expr::int(i64::from(expected.id))];
            compat_call("py_is_subtype", args, expr)
        }
        _ => return None,
    };
    Some(replacement)
}

/// Stage-2 binding expression for a target plan
fn legacy_target(plan: &TargetPlan) -> Expr {
    match plan {
        TargetPlan::NameTarget { id, target_type } => Expr::name(id, target_type.clone()),
        TargetPlan::TupleTarget { elements, target_type, .. } => Expr::new(
            ExprKind::Tuple { elements: elements.iter().map(legacy_target).collect() },
            target_type.clone(),
        ),
        TargetPlan::ExprTarget { target, .. } => target.clone(),
    }
}

fn legacy_loop(stmt: &mut Stmt) -> usize {
    let StmtKind::ForCore { iter_plan, target_plan, body, orelse, .. } = &mut stmt.kind else {
        return 0;
    };
    let target = legacy_target(target_plan);
    let target_type = target_plan.target_type().clone();
    let body = std::mem::take(body);
    let orelse = std::mem::take(orelse);
    stmt.kind = match iter_plan {
        IterPlan::StaticRange { start, stop, step, range_mode } => StmtKind::ForRange {
            target,
            target_type,
            start: start.take(),
            stop: stop.take(),
            step: step.take(),
            range_mode: *range_mode,
            body,
            orelse,
        },
        IterPlan::RuntimeIter { iter_expr, .. } => StmtKind::For {
            target,
            target_type,
            iter: iter_expr.take(),
            body,
            orelse,
        },
    };
    1
}
