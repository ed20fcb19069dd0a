//! Loop-invariant cast hoisting
//!
//! Numeric `static_cast` calls over loop-invariant operands inside a
//! static-range loop are evaluated once in the preheader and bound to a
//! `__hoisted_cast_N` temporary. An int-to-numeric cast attached to the right
//! operand of a binary operation is hoisted the same way.

use std::collections::{BTreeSet, HashMap};

use log::trace;

use crate::middle::ir::{
    BinOp, BorrowKind, Expr, ExprKind, IterPlan, Literal, Module, RuntimeCall, Stmt, StmtKind, UnaryOp,
};
use crate::middle::visit::{
    block_has_dynamic_name_access, collect_assigned_names, collect_expr_names, visit_expr_mut,
};
use crate::types::TypeName;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

pub const HOISTED_CAST_PREFIX: &str = "__hoisted_cast_";

pub struct LoopInvariantCastHoistPass;

impl LoopInvariantCastHoistPass {
    pub fn new() -> Self {
        Self
    }
}

/// Fresh temporaries for one pass run
struct TempNames {
    used: BTreeSet<String>,
    seq: usize,
}

impl TempNames {
    fn next(&mut self) -> String {
        loop {
            self.seq += 1;
            let name = format!("{}{}", HOISTED_CAST_PREFIX, self.seq);
            if self.used.insert(name.clone()) {
                return name;
            }
        }
    }
}

/// Hoisting state for one loop
struct LoopScope<'a> {
    loop_vars: BTreeSet<String>,
    mutated: BTreeSet<String>,
    temps: &'a mut TempNames,
    by_key: HashMap<String, String>,
    hoisted: Vec<Stmt>,
}

impl LoopScope<'_> {
    /// Pure arithmetic over numeric constants and names the loop never rebinds
    fn is_invariant(&self, expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Constant { value } => matches!(value, Literal::Int(_) | Literal::Float(_) | Literal::Bool(_)),
            ExprKind::Name { id } => !self.loop_vars.contains(id) && !self.mutated.contains(id),
            ExprKind::UnaryOp { op: UnaryOp::UAdd | UnaryOp::USub, operand } => self.is_invariant(operand),
            ExprKind::BinOp { left, op: BinOp::Add | BinOp::Sub | BinOp::Mult | BinOp::Div, right } => {
                self.is_invariant(left) && self.is_invariant(right)
            }
            _ => false,
        }
    }

    /// Bind `value` to a temporary, reusing one already made for `key`
    fn temp_for(&mut self, key: String, value: Expr, ty: &TypeName) -> Expr {
        let name = match self.by_key.get(&key) {
            Some(name) => name.clone(),
            None => {
                let name = self.temps.next();
                trace!("hoisting cast to {} as '{}'", ty, name);
                self.hoisted.push(Stmt::new(StmtKind::AnnAssign {
                    target: Expr::name(&name, ty.clone()),
                    annotation: ty.clone(),
                    value: Some(value),
                }));
                self.by_key.insert(key, name.clone());
                name
            }
        };
        let mut reference = Expr::name(&name, ty.clone());
        reference.borrow_kind = Some(BorrowKind::ReadonlyRef);
        reference
    }

    fn rewrite(&mut self, expr: &mut Expr) -> usize {
        let mut count = self.hoist_right_cast(expr);
        if let Some(ty) = self.cast_candidate(expr) {
            let key = format!("{}:{}", ty, expr_key(expr));
            let mut value = expr.take();
            // Casts on the call apply at the use site
            let casts = std::mem::take(&mut value.casts);
            *expr = self.temp_for(key, value, &ty);
            expr.casts = casts;
            count += 1;
        }
        count
    }

    /// Result type of a hoistable `static_cast(arg)` call
    fn cast_candidate(&self, expr: &Expr) -> Option<TypeName> {
        if expr.builtin()?.runtime_call != RuntimeCall::StaticCast {
            return None;
        }
        let ExprKind::Call { args, keywords, .. } = &expr.kind else {
            return None;
        };
        let [arg] = args.as_slice() else {
            return None;
        };
        if !keywords.is_empty() {
            return None;
        }
        let to = expr.resolved_type.canonical_numeric()?;
        // Float-to-int casts can raise; the preheader must not
        let from = arg.resolved_type.canonical();
        let cannot_raise = from.is_int_like() || from.as_str() == "bool" || (from.is_float() && to.is_float());
        if !cannot_raise || !self.is_invariant(arg) {
            return None;
        }
        Some(to)
    }

    /// `a op b` with an int-to-numeric cast on an invariant `b`
    fn hoist_right_cast(&mut self, expr: &mut Expr) -> usize {
        let ExprKind::BinOp { right, .. } = &expr.kind else {
            return 0;
        };
        let mut right_casts = expr.casts.iter().enumerate().filter(|(_, c)| c.on == "right");
        let (Some((idx, cast)), None) = (right_casts.next(), right_casts.next()) else {
            return 0;
        };
        let Some(to) = cast.to.canonical_numeric() else {
            return 0;
        };
        if !cast.from.is_int_like() || !self.is_invariant(right) {
            return 0;
        }
        let key = format!("right:{}:{}", to, expr_key(right));
        let ExprKind::BinOp { right, .. } = &mut expr.kind else {
            return 0;
        };
        let operand = right.take();
        let mut call = Expr::builtin_call("static_cast", RuntimeCall::StaticCast, vec![operand], to.clone());
        if let ExprKind::Call { builtin: Some(builtin), .. } = &mut call.kind {
            builtin.target = Some(to.clone());
        }
        **right = self.temp_for(key, call, &to);
        expr.casts.remove(idx);
        1
    }

    /// Rewrite the loop body; nested definitions are separate scopes
    fn rewrite_block(&mut self, stmts: &mut [Stmt]) -> usize {
        let mut count = 0;
        for stmt in stmts.iter_mut() {
            if matches!(stmt.kind, StmtKind::FunctionDef { .. } | StmtKind::ClassDef { .. }) {
                continue;
            }
            for expr in stmt.exprs_mut() {
                count += visit_expr_mut(expr, &mut |e| self.rewrite(e));
            }
            for block in stmt.blocks_mut() {
                count += self.rewrite_block(block);
            }
        }
        count
    }
}

/// Dedup key: source text when present, else the node's full shape
fn expr_key(expr: &Expr) -> String {
    match expr.repr.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => format!("{:?}", expr.kind),
    }
}

fn collect_used_names(stmts: &[Stmt], out: &mut BTreeSet<String>) {
    collect_assigned_names(stmts, out);
    for stmt in stmts {
        for expr in stmt.exprs() {
            collect_expr_names(expr, out);
        }
        for block in stmt.blocks() {
            collect_used_names(block, out);
        }
    }
}

/// Hoist out of one loop; returns the rewrites and the preheader statements
fn hoist_loop(stmt: &mut Stmt, temps: &mut TempNames) -> (usize, Vec<Stmt>) {
    let StmtKind::ForCore { iter_plan: IterPlan::StaticRange { .. }, target_plan, body, .. } = &mut stmt.kind
    else {
        return (0, Vec::new());
    };
    if body.is_empty() || block_has_dynamic_name_access(body) {
        return (0, Vec::new());
    }
    let mut loop_vars = Vec::new();
    target_plan.bound_names(&mut loop_vars);
    if loop_vars.is_empty() {
        return (0, Vec::new());
    }
    let loop_vars: BTreeSet<String> = loop_vars.into_iter().collect();
    let mut mutated = BTreeSet::new();
    collect_assigned_names(body, &mut mutated);
    mutated.retain(|name| !loop_vars.contains(name));

    let mut scope = LoopScope { loop_vars, mutated, temps, by_key: HashMap::new(), hoisted: Vec::new() };
    let count = scope.rewrite_block(body);
    (count, scope.hoisted)
}

/// Outermost loops first, so an operand invariant in every enclosing loop
/// leaves all of them at once
fn hoist_in_block(stmts: &mut Vec<Stmt>, temps: &mut TempNames) -> usize {
    let mut count = 0;
    let mut idx = 0;
    while idx < stmts.len() {
        let (rewrites, hoisted) = hoist_loop(&mut stmts[idx], temps);
        if !hoisted.is_empty() {
            count += rewrites;
            for stmt in hoisted {
                stmts.insert(idx, stmt);
                idx += 1;
            }
        }
        for block in stmts[idx].blocks_mut() {
            count += hoist_in_block(block, temps);
        }
        idx += 1;
    }
    count
}

impl OptimizationPass for LoopInvariantCastHoistPass {
    fn name(&self) -> &'static str {
        "LoopInvariantCastHoistPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let mut temps = TempNames { used: BTreeSet::new(), seq: 0 };
        collect_used_names(&module.body, &mut temps.used);
        let count = hoist_in_block(&mut module.body, &mut temps);
        Ok(PassResult::from_count(count))
    }
}

impl Default for LoopInvariantCastHoistPass {
    fn default() -> Self {
        Self::new()
    }
}
