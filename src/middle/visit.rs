//! Tree traversal helpers
//!
//! Generic walkers over statements and expressions. Normalization metadata
//! (`hints.normalized_expr`, `normalized_cond`) is derived data and is not
//! visited.
#![allow(dead_code)]

use std::collections::BTreeSet;

use super::ir::{Comprehension, Expr, ExprKind, IterPlan, Stmt, StmtKind, TargetPlan};

/// Calls whose presence makes name-based reasoning unsound
pub const DYNAMIC_NAME_CALLS: &[&str] = &["locals", "globals", "vars", "eval", "exec"];

// ==================== Expression children ====================

impl Expr {
    /// Direct sub-expressions in evaluation order
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Constant { .. } | ExprKind::Name { .. } => Vec::new(),
            ExprKind::BinOp { left, right, .. } => vec![left.as_ref(), right.as_ref()],
            ExprKind::BoolOp { values, .. } => values.iter().collect(),
            ExprKind::Compare { left, comparators, .. } => {
                let mut out = vec![left.as_ref()];
                out.extend(comparators.iter());
                out
            }
            ExprKind::UnaryOp { operand, .. } => vec![operand.as_ref()],
            ExprKind::IfExp { test, body, orelse } => vec![test.as_ref(), body.as_ref(), orelse.as_ref()],
            ExprKind::Call { func, args, keywords, .. } => {
                let mut out = vec![func.as_ref()];
                out.extend(args.iter());
                out.extend(keywords.iter().map(|kw| &kw.value));
                out
            }
            ExprKind::Attribute { value, .. } => vec![value.as_ref()],
            ExprKind::Subscript { value, slice } => vec![value.as_ref(), slice.as_ref()],
            ExprKind::List { elements } | ExprKind::Tuple { elements } | ExprKind::Set { elements } => {
                elements.iter().collect()
            }
            ExprKind::Dict { keys, values } => keys.iter().chain(values.iter()).collect(),
            ExprKind::ListComp { elt, generators } => {
                let mut out = vec![elt.as_ref()];
                for Comprehension { target, iter, ifs } in generators {
                    out.push(target);
                    out.push(iter);
                    out.extend(ifs.iter());
                }
                out
            }
            ExprKind::Boxed { value }
            | ExprKind::Unbox { value, .. }
            | ExprKind::CastOrRaise { value, .. }
            | ExprKind::ObjBool { value }
            | ExprKind::ObjLen { value }
            | ExprKind::ObjStr { value }
            | ExprKind::ObjIterInit { value }
            | ExprKind::ObjTypeId { value }
            | ExprKind::IsInstance { value, .. } => vec![value.as_ref()],
            ExprKind::ObjIterNext { iter } => vec![iter.as_ref()],
            ExprKind::IsSubclass { actual, .. } | ExprKind::IsSubtype { actual, .. } => vec![actual.as_ref()],
        }
    }

    pub fn children_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            ExprKind::Constant { .. } | ExprKind::Name { .. } => Vec::new(),
            ExprKind::BinOp { left, right, .. } => vec![left.as_mut(), right.as_mut()],
            ExprKind::BoolOp { values, .. } => values.iter_mut().collect(),
            ExprKind::Compare { left, comparators, .. } => {
                let mut out = vec![left.as_mut()];
                out.extend(comparators.iter_mut());
                out
            }
            ExprKind::UnaryOp { operand, .. } => vec![operand.as_mut()],
            ExprKind::IfExp { test, body, orelse } => vec![test.as_mut(), body.as_mut(), orelse.as_mut()],
            ExprKind::Call { func, args, keywords, .. } => {
                let mut out = vec![func.as_mut()];
                out.extend(args.iter_mut());
                out.extend(keywords.iter_mut().map(|kw| &mut kw.value));
                out
            }
            ExprKind::Attribute { value, .. } => vec![value.as_mut()],
            ExprKind::Subscript { value, slice } => vec![value.as_mut(), slice.as_mut()],
            ExprKind::List { elements } | ExprKind::Tuple { elements } | ExprKind::Set { elements } => {
                elements.iter_mut().collect()
            }
            ExprKind::Dict { keys, values } => keys.iter_mut().chain(values.iter_mut()).collect(),
            ExprKind::ListComp { elt, generators } => {
                let mut out = vec![elt.as_mut()];
                for Comprehension { target, iter, ifs } in generators {
                    out.push(target);
                    out.push(iter);
                    out.extend(ifs.iter_mut());
                }
                out
            }
            ExprKind::Boxed { value }
            | ExprKind::Unbox { value, .. }
            | ExprKind::CastOrRaise { value, .. }
            | ExprKind::ObjBool { value }
            | ExprKind::ObjLen { value }
            | ExprKind::ObjStr { value }
            | ExprKind::ObjIterInit { value }
            | ExprKind::ObjTypeId { value }
            | ExprKind::IsInstance { value, .. } => vec![value.as_mut()],
            ExprKind::ObjIterNext { iter } => vec![iter.as_mut()],
            ExprKind::IsSubclass { actual, .. } | ExprKind::IsSubtype { actual, .. } => vec![actual.as_mut()],
        }
    }

    /// Pre-order search over this expression and all descendants
    pub fn any(&self, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        self.children().into_iter().any(|child| child.any(pred))
    }

    pub fn contains_name(&self, id: &str) -> bool {
        self.any(&mut |e| e.name_id() == Some(id))
    }
}

/// Bottom-up substitution: `f` sees each node after its children and may
/// return a replacement. Returns the number of replacements.
pub fn rewrite_expr<F>(expr: &mut Expr, f: &mut F) -> usize
where
    F: FnMut(&mut Expr) -> Option<Expr>,
{
    let mut count = 0;
    for child in expr.children_mut() {
        count += rewrite_expr(child, f);
    }
    if let Some(replacement) = f(expr) {
        *expr = replacement;
        count += 1;
    }
    count
}

/// Post-order visit of every expression; `f` returns its own change count
pub fn visit_expr_mut<F>(expr: &mut Expr, f: &mut F) -> usize
where
    F: FnMut(&mut Expr) -> usize,
{
    let mut count = 0;
    for child in expr.children_mut() {
        count += visit_expr_mut(child, f);
    }
    count + f(expr)
}

// ==================== Statement children ====================

impl TargetPlan {
    fn exprs(&self) -> Vec<&Expr> {
        match self {
            TargetPlan::NameTarget { .. } => Vec::new(),
            TargetPlan::TupleTarget { elements, .. } => elements.iter().flat_map(|e| e.exprs()).collect(),
            TargetPlan::ExprTarget { target, .. } => vec![target],
        }
    }

    fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            TargetPlan::NameTarget { .. } => Vec::new(),
            TargetPlan::TupleTarget { elements, .. } => {
                elements.iter_mut().flat_map(|e| e.exprs_mut()).collect()
            }
            TargetPlan::ExprTarget { target, .. } => vec![target],
        }
    }

    /// True when the plan binds or references `id`
    pub fn mentions(&self, id: &str) -> bool {
        match self {
            TargetPlan::NameTarget { id: name, .. } => name == id,
            TargetPlan::TupleTarget { elements, .. } => elements.iter().any(|e| e.mentions(id)),
            TargetPlan::ExprTarget { target, .. } => target.contains_name(id),
        }
    }
}

impl IterPlan {
    fn exprs(&self) -> Vec<&Expr> {
        match self {
            IterPlan::StaticRange { start, stop, step, .. } => vec![start, stop, step],
            IterPlan::RuntimeIter { iter_expr, .. } => vec![iter_expr],
        }
    }

    fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match self {
            IterPlan::StaticRange { start, stop, step, .. } => vec![start, stop, step],
            IterPlan::RuntimeIter { iter_expr, .. } => vec![iter_expr],
        }
    }
}

impl Stmt {
    /// Expressions owned directly by this statement (not by nested blocks)
    pub fn exprs(&self) -> Vec<&Expr> {
        match &self.kind {
            StmtKind::Expr { value } => vec![value],
            StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => vec![target, value],
            StmtKind::AnnAssign { target, value, .. } => {
                let mut out = vec![target];
                out.extend(value.iter());
                out
            }
            StmtKind::Return { value } => value.iter().collect(),
            StmtKind::Raise { exc } => exc.iter().collect(),
            StmtKind::If { test, .. } | StmtKind::While { test, .. } => vec![test],
            StmtKind::For { target, iter, .. } => vec![target, iter],
            StmtKind::ForRange { target, start, stop, step, .. } => vec![target, start, stop, step],
            StmtKind::ForCore { iter_plan, target_plan, .. } => {
                let mut out = iter_plan.exprs();
                out.extend(target_plan.exprs());
                out
            }
            StmtKind::Try { handlers, .. } => handlers.iter().filter_map(|h| h.exc_type.as_ref()).collect(),
            StmtKind::FunctionDef { .. }
            | StmtKind::ClassDef { .. }
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue => Vec::new(),
        }
    }

    pub fn exprs_mut(&mut self) -> Vec<&mut Expr> {
        match &mut self.kind {
            StmtKind::Expr { value } => vec![value],
            StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => vec![target, value],
            StmtKind::AnnAssign { target, value, .. } => {
                let mut out = vec![target];
                out.extend(value.iter_mut());
                out
            }
            StmtKind::Return { value } => value.iter_mut().collect(),
            StmtKind::Raise { exc } => exc.iter_mut().collect(),
            StmtKind::If { test, .. } | StmtKind::While { test, .. } => vec![test],
            StmtKind::For { target, iter, .. } => vec![target, iter],
            StmtKind::ForRange { target, start, stop, step, .. } => vec![target, start, stop, step],
            StmtKind::ForCore { iter_plan, target_plan, .. } => {
                let mut out = iter_plan.exprs_mut();
                out.extend(target_plan.exprs_mut());
                out
            }
            StmtKind::Try { handlers, .. } => {
                handlers.iter_mut().filter_map(|h| h.exc_type.as_mut()).collect()
            }
            StmtKind::FunctionDef { .. }
            | StmtKind::ClassDef { .. }
            | StmtKind::Pass
            | StmtKind::Break
            | StmtKind::Continue => Vec::new(),
        }
    }

    /// Nested statement blocks
    pub fn blocks(&self) -> Vec<&Vec<Stmt>> {
        match &self.kind {
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. }
            | StmtKind::ForRange { body, orelse, .. }
            | StmtKind::ForCore { body, orelse, .. } => vec![body, orelse],
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                let mut out = vec![body];
                out.extend(handlers.iter().map(|h| &h.body));
                out.push(orelse);
                out.push(finalbody);
                out
            }
            StmtKind::FunctionDef { body, .. } | StmtKind::ClassDef { body, .. } => vec![body],
            _ => Vec::new(),
        }
    }

    pub fn blocks_mut(&mut self) -> Vec<&mut Vec<Stmt>> {
        match &mut self.kind {
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. }
            | StmtKind::ForRange { body, orelse, .. }
            | StmtKind::ForCore { body, orelse, .. } => vec![body, orelse],
            StmtKind::Try { body, handlers, orelse, finalbody } => {
                let mut out = vec![body];
                out.extend(handlers.iter_mut().map(|h| &mut h.body));
                out.push(orelse);
                out.push(finalbody);
                out
            }
            StmtKind::FunctionDef { body, .. } | StmtKind::ClassDef { body, .. } => vec![body],
            _ => Vec::new(),
        }
    }

    /// Deep search over every expression reachable from this statement
    pub fn any_expr(&self, pred: &mut impl FnMut(&Expr) -> bool) -> bool {
        if self.exprs().into_iter().any(|e| e.any(pred)) {
            return true;
        }
        self.blocks().into_iter().any(|block| block.iter().any(|s| s.any_expr(pred)))
    }
}

// ==================== Block walkers ====================

/// True when `id` occurs as a name anywhere in the statements, including
/// loop target plans
pub fn block_contains_name(stmts: &[Stmt], id: &str) -> bool {
    stmts.iter().any(|stmt| {
        if let StmtKind::ForCore { target_plan, .. } = &stmt.kind {
            if target_plan.mentions(id) {
                return true;
            }
        }
        if stmt.exprs().into_iter().any(|e| e.contains_name(id)) {
            return true;
        }
        stmt.blocks().into_iter().any(|block| block_contains_name(block, id))
    })
}

pub fn block_has_dynamic_name_access(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| {
        stmt.any_expr(&mut |e| e.callee_name().map_or(false, |name| DYNAMIC_NAME_CALLS.contains(&name)))
    })
}

pub fn collect_target_names(target: &Expr, out: &mut BTreeSet<String>) {
    match &target.kind {
        ExprKind::Name { id } => {
            out.insert(id.clone());
        }
        ExprKind::Tuple { elements } | ExprKind::List { elements } => {
            for elem in elements {
                collect_target_names(elem, out);
            }
        }
        _ => {}
    }
}

/// Names rebound anywhere in the statements, nested blocks included
pub fn collect_assigned_names(stmts: &[Stmt], out: &mut BTreeSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign { target, .. }
            | StmtKind::AnnAssign { target, .. }
            | StmtKind::AugAssign { target, .. }
            | StmtKind::For { target, .. }
            | StmtKind::ForRange { target, .. } => collect_target_names(target, out),
            StmtKind::ForCore { target_plan, .. } => {
                let mut names = Vec::new();
                target_plan.bound_names(&mut names);
                out.extend(names);
            }
            StmtKind::FunctionDef { name, .. } | StmtKind::ClassDef { name, .. } => {
                out.insert(name.clone());
            }
            StmtKind::Try { handlers, .. } => {
                out.extend(handlers.iter().filter_map(|h| h.name.clone()));
            }
            _ => {}
        }
        for block in stmt.blocks() {
            collect_assigned_names(block, out);
        }
    }
}

/// Every name read or written in an expression
pub fn collect_expr_names(expr: &Expr, out: &mut BTreeSet<String>) {
    expr.any(&mut |e| {
        if let Some(id) = e.name_id() {
            out.insert(id.to_string());
        }
        false
    });
}

/// Bottom-up expression substitution over every statement in the block
pub fn rewrite_block_exprs<F>(stmts: &mut [Stmt], f: &mut F) -> usize
where
    F: FnMut(&mut Expr) -> Option<Expr>,
{
    let mut count = 0;
    for stmt in stmts.iter_mut() {
        for expr in stmt.exprs_mut() {
            count += rewrite_expr(expr, f);
        }
        for block in stmt.blocks_mut() {
            count += rewrite_block_exprs(block, f);
        }
    }
    count
}

/// Post-order visit of every expression in the block
pub fn visit_block_exprs<F>(stmts: &mut [Stmt], f: &mut F) -> usize
where
    F: FnMut(&mut Expr) -> usize,
{
    let mut count = 0;
    for stmt in stmts.iter_mut() {
        for expr in stmt.exprs_mut() {
            count += visit_expr_mut(expr, f);
        }
        for block in stmt.blocks_mut() {
            count += visit_block_exprs(block, f);
        }
    }
    count
}

/// Pre-order visit of every statement; `f` returns its own change count
pub fn visit_block_stmts<F>(stmts: &mut [Stmt], f: &mut F) -> usize
where
    F: FnMut(&mut Stmt) -> usize,
{
    let mut count = 0;
    for stmt in stmts.iter_mut() {
        count += f(stmt);
        for block in stmt.blocks_mut() {
            count += visit_block_stmts(block, f);
        }
    }
    count
}

/// Visit every statement list, innermost first, so `f` may insert or
/// remove statements around loops
pub fn visit_blocks<F>(stmts: &mut Vec<Stmt>, f: &mut F) -> usize
where
    F: FnMut(&mut Vec<Stmt>) -> usize,
{
    let mut count = 0;
    for stmt in stmts.iter_mut() {
        for block in stmt.blocks_mut() {
            count += visit_blocks(block, f);
        }
    }
    count + f(stmts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::ir::{BinOp, Literal, RangeMode};
    use crate::types::TypeName;
    use pretty_assertions::assert_eq;

    fn loop_over(target: &str, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::for_core(
            IterPlan::StaticRange {
                start: Expr::int(0),
                stop: Expr::int(3),
                step: Expr::int(1),
                range_mode: RangeMode::Ascending,
            },
            TargetPlan::name(target, TypeName::int64()),
            body,
            vec![],
        ))
    }

    #[test]
    fn test_contains_name_sees_nested_blocks() {
        let body = vec![loop_over(
            "j",
            vec![Stmt::expr(Expr::call("print", vec![Expr::name("x", "int64")], "None"))],
        )];
        assert!(block_contains_name(&body, "x"));
        assert!(block_contains_name(&body, "j"));
        assert!(!block_contains_name(&body, "y"));
    }

    #[test]
    fn test_dynamic_access_detected_in_nested_call() {
        let call = Expr::call("print", vec![Expr::call("locals", vec![], "dict[str, object]")], "None");
        assert!(block_has_dynamic_name_access(&[Stmt::expr(call)]));
        let plain = Expr::call("print", vec![Expr::name("locals_count", "int64")], "None");
        assert!(!block_has_dynamic_name_access(&[Stmt::expr(plain)]));
    }

    #[test]
    fn test_rewrite_is_bottom_up() {
        let inner = Expr::binop(Expr::int(1), BinOp::Add, Expr::int(2), "int64");
        let mut expr = Expr::binop(inner, BinOp::Mult, Expr::int(4), "int64");
        let mut seen = Vec::new();
        let count = rewrite_expr(&mut expr, &mut |e| {
            if let ExprKind::Constant { value: Literal::Int(n) } = &e.kind {
                seen.push(*n);
                return Some(Expr::int(n * 10));
            }
            None
        });
        assert_eq!(count, 3);
        assert_eq!(seen, vec![1, 2, 4]);
    }

    #[test]
    fn test_visit_blocks_innermost_first() {
        let mut body = vec![loop_over("i", vec![loop_over("j", vec![])])];
        let mut sizes = Vec::new();
        visit_blocks(&mut body, &mut |block| {
            sizes.push(block.len());
            0
        });
        assert_eq!(sizes, vec![0, 0, 1, 0, 1]);
    }
}
