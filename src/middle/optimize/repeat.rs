//! Result types of repeat-style constructions
//!
//! `[x] * n` and `n * [x]` produce `list[T]`, `s * n` produces `str`, and a
//! list comprehension over a typed element produces `list[T]`.

use crate::middle::ir::{BinOp, Expr, ExprKind, Module};
use crate::middle::visit::visit_block_exprs;
use crate::types::TypeName;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

pub struct TypedRepeatMaterializationPass;

impl TypedRepeatMaterializationPass {
    pub fn new() -> Self {
        Self
    }

    fn repeat_result(left: &TypeName, right: &TypeName) -> Option<TypeName> {
        if right.is_int_like() {
            if let Some(elem) = left.list_element() {
                return Some(TypeName::list_of(&elem));
            }
            if left.is_str() {
                return Some(TypeName::str());
            }
        }
        if left.is_int_like() {
            if let Some(elem) = right.list_element() {
                return Some(TypeName::list_of(&elem));
            }
            if right.is_str() {
                return Some(TypeName::str());
            }
        }
        None
    }

    fn infer(expr: &mut Expr) -> usize {
        match &expr.kind {
            ExprKind::BinOp { left, op: BinOp::Mult, right } => {
                let Some(ty) = Self::repeat_result(&left.resolved_type, &right.resolved_type) else {
                    return 0;
                };
                usize::from(expr.refine_type(ty))
            }
            ExprKind::ListComp { elt, .. } => {
                // `list[unknown]` carries no more information than `unknown`
                let current = &expr.resolved_type;
                let open = current.is_unknown() || current.list_element().map_or(false, |e| e.is_unknown());
                if !open || elt.resolved_type.is_any_like() {
                    return 0;
                }
                expr.resolved_type = TypeName::list_of(&elt.resolved_type);
                1
            }
            _ => 0,
        }
    }
}

impl OptimizationPass for TypedRepeatMaterializationPass {
    fn name(&self) -> &'static str {
        "TypedRepeatMaterializationPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = visit_block_exprs(&mut module.body, &mut Self::infer);
        Ok(PassResult::from_count(count))
    }
}

impl Default for TypedRepeatMaterializationPass {
    fn default() -> Self {
        Self::new()
    }
}
