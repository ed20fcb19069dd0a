//! String-keyed dictionary access
//!
//! Keys of `m[k]`, `m.get(k)` and `m.pop(k)` with `m: dict[str, V]` are typed
//! `str` and flagged as verified, so generators skip the key conversion.

use crate::middle::ir::{Expr, ExprKind, Module, RuntimeCall};
use crate::middle::visit::visit_block_exprs;
use crate::types::TypeName;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

pub struct DictStrKeyNormalizationPass;

impl DictStrKeyNormalizationPass {
    pub fn new() -> Self {
        Self
    }

    fn has_str_keys(owner: &Expr) -> bool {
        owner.resolved_type.dict_key().map_or(false, |key| key.is_str())
    }

    fn mark_key(key: &mut Expr) -> usize {
        // A key typed as something other than str is left to the generator
        if !key.resolved_type.is_unknown() && !key.resolved_type.is_str() {
            return 0;
        }
        let mut changed = usize::from(key.refine_type(TypeName::str()));
        if !key.hints.dict_key_verified {
            key.hints.dict_key_verified = true;
            changed += 1;
        }
        changed
    }

    /// Subscript or `dict.get`/`dict.pop` call on a `dict[str, _]` owner
    fn keyed_by_str(expr: &Expr) -> bool {
        match &expr.kind {
            ExprKind::Subscript { value, .. } => Self::has_str_keys(value),
            ExprKind::Call { func, args, builtin: Some(builtin), .. }
                if !args.is_empty()
                    && matches!(builtin.runtime_call, RuntimeCall::DictGet | RuntimeCall::DictPop) =>
            {
                match &func.kind {
                    ExprKind::Attribute { value, .. } => Self::has_str_keys(value),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    fn visit(expr: &mut Expr) -> usize {
        if !Self::keyed_by_str(expr) {
            return 0;
        }
        match &mut expr.kind {
            ExprKind::Subscript { slice, .. } => Self::mark_key(slice),
            ExprKind::Call { args, .. } => args.first_mut().map_or(0, Self::mark_key),
            _ => 0,
        }
    }
}

impl OptimizationPass for DictStrKeyNormalizationPass {
    fn name(&self) -> &'static str {
        "DictStrKeyNormalizationPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = visit_block_exprs(&mut module.body, &mut Self::visit);
        Ok(PassResult::from_count(count))
    }
}

impl Default for DictStrKeyNormalizationPass {
    fn default() -> Self {
        Self::new()
    }
}
