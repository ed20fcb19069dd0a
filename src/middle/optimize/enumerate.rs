//! Typed `enumerate(list[T])` loops

use crate::middle::ir::{Expr, IterPlan, Module, RuntimeCall, Stmt, StmtKind, TargetPlan};
use crate::middle::visit::visit_block_stmts;
use crate::types::TypeName;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

/// Iteration protocol tag written for typed enumerate loops
const ENUMERATE_PROTOCOL: &str = "static_range";

/// Backfills `tuple[int64, T]` item metadata on runtime loops over
/// `enumerate(list[T])` and types their loop targets.
pub struct TypedEnumerateNormalizationPass;

impl TypedEnumerateNormalizationPass {
    pub fn new() -> Self {
        Self
    }

    /// `tuple[int64, T]` from an `(int, T)` pair type
    fn indexed_pair(ty: &TypeName) -> Option<TypeName> {
        let elems = ty.tuple_elements()?;
        match elems.as_slice() {
            [index, item] if index.canonical() == TypeName::int64() && !item.is_unknown() => {
                Some(TypeName::tuple_of(&[TypeName::int64(), item.clone()]))
            }
            _ => None,
        }
    }

    fn item_type(iter_expr: &Expr) -> Option<TypeName> {
        if let Some(hint) = iter_expr.hints.iter_element_type.as_ref().and_then(Self::indexed_pair) {
            return Some(hint);
        }
        if let Some(pair) = iter_expr.resolved_type.list_element().as_ref().and_then(Self::indexed_pair) {
            return Some(pair);
        }
        let source = iter_expr.call_args().first()?;
        let elem = source.resolved_type.list_element()?;
        if elem.is_unknown() {
            return None;
        }
        Some(TypeName::tuple_of(&[TypeName::int64(), elem]))
    }

    fn type_target(plan: &mut TargetPlan, item_type: &TypeName, elems: &[TypeName]) -> usize {
        let mut changed = 0;
        match plan {
            TargetPlan::NameTarget { target_type, .. } => {
                if target_type.is_unknown() {
                    *target_type = item_type.clone();
                    changed += 1;
                }
            }
            TargetPlan::TupleTarget { elements, target_type, .. } if elements.len() == elems.len() => {
                if target_type.is_unknown() {
                    *target_type = item_type.clone();
                    changed += 1;
                }
                for (elem, desired) in elements.iter_mut().zip(elems) {
                    if let TargetPlan::NameTarget { target_type, .. } = elem {
                        if target_type.is_unknown() {
                            *target_type = desired.clone();
                            changed += 1;
                        }
                    }
                }
            }
            _ => {}
        }
        changed
    }

    fn try_rewrite(stmt: &mut Stmt) -> usize {
        let StmtKind::ForCore { iter_plan, target_plan, .. } = &mut stmt.kind else {
            return 0;
        };
        let IterPlan::RuntimeIter { iter_expr, iter_item_type, .. } = iter_plan else {
            return 0;
        };
        let is_enumerate = iter_expr
            .builtin()
            .map_or(false, |b| b.runtime_call == RuntimeCall::PyEnumerate);
        if !is_enumerate {
            return 0;
        }
        let Some(item_type) = Self::item_type(iter_expr) else {
            return 0;
        };
        let Some(elems) = item_type.tuple_elements() else {
            return 0;
        };

        let mut changed = 0;
        if iter_expr.refine_type(TypeName::list_of(&item_type)) {
            changed += 1;
        }
        let hints = &mut iter_expr.hints;
        if !hints.iterable_trait {
            hints.iterable_trait = true;
            changed += 1;
        }
        if hints.iter_protocol.as_deref() != Some(ENUMERATE_PROTOCOL) {
            hints.iter_protocol = Some(ENUMERATE_PROTOCOL.to_string());
            changed += 1;
        }
        if hints.iter_element_type.as_ref() != Some(&item_type) {
            hints.iter_element_type = Some(item_type.clone());
            changed += 1;
        }
        if iter_item_type.is_unknown() {
            *iter_item_type = item_type.clone();
            changed += 1;
        }
        changed + Self::type_target(target_plan, &item_type, &elems)
    }
}

impl OptimizationPass for TypedEnumerateNormalizationPass {
    fn name(&self) -> &'static str {
        "TypedEnumerateNormalizationPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = visit_block_stmts(&mut module.body, &mut Self::try_rewrite);
        Ok(PassResult::from_count(count))
    }
}

impl Default for TypedEnumerateNormalizationPass {
    fn default() -> Self {
        Self::new()
    }
}
