//! Direct tuple unpacking in loop headers

use crate::middle::ir::{Expr, IterPlan, Module, Stmt, StmtKind, TargetPlan};
use crate::middle::visit::visit_block_stmts;
use crate::types::TypeName;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

/// Flags flat tuple targets over `tuple[...]` items for direct unpacking,
/// recording the bound names and their per-field types.
pub struct TupleTargetDirectExpansionPass;

impl TupleTargetDirectExpansionPass {
    pub fn new() -> Self {
        Self
    }

    /// Item type from the plan, the iterable hint, or a `list[tuple[...]]` iterable
    fn item_type(iter_item_type: &TypeName, iter_expr: &Expr) -> Option<TypeName> {
        if iter_item_type.is_tuple() {
            return Some(iter_item_type.clone());
        }
        if let Some(hint) = iter_expr.hints.iter_element_type.as_ref().filter(|t| t.is_tuple()) {
            return Some(hint.clone());
        }
        iter_expr.resolved_type.list_element().filter(TypeName::is_tuple)
    }

    fn try_rewrite(stmt: &mut Stmt) -> usize {
        let StmtKind::ForCore { iter_plan, target_plan, .. } = &mut stmt.kind else {
            return 0;
        };
        let IterPlan::RuntimeIter { iter_expr, iter_item_type, .. } = iter_plan else {
            return 0;
        };
        let TargetPlan::TupleTarget {
            elements,
            target_type,
            direct_unpack,
            direct_unpack_names,
            direct_unpack_types,
        } = target_plan
        else {
            return 0;
        };
        if elements.is_empty() {
            return 0;
        }
        let names: Option<Vec<String>> = elements
            .iter()
            .map(|elem| elem.name_id().map(str::to_string))
            .collect();
        let Some(names) = names else {
            return 0;
        };
        let Some(item_type) = Self::item_type(iter_item_type, iter_expr) else {
            return 0;
        };
        let Some(item_elems) = item_type.tuple_elements() else {
            return 0;
        };
        if item_elems.len() != elements.len() || item_elems.iter().any(TypeName::is_unknown) {
            return 0;
        }

        let mut changed = 0;
        if *iter_item_type != item_type {
            if !iter_item_type.is_unknown() {
                // Never retype a concrete item type
                return 0;
            }
            *iter_item_type = item_type.clone();
            changed += 1;
        }
        if target_type.is_unknown() {
            *target_type = item_type.clone();
            changed += 1;
        }
        for (elem, desired) in elements.iter_mut().zip(&item_elems) {
            if let TargetPlan::NameTarget { target_type, .. } = elem {
                if target_type.is_unknown() {
                    *target_type = desired.clone();
                    changed += 1;
                }
            }
        }
        if !*direct_unpack {
            *direct_unpack = true;
            changed += 1;
        }
        if *direct_unpack_names != names {
            *direct_unpack_names = names;
            changed += 1;
        }
        if *direct_unpack_types != item_elems {
            *direct_unpack_types = item_elems;
            changed += 1;
        }
        changed
    }
}

impl OptimizationPass for TupleTargetDirectExpansionPass {
    fn name(&self) -> &'static str {
        "TupleTargetDirectExpansionPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = visit_block_stmts(&mut module.body, &mut Self::try_rewrite);
        Ok(PassResult::from_count(count))
    }
}

impl Default for TupleTargetDirectExpansionPass {
    fn default() -> Self {
        Self::new()
    }
}
