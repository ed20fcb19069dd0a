//! Stage pipeline
//!
//! Promotes a syntactic tree to stage 2 and lowers a type-resolved tree to
//! stage 3: loop plans, builtin call lowering, explicit object coercions,
//! nominal type tests and class registration.

use std::collections::HashMap;

use log::{debug, trace};

use crate::middle::ir::{
    BuiltinCall, DispatchMode, Expr, ExprKind, IterPlan, Module, RangeMode, RuntimeCall, Stmt,
    StmtKind, TargetPlan, TypeRef, SCHEMA_VERSION, STAGE_LOWERED, STAGE_SYNTAX, STAGE_TYPED,
};
use crate::middle::visit::visit_block_exprs;
use crate::stdlib::{builtins, ObjectForm, TypeTest};
use crate::types::registry::TID_OBJECT;
use crate::types::{SharedTypeRegistry, TypeId, TypeName};
use crate::utils::{Error, Result};

/// Stage 1 -> 2: type literal constants and stamp the stage marker
pub fn promote_to_stage2(mut module: Module) -> Result<Module> {
    module.expect_stage(STAGE_SYNTAX)?;
    visit_block_exprs(&mut module.body, &mut |expr| {
        if let Some(value) = expr.literal() {
            let ty = value.type_name();
            return usize::from(expr.refine_type(ty));
        }
        0
    });
    module.east_stage = STAGE_TYPED;
    if module.schema_version == 0 {
        module.schema_version = SCHEMA_VERSION;
    }
    Ok(module)
}

/// Stage 2 -> 3 with the dispatch mode taken from the module metadata
pub fn lower_to_stage3(module: Module, registry: &SharedTypeRegistry) -> Result<Module> {
    Lowerer::new(registry).lower(module)
}

/// Stage 2 -> 3 lowering
pub struct Lowerer<'a> {
    registry: &'a SharedTypeRegistry,
    /// Overrides `meta.dispatch_mode` when set
    dispatch_override: Option<DispatchMode>,
    dispatch_mode: DispatchMode,
    /// Classes registered by this lowering run
    classes: Vec<(String, TypeId)>,
    /// Class names visible to this unit; shadows builtin names
    scope: HashMap<String, TypeId>,
}

impl<'a> Lowerer<'a> {
    pub fn new(registry: &'a SharedTypeRegistry) -> Self {
        Self {
            registry,
            dispatch_override: None,
            dispatch_mode: DispatchMode::Native,
            classes: Vec::new(),
            scope: HashMap::new(),
        }
    }

    pub fn with_dispatch_mode(mut self, mode: DispatchMode) -> Self {
        self.dispatch_override = Some(mode);
        self
    }

    /// Classes registered so far, in declaration order
    pub fn registered_classes(&self) -> &[(String, TypeId)] {
        &self.classes
    }

    /// Resolve a class name: this unit's classes first, then builtins
    fn resolve_class(&self, name: &str) -> Option<TypeId> {
        self.scope.get(name).copied().or_else(|| self.registry.type_id_for_name(name))
    }

    /// Lower a module; any failure aborts the whole unit
    pub fn lower(&mut self, mut module: Module) -> Result<Module> {
        if module.schema_version < 1 {
            return Err(Error::MalformedRoot(format!(
                "schema_version must be >= 1, got {}",
                module.schema_version
            )));
        }
        module.expect_stage(STAGE_TYPED)?;

        self.dispatch_mode = self.dispatch_override.unwrap_or(module.meta.dispatch_mode);
        self.lower_block(&mut module.body)?;

        module.east_stage = STAGE_LOWERED;
        module.meta.dispatch_mode = self.dispatch_mode;
        debug!(
            "lowered module to stage 3 ({} statements, {} classes, dispatch {:?})",
            module.body.len(),
            self.classes.len(),
            self.dispatch_mode
        );
        Ok(module)
    }

    // ==================== Statements ====================

    fn lower_block(&mut self, stmts: &mut [Stmt]) -> Result<()> {
        for stmt in stmts.iter_mut() {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &mut Stmt) -> Result<()> {
        let kind = std::mem::replace(&mut stmt.kind, StmtKind::Pass);
        stmt.kind = match kind {
            StmtKind::For { target, target_type, iter, body, orelse } => {
                let mut iter_plan = IterPlan::runtime(iter, self.dispatch_mode);
                if let IterPlan::RuntimeIter { iter_expr, iter_item_type, .. } = &mut iter_plan {
                    if let Some(elem) = iter_expr.resolved_type.list_element() {
                        *iter_item_type = elem;
                    }
                }
                StmtKind::for_core(iter_plan, build_target_plan(target, target_type), body, orelse)
            }
            StmtKind::ForRange { target, target_type, start, stop, step, body, orelse, .. } => {
                let range_mode = step.const_int().map_or(RangeMode::Dynamic, RangeMode::from_step);
                StmtKind::for_core(
                    IterPlan::StaticRange { start, stop, step, range_mode },
                    build_target_plan(target, target_type),
                    body,
                    orelse,
                )
            }
            StmtKind::ClassDef { name, bases, body, .. } => {
                let type_id = self.register_class(&name, &bases)?;
                StmtKind::ClassDef { name, bases, body, type_id: Some(type_id) }
            }
            other => other,
        };

        for expr in stmt.exprs_mut() {
            self.lower_expr(expr)?;
        }

        match &mut stmt.kind {
            StmtKind::If { test, .. } | StmtKind::While { test, .. } => wrap_truthiness(test),
            StmtKind::AnnAssign { annotation, value: Some(value), .. } => {
                insert_box_unbox(annotation, value)
            }
            _ => {}
        }

        for block in stmt.blocks_mut() {
            self.lower_block(block)?;
        }
        Ok(())
    }

    fn register_class(&mut self, name: &str, bases: &[String]) -> Result<TypeId> {
        let mut base_ids = Vec::with_capacity(bases.len());
        for base in bases {
            match self.resolve_class(base) {
                Some(id) => base_ids.push(id),
                None => {
                    debug!("class {}: unknown base {} treated as object", name, base);
                    base_ids.push(TID_OBJECT);
                }
            }
        }
        let id = self.registry.register_named_class(name, &base_ids)?;
        self.classes.push((name.to_string(), id));
        self.scope.insert(name.to_string(), id);
        Ok(id)
    }

    // ==================== Expressions ====================

    fn lower_expr(&mut self, expr: &mut Expr) -> Result<()> {
        for child in expr.children_mut() {
            self.lower_expr(child)?;
        }
        if matches!(expr.kind, ExprKind::Call { .. }) {
            self.lower_call(expr);
        }
        Ok(())
    }

    fn lower_call(&mut self, expr: &mut Expr) {
        if let Some(lowering) = dict_method_call(expr) {
            if let ExprKind::Call { builtin, .. } = &mut expr.kind {
                *builtin = Some(lowering);
            }
            return;
        }

        let Some(func) = expr.callee_name().and_then(|name| builtins().get(name)) else {
            return;
        };

        if let Some(test) = func.type_test {
            if let Some(lowered) = self.lower_type_test(expr, test) {
                *expr = lowered;
                return;
            }
        }

        if let Some(form) = func.object_form {
            if let [arg] = expr.call_args() {
                if arg.resolved_type.is_any_like() {
                    let value = Box::new(arg.clone());
                    let (kind, ty) = match form {
                        ObjectForm::Bool => (ExprKind::ObjBool { value }, TypeName::bool()),
                        ObjectForm::Len => (ExprKind::ObjLen { value }, TypeName::int64()),
                        ObjectForm::Str => (ExprKind::ObjStr { value }, TypeName::str()),
                    };
                    trace!("lowered {}() over dynamic value", func.name);
                    *expr = carry_metadata(expr, Expr::new(kind, ty));
                    return;
                }
            }
        }

        let target = match &func.coerces_to {
            Some(target) => Some(target.clone()),
            None if func.name == "static_cast" && expr.resolved_type.is_concrete() => {
                Some(expr.resolved_type.clone())
            }
            None => None,
        };
        let lowering = BuiltinCall {
            builtin_name: func.name.clone(),
            runtime_call: func.runtime_call.clone(),
            target,
        };
        if func.has_fixed_result() {
            expr.refine_type(func.ret_type.clone());
        }
        if let ExprKind::Call { builtin, .. } = &mut expr.kind {
            *builtin = Some(lowering);
        }
    }

    /// `isinstance(x, C)` / `issubclass(A, C)` with a class name visible to this unit
    fn lower_type_test(&self, expr: &Expr, test: TypeTest) -> Option<Expr> {
        let [subject, class] = expr.call_args() else {
            return None;
        };
        let class_name = class.name_id()?;
        let id = self.resolve_class(class_name)?;
        let expected = TypeRef { id, name: class_name.to_string() };
        let subject = Box::new(subject.clone());
        let kind = match test {
            TypeTest::IsInstance => ExprKind::IsInstance { value: subject, expected },
            TypeTest::IsSubclass => ExprKind::IsSubclass { actual: subject, expected },
        };
        Some(carry_metadata(expr, Expr::new(kind, TypeName::bool())))
    }
}

/// `d.get(k)` / `d.pop(k)` on a dict-typed owner
fn dict_method_call(expr: &Expr) -> Option<BuiltinCall> {
    let ExprKind::Call { func, .. } = &expr.kind else {
        return None;
    };
    let ExprKind::Attribute { value, attr } = &func.kind else {
        return None;
    };
    value.resolved_type.dict_key()?;
    let runtime_call = match attr.as_str() {
        "get" => RuntimeCall::DictGet,
        "pop" => RuntimeCall::DictPop,
        _ => return None,
    };
    Some(BuiltinCall {
        builtin_name: format!("dict.{}", attr),
        runtime_call,
        target: None,
    })
}

/// Keep span and repr of the node being replaced
fn carry_metadata(original: &Expr, mut replacement: Expr) -> Expr {
    replacement.source_span = original.source_span;
    replacement.repr = original.repr.clone();
    replacement
}

fn build_target_plan(target: Expr, target_type: TypeName) -> TargetPlan {
    let target_type = if target_type.is_unknown() {
        target.resolved_type.clone()
    } else {
        target_type
    };
    match target.kind {
        ExprKind::Name { id } => TargetPlan::NameTarget { id, target_type },
        ExprKind::Tuple { elements } => {
            let elements = elements
                .into_iter()
                .map(|elem| {
                    let ty = elem.resolved_type.clone();
                    build_target_plan(elem, ty)
                })
                .collect();
            let mut plan = TargetPlan::tuple(elements);
            if let TargetPlan::TupleTarget { target_type: ty, .. } = &mut plan {
                *ty = target_type;
            }
            plan
        }
        kind => {
            let mut expr = Expr::new(kind, target.resolved_type);
            expr.source_span = target.source_span;
            expr.repr = target.repr;
            TargetPlan::ExprTarget { target: expr, target_type }
        }
    }
}

fn wrap_truthiness(test: &mut Expr) {
    if !test.resolved_type.is_any_like() {
        return;
    }
    let span = test.source_span;
    let inner = test.take();
    let mut wrapped = Expr::new(ExprKind::ObjBool { value: Box::new(inner) }, TypeName::bool());
    wrapped.source_span = span;
    *test = wrapped;
}

/// `x: T = dynamic` unboxes; `x: object = concrete` boxes
fn insert_box_unbox(annotation: &TypeName, value: &mut Expr) {
    if annotation.is_concrete() && value.resolved_type.is_any_like() {
        let inner = value.take();
        *value = Expr::new(
            ExprKind::Unbox { value: Box::new(inner), target: annotation.clone() },
            annotation.clone(),
        );
    } else if annotation.is_any_like() && value.resolved_type.is_concrete() {
        let inner = value.take();
        *value = Expr::new(ExprKind::Boxed { value: Box::new(inner) }, TypeName::new("object"));
    }
}
