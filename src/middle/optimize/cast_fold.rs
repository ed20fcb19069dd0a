//! Cast-folding passes
//!
//! Four level-1 passes that remove coercions already proven to be identities.
//! Every guard requires both sides to be concretely typed.

use crate::middle::ir::{Expr, ExprKind, Module, RuntimeCall};
use crate::middle::visit::{rewrite_block_exprs, visit_block_exprs};
use crate::types::TypeName;
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

/// Runtime call, explicit target and sole argument of a one-argument builtin call
fn single_builtin_arg(expr: &Expr) -> Option<(&RuntimeCall, Option<&TypeName>, &Expr)> {
    match &expr.kind {
        ExprKind::Call { args, keywords, builtin: Some(builtin), .. }
            if args.len() == 1 && keywords.is_empty() =>
        {
            Some((&builtin.runtime_call, builtin.target.as_ref(), &args[0]))
        }
        _ => None,
    }
}

/// Move the only argument out of a call
fn take_single_arg(expr: &mut Expr) -> Option<Expr> {
    match &mut expr.kind {
        ExprKind::Call { args, .. } if args.len() == 1 => args.pop(),
        _ => None,
    }
}

/// Move the wrapped value out of an `Unbox`/`CastOrRaise`
fn take_wrapped(expr: &mut Expr) -> Option<Expr> {
    match &mut expr.kind {
        ExprKind::Unbox { value, .. } | ExprKind::CastOrRaise { value, .. } => Some(value.take()),
        _ => None,
    }
}

// ==================== No-op Cast Cleanup ====================

/// Drops `casts` entries whose concrete `from` equals `to`
pub struct NoOpCastCleanupPass;

impl NoOpCastCleanupPass {
    pub fn new() -> Self {
        Self
    }
}

impl OptimizationPass for NoOpCastCleanupPass {
    fn name(&self) -> &'static str {
        "NoOpCastCleanupPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = visit_block_exprs(&mut module.body, &mut |expr| {
            let before = expr.casts.len();
            expr.casts.retain(|cast| !cast.is_noop());
            before - expr.casts.len()
        });
        Ok(PassResult::from_count(count))
    }
}

impl Default for NoOpCastCleanupPass {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Literal Cast Fold ====================

/// `static_cast(<constant>)` to the constant's own type becomes the constant
pub struct LiteralCastFoldPass;

impl LiteralCastFoldPass {
    pub fn new() -> Self {
        Self
    }

    fn try_fold(expr: &mut Expr) -> Option<Expr> {
        let (call, _, arg) = single_builtin_arg(expr)?;
        if *call != RuntimeCall::StaticCast || !arg.is_constant() {
            return None;
        }
        if !expr.resolved_type.matches(&arg.resolved_type) {
            return None;
        }
        let span = expr.source_span;
        let repr = expr.repr.clone().filter(|r| !r.is_empty());
        let mut folded = take_single_arg(expr)?;
        if span.is_some() {
            folded.source_span = span;
        }
        if repr.is_some() {
            folded.repr = repr;
        }
        Some(folded)
    }
}

impl OptimizationPass for LiteralCastFoldPass {
    fn name(&self) -> &'static str {
        "LiteralCastFoldPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = rewrite_block_exprs(&mut module.body, &mut Self::try_fold);
        Ok(PassResult::from_count(count))
    }
}

impl Default for LiteralCastFoldPass {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Identity Coercion Elision ====================

/// `py_to_*` / `static_cast` calls and `Unbox` / `CastOrRaise` wrappers whose
/// argument already has the target type are replaced by the argument
pub struct IdentityCoercionElisionPass;

impl IdentityCoercionElisionPass {
    pub fn new() -> Self {
        Self
    }

    fn call_target(expr: &Expr) -> Option<(TypeName, &Expr)> {
        let (call, target, arg) = single_builtin_arg(expr)?;
        let target = match call {
            RuntimeCall::StaticCast => match target {
                Some(t) if !t.is_unknown() => t.canonical(),
                _ => expr.resolved_type.canonical(),
            },
            other => other.coercion_target()?,
        };
        Some((target, arg))
    }

    fn try_fold(expr: &mut Expr) -> Option<Expr> {
        if let Some((target, arg)) = Self::call_target(expr) {
            if arg.resolved_type.matches(&target) {
                return take_single_arg(expr);
            }
            return None;
        }
        let (value, target) = match &expr.kind {
            ExprKind::Unbox { value, target } | ExprKind::CastOrRaise { value, target } => (value, target),
            _ => return None,
        };
        let target = if target.is_unknown() { &expr.resolved_type } else { target };
        if target.is_any_like() || !value.resolved_type.matches(target) {
            return None;
        }
        take_wrapped(expr)
    }
}

impl OptimizationPass for IdentityCoercionElisionPass {
    fn name(&self) -> &'static str {
        "IdentityCoercionElisionPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = rewrite_block_exprs(&mut module.body, &mut Self::try_fold);
        Ok(PassResult::from_count(count))
    }
}

impl Default for IdentityCoercionElisionPass {
    fn default() -> Self {
        Self::new()
    }
}

// ==================== Numeric Cast Chain Reduction ====================

/// Numeric `static_cast` / `Unbox` between equal numeric types
pub struct NumericCastChainReductionPass;

impl NumericCastChainReductionPass {
    pub fn new() -> Self {
        Self
    }

    fn try_fold(expr: &mut Expr) -> Option<Expr> {
        if let Some((call, _, arg)) = single_builtin_arg(expr) {
            if *call != RuntimeCall::StaticCast || arg.resolved_type.is_any_like() {
                return None;
            }
            let dst = expr.resolved_type.canonical_numeric()?;
            let src = arg.resolved_type.canonical_numeric()?;
            return if src == dst { take_single_arg(expr) } else { None };
        }
        let ExprKind::Unbox { value, target } = &expr.kind else {
            return None;
        };
        let dst = target
            .canonical_numeric()
            .or_else(|| expr.resolved_type.canonical_numeric())?;
        if value.resolved_type.is_any_like() {
            return None;
        }
        let src = value.resolved_type.canonical_numeric()?;
        if src != dst {
            return None;
        }
        take_wrapped(expr)
    }
}

impl OptimizationPass for NumericCastChainReductionPass {
    fn name(&self) -> &'static str {
        "NumericCastChainReductionPass"
    }

    fn run(&mut self, module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
        let count = rewrite_block_exprs(&mut module.body, &mut Self::try_fold);
        Ok(PassResult::from_count(count))
    }
}

impl Default for NumericCastChainReductionPass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::middle::ir::{BinOp, Cast, Stmt, StmtKind};
    use crate::utils::Span;
    use pretty_assertions::assert_eq;

    fn static_cast(arg: Expr, to: &str) -> Expr {
        Expr::builtin_call("static_cast", RuntimeCall::StaticCast, vec![arg], to)
    }

    fn unbox(value: Expr, target: &str) -> Expr {
        Expr::new(
            ExprKind::Unbox { value: Box::new(value), target: TypeName::new(target) },
            TypeName::new(target),
        )
    }

    fn value_of(module: &Module, idx: usize) -> &Expr {
        match &module.body[idx].kind {
            StmtKind::Assign { value, .. } => value,
            StmtKind::Expr { value } => value,
            _ => panic!("Expected assignment or expression statement"),
        }
    }

    fn run_twice(pass: &mut dyn OptimizationPass, module: &mut Module) -> (PassResult, PassResult) {
        let ctx = PassContext::new(1);
        let first = pass.run(module, &ctx).unwrap();
        let once = module.clone();
        let second = pass.run(module, &ctx).unwrap();
        assert_eq!(*module, once);
        (first, second)
    }

    #[test]
    fn test_noop_cast_cleanup() {
        let x = Expr::name("x", "int64").with_casts(vec![
            Cast::new("int64".into(), "int".into(), "numeric_promotion"),
            Cast::new("int64".into(), "float64".into(), "numeric_promotion"),
            Cast::new(TypeName::unknown(), TypeName::unknown(), "dynamic"),
        ]);
        let mut m = module(vec![Stmt::expr(x)]);
        let (first, second) = run_twice(&mut NoOpCastCleanupPass::new(), &mut m);
        assert_eq!(first.change_count, 1);
        assert!(!second.changed);
        let casts = &value_of(&m, 0).casts;
        assert_eq!(casts.len(), 2);
        assert_eq!(casts[0].to, TypeName::float64());
    }

    #[test]
    fn test_literal_cast_fold_keeps_call_span() {
        let span = Span::new(3, 4, 3, 18);
        let mut call = static_cast(Expr::int(7), "int64").with_span(span);
        call.repr = Some("static_cast(7)".to_string());
        let mut m = module(vec![assign("a", call), assign("b", static_cast(Expr::int(7), "float64"))]);
        let (first, second) = run_twice(&mut LiteralCastFoldPass::new(), &mut m);
        assert_eq!(first.change_count, 1);
        assert!(!second.changed);
        let folded = value_of(&m, 0);
        assert_eq!(folded.const_int(), Some(7));
        assert_eq!(folded.source_span, Some(span));
        assert_eq!(folded.repr.as_deref(), Some("static_cast(7)"));
        assert!(value_of(&m, 1).builtin().is_some());
    }

    #[test]
    fn test_identity_coercion_elision() {
        let to_int = Expr::builtin_call("int", RuntimeCall::PyToInt64, vec![Expr::name("n", "int")], "int64");
        let to_str = Expr::builtin_call("str", RuntimeCall::PyToString, vec![Expr::name("n", "int64")], "str");
        let dynamic = Expr::builtin_call("int", RuntimeCall::PyToInt64, vec![Expr::name("o", "object")], "int64");
        let mut m = module(vec![
            assign("a", to_int),
            assign("b", to_str),
            assign("c", dynamic),
            assign("d", unbox(Expr::name("f", "float64"), "float64")),
        ]);
        let (first, second) = run_twice(&mut IdentityCoercionElisionPass::new(), &mut m);
        assert_eq!(first.change_count, 2);
        assert!(!second.changed);
        assert_eq!(value_of(&m, 0).name_id(), Some("n"));
        assert!(value_of(&m, 1).builtin().is_some());
        assert!(value_of(&m, 2).builtin().is_some());
        assert_eq!(value_of(&m, 3).name_id(), Some("f"));
    }

    #[test]
    fn test_any_typed_unbox_is_kept() {
        let mut m = module(vec![assign("a", unbox(Expr::name("v", "Any"), "Any"))]);
        let result = IdentityCoercionElisionPass::new().run(&mut m, &PassContext::new(1)).unwrap();
        assert!(!result.changed);
    }

    #[test]
    fn test_numeric_chain_reduction() {
        let sum = Expr::binop(Expr::name("a", "int"), BinOp::Add, Expr::name("b", "int"), "int");
        let mut m = module(vec![
            assign("x", static_cast(sum, "int64")),
            assign("y", static_cast(Expr::name("a", "int64"), "float64")),
            assign("z", unbox(Expr::name("q", "float"), "float64")),
        ]);
        let (first, second) = run_twice(&mut NumericCastChainReductionPass::new(), &mut m);
        assert_eq!(first.change_count, 2);
        assert!(!second.changed);
        assert!(matches!(value_of(&m, 0).kind, ExprKind::BinOp { .. }));
        assert!(value_of(&m, 1).builtin().is_some());
        assert_eq!(value_of(&m, 2).name_id(), Some("q"));
    }
}
