//! Stage-3 optimizer
//!
//! An ordered list of rewrite passes gated by opt level and `+Name`/`-Name`
//! overrides. Every pass runs at most once per invocation, in declared order;
//! there is no cross-pass fixed point.

mod cast_fold;
mod cast_hoist;
mod dict_key;
mod enumerate;
mod expr_normalize;
mod hoist;
mod literal_fold;
mod loop_var_elision;
mod non_escape;
mod range_canonical;
mod repeat;
mod reserve_hint;
mod strength_reduction;
mod tuple_target;

use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use log::{debug, trace};

use crate::feedback::{OptimizationReport, PassTrace};
use crate::middle::ir::{Module, STAGE_LOWERED};
use crate::types::SharedTypeRegistry;
use crate::utils::{Error, Result};

pub use cast_fold::{
    IdentityCoercionElisionPass, LiteralCastFoldPass, NoOpCastCleanupPass,
    NumericCastChainReductionPass,
};
pub use cast_hoist::LoopInvariantCastHoistPass;
pub use dict_key::DictStrKeyNormalizationPass;
pub use enumerate::TypedEnumerateNormalizationPass;
pub use expr_normalize::ExpressionNormalizationPass;
pub use hoist::LoopInvariantHoistLitePass;
pub use literal_fold::LiteralArithmeticFoldPass;
pub use loop_var_elision::UnusedLoopVarElisionPass;
pub use non_escape::{NonEscapeInterproceduralPass, NonEscapePolicy};
pub use range_canonical::RangeForCanonicalizationPass;
pub use repeat::TypedRepeatMaterializationPass;
pub use reserve_hint::SafeReserveHintPass;
pub use strength_reduction::StrengthReductionFloatLoopPass;
pub use tuple_target::TupleTargetDirectExpansionPass;

/// Upper bound on total rewrites per unit
pub const DEFAULT_REWRITE_BUDGET: usize = 1_000_000;

/// Optimization pass trait
pub trait OptimizationPass: Send {
    /// Stable pass name, used in traces and overrides
    fn name(&self) -> &'static str;

    /// Lowest opt level at which the pass runs by default
    fn min_opt_level(&self) -> u8 {
        1
    }

    /// Mutate the module in place and report what changed
    fn run(&mut self, module: &mut Module, ctx: &PassContext) -> Result<PassResult>;
}

/// Result of a single pass run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassResult {
    pub changed: bool,
    pub change_count: usize,
    pub warnings: Vec<String>,
    pub elapsed: Duration,
}

impl PassResult {
    /// Result whose `changed` flag agrees with the count
    pub fn from_count(change_count: usize) -> Self {
        Self {
            changed: change_count > 0,
            change_count,
            ..Self::default()
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    /// Fold another result into this one
    pub fn merge(&mut self, other: &PassResult) {
        self.changed |= other.changed;
        self.change_count += other.change_count;
        self.elapsed += other.elapsed;
        self.warnings.extend(other.warnings.iter().cloned());
    }

    fn check_contract(&self, pass: &str) -> Result<()> {
        if self.changed != (self.change_count > 0) {
            return Err(Error::PassContract {
                pass: pass.to_string(),
                reason: format!(
                    "changed={} disagrees with change_count={}",
                    self.changed, self.change_count
                ),
            });
        }
        Ok(())
    }
}

/// Per-run configuration shared by all passes
#[derive(Debug, Clone)]
pub struct PassContext {
    pub opt_level: u8,
    pub target_lang: String,
    pub enabled_passes: BTreeSet<String>,
    pub disabled_passes: BTreeSet<String>,
    pub debug_flags: BTreeMap<String, String>,
    pub registry: SharedTypeRegistry,
    pub rewrite_budget: usize,
    pub non_escape_policy: NonEscapePolicy,
}

impl PassContext {
    pub fn new(opt_level: u8) -> Self {
        Self {
            opt_level,
            target_lang: String::new(),
            enabled_passes: BTreeSet::new(),
            disabled_passes: BTreeSet::new(),
            debug_flags: BTreeMap::new(),
            registry: SharedTypeRegistry::new(),
            rewrite_budget: DEFAULT_REWRITE_BUDGET,
            non_escape_policy: NonEscapePolicy::default(),
        }
    }

    pub fn with_target_lang(mut self, target_lang: &str) -> Self {
        self.target_lang = target_lang.to_string();
        self
    }

    pub fn with_overrides(mut self, enabled: BTreeSet<String>, disabled: BTreeSet<String>) -> Self {
        self.enabled_passes = enabled;
        self.disabled_passes = disabled;
        self
    }

    pub fn with_registry(mut self, registry: SharedTypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_rewrite_budget(mut self, budget: usize) -> Self {
        self.rewrite_budget = budget;
        self
    }

    pub fn with_non_escape_policy(mut self, policy: NonEscapePolicy) -> Self {
        self.non_escape_policy = policy;
        self
    }

    /// disabled > enabled > opt-level default
    pub fn is_pass_enabled(&self, name: &str, min_opt_level: u8) -> bool {
        if self.disabled_passes.contains(name) {
            return false;
        }
        if self.enabled_passes.contains(name) {
            return true;
        }
        self.opt_level >= min_opt_level
    }
}

impl Default for PassContext {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Runs passes in declared order
pub struct PassManager {
    passes: Vec<Box<dyn OptimizationPass>>,
}

impl PassManager {
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Add an optimization pass
    pub fn add_pass(&mut self, pass: Box<dyn OptimizationPass>) {
        self.passes.push(pass);
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run every pass once. A failing pass aborts the whole run.
    pub fn run(&mut self, module: &mut Module, ctx: &PassContext) -> Result<OptimizationReport> {
        let mut report = OptimizationReport::new(ctx.opt_level, &ctx.target_lang);
        report.enabled_passes = ctx.enabled_passes.iter().cloned().collect();
        report.disabled_passes = ctx.disabled_passes.iter().cloned().collect();

        let mut rewrites = 0usize;
        for pass in &mut self.passes {
            let name = pass.name();
            if !ctx.is_pass_enabled(name, pass.min_opt_level()) {
                trace!("skipping pass {} (opt_level={})", name, ctx.opt_level);
                report.record(PassTrace::skipped(name));
                continue;
            }

            let start = Instant::now();
            let mut result = match pass.run(module, ctx) {
                Ok(result) => result,
                Err(err @ Error::PassContract { .. }) => return Err(err),
                Err(err) => {
                    return Err(Error::PassContract {
                        pass: name.to_string(),
                        reason: err.to_string(),
                    })
                }
            };
            result.elapsed = start.elapsed();
            result.check_contract(name)?;

            rewrites += result.change_count;
            if rewrites > ctx.rewrite_budget {
                return Err(Error::RewriteBudgetExceeded {
                    pass: name.to_string(),
                    budget: ctx.rewrite_budget,
                });
            }

            debug!(
                "pass {} changed={} count={} elapsed={:?}",
                name, result.changed, result.change_count, result.elapsed
            );
            report.record(PassTrace {
                name: name.to_string(),
                enabled: true,
                changed: result.changed,
                change_count: result.change_count,
                elapsed_ms: result.elapsed.as_secs_f64() * 1000.0,
                warnings: result.warnings,
            });
        }
        Ok(report)
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

/// The declared pass order
pub fn build_default_pass_manager() -> PassManager {
    let mut manager = PassManager::new();
    manager.add_pass(Box::new(NoOpCastCleanupPass::new()));
    manager.add_pass(Box::new(LiteralCastFoldPass::new()));
    manager.add_pass(Box::new(IdentityCoercionElisionPass::new()));
    manager.add_pass(Box::new(NumericCastChainReductionPass::new()));
    manager.add_pass(Box::new(LiteralArithmeticFoldPass::new()));
    manager.add_pass(Box::new(RangeForCanonicalizationPass::new()));
    manager.add_pass(Box::new(SafeReserveHintPass::new()));
    manager.add_pass(Box::new(TypedEnumerateNormalizationPass::new()));
    manager.add_pass(Box::new(TypedRepeatMaterializationPass::new()));
    manager.add_pass(Box::new(DictStrKeyNormalizationPass::new()));
    manager.add_pass(Box::new(TupleTargetDirectExpansionPass::new()));
    manager.add_pass(Box::new(NonEscapeInterproceduralPass::new()));
    manager.add_pass(Box::new(LoopInvariantCastHoistPass::new()));
    manager.add_pass(Box::new(UnusedLoopVarElisionPass::new()));
    manager.add_pass(Box::new(LoopInvariantHoistLitePass::new()));
    manager.add_pass(Box::new(StrengthReductionFloatLoopPass::new()));
    manager.add_pass(Box::new(ExpressionNormalizationPass::new()));
    manager
}

// ==================== Configuration ====================

/// `""` means the default level 1
pub fn resolve_opt_level(text: &str) -> Result<u8> {
    match text.trim() {
        "" => Ok(1),
        "0" => Ok(0),
        "1" => Ok(1),
        "2" => Ok(2),
        other => Err(Error::InvalidOptLevel(other.to_string())),
    }
}

/// Parse `+Name,-Name,...` into `(enabled, disabled)`; later tokens win
pub fn parse_pass_overrides(overrides: &str) -> Result<(BTreeSet<String>, BTreeSet<String>)> {
    let mut enabled = BTreeSet::new();
    let mut disabled = BTreeSet::new();
    for raw in overrides.split(',') {
        let item = raw.trim();
        if item.is_empty() {
            continue;
        }
        let mut chars = item.chars();
        let sign = chars.next();
        let name = chars.as_str().trim();
        if !matches!(sign, Some('+') | Some('-')) || !is_valid_pass_name(name) {
            return Err(Error::InvalidPassToken(item.to_string()));
        }
        let name = canonical_pass_name(name);
        if sign == Some('+') {
            disabled.remove(name);
            enabled.insert(name.to_string());
        } else {
            enabled.remove(name);
            disabled.insert(name.to_string());
        }
    }
    Ok((enabled, disabled))
}

/// Older pass names still accepted in overrides
const PASS_ALIASES: &[(&str, &str)] = &[("IdentityPyToElisionPass", "IdentityCoercionElisionPass")];

fn canonical_pass_name(name: &str) -> &str {
    PASS_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, canonical)| canonical)
}

fn is_valid_pass_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Optimizer settings as given on the command line
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub opt_level: String,
    pub pass_spec: String,
    pub target_lang: String,
    pub debug_flags: BTreeMap<String, String>,
    pub rewrite_budget: usize,
}

impl OptimizerConfig {
    /// Validate into a pass context; nothing is touched on error
    pub fn to_context(&self, registry: &SharedTypeRegistry) -> Result<PassContext> {
        let level = resolve_opt_level(&self.opt_level)?;
        let (enabled, disabled) = parse_pass_overrides(&self.pass_spec)?;
        let mut ctx = PassContext::new(level)
            .with_target_lang(&self.target_lang)
            .with_overrides(enabled, disabled)
            .with_registry(registry.clone())
            .with_rewrite_budget(self.rewrite_budget);
        ctx.debug_flags = self.debug_flags.clone();
        Ok(ctx)
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            opt_level: "1".to_string(),
            pass_spec: String::new(),
            target_lang: String::new(),
            debug_flags: BTreeMap::new(),
            rewrite_budget: DEFAULT_REWRITE_BUDGET,
        }
    }
}

/// Validate configuration, then run the pass pipeline over a stage-3 module
pub fn optimize_module(
    module: &mut Module,
    config: &OptimizerConfig,
    registry: &SharedTypeRegistry,
    manager: Option<&mut PassManager>,
) -> Result<OptimizationReport> {
    let ctx = config.to_context(registry)?;
    module.expect_stage(STAGE_LOWERED)?;
    match manager {
        Some(manager) => manager.run(module, &ctx),
        None => build_default_pass_manager().run(module, &ctx),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::middle::ir::{
        Expr, IterPlan, Module, RangeMode, Stmt, StmtKind, TargetPlan, STAGE_LOWERED,
    };
    use crate::types::TypeName;

    pub fn module(body: Vec<Stmt>) -> Module {
        Module::new(STAGE_LOWERED, body)
    }

    pub fn static_loop(target: &str, start: i64, stop: i64, step: i64, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::for_core(
            IterPlan::StaticRange {
                start: Expr::int(start),
                stop: Expr::int(stop),
                step: Expr::int(step),
                range_mode: RangeMode::from_step(step),
            },
            TargetPlan::name(target, TypeName::int64()),
            body,
            vec![],
        ))
    }

    pub fn runtime_loop(iter_expr: Expr, target_plan: TargetPlan, body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::for_core(IterPlan::runtime(iter_expr, Default::default()), target_plan, body, vec![]))
    }

    pub fn assign(name: &str, value: Expr) -> Stmt {
        let ty = value.resolved_type.clone();
        Stmt::assign(Expr::name(name, ty), value)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::middle::ir::{BinOp, Expr, RuntimeCall, StmtKind, TargetPlan, WILDCARD};
    use pretty_assertions::assert_eq;

    struct LyingPass;

    impl OptimizationPass for LyingPass {
        fn name(&self) -> &'static str {
            "LyingPass"
        }

        fn run(&mut self, _module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
            Ok(PassResult { changed: true, ..PassResult::default() })
        }
    }

    struct CountingPass(usize);

    impl OptimizationPass for CountingPass {
        fn name(&self) -> &'static str {
            "CountingPass"
        }

        fn run(&mut self, _module: &mut Module, _ctx: &PassContext) -> Result<PassResult> {
            Ok(PassResult::from_count(self.0).with_warning("counted"))
        }
    }

    #[test]
    fn test_resolve_opt_level() {
        assert_eq!(resolve_opt_level("").unwrap(), 1);
        assert_eq!(resolve_opt_level("0").unwrap(), 0);
        assert_eq!(resolve_opt_level(" 2 ").unwrap(), 2);
        assert!(matches!(resolve_opt_level("3"), Err(Error::InvalidOptLevel(t)) if t == "3"));
        assert!(resolve_opt_level("fast").is_err());
    }

    #[test]
    fn test_parse_overrides() {
        let (enabled, disabled) = parse_pass_overrides(" +A, -B ,, +C").unwrap();
        assert_eq!(enabled.into_iter().collect::<Vec<_>>(), vec!["A", "C"]);
        assert_eq!(disabled.into_iter().collect::<Vec<_>>(), vec!["B"]);
    }

    #[test]
    fn test_later_override_wins() {
        let (enabled, disabled) = parse_pass_overrides("+A,-A").unwrap();
        assert!(enabled.is_empty());
        assert!(disabled.contains("A"));
        let (enabled, disabled) = parse_pass_overrides("-A,+A").unwrap();
        assert!(enabled.contains("A"));
        assert!(disabled.is_empty());
    }

    #[test]
    fn test_former_pass_name_is_accepted() {
        let (enabled, disabled) = parse_pass_overrides("-IdentityPyToElisionPass,+LoopInvariantHoistLitePass").unwrap();
        assert!(disabled.contains("IdentityCoercionElisionPass"));
        assert!(!disabled.contains("IdentityPyToElisionPass"));
        assert!(enabled.contains("LoopInvariantHoistLitePass"));

        let config = OptimizerConfig { pass_spec: "-IdentityPyToElisionPass".to_string(), ..OptimizerConfig::default() };
        let report = optimize_module(&mut module(vec![]), &config, &SharedTypeRegistry::new(), None).unwrap();
        assert!(!report.find("IdentityCoercionElisionPass").unwrap().enabled);
    }

    #[test]
    fn test_malformed_tokens_name_the_token() {
        for token in ["A", "+", "-", "+Bad-Name", "+a b"] {
            match parse_pass_overrides(token) {
                Err(Error::InvalidPassToken(t)) => assert_eq!(t, token),
                other => panic!("Expected InvalidPassToken for {:?}, got {:?}", token, other),
            }
        }
    }

    #[test]
    fn test_contract_violation_is_fatal() {
        let mut manager = PassManager::new();
        manager.add_pass(Box::new(LyingPass));
        let err = manager.run(&mut module(vec![]), &PassContext::new(1)).unwrap_err();
        assert!(matches!(err, Error::PassContract { pass, .. } if pass == "LyingPass"));
    }

    #[test]
    fn test_rewrite_budget() {
        let mut manager = PassManager::new();
        manager.add_pass(Box::new(CountingPass(5)));
        let ctx = PassContext::new(1).with_rewrite_budget(4);
        let err = manager.run(&mut module(vec![]), &ctx).unwrap_err();
        assert!(matches!(err, Error::RewriteBudgetExceeded { budget: 4, .. }));
    }

    #[test]
    fn test_summary_and_warnings() {
        let mut manager = PassManager::new();
        manager.add_pass(Box::new(CountingPass(2)));
        manager.add_pass(Box::new(CountingPass(0)));
        let report = manager.run(&mut module(vec![]), &PassContext::new(1)).unwrap();
        assert!(report.changed);
        assert_eq!(report.change_count, 2);
        assert_eq!(report.warnings, vec!["counted", "counted"]);
    }

    #[test]
    fn test_default_order() {
        let manager = build_default_pass_manager();
        let names = manager.pass_names();
        assert_eq!(names.len(), 17);
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("RangeForCanonicalizationPass") < pos("SafeReserveHintPass"));
        assert!(pos("NonEscapeInterproceduralPass") < pos("LoopInvariantCastHoistPass"));
        assert!(pos("LoopInvariantCastHoistPass") < pos("UnusedLoopVarElisionPass"));
        assert!(pos("RangeForCanonicalizationPass") < pos("UnusedLoopVarElisionPass"));
        assert!(pos("RangeForCanonicalizationPass") < pos("LoopInvariantHoistLitePass"));
        assert!(pos("LiteralArithmeticFoldPass") < pos("LoopInvariantHoistLitePass"));
        assert_eq!(*names.last().unwrap(), "ExpressionNormalizationPass");
    }

    #[test]
    fn test_override_precedence_in_trace() {
        let config = OptimizerConfig {
            opt_level: "1".to_string(),
            pass_spec: "+LoopInvariantHoistLitePass,-NoOpCastCleanupPass".to_string(),
            ..OptimizerConfig::default()
        };
        let mut m = module(vec![]);
        let report = optimize_module(&mut m, &config, &SharedTypeRegistry::new(), None).unwrap();
        assert!(report.find("LoopInvariantHoistLitePass").unwrap().enabled);
        assert!(!report.find("NoOpCastCleanupPass").unwrap().enabled);
        assert!(!report.find("StrengthReductionFloatLoopPass").unwrap().enabled);
        assert!(report.find("RangeForCanonicalizationPass").unwrap().enabled);
        assert_eq!(report.trace.len(), 17);
        assert_eq!(report.enabled_passes, vec!["LoopInvariantHoistLitePass"]);
    }

    #[test]
    fn test_opt_level_zero_runs_nothing() {
        let config = OptimizerConfig { opt_level: "0".to_string(), ..OptimizerConfig::default() };
        let mut m = module(vec![static_loop("i", 0, 3, 1, vec![])]);
        let report = optimize_module(&mut m, &config, &SharedTypeRegistry::new(), None).unwrap();
        assert!(report.trace.iter().all(|t| !t.enabled));
        assert!(!report.changed);
    }

    #[test]
    fn test_bad_config_leaves_tree_untouched() {
        let config = OptimizerConfig { pass_spec: "Oops".to_string(), ..OptimizerConfig::default() };
        let original = module(vec![static_loop("i", 0, 3, 1, vec![])]);
        let mut m = original.clone();
        let err = optimize_module(&mut m, &config, &SharedTypeRegistry::new(), None).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(m, original);
    }

    #[test]
    fn test_requires_stage3() {
        let mut m = module(vec![]);
        m.east_stage = 2;
        let err = optimize_module(&mut m, &OptimizerConfig::default(), &SharedTypeRegistry::new(), None)
            .unwrap_err();
        assert!(matches!(err, Error::StageMismatch { expected: 3, got: 2 }));
    }

    /// `for i in range(5): y = 2 + 3` after lowering
    #[test]
    fn test_end_to_end_fold_elide_hoist() {
        let range = Expr::builtin_call("range", RuntimeCall::PyRange, vec![Expr::int(5)], "range");
        let body = vec![assign("y", Expr::binop(Expr::int(2), BinOp::Add, Expr::int(3), "int64"))];
        let mut m = module(vec![runtime_loop(range, TargetPlan::name("i", "int64".into()), body)]);
        let config = OptimizerConfig { opt_level: "2".to_string(), ..OptimizerConfig::default() };
        let report = optimize_module(&mut m, &config, &SharedTypeRegistry::new(), None).unwrap();
        assert!(report.changed);

        assert_eq!(m.body.len(), 2);
        match &m.body[0].kind {
            StmtKind::Assign { target, value } => {
                assert_eq!(target.name_id(), Some("y"));
                assert_eq!(value.const_int(), Some(5));
            }
            _ => panic!("Expected hoisted assignment"),
        }
        match &m.body[1].kind {
            StmtKind::ForCore { iter_plan, target_plan, body, .. } => {
                assert!(iter_plan.is_static_range());
                assert_eq!(target_plan.name_id(), Some(WILDCARD));
                assert!(body.is_empty());
            }
            _ => panic!("Expected loop"),
        }
        let y_assigns = m
            .body
            .iter()
            .filter(|s| s.simple_assign_target() == Some("y"))
            .count();
        assert_eq!(y_assigns, 1);
    }
}
