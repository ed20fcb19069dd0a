//! Interprocedural escape summaries
//!
//! Summarizes, for every top-level function and class method of a unit,
//! which arguments may outlive the call and which may flow into the return
//! value. Calls the unit cannot resolve are treated as escaping. Summaries
//! are propagated through resolved call sites to a fixed point and written
//! to the function, each call site and the module metadata.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, trace};

use crate::middle::ir::{CallsiteSummary, EscapeSummary, Expr, ExprKind, Module, Stmt, StmtKind};
use crate::utils::Result;

use super::{OptimizationPass, PassContext, PassResult};

/// How unknown code is assumed to treat values handed to it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonEscapePolicy {
    /// Arguments passed to an unresolved plain call escape
    pub unknown_call_escape: bool,
    /// Arguments passed to an unresolved method call escape
    pub unknown_attr_call_escape: bool,
    /// Any returned value counts as escaping
    pub return_escape_by_default: bool,
}

impl Default for NonEscapePolicy {
    fn default() -> Self {
        Self { unknown_call_escape: true, unknown_attr_call_escape: true, return_escape_by_default: true }
    }
}

pub struct NonEscapeInterproceduralPass;

impl NonEscapeInterproceduralPass {
    pub fn new() -> Self {
        Self
    }
}

/// Position of a function in the module: top-level index, then class member index
type SymbolPath = (usize, Option<usize>);

#[derive(Debug, Clone)]
struct CallSite {
    callee: Option<String>,
    is_method_call: bool,
    in_return_expr: bool,
    arg_sources: Vec<Vec<usize>>,
}

/// `func` for top-level functions, `Class.method` for methods
fn collect_symbols(body: &[Stmt]) -> BTreeMap<String, SymbolPath> {
    let mut symbols = BTreeMap::new();
    for (idx, stmt) in body.iter().enumerate() {
        match &stmt.kind {
            StmtKind::FunctionDef { name, .. } => {
                symbols.insert(name.clone(), (idx, None));
            }
            StmtKind::ClassDef { name: class_name, body, .. } => {
                for (member, child) in body.iter().enumerate() {
                    if let StmtKind::FunctionDef { name, .. } = &child.kind {
                        symbols.insert(format!("{}.{}", class_name, name), (idx, Some(member)));
                    }
                }
            }
            _ => {}
        }
    }
    symbols
}

fn function_at(body: &[Stmt], path: SymbolPath) -> Option<&Stmt> {
    let top = body.get(path.0)?;
    match (path.1, &top.kind) {
        (None, _) => Some(top),
        (Some(member), StmtKind::ClassDef { body, .. }) => body.get(member),
        _ => None,
    }
}

fn function_at_mut(body: &mut [Stmt], path: SymbolPath) -> Option<&mut Stmt> {
    let top = body.get_mut(path.0)?;
    match path.1 {
        None => Some(top),
        Some(member) => match &mut top.kind {
            StmtKind::ClassDef { body, .. } => body.get_mut(member),
            _ => None,
        },
    }
}

// ==================== Call walks ====================

/// Pre-order over every call; the flag marks a call that is itself a returned value
fn for_each_call<'a, F>(stmts: &'a [Stmt], f: &mut F)
where
    F: FnMut(&'a Expr, bool),
{
    for stmt in stmts {
        let is_return = matches!(stmt.kind, StmtKind::Return { .. });
        for expr in stmt.exprs() {
            expr_calls(expr, is_return, f);
        }
        for block in stmt.blocks() {
            for_each_call(block, f);
        }
    }
}

fn expr_calls<'a, F>(expr: &'a Expr, in_return: bool, f: &mut F)
where
    F: FnMut(&'a Expr, bool),
{
    if matches!(expr.kind, ExprKind::Call { .. }) {
        f(expr, in_return);
    }
    for child in expr.children() {
        expr_calls(child, false, f);
    }
}

/// Same order as `for_each_call`
fn for_each_call_mut<F>(stmts: &mut [Stmt], f: &mut F)
where
    F: FnMut(&mut Expr),
{
    for stmt in stmts.iter_mut() {
        for expr in stmt.exprs_mut() {
            expr_calls_mut(expr, f);
        }
        for block in stmt.blocks_mut() {
            for_each_call_mut(block, f);
        }
    }
}

fn expr_calls_mut<F>(expr: &mut Expr, f: &mut F)
where
    F: FnMut(&mut Expr),
{
    if matches!(expr.kind, ExprKind::Call { .. }) {
        f(expr);
    }
    for child in expr.children_mut() {
        expr_calls_mut(child, f);
    }
}

// ==================== Local facts ====================

/// Resolved callee, and whether the call goes through an attribute
fn resolve_callee(call: &Expr, owner_class: Option<&str>, known: &BTreeMap<String, SymbolPath>) -> (Option<String>, bool) {
    let ExprKind::Call { func, .. } = &call.kind else {
        return (None, false);
    };
    match &func.kind {
        ExprKind::Name { id } => (known.contains_key(id).then(|| id.clone()), false),
        ExprKind::Attribute { value, attr } => {
            let Some(owner) = value.name_id() else {
                return (None, true);
            };
            if let (Some(class_name), "self") = (owner_class, owner) {
                let target = format!("{}.{}", class_name, attr);
                if known.contains_key(&target) {
                    return (Some(target), true);
                }
            }
            let target = format!("{}.{}", owner, attr);
            (known.contains_key(&target).then_some(target), true)
        }
        _ => (None, false),
    }
}

/// Parameter indices referenced anywhere in `expr`
fn param_refs(expr: &Expr, params: &HashMap<&str, usize>) -> BTreeSet<usize> {
    let mut out = BTreeSet::new();
    expr.any(&mut |e| {
        if let Some(idx) = e.name_id().and_then(|id| params.get(id)) {
            out.insert(*idx);
        }
        false
    });
    out
}

/// Whether any `return` carries a value; parameters referenced by returned values
fn returned_params(stmts: &[Stmt], params: &HashMap<&str, usize>, out: &mut BTreeSet<usize>) -> bool {
    let mut has_value = false;
    for stmt in stmts {
        if let StmtKind::Return { value: Some(value) } = &stmt.kind {
            has_value = true;
            out.extend(param_refs(value, params));
        }
        for block in stmt.blocks() {
            has_value |= returned_params(block, params, out);
        }
    }
    has_value
}

fn local_summary(
    symbol: &str,
    func: &Stmt,
    known: &BTreeMap<String, SymbolPath>,
    policy: &NonEscapePolicy,
) -> (EscapeSummary, Vec<CallSite>) {
    let StmtKind::FunctionDef { params, body, .. } = &func.kind else {
        return (EscapeSummary { symbol: symbol.to_string(), ..EscapeSummary::default() }, Vec::new());
    };
    let arg_order: Vec<String> = params.iter().map(|p| p.name.clone()).collect();
    let index: HashMap<&str, usize> = arg_order.iter().enumerate().map(|(i, n)| (n.as_str(), i)).collect();
    let owner_class = symbol.split_once('.').map(|(class_name, _)| class_name);

    let mut arg_escape = vec![false; arg_order.len()];
    let mut sites = Vec::new();
    for_each_call(body, &mut |call, in_return_expr| {
        let (callee, is_method_call) = resolve_callee(call, owner_class, known);
        let arg_sources: Vec<Vec<usize>> =
            call.call_args().iter().map(|arg| param_refs(arg, &index).into_iter().collect()).collect();
        let escapes = if is_method_call { policy.unknown_attr_call_escape } else { policy.unknown_call_escape };
        if callee.is_none() && escapes {
            for idx in arg_sources.iter().flatten() {
                arg_escape[*idx] = true;
            }
        }
        sites.push(CallSite { callee, is_method_call, in_return_expr, arg_sources });
    });

    let mut returned = BTreeSet::new();
    let has_return_value = returned_params(body, &index, &mut returned);
    let return_from_args: Vec<bool> = (0..arg_order.len()).map(|i| returned.contains(&i)).collect();
    let unresolved_calls = sites.iter().filter(|s| s.callee.is_none()).count();
    let unresolved_escape = sites.iter().any(|s| {
        s.callee.is_none()
            && if s.is_method_call { policy.unknown_attr_call_escape } else { policy.unknown_call_escape }
    });
    let return_escape = (has_return_value && policy.return_escape_by_default)
        || return_from_args.iter().any(|b| *b)
        || unresolved_escape;

    let summary = EscapeSummary {
        symbol: symbol.to_string(),
        arg_order,
        arg_escape,
        return_escape,
        return_from_args,
        unresolved_calls,
    };
    (summary, sites)
}

// ==================== Propagation ====================

/// Mark every caller parameter feeding an argument whose callee flag is set
fn mark_sources(flags: &[bool], sources: &[Vec<usize>], out: &mut [bool]) -> bool {
    let mut changed = false;
    for (flag, refs) in flags.iter().zip(sources) {
        if !*flag {
            continue;
        }
        for idx in refs {
            if let Some(slot) = out.get_mut(*idx) {
                if !*slot {
                    *slot = true;
                    changed = true;
                }
            }
        }
    }
    changed
}

fn propagate(summaries: &mut BTreeMap<String, EscapeSummary>, sites: &BTreeMap<String, Vec<CallSite>>) -> usize {
    let mut rounds = 0;
    let mut changed = true;
    while changed {
        changed = false;
        rounds += 1;
        let symbols: Vec<String> = summaries.keys().cloned().collect();
        for symbol in &symbols {
            let Some(mut current) = summaries.get(symbol).cloned() else {
                continue;
            };
            for site in sites.get(symbol).map(Vec::as_slice).unwrap_or_default() {
                let Some(callee) = site.callee.as_ref().and_then(|c| summaries.get(c)) else {
                    continue;
                };
                changed |= mark_sources(&callee.arg_escape, &site.arg_sources, &mut current.arg_escape);
                if site.in_return_expr {
                    if callee.return_escape && !current.return_escape {
                        current.return_escape = true;
                        changed = true;
                    }
                    changed |= mark_sources(&callee.return_from_args, &site.arg_sources, &mut current.return_from_args);
                }
            }
            if current.return_from_args.iter().any(|b| *b) && !current.return_escape {
                current.return_escape = true;
                changed = true;
            }
            summaries.insert(symbol.clone(), current);
        }
    }
    rounds
}

fn callsite_summary(site: &CallSite, summaries: &BTreeMap<String, EscapeSummary>) -> CallsiteSummary {
    let callee = site.callee.as_ref().and_then(|c| summaries.get(c));
    CallsiteSummary {
        callee: site.callee.clone().unwrap_or_default(),
        resolved: site.callee.is_some(),
        in_return_expr: site.in_return_expr,
        arg_sources: site.arg_sources.clone(),
        callee_arg_escape: callee.map(|s| s.arg_escape.clone()).unwrap_or_default(),
        callee_return_from_args: callee.map(|s| s.return_from_args.clone()).unwrap_or_default(),
        callee_return_escape: callee.map_or(false, |s| s.return_escape),
    }
}

impl OptimizationPass for NonEscapeInterproceduralPass {
    fn name(&self) -> &'static str {
        "NonEscapeInterproceduralPass"
    }

    fn run(&mut self, module: &mut Module, ctx: &PassContext) -> Result<PassResult> {
        let symbols = collect_symbols(&module.body);
        if symbols.is_empty() {
            return Ok(PassResult::default());
        }

        let mut summaries = BTreeMap::new();
        let mut sites = BTreeMap::new();
        for (symbol, path) in &symbols {
            let Some(func) = function_at(&module.body, *path) else {
                continue;
            };
            let (summary, calls) = local_summary(symbol, func, &symbols, &ctx.non_escape_policy);
            trace!("{}: {} call sites, {} unresolved", symbol, calls.len(), summary.unresolved_calls);
            summaries.insert(symbol.clone(), summary);
            sites.insert(symbol.clone(), calls);
        }
        let rounds = propagate(&mut summaries, &sites);
        debug!("escape summaries for {} symbols settled after {} rounds", summaries.len(), rounds);

        let mut annotations = 0;
        for (symbol, path) in &symbols {
            let Some(func) = function_at_mut(&mut module.body, *path) else {
                continue;
            };
            let StmtKind::FunctionDef { body, escape_summary, .. } = &mut func.kind else {
                continue;
            };
            let summary = summaries.get(symbol).cloned();
            if *escape_summary != summary {
                *escape_summary = summary;
                annotations += 1;
            }
            let own_sites = sites.get(symbol).map(Vec::as_slice).unwrap_or_default();
            let mut next = own_sites.iter();
            for_each_call_mut(body, &mut |call| {
                let Some(site) = next.next() else {
                    return;
                };
                let payload = Some(callsite_summary(site, &summaries));
                if call.hints.non_escape_callsite != payload {
                    call.hints.non_escape_callsite = payload;
                    annotations += 1;
                }
            });
        }

        let mut count = annotations;
        if module.meta.non_escape_summary != summaries {
            count += summaries.len();
            module.meta.non_escape_summary = summaries;
        }
        Ok(PassResult::from_count(count))
    }
}

impl Default for NonEscapeInterproceduralPass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::middle::ir::Param;
    use crate::types::TypeName;
    use pretty_assertions::assert_eq;

    fn run_with(m: &mut Module, policy: NonEscapePolicy) -> PassResult {
        let ctx = PassContext::new(1).with_non_escape_policy(policy);
        NonEscapeInterproceduralPass::new().run(m, &ctx).unwrap()
    }

    fn run(m: &mut Module) -> PassResult {
        run_with(m, NonEscapePolicy::default())
    }

    fn def(name: &str, params: &[&str], body: Vec<Stmt>) -> Stmt {
        Stmt::new(StmtKind::FunctionDef {
            name: name.to_string(),
            params: params
                .iter()
                .map(|p| Param { name: p.to_string(), annotation: TypeName::new("list[int64]") })
                .collect(),
            returns: TypeName::unknown(),
            body,
            escape_summary: None,
        })
    }

    fn ret(value: Expr) -> Stmt {
        Stmt::new(StmtKind::Return { value: Some(value) })
    }

    fn list(id: &str) -> Expr {
        Expr::name(id, "list[int64]")
    }

    fn method_call(owner: &str, attr: &str, args: Vec<Expr>) -> Expr {
        let func = Expr::new(
            ExprKind::Attribute { value: Box::new(Expr::name(owner, "unknown")), attr: attr.to_string() },
            TypeName::unknown(),
        );
        Expr::new(ExprKind::Call { func: Box::new(func), args, keywords: vec![], builtin: None }, TypeName::unknown())
    }

    fn summary<'a>(m: &'a Module, symbol: &str) -> &'a EscapeSummary {
        m.meta.non_escape_summary.get(symbol).unwrap()
    }

    #[test]
    fn test_sink_escape_propagates_to_callers() {
        let m_body = vec![
            def("sink", &["xs"], vec![Stmt::expr(Expr::call("store", vec![list("xs")], "None"))]),
            def("pure", &["xs"], vec![Stmt::new(StmtKind::Pass)]),
            def(
                "caller",
                &["a", "b"],
                vec![
                    Stmt::expr(Expr::call("sink", vec![list("a")], "None")),
                    Stmt::expr(Expr::call("pure", vec![list("b")], "None")),
                ],
            ),
        ];
        let mut m = module(m_body);
        let result = run(&mut m);
        assert!(result.changed);

        assert_eq!(summary(&m, "sink").arg_escape, vec![true]);
        assert_eq!(summary(&m, "sink").unresolved_calls, 1);
        assert_eq!(summary(&m, "pure").arg_escape, vec![false]);
        assert!(!summary(&m, "pure").return_escape);
        let caller = summary(&m, "caller");
        assert_eq!(caller.arg_order, vec!["a", "b"]);
        assert_eq!(caller.arg_escape, vec![true, false]);
        assert_eq!(caller.unresolved_calls, 0);

        match &m.body[2].kind {
            StmtKind::FunctionDef { escape_summary, body, .. } => {
                assert_eq!(escape_summary.as_ref(), Some(caller));
                let StmtKind::Expr { value } = &body[0].kind else {
                    panic!("Expected call statement");
                };
                let site = value.hints.non_escape_callsite.as_ref().unwrap();
                assert_eq!(site.callee, "sink");
                assert!(site.resolved);
                assert_eq!(site.arg_sources, vec![vec![0]]);
                assert_eq!(site.callee_arg_escape, vec![true]);
            }
            _ => panic!("Expected FunctionDef"),
        }

        // Second run finds nothing new
        assert!(!run(&mut m).changed);
    }

    #[test]
    fn test_return_flow_through_calls() {
        let mut m = module(vec![
            def("identity", &["x"], vec![ret(list("x"))]),
            def("wrap", &["y", "z"], vec![ret(Expr::call("identity", vec![list("y")], "list[int64]"))]),
        ]);
        run(&mut m);
        assert_eq!(summary(&m, "identity").return_from_args, vec![true]);
        let wrap = summary(&m, "wrap");
        assert_eq!(wrap.return_from_args, vec![true, false]);
        assert!(wrap.return_escape);
        assert_eq!(wrap.arg_escape, vec![false, false]);
    }

    #[test]
    fn test_recursive_cycle_reaches_fixed_point() {
        let mut m = module(vec![
            def("ping", &["a"], vec![Stmt::expr(Expr::call("pong", vec![list("a")], "None"))]),
            def(
                "pong",
                &["b"],
                vec![
                    Stmt::expr(Expr::call("ping", vec![list("b")], "None")),
                    Stmt::expr(method_call("log", "write", vec![list("b")])),
                ],
            ),
        ]);
        run(&mut m);
        assert_eq!(summary(&m, "pong").arg_escape, vec![true]);
        assert_eq!(summary(&m, "ping").arg_escape, vec![true]);
    }

    #[test]
    fn test_methods_resolve_through_self() {
        let class = Stmt::new(StmtKind::ClassDef {
            name: "Box".to_string(),
            bases: vec![],
            body: vec![
                def("keep", &["self", "v"], vec![Stmt::new(StmtKind::Pass)]),
                def("put", &["self", "v"], vec![Stmt::expr(method_call("self", "keep", vec![list("v")]))]),
            ],
            type_id: None,
        });
        let mut m = module(vec![class]);
        run(&mut m);
        let put = summary(&m, "Box.put");
        assert_eq!(put.arg_escape, vec![false, false]);
        assert_eq!(put.unresolved_calls, 0);
        assert!(m.meta.non_escape_summary.contains_key("Box.keep"));
    }

    #[test]
    fn test_policy_relaxes_unknown_calls() {
        let body = vec![
            Stmt::expr(Expr::call("store", vec![list("a")], "None")),
            Stmt::expr(method_call("log", "write", vec![list("b")])),
        ];
        let policy = NonEscapePolicy { unknown_call_escape: false, ..NonEscapePolicy::default() };
        let mut m = module(vec![def("f", &["a", "b"], body)]);
        run_with(&mut m, policy);
        let f = summary(&m, "f");
        assert_eq!(f.arg_escape, vec![false, true]);
        assert_eq!(f.unresolved_calls, 2);
    }

    #[test]
    fn test_module_without_functions_is_untouched() {
        let mut m = module(vec![assign("x", Expr::int(1))]);
        assert!(!run(&mut m).changed);
        assert!(m.meta.non_escape_summary.is_empty());
    }
}
