//! Staged IR definitions
//!
//! A typed tree shared by all three stages: syntactic (1), type-resolved (2)
//! and lowered (3). Stage-3-only shapes (loop plans, box/unbox, object
//! coercions, nominal type tests) are produced by `middle::lower` and mapped
//! back by `middle::legacy`.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{TypeId, TypeName};
use crate::utils::{Error, Result, Span};

pub const STAGE_SYNTAX: u8 = 1;
pub const STAGE_TYPED: u8 = 2;
pub const STAGE_LOWERED: u8 = 3;

pub const SCHEMA_VERSION: u32 = 1;

/// Name bound by provably-unused targets
pub const WILDCARD: &str = "_";

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn is_false(value: &bool) -> bool {
    !*value
}

// ==================== Module ====================

/// Root discriminator; only module-shaped roots are accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RootKind {
    #[default]
    Module,
}

/// Root of a compilation unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub kind: RootKind,
    pub east_stage: u8,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub meta: ModuleMeta,
    #[serde(default)]
    pub body: Vec<Stmt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_span: Option<Span>,
}

/// Unit-level metadata
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ModuleMeta {
    #[serde(default)]
    pub dispatch_mode: DispatchMode,
    /// Per-symbol escape summaries, keyed by `func` or `Class.method`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub non_escape_summary: BTreeMap<String, EscapeSummary>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Module {
    pub fn new(east_stage: u8, body: Vec<Stmt>) -> Self {
        Self {
            kind: RootKind::Module,
            east_stage,
            schema_version: SCHEMA_VERSION,
            meta: ModuleMeta::default(),
            body,
            source_span: None,
        }
    }

    /// Parse a JSON document, rejecting anything that is not module-shaped
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        let kind = value.get("kind").and_then(|k| k.as_str());
        if kind != Some("Module") {
            return Err(Error::MalformedRoot(format!(
                "root kind must be Module, got {}",
                kind.unwrap_or("<missing>")
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Fail unless the root carries the expected stage marker
    pub fn expect_stage(&self, expected: u8) -> Result<()> {
        if self.east_stage != expected {
            return Err(Error::StageMismatch { expected, got: self.east_stage });
        }
        Ok(())
    }
}

// ==================== Statements ====================

/// Statement node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stmt {
    #[serde(flatten)]
    pub kind: StmtKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_span: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum StmtKind {
    Expr {
        value: Expr,
    },
    Assign {
        target: Expr,
        value: Expr,
    },
    AnnAssign {
        target: Expr,
        annotation: TypeName,
        #[serde(default)]
        value: Option<Expr>,
    },
    AugAssign {
        target: Expr,
        op: BinOp,
        value: Expr,
    },
    Return {
        #[serde(default)]
        value: Option<Expr>,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    /// Stage-2 loop over an arbitrary iterable
    For {
        target: Expr,
        #[serde(default)]
        target_type: TypeName,
        iter: Expr,
        body: Vec<Stmt>,
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    /// Stage-2 counted loop
    ForRange {
        target: Expr,
        #[serde(default)]
        target_type: TypeName,
        start: Expr,
        stop: Expr,
        #[serde(default = "default_step")]
        step: Expr,
        #[serde(default)]
        range_mode: RangeMode,
        body: Vec<Stmt>,
        #[serde(default)]
        orelse: Vec<Stmt>,
    },
    /// Stage-3 loop driven by an iteration plan
    ForCore {
        #[serde(default)]
        iter_mode: IterMode,
        iter_plan: IterPlan,
        target_plan: TargetPlan,
        body: Vec<Stmt>,
        #[serde(default)]
        orelse: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        normalized_cond: Option<Expr>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        reserve_hints: Vec<ReserveHint>,
    },
    Try {
        body: Vec<Stmt>,
        #[serde(default)]
        handlers: Vec<ExceptHandler>,
        #[serde(default)]
        orelse: Vec<Stmt>,
        #[serde(default)]
        finalbody: Vec<Stmt>,
    },
    Raise {
        #[serde(default)]
        exc: Option<Expr>,
    },
    FunctionDef {
        name: String,
        #[serde(default)]
        params: Vec<Param>,
        #[serde(default)]
        returns: TypeName,
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        escape_summary: Option<EscapeSummary>,
    },
    ClassDef {
        name: String,
        #[serde(default)]
        bases: Vec<String>,
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        type_id: Option<TypeId>,
    },
    Pass,
    Break,
    Continue,
}

fn default_step() -> Expr {
    Expr::int(1)
}

impl StmtKind {
    /// Stage-3 loop with the iteration mode implied by its plan
    pub fn for_core(iter_plan: IterPlan, target_plan: TargetPlan, body: Vec<Stmt>, orelse: Vec<Stmt>) -> Self {
        StmtKind::ForCore {
            iter_mode: IterMode::for_plan(&iter_plan),
            iter_plan,
            target_plan,
            body,
            orelse,
            normalized_cond: None,
            reserve_hints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptHandler {
    #[serde(rename = "type", default)]
    pub exc_type: Option<Expr>,
    #[serde(default)]
    pub name: Option<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub annotation: TypeName,
}

impl Stmt {
    pub fn new(kind: StmtKind) -> Self {
        Self { kind, source_span: None }
    }

    pub fn expr(value: Expr) -> Self {
        Self::new(StmtKind::Expr { value })
    }

    pub fn assign(target: Expr, value: Expr) -> Self {
        Self::new(StmtKind::Assign { target, value })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.source_span = Some(span);
        self
    }

    /// Plain name bound by a simple `x = ...` / `x: T = ...`
    pub fn simple_assign_target(&self) -> Option<&str> {
        match &self.kind {
            StmtKind::Assign { target, .. } | StmtKind::AnnAssign { target, .. } => target.name_id(),
            _ => None,
        }
    }
}

// ==================== Loop Plans ====================

/// How a stage-3 loop iterates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum IterPlan {
    #[serde(rename = "StaticRangeForPlan")]
    StaticRange {
        start: Expr,
        stop: Expr,
        step: Expr,
        #[serde(default)]
        range_mode: RangeMode,
    },
    #[serde(rename = "RuntimeIterForPlan")]
    RuntimeIter {
        iter_expr: Expr,
        #[serde(default)]
        dispatch_mode: DispatchMode,
        #[serde(default = "default_init_op")]
        init_op: String,
        #[serde(default = "default_next_op")]
        next_op: String,
        #[serde(default)]
        iter_item_type: TypeName,
    },
}

fn default_init_op() -> String {
    "ObjIterInit".to_string()
}

fn default_next_op() -> String {
    "ObjIterNext".to_string()
}

impl IterPlan {
    pub fn runtime(iter_expr: Expr, dispatch_mode: DispatchMode) -> Self {
        IterPlan::RuntimeIter {
            iter_expr,
            dispatch_mode,
            init_op: default_init_op(),
            next_op: default_next_op(),
            iter_item_type: TypeName::unknown(),
        }
    }

    pub fn is_static_range(&self) -> bool {
        matches!(self, IterPlan::StaticRange { .. })
    }

    /// Constant bounds `(start, stop, step)` of a static range
    pub fn const_bounds(&self) -> Option<(i64, i64, i64)> {
        match self {
            IterPlan::StaticRange { start, stop, step, .. } => {
                Some((start.const_int()?, stop.const_int()?, step.const_int()?))
            }
            IterPlan::RuntimeIter { .. } => None,
        }
    }

    /// True when constant bounds prove at least one iteration
    pub fn is_statically_non_empty(&self) -> bool {
        match self.const_bounds() {
            Some((_, _, 0)) | None => false,
            Some((start, stop, step)) if step > 0 => start < stop,
            Some((start, stop, _)) => start > stop,
        }
    }
}

/// Loop-level iteration strategy read by code generators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterMode {
    /// Counted loop with no iterator object
    StaticFastpath,
    #[default]
    RuntimeProtocol,
}

impl IterMode {
    pub fn for_plan(plan: &IterPlan) -> Self {
        match plan {
            IterPlan::StaticRange { .. } => IterMode::StaticFastpath,
            IterPlan::RuntimeIter { .. } => IterMode::RuntimeProtocol,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IterMode::StaticFastpath => "static_fastpath",
            IterMode::RuntimeProtocol => "runtime_protocol",
        }
    }
}

/// Capacity a generator may reserve on a list before a counted loop
///
/// `count_expr` evaluates to the loop's trip count using only the loop's
/// bound expressions, so it can be emitted ahead of the loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename = "StaticRangeReserveHint")]
pub struct ReserveHint {
    pub owner: String,
    pub count_kind: String,
    pub count_expr_version: String,
    pub count_expr: Expr,
    pub safe: bool,
    pub safety: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeMode {
    #[default]
    Ascending,
    Descending,
    Dynamic,
}

impl RangeMode {
    pub fn from_step(step: i64) -> Self {
        match step {
            s if s > 0 => RangeMode::Ascending,
            s if s < 0 => RangeMode::Descending,
            _ => RangeMode::Dynamic,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RangeMode::Ascending => "ascending",
            RangeMode::Descending => "descending",
            RangeMode::Dynamic => "dynamic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    #[default]
    Native,
    TypeId,
}

/// How a loop binding site resolves
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TargetPlan {
    NameTarget {
        id: String,
        #[serde(default)]
        target_type: TypeName,
    },
    TupleTarget {
        elements: Vec<TargetPlan>,
        #[serde(default)]
        target_type: TypeName,
        #[serde(default, skip_serializing_if = "is_false")]
        direct_unpack: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        direct_unpack_names: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        direct_unpack_types: Vec<TypeName>,
    },
    ExprTarget {
        target: Expr,
        #[serde(default)]
        target_type: TypeName,
    },
}

impl TargetPlan {
    pub fn name(id: &str, target_type: TypeName) -> Self {
        TargetPlan::NameTarget { id: id.to_string(), target_type }
    }

    pub fn tuple(elements: Vec<TargetPlan>) -> Self {
        TargetPlan::TupleTarget {
            elements,
            target_type: TypeName::unknown(),
            direct_unpack: false,
            direct_unpack_names: Vec::new(),
            direct_unpack_types: Vec::new(),
        }
    }

    /// Identifier of a name target
    pub fn name_id(&self) -> Option<&str> {
        match self {
            TargetPlan::NameTarget { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn target_type(&self) -> &TypeName {
        match self {
            TargetPlan::NameTarget { target_type, .. }
            | TargetPlan::TupleTarget { target_type, .. }
            | TargetPlan::ExprTarget { target_type, .. } => target_type,
        }
    }

    /// Every name bound by this plan
    pub fn bound_names(&self, out: &mut Vec<String>) {
        match self {
            TargetPlan::NameTarget { id, .. } => out.push(id.clone()),
            TargetPlan::TupleTarget { elements, .. } => {
                for elem in elements {
                    elem.bound_names(out);
                }
            }
            TargetPlan::ExprTarget { .. } => {}
        }
    }
}

// ==================== Expressions ====================

/// Coercion obligation attached to an expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cast {
    #[serde(default = "default_cast_on")]
    pub on: String,
    pub from: TypeName,
    pub to: TypeName,
    #[serde(default)]
    pub reason: String,
}

fn default_cast_on() -> String {
    "self".to_string()
}

impl Cast {
    pub fn new(from: TypeName, to: TypeName, reason: &str) -> Self {
        Self { on: default_cast_on(), from, to, reason: reason.to_string() }
    }

    /// `from == to` over concrete types
    pub fn is_noop(&self) -> bool {
        self.from.matches(&self.to)
    }
}

/// Ownership hint for value- vs reference-semantics backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowKind {
    Value,
    ReadonlyRef,
    MutableRef,
}

/// Metadata written by shape passes for code generators
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExprHints {
    #[serde(default, skip_serializing_if = "is_false")]
    pub dict_key_verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iter_element_type: Option<TypeName>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub iterable_trait: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iter_protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_expr: Option<Box<Expr>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normalized_expr_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_escape_callsite: Option<CallsiteSummary>,
}

/// Escape facts for one function or method
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EscapeSummary {
    pub symbol: String,
    pub arg_order: Vec<String>,
    /// Parallel to `arg_order`: the argument may outlive the call
    pub arg_escape: Vec<bool>,
    pub return_escape: bool,
    /// Parallel to `arg_order`: the return value may alias the argument
    pub return_from_args: Vec<bool>,
    #[serde(default)]
    pub unresolved_calls: usize,
}

/// Escape facts joined to one call site
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallsiteSummary {
    pub callee: String,
    pub resolved: bool,
    pub in_return_expr: bool,
    /// Caller parameter indices flowing into each positional argument
    pub arg_sources: Vec<Vec<usize>>,
    #[serde(default)]
    pub callee_arg_escape: Vec<bool>,
    #[serde(default)]
    pub callee_return_from_args: Vec<bool>,
    #[serde(default)]
    pub callee_return_escape: bool,
}

impl ExprHints {
    pub fn is_empty(&self) -> bool {
        *self == ExprHints::default()
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(flatten)]
    pub kind: ExprKind,
    #[serde(default)]
    pub resolved_type: TypeName,
    #[serde(default)]
    pub casts: Vec<Cast>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub borrow_kind: Option<BorrowKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_span: Option<Span>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repr: Option<String>,
    #[serde(default, skip_serializing_if = "ExprHints::is_empty")]
    pub hints: ExprHints,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExprKind {
    Constant {
        value: Literal,
    },
    Name {
        id: String,
    },
    BinOp {
        left: Box<Expr>,
        op: BinOp,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    Compare {
        left: Box<Expr>,
        ops: Vec<CmpOp>,
        comparators: Vec<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    IfExp {
        test: Box<Expr>,
        body: Box<Expr>,
        orelse: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        #[serde(default)]
        args: Vec<Expr>,
        #[serde(default)]
        keywords: Vec<Keyword>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        builtin: Option<BuiltinCall>,
    },
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Subscript {
        value: Box<Expr>,
        slice: Box<Expr>,
    },
    List {
        elements: Vec<Expr>,
    },
    Tuple {
        elements: Vec<Expr>,
    },
    Set {
        elements: Vec<Expr>,
    },
    Dict {
        keys: Vec<Expr>,
        values: Vec<Expr>,
    },
    ListComp {
        elt: Box<Expr>,
        generators: Vec<Comprehension>,
    },
    // ---- stage 3 only ----
    #[serde(rename = "Box")]
    Boxed {
        value: Box<Expr>,
    },
    Unbox {
        value: Box<Expr>,
        target: TypeName,
    },
    CastOrRaise {
        value: Box<Expr>,
        target: TypeName,
    },
    ObjBool {
        value: Box<Expr>,
    },
    ObjLen {
        value: Box<Expr>,
    },
    ObjStr {
        value: Box<Expr>,
    },
    ObjIterInit {
        value: Box<Expr>,
    },
    ObjIterNext {
        iter: Box<Expr>,
    },
    ObjTypeId {
        value: Box<Expr>,
    },
    IsInstance {
        value: Box<Expr>,
        expected: TypeRef,
    },
    IsSubclass {
        actual: Box<Expr>,
        expected: TypeRef,
    },
    IsSubtype {
        actual: Box<Expr>,
        expected: TypeRef,
    },
}

impl ExprKind {
    /// True for shapes that only exist after lowering
    pub fn is_lowered_only(&self) -> bool {
        matches!(
            self,
            ExprKind::Boxed { .. }
                | ExprKind::Unbox { .. }
                | ExprKind::CastOrRaise { .. }
                | ExprKind::ObjBool { .. }
                | ExprKind::ObjLen { .. }
                | ExprKind::ObjStr { .. }
                | ExprKind::ObjIterInit { .. }
                | ExprKind::ObjIterNext { .. }
                | ExprKind::ObjTypeId { .. }
                | ExprKind::IsInstance { .. }
                | ExprKind::IsSubclass { .. }
                | ExprKind::IsSubtype { .. }
        )
    }
}

/// Literal constant payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    None,
}

impl Literal {
    /// Static type of the literal
    pub fn type_name(&self) -> TypeName {
        match self {
            Literal::Bool(_) => TypeName::bool(),
            Literal::Int(_) => TypeName::int64(),
            Literal::Float(_) => TypeName::float64(),
            Literal::Str(_) => TypeName::str(),
            Literal::None => TypeName::none(),
        }
    }

    /// Numeric view; bools are excluded
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Literal::Int(n) => Some(*n as f64),
            Literal::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(true) => write!(f, "True"),
            Literal::Bool(false) => write!(f, "False"),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(x) => write!(f, "{:?}", x),
            Literal::Str(s) => write!(f, "{:?}", s),
            Literal::None => write!(f, "None"),
        }
    }
}

/// Reference to a nominal type id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRef {
    pub id: TypeId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    #[serde(default)]
    pub arg: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comprehension {
    pub target: Expr,
    pub iter: Expr,
    #[serde(default)]
    pub ifs: Vec<Expr>,
}

/// Lowering information for calls to runtime builtins
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuiltinCall {
    /// Source-level builtin name (`range`, `int`, ...)
    pub builtin_name: String,
    pub runtime_call: RuntimeCall,
    /// Explicit conversion target for casts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<TypeName>,
}

/// Runtime helper a builtin call lowers to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuntimeCall {
    StaticCast,
    PyToBool,
    PyToInt64,
    PyToFloat64,
    PyToString,
    PyLen,
    PyRange,
    PyEnumerate,
    DictGet,
    DictPop,
    Other(String),
}

impl RuntimeCall {
    pub fn as_str(&self) -> &str {
        match self {
            RuntimeCall::StaticCast => "static_cast",
            RuntimeCall::PyToBool => "py_to_bool",
            RuntimeCall::PyToInt64 => "py_to_int64",
            RuntimeCall::PyToFloat64 => "py_to_float64",
            RuntimeCall::PyToString => "py_to_string",
            RuntimeCall::PyLen => "py_len",
            RuntimeCall::PyRange => "py_range",
            RuntimeCall::PyEnumerate => "py_enumerate",
            RuntimeCall::DictGet => "dict.get",
            RuntimeCall::DictPop => "dict.pop",
            RuntimeCall::Other(name) => name,
        }
    }

    /// Target type of a `py_to_*` coercion
    pub fn coercion_target(&self) -> Option<TypeName> {
        match self {
            RuntimeCall::PyToBool => Some(TypeName::bool()),
            RuntimeCall::PyToInt64 => Some(TypeName::int64()),
            RuntimeCall::PyToFloat64 => Some(TypeName::float64()),
            RuntimeCall::PyToString => Some(TypeName::str()),
            _ => None,
        }
    }
}

impl From<String> for RuntimeCall {
    fn from(value: String) -> Self {
        match value.as_str() {
            "static_cast" => RuntimeCall::StaticCast,
            "py_to_bool" => RuntimeCall::PyToBool,
            "py_to_int64" => RuntimeCall::PyToInt64,
            "py_to_float64" => RuntimeCall::PyToFloat64,
            "py_to_string" => RuntimeCall::PyToString,
            "py_len" => RuntimeCall::PyLen,
            "py_range" => RuntimeCall::PyRange,
            "py_enumerate" => RuntimeCall::PyEnumerate,
            "dict.get" => RuntimeCall::DictGet,
            "dict.pop" => RuntimeCall::DictPop,
            _ => RuntimeCall::Other(value),
        }
    }
}

impl From<RuntimeCall> for String {
    fn from(value: RuntimeCall) -> Self {
        value.as_str().to_string()
    }
}

/// Binary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mult,
    Div,
    FloorDiv,
    Mod,
    Pow,
    LShift,
    RShift,
    BitOr,
    BitXor,
    BitAnd,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mult => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::BitAnd => "&",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::NotEq => "!=",
            CmpOp::Lt => "<",
            CmpOp::LtE => "<=",
            CmpOp::Gt => ">",
            CmpOp::GtE => ">=",
            CmpOp::Is => "is",
            CmpOp::IsNot => "is not",
            CmpOp::In => "in",
            CmpOp::NotIn => "not in",
        };
        write!(f, "{}", s)
    }
}

/// Unary operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    UAdd,
    USub,
    Not,
    Invert,
}

impl Expr {
    pub fn new(kind: ExprKind, resolved_type: TypeName) -> Self {
        Self {
            kind,
            resolved_type,
            casts: Vec::new(),
            borrow_kind: Some(BorrowKind::Value),
            source_span: None,
            repr: None,
            hints: ExprHints::default(),
        }
    }

    pub fn constant(value: Literal) -> Self {
        let ty = value.type_name();
        let repr = value.to_string();
        let mut expr = Self::new(ExprKind::Constant { value }, ty);
        expr.repr = Some(repr);
        expr
    }

    pub fn int(value: i64) -> Self {
        Self::constant(Literal::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::constant(Literal::Float(value))
    }

    pub fn name(id: &str, resolved_type: impl Into<TypeName>) -> Self {
        let mut expr = Self::new(ExprKind::Name { id: id.to_string() }, resolved_type.into());
        expr.repr = Some(id.to_string());
        expr
    }

    pub fn binop(left: Expr, op: BinOp, right: Expr, resolved_type: impl Into<TypeName>) -> Self {
        Self::new(
            ExprKind::BinOp { left: Box::new(left), op, right: Box::new(right) },
            resolved_type.into(),
        )
    }

    pub fn call(func: &str, args: Vec<Expr>, resolved_type: impl Into<TypeName>) -> Self {
        Self::new(
            ExprKind::Call {
                func: Box::new(Expr::name(func, TypeName::unknown())),
                args,
                keywords: Vec::new(),
                builtin: None,
            },
            resolved_type.into(),
        )
    }

    /// Call already marked as a builtin lowering
    pub fn builtin_call(
        func: &str,
        runtime_call: RuntimeCall,
        args: Vec<Expr>,
        resolved_type: impl Into<TypeName>,
    ) -> Self {
        let mut expr = Self::call(func, args, resolved_type);
        if let ExprKind::Call { builtin, .. } = &mut expr.kind {
            *builtin = Some(BuiltinCall {
                builtin_name: func.to_string(),
                runtime_call,
                target: None,
            });
        }
        expr
    }

    pub fn with_casts(mut self, casts: Vec<Cast>) -> Self {
        self.casts = casts;
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.source_span = Some(span);
        self
    }

    /// Move the node out, leaving a `None` constant in its place
    pub fn take(&mut self) -> Expr {
        std::mem::replace(self, Expr::constant(Literal::None))
    }

    /// Refine an unknown type; concrete types are never overwritten
    pub fn refine_type(&mut self, ty: TypeName) -> bool {
        if self.resolved_type.is_unknown() && !ty.is_unknown() {
            self.resolved_type = ty;
            return true;
        }
        false
    }

    pub fn name_id(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Name { id } => Some(id),
            _ => None,
        }
    }

    pub fn literal(&self) -> Option<&Literal> {
        match &self.kind {
            ExprKind::Constant { value } => Some(value),
            _ => None,
        }
    }

    /// Integer constant value; bools do not count
    pub fn const_int(&self) -> Option<i64> {
        match self.literal()? {
            Literal::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ExprKind::Constant { .. })
    }

    /// Builtin lowering info of a call node
    pub fn builtin(&self) -> Option<&BuiltinCall> {
        match &self.kind {
            ExprKind::Call { builtin, .. } => builtin.as_ref(),
            _ => None,
        }
    }

    /// Name of the called function when it is a plain name
    pub fn callee_name(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Call { func, .. } => func.name_id(),
            _ => None,
        }
    }

    pub fn call_args(&self) -> &[Expr] {
        match &self.kind {
            ExprKind::Call { args, .. } => args,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn range_loop() -> Stmt {
        Stmt::new(StmtKind::for_core(
            IterPlan::StaticRange {
                start: Expr::int(0),
                stop: Expr::int(4),
                step: Expr::int(1),
                range_mode: RangeMode::Ascending,
            },
            TargetPlan::name("i", TypeName::int64()),
            vec![Stmt::new(StmtKind::Pass)],
            vec![],
        ))
    }

    #[test]
    fn test_refine_type_never_retypes() {
        let mut expr = Expr::name("k", TypeName::unknown());
        assert!(expr.refine_type(TypeName::str()));
        assert!(!expr.refine_type(TypeName::int64()));
        assert_eq!(expr.resolved_type, TypeName::str());
    }

    #[test]
    fn test_range_mode_from_step() {
        assert_eq!(RangeMode::from_step(3), RangeMode::Ascending);
        assert_eq!(RangeMode::from_step(-2), RangeMode::Descending);
        assert_eq!(RangeMode::from_step(0), RangeMode::Dynamic);
    }

    #[test]
    fn test_static_non_empty() {
        let plan = |start, stop, step| IterPlan::StaticRange {
            start: Expr::int(start),
            stop: Expr::int(stop),
            step: Expr::int(step),
            range_mode: RangeMode::from_step(step),
        };
        assert!(plan(0, 5, 1).is_statically_non_empty());
        assert!(!plan(5, 5, 1).is_statically_non_empty());
        assert!(plan(5, 0, -2).is_statically_non_empty());
        assert!(!plan(0, 5, -1).is_statically_non_empty());
    }

    #[test]
    fn test_module_json_roundtrip_keeps_shape() {
        let mut module = Module::new(STAGE_LOWERED, vec![range_loop()]);
        module.meta.dispatch_mode = DispatchMode::TypeId;
        let text = module.to_json().unwrap();
        assert!(text.contains("\"StaticRangeForPlan\""));
        assert!(text.contains("\"NameTarget\""));
        assert!(text.contains("\"iter_mode\": \"static_fastpath\""));
        assert!(!text.contains("reserve_hints"));
        let parsed = Module::from_json(&text).unwrap();
        assert_eq!(parsed, module);
    }

    #[test]
    fn test_iter_mode_defaults_to_runtime_protocol() {
        let text = r#"{
            "kind": "ForCore",
            "iter_plan": {"kind": "RuntimeIterForPlan", "iter_expr": {"kind": "Name", "id": "xs"}},
            "target_plan": {"kind": "NameTarget", "id": "x"},
            "body": []
        }"#;
        let stmt: Stmt = serde_json::from_str(text).unwrap();
        match &stmt.kind {
            StmtKind::ForCore { iter_mode, reserve_hints, .. } => {
                assert_eq!(*iter_mode, IterMode::RuntimeProtocol);
                assert!(reserve_hints.is_empty());
            }
            _ => panic!("Expected ForCore"),
        }
    }

    #[test]
    fn test_from_json_rejects_non_module_root() {
        let err = Module::from_json(r#"{"kind": "Expr", "east_stage": 2}"#).unwrap_err();
        assert!(matches!(err, Error::MalformedRoot(_)));
    }

    #[test]
    fn test_literal_json_forms() {
        let text = r#"{"kind": "Constant", "value": 4.0, "resolved_type": "float64"}"#;
        let expr: Expr = serde_json::from_str(text).unwrap();
        assert_eq!(expr.literal(), Some(&Literal::Float(4.0)));
        let text = r#"{"kind": "Constant", "value": -3, "resolved_type": "int64"}"#;
        let expr: Expr = serde_json::from_str(text).unwrap();
        assert_eq!(expr.const_int(), Some(-3));
    }

    #[test]
    fn test_runtime_call_names() {
        assert_eq!(RuntimeCall::from("py_range".to_string()), RuntimeCall::PyRange);
        assert_eq!(RuntimeCall::from("py_custom".to_string()).as_str(), "py_custom");
        assert_eq!(RuntimeCall::PyToString.coercion_target(), Some(TypeName::str()));
    }
}
