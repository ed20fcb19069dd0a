//! Built-in Functions Registry
//!
//! Signatures of the source-language builtins that lowering rewrites:
//! runtime helper names, result types and dynamic-object forms.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::middle::ir::RuntimeCall;
use crate::types::TypeName;

/// Explicit node a builtin lowers to when its argument is dynamically typed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectForm {
    Bool,
    Len,
    Str,
}

/// Nominal type test builtins
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTest {
    IsInstance,
    IsSubclass,
}

/// Built-in function signature
#[derive(Debug, Clone)]
pub struct BuiltinFunc {
    pub name: String,
    pub params: Vec<(String, TypeName)>,
    pub ret_type: TypeName,
    /// Runtime helper the call lowers to
    pub runtime_call: RuntimeCall,
    /// Target type for coercion builtins (`int(x)`, `str(x)`, ...)
    pub coerces_to: Option<TypeName>,
    pub object_form: Option<ObjectForm>,
    pub type_test: Option<TypeTest>,
}

impl BuiltinFunc {
    fn plain(name: &str, params: &[(&str, &str)], ret: &str, runtime_call: RuntimeCall) -> Self {
        Self {
            name: name.to_string(),
            params: params
                .iter()
                .map(|(p, t)| (p.to_string(), TypeName::new(t)))
                .collect(),
            ret_type: TypeName::new(ret),
            runtime_call,
            coerces_to: None,
            object_form: None,
            type_test: None,
        }
    }

    fn coercion(name: &str, runtime_call: RuntimeCall) -> Self {
        let target = runtime_call.coercion_target();
        let mut func = Self::plain(name, &[("value", "object")], "unknown", runtime_call);
        if let Some(target) = target {
            func.ret_type = target.clone();
            func.coerces_to = Some(target);
        }
        func
    }

    /// True when the result type does not depend on the arguments
    pub fn has_fixed_result(&self) -> bool {
        !self.ret_type.is_unknown()
    }
}

/// Registry of all built-in functions
pub struct BuiltinRegistry {
    functions: HashMap<String, BuiltinFunc>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        registry.register_all();
        registry
    }

    fn register_all(&mut self) {
        // Iteration
        self.register(BuiltinFunc::plain(
            "range",
            &[("start", "int64"), ("stop", "int64"), ("step", "int64")],
            "range",
            RuntimeCall::PyRange,
        ));
        self.register(BuiltinFunc::plain(
            "enumerate",
            &[("iterable", "object")],
            "unknown",
            RuntimeCall::PyEnumerate,
        ));

        // Coercions
        let mut to_bool = BuiltinFunc::coercion("bool", RuntimeCall::PyToBool);
        to_bool.object_form = Some(ObjectForm::Bool);
        self.register(to_bool);
        self.register(BuiltinFunc::coercion("int", RuntimeCall::PyToInt64));
        self.register(BuiltinFunc::coercion("float", RuntimeCall::PyToFloat64));
        let mut to_str = BuiltinFunc::coercion("str", RuntimeCall::PyToString);
        to_str.object_form = Some(ObjectForm::Str);
        self.register(to_str);
        self.register(BuiltinFunc::plain(
            "static_cast",
            &[("value", "object")],
            "unknown",
            RuntimeCall::StaticCast,
        ));

        // Containers
        let mut len = BuiltinFunc::plain("len", &[("value", "object")], "int64", RuntimeCall::PyLen);
        len.object_form = Some(ObjectForm::Len);
        self.register(len);

        // Type tests
        let mut isinstance = BuiltinFunc::plain(
            "isinstance",
            &[("value", "object"), ("cls", "type")],
            "bool",
            RuntimeCall::Other("py_isinstance".to_string()),
        );
        isinstance.type_test = Some(TypeTest::IsInstance);
        self.register(isinstance);
        let mut issubclass = BuiltinFunc::plain(
            "issubclass",
            &[("cls", "type"), ("base", "type")],
            "bool",
            RuntimeCall::Other("py_issubclass".to_string()),
        );
        issubclass.type_test = Some(TypeTest::IsSubclass);
        self.register(issubclass);
    }

    fn register(&mut self, func: BuiltinFunc) {
        self.functions.insert(func.name.clone(), func);
    }

    /// Check if a function is a built-in
    pub fn is_builtin(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Get a built-in function by name
    pub fn get(&self, name: &str) -> Option<&BuiltinFunc> {
        self.functions.get(name)
    }

    /// Get all built-in functions
    pub fn all(&self) -> impl Iterator<Item = &BuiltinFunc> {
        self.functions.values()
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide table, populated on first use and read-only afterwards
pub fn builtins() -> &'static BuiltinRegistry {
    static REGISTRY: OnceLock<BuiltinRegistry> = OnceLock::new();
    REGISTRY.get_or_init(BuiltinRegistry::new)
}
