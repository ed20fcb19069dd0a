//! Source-language builtins known to the middle end

pub mod builtins;

pub use builtins::{builtins, BuiltinFunc, BuiltinRegistry, ObjectForm, TypeTest};
