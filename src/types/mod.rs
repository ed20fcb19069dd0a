//! Type names and the nominal type registry

pub mod registry;
pub mod type_system;

pub use registry::{SharedTypeRegistry, TypeId, TypeRegistry};
pub use type_system::TypeName;
