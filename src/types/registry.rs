//! Nominal type registry
//!
//! Small-integer type ids with explicit immediate-base lists. Used by the
//! lowering stage for `isinstance`/`issubclass` dispatch and by generators
//! that emit runtime type tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use crate::utils::{Error, Result};

/// Nominal type identity
pub type TypeId = u32;

pub const TID_NONE: TypeId = 0;
pub const TID_BOOL: TypeId = 1;
pub const TID_INT: TypeId = 2;
pub const TID_FLOAT: TypeId = 3;
pub const TID_STR: TypeId = 4;
pub const TID_LIST: TypeId = 5;
pub const TID_DICT: TypeId = 6;
pub const TID_SET: TypeId = 7;
pub const TID_OBJECT: TypeId = 8;

/// First id handed out to user classes
pub const TID_USER_BASE: TypeId = 1000;

/// Builtin names, in id order
const BUILTIN_NAMES: &[(&str, TypeId)] = &[
    ("None", TID_NONE),
    ("bool", TID_BOOL),
    ("int", TID_INT),
    ("float", TID_FLOAT),
    ("str", TID_STR),
    ("list", TID_LIST),
    ("dict", TID_DICT),
    ("set", TID_SET),
    ("object", TID_OBJECT),
];

/// A value as seen by a runtime type query
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List,
    Dict,
    Set,
    /// Class instance, optionally tagged with its nominal id
    Instance { type_id: Option<TypeId> },
    /// Anything else
    Opaque,
}

/// Per-type record
#[derive(Debug, Clone)]
struct TypeEntry {
    name: String,
    bases: Vec<TypeId>,
}

/// Nominal subtype graph
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    entries: BTreeMap<TypeId, TypeEntry>,
    names: HashMap<String, TypeId>,
    next_user_id: TypeId,
}

impl TypeRegistry {
    /// Registry with the builtins preregistered
    pub fn new() -> Self {
        let mut registry = Self {
            entries: BTreeMap::new(),
            names: HashMap::new(),
            next_user_id: TID_USER_BASE,
        };
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        for (name, id) in BUILTIN_NAMES {
            let bases = match *id {
                TID_NONE | TID_OBJECT => vec![],
                TID_BOOL => vec![TID_INT],
                _ => vec![TID_OBJECT],
            };
            self.entries.insert(*id, TypeEntry { name: name.to_string(), bases });
            self.names.insert(name.to_string(), *id);
        }
    }

    /// Drop every user class and restart allocation at the user base
    pub fn reset(&mut self) {
        self.entries.clear();
        self.names.clear();
        self.next_user_id = TID_USER_BASE;
        self.register_builtins();
    }

    pub fn contains(&self, id: TypeId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All registered ids in ascending order
    pub fn ids(&self) -> Vec<TypeId> {
        self.entries.keys().copied().collect()
    }

    fn entry(&self, id: TypeId) -> Result<&TypeEntry> {
        self.entries.get(&id).ok_or(Error::UnknownTypeId(id as i64))
    }

    /// Immediate bases of a type
    pub fn bases(&self, id: TypeId) -> Result<&[TypeId]> {
        Ok(&self.entry(id)?.bases)
    }

    /// Look up a builtin type by name
    ///
    /// User classes are not reachable by name here: class names are scoped to
    /// the unit that declares them, so the lowering stage keeps its own table.
    pub fn type_id_for_name(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    /// Allocate an id for an anonymous class
    pub fn register_class_type(&mut self, base_ids: &[TypeId]) -> Result<TypeId> {
        let name = format!("class#{}", self.next_user_id);
        self.register_named_class(&name, base_ids)
    }

    /// Allocate an id for a named class with the given immediate bases
    pub fn register_named_class(&mut self, name: &str, base_ids: &[TypeId]) -> Result<TypeId> {
        let mut bases: Vec<TypeId> = Vec::new();
        for base in base_ids {
            if !self.contains(*base) {
                return Err(Error::UnknownTypeId(*base as i64));
            }
            if !bases.contains(base) {
                bases.push(*base);
            }
        }
        if bases.is_empty() {
            bases.push(TID_OBJECT);
        }

        let mut id = self.next_user_id;
        while self.entries.contains_key(&id) {
            id += 1;
        }
        self.next_user_id = id + 1;
        debug!("registered class {} as type id {} (bases {:?})", name, id, bases);
        self.entries.insert(id, TypeEntry { name: name.to_string(), bases });
        Ok(id)
    }

    /// Declared name of a registered type
    pub fn name_of(&self, id: TypeId) -> Option<&str> {
        self.entries.get(&id).map(|entry| entry.name.as_str())
    }

    /// Reflexive, transitive reachability over the base graph
    pub fn is_subtype(&self, actual: TypeId, expected: TypeId) -> Result<bool> {
        self.entry(actual)?;
        self.entry(expected)?;
        let mut stack = vec![actual];
        let mut visited = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == expected {
                return Ok(true);
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(entry) = self.entries.get(&current) {
                stack.extend(entry.bases.iter().copied());
            }
        }
        Ok(false)
    }

    pub fn issubclass(&self, actual: TypeId, expected: TypeId) -> Result<bool> {
        self.is_subtype(actual, expected)
    }

    /// Runtime type id of a value; unregistered tags fall back to `object`
    pub fn runtime_type_id(&self, value: &RuntimeValue) -> TypeId {
        match value {
            RuntimeValue::None => TID_NONE,
            RuntimeValue::Bool(_) => TID_BOOL,
            RuntimeValue::Int(_) => TID_INT,
            RuntimeValue::Float(_) => TID_FLOAT,
            RuntimeValue::Str(_) => TID_STR,
            RuntimeValue::List => TID_LIST,
            RuntimeValue::Dict => TID_DICT,
            RuntimeValue::Set => TID_SET,
            RuntimeValue::Instance { type_id: Some(id) } if self.contains(*id) => *id,
            RuntimeValue::Instance { .. } | RuntimeValue::Opaque => TID_OBJECT,
        }
    }

    pub fn isinstance(&self, value: &RuntimeValue, expected: TypeId) -> Result<bool> {
        self.is_subtype(self.runtime_type_id(value), expected)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide registry handle; reads share, registration takes the write lock
#[derive(Debug, Clone, Default)]
pub struct SharedTypeRegistry {
    inner: Arc<RwLock<TypeRegistry>>,
}

impl SharedTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, TypeRegistry> {
        // A poisoned lock still holds a consistent graph: every mutation is a single insert.
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, TypeRegistry> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn register_named_class(&self, name: &str, base_ids: &[TypeId]) -> Result<TypeId> {
        self.write().register_named_class(name, base_ids)
    }

    pub fn is_subtype(&self, actual: TypeId, expected: TypeId) -> Result<bool> {
        self.read().is_subtype(actual, expected)
    }

    pub fn type_id_for_name(&self, name: &str) -> Option<TypeId> {
        self.read().type_id_for_name(name)
    }

    pub fn reset(&self) {
        self.write().reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_hierarchy() {
        let reg = TypeRegistry::new();
        assert!(reg.is_subtype(TID_BOOL, TID_INT).unwrap());
        assert!(reg.is_subtype(TID_BOOL, TID_OBJECT).unwrap());
        assert!(!reg.is_subtype(TID_INT, TID_BOOL).unwrap());
        assert!(!reg.is_subtype(TID_NONE, TID_OBJECT).unwrap());
        assert!(!reg.is_subtype(TID_STR, TID_LIST).unwrap());
    }

    #[test]
    fn test_reflexive_and_object_rooted() {
        let mut reg = TypeRegistry::new();
        let base = reg.register_class_type(&[]).unwrap();
        let child = reg.register_class_type(&[base]).unwrap();
        for id in reg.ids() {
            assert!(reg.is_subtype(id, id).unwrap());
            if id != TID_NONE {
                assert!(reg.is_subtype(id, TID_OBJECT).unwrap(), "{} should reach object", id);
            }
        }
        assert!(reg.is_subtype(child, base).unwrap());
    }

    #[test]
    fn test_transitivity_over_multiple_bases() {
        let mut reg = TypeRegistry::new();
        let a = reg.register_named_class("A", &[]).unwrap();
        let b = reg.register_named_class("B", &[TID_INT]).unwrap();
        let c = reg.register_named_class("C", &[a, b]).unwrap();
        let d = reg.register_named_class("D", &[c]).unwrap();

        let ids = reg.ids();
        for &x in &ids {
            for &y in &ids {
                for &z in &ids {
                    if reg.is_subtype(x, y).unwrap() && reg.is_subtype(y, z).unwrap() {
                        assert!(reg.is_subtype(x, z).unwrap(), "{} <: {} <: {}", x, y, z);
                    }
                }
            }
        }
        assert!(reg.is_subtype(d, TID_INT).unwrap());
        assert!(!reg.is_subtype(a, b).unwrap());
    }

    #[test]
    fn test_user_ids_are_monotonic() {
        let mut reg = TypeRegistry::new();
        let first = reg.register_class_type(&[TID_OBJECT, TID_OBJECT]).unwrap();
        let second = reg.register_class_type(&[first]).unwrap();
        assert_eq!(first, TID_USER_BASE);
        assert_eq!(second, TID_USER_BASE + 1);
        assert_eq!(reg.bases(first).unwrap(), &[TID_OBJECT]);
    }

    #[test]
    fn test_malformed_ids_are_lookup_errors() {
        let mut reg = TypeRegistry::new();
        assert!(matches!(reg.is_subtype(42, TID_OBJECT), Err(Error::UnknownTypeId(42))));
        assert!(matches!(reg.register_class_type(&[999]), Err(Error::UnknownTypeId(999))));
        assert!(reg.bases(TID_USER_BASE).is_err());
    }

    #[test]
    fn test_isinstance_uses_runtime_id() {
        let mut reg = TypeRegistry::new();
        let shape = reg.register_named_class("Shape", &[]).unwrap();
        let circle = reg.register_named_class("Circle", &[shape]).unwrap();

        assert!(reg.isinstance(&RuntimeValue::Bool(true), TID_INT).unwrap());
        assert!(reg.isinstance(&RuntimeValue::Instance { type_id: Some(circle) }, shape).unwrap());
        assert!(!reg.isinstance(&RuntimeValue::Instance { type_id: Some(shape) }, circle).unwrap());
        // Unregistered tags degrade to the generic object id
        assert_eq!(reg.runtime_type_id(&RuntimeValue::Instance { type_id: Some(77) }), TID_OBJECT);
        assert!(!reg.isinstance(&RuntimeValue::None, TID_OBJECT).unwrap());
    }

    #[test]
    fn test_reset_drops_user_classes() {
        let shared = SharedTypeRegistry::new();
        let id = shared.register_named_class("Node", &[]).unwrap();
        assert_eq!(shared.read().name_of(id), Some("Node"));
        shared.reset();
        assert!(!shared.read().contains(id));
        assert_eq!(shared.read().len(), BUILTIN_NAMES.len());
    }

    #[test]
    fn test_user_class_cannot_shadow_builtin_name() {
        let mut reg = TypeRegistry::new();
        let user_int = reg.register_named_class("int", &[]).unwrap();
        let base = reg.register_named_class("Base", &[]).unwrap();

        assert_eq!(reg.type_id_for_name("int"), Some(TID_INT));
        assert_eq!(reg.type_id_for_name("Base"), None);
        assert_eq!(reg.name_of(user_int), Some("int"));
        assert_eq!(reg.name_of(base), Some("Base"));
        assert!(reg.isinstance(&RuntimeValue::Int(3), TID_INT).unwrap());
        assert!(!reg.isinstance(&RuntimeValue::Int(3), user_int).unwrap());
    }
}
