//! Type names for the staged IR
//!
//! Types in the tree are normalized strings such as `int64`, `list[str]` or
//! `dict[str, tuple[int64, float64]]`. `unknown` is the dynamic sentinel.
#![allow(dead_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel for a type the resolver could not decide
pub const UNKNOWN: &str = "unknown";

/// Names that behave like the dynamic top type
const ANY_TYPES: &[&str] = &["Any", "any", "object", "unknown", ""];

const INT_TYPES: &[&str] = &[
    "int8", "uint8", "int16", "uint16", "int32", "uint32", "int64", "uint64",
];

const FLOAT_TYPES: &[&str] = &["float32", "float64"];

/// Normalized static type string
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TypeName(String);

impl TypeName {
    /// Create a type name, trimming whitespace; an empty name becomes `unknown`
    pub fn new(name: impl AsRef<str>) -> Self {
        let trimmed = name.as_ref().trim();
        if trimmed.is_empty() {
            Self::unknown()
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn unknown() -> Self {
        Self(UNKNOWN.to_string())
    }

    pub fn int64() -> Self {
        Self("int64".to_string())
    }

    pub fn float64() -> Self {
        Self("float64".to_string())
    }

    pub fn bool() -> Self {
        Self("bool".to_string())
    }

    pub fn str() -> Self {
        Self("str".to_string())
    }

    pub fn none() -> Self {
        Self("None".to_string())
    }

    pub fn list_of(elem: &TypeName) -> Self {
        Self(format!("list[{}]", elem.0))
    }

    pub fn tuple_of(elems: &[TypeName]) -> Self {
        let parts: Vec<&str> = elems.iter().map(|t| t.as_str()).collect();
        Self(format!("tuple[{}]", parts.join(", ")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True only for the `unknown` sentinel
    pub fn is_unknown(&self) -> bool {
        self.0 == UNKNOWN
    }

    /// Known and not a dynamic top type
    pub fn is_concrete(&self) -> bool {
        !self.is_any_like()
    }

    /// `Any`/`object`/`unknown`, or a union containing one of them
    pub fn is_any_like(&self) -> bool {
        if ANY_TYPES.contains(&self.0.as_str()) {
            return true;
        }
        if self.0.contains('|') {
            return self.0.split('|').map(str::trim).any(|part| ANY_TYPES.contains(&part));
        }
        false
    }

    /// Resolve source-level aliases to their backend names
    pub fn canonical(&self) -> TypeName {
        match self.0.as_str() {
            "int" => Self::int64(),
            "float" => Self::float64(),
            "byte" => Self("uint8".to_string()),
            _ => self.clone(),
        }
    }

    /// Canonical numeric name, or `None` for non-numeric types
    pub fn canonical_numeric(&self) -> Option<TypeName> {
        let canonical = self.canonical();
        if canonical.is_int_like() || canonical.is_float() {
            Some(canonical)
        } else {
            None
        }
    }

    pub fn is_int_like(&self) -> bool {
        self.0 == "int" || INT_TYPES.contains(&self.0.as_str())
    }

    pub fn is_float(&self) -> bool {
        self.0 == "float" || FLOAT_TYPES.contains(&self.0.as_str())
    }

    pub fn is_str(&self) -> bool {
        self.0 == "str"
    }

    /// Concrete-type equality after alias resolution; never true for any-like types
    pub fn matches(&self, other: &TypeName) -> bool {
        let left = self.canonical();
        let right = other.canonical();
        if left.is_any_like() || right.is_any_like() {
            return false;
        }
        left == right
    }

    /// Inner types of a generic `head[...]` type
    pub fn generic_args(&self, head: &str) -> Option<Vec<TypeName>> {
        let rest = self.0.strip_prefix(head)?;
        let inner = rest.strip_prefix('[')?.strip_suffix(']')?.trim();
        if inner.is_empty() {
            return None;
        }
        Some(split_generic_types(inner).into_iter().map(TypeName::new).collect())
    }

    /// `T` of `list[T]`
    pub fn list_element(&self) -> Option<TypeName> {
        let args = self.generic_args("list")?;
        if args.len() == 1 {
            args.into_iter().next()
        } else {
            None
        }
    }

    /// Element types of `tuple[A, B, ...]`
    pub fn tuple_elements(&self) -> Option<Vec<TypeName>> {
        self.generic_args("tuple")
    }

    pub fn is_tuple(&self) -> bool {
        self.tuple_elements().is_some()
    }

    /// `K` of `dict[K, V]`
    pub fn dict_key(&self) -> Option<TypeName> {
        let args = self.generic_args("dict")?;
        if args.len() == 2 {
            args.into_iter().next()
        } else {
            None
        }
    }
}

/// Split a generic argument list at top-level commas
pub fn split_generic_types(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut part = String::new();
    let mut depth = 0usize;
    for ch in text.chars() {
        match ch {
            '[' | '<' => {
                depth += 1;
                part.push(ch);
            }
            ']' | '>' => {
                depth = depth.saturating_sub(1);
                part.push(ch);
            }
            ',' if depth == 0 => {
                out.push(part.trim().to_string());
                part.clear();
            }
            _ => part.push(ch),
        }
    }
    let last = part.trim();
    if !last.is_empty() {
        out.push(last.to_string());
    }
    out
}

impl Default for TypeName {
    fn default() -> Self {
        Self::unknown()
    }
}

impl From<String> for TypeName {
    fn from(value: String) -> Self {
        TypeName::new(value)
    }
}

impl From<&str> for TypeName {
    fn from(value: &str) -> Self {
        TypeName::new(value)
    }
}

impl From<TypeName> for String {
    fn from(value: TypeName) -> Self {
        value.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_name_is_unknown() {
        assert!(TypeName::new("  ").is_unknown());
        assert!(TypeName::default().is_any_like());
    }

    #[test]
    fn test_any_like_unions() {
        assert!(TypeName::new("int64 | Any").is_any_like());
        assert!(!TypeName::new("int64 | None").is_any_like());
        assert!(TypeName::new("object").is_any_like());
    }

    #[test]
    fn test_canonical_aliases() {
        assert_eq!(TypeName::new("int").canonical(), TypeName::int64());
        assert_eq!(TypeName::new("float").canonical(), TypeName::float64());
        assert!(TypeName::new("int").matches(&TypeName::int64()));
        assert!(!TypeName::new("object").matches(&TypeName::new("object")));
    }

    #[test]
    fn test_nested_generics() {
        let t = TypeName::new("dict[str, tuple[int64, list[str]]]");
        assert_eq!(t.dict_key(), Some(TypeName::str()));
        let tuple = TypeName::new("tuple[int64, dict[str, int64]]");
        assert_eq!(
            tuple.tuple_elements(),
            Some(vec![TypeName::int64(), TypeName::new("dict[str, int64]")])
        );
        assert_eq!(TypeName::new("list[list[int64]]").list_element(), Some(TypeName::new("list[int64]")));
        assert_eq!(TypeName::new("list[]").list_element(), None);
    }
}
