//! Per-host variables
//!
//! Actions running on the same host can hand values to each other through a
//! [`VarStore`]. Values are tagged with their type; the lenient accessors
//! ([`string_var`], [`int_var`]) return the zero value both when a key is
//! absent and when it holds another type, while [`VarStore::try_get`]
//! reports the mismatch.

use dashmap::DashMap;
use std::fmt;

use crate::error::VarError;
use crate::traits::Host;

/// A tagged per-host value
#[derive(Debug, Clone, PartialEq)]
pub enum Var {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    List(Vec<String>),
}

impl Var {
    /// Name of the contained type, used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Var::Str(_) => "string",
            Var::Int(_) => "int",
            Var::Float(_) => "float",
            Var::Bool(_) => "bool",
            Var::List(_) => "list",
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Var::Str(s) => f.write_str(s),
            Var::Int(i) => write!(f, "{}", i),
            Var::Float(x) => write!(f, "{}", x),
            Var::Bool(b) => write!(f, "{}", b),
            Var::List(items) => f.write_str(&items.join(",")),
        }
    }
}

impl From<String> for Var {
    fn from(s: String) -> Self {
        Var::Str(s)
    }
}

impl From<&str> for Var {
    fn from(s: &str) -> Self {
        Var::Str(s.to_string())
    }
}

impl From<i64> for Var {
    fn from(i: i64) -> Self {
        Var::Int(i)
    }
}

impl From<i32> for Var {
    fn from(i: i32) -> Self {
        Var::Int(i64::from(i))
    }
}

impl From<u32> for Var {
    fn from(i: u32) -> Self {
        Var::Int(i64::from(i))
    }
}

impl From<f64> for Var {
    fn from(x: f64) -> Self {
        Var::Float(x)
    }
}

impl From<bool> for Var {
    fn from(b: bool) -> Self {
        Var::Bool(b)
    }
}

impl From<Vec<String>> for Var {
    fn from(items: Vec<String>) -> Self {
        Var::List(items)
    }
}

/// Types that can be read back out of a [`Var`]
pub trait FromVar: Sized {
    const TYPE_NAME: &'static str;

    fn from_var(var: &Var) -> Option<Self>;
}

impl FromVar for String {
    const TYPE_NAME: &'static str = "string";

    fn from_var(var: &Var) -> Option<Self> {
        match var {
            Var::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromVar for i64 {
    const TYPE_NAME: &'static str = "int";

    fn from_var(var: &Var) -> Option<Self> {
        match var {
            Var::Int(i) => Some(*i),
            _ => None,
        }
    }
}

impl FromVar for f64 {
    const TYPE_NAME: &'static str = "float";

    fn from_var(var: &Var) -> Option<Self> {
        match var {
            Var::Float(x) => Some(*x),
            _ => None,
        }
    }
}

impl FromVar for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_var(var: &Var) -> Option<Self> {
        match var {
            Var::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromVar for Vec<String> {
    const TYPE_NAME: &'static str = "list";

    fn from_var(var: &Var) -> Option<Self> {
        match var {
            Var::List(items) => Some(items.clone()),
            _ => None,
        }
    }
}

/// Concurrent key/value store attached to a host
#[derive(Debug, Default)]
pub struct VarStore {
    vars: DashMap<String, Var>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: &str, value: impl Into<Var>) {
        self.vars.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Var> {
        self.vars.get(key).map(|v| v.value().clone())
    }

    pub fn remove(&self, key: &str) -> Option<Var> {
        self.vars.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Typed lookup: `Ok(None)` when absent, an error when the stored
    /// value has another type
    pub fn try_get<T: FromVar>(&self, key: &str) -> Result<Option<T>, VarError> {
        let Some(entry) = self.vars.get(key) else {
            return Ok(None);
        };
        T::from_var(entry.value())
            .map(Some)
            .ok_or_else(|| VarError::TypeMismatch {
                key: key.to_string(),
                expected: T::TYPE_NAME,
                actual: entry.value().type_name(),
            })
    }
}

/// String variable, or `""` when absent or not a string
pub fn string_var(host: &dyn Host, key: &str) -> String {
    host.vars()
        .try_get::<String>(key)
        .ok()
        .flatten()
        .unwrap_or_default()
}

/// Integer variable, or `0` when absent or not an integer
pub fn int_var(host: &dyn Host, key: &str) -> i64 {
    host.vars()
        .try_get::<i64>(key)
        .ok()
        .flatten()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalHost;
    use std::collections::HashMap;

    #[test]
    fn test_set_and_get() {
        let store = VarStore::new();
        store.set("release", "v1.2.0");
        store.set("replicas", 3i64);
        assert_eq!(store.get("release"), Some(Var::Str("v1.2.0".into())));
        assert_eq!(store.get("replicas"), Some(Var::Int(3)));
        assert_eq!(store.get("missing"), None);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_try_get_reports_mismatch() {
        let store = VarStore::new();
        store.set("port", "8080");
        let err = store.try_get::<i64>("port").unwrap_err();
        assert_eq!(
            err,
            VarError::TypeMismatch {
                key: "port".into(),
                expected: "int",
                actual: "string",
            }
        );
        assert_eq!(store.try_get::<i64>("absent"), Ok(None));
        assert_eq!(store.try_get::<String>("port"), Ok(Some("8080".into())));
    }

    #[test]
    fn test_lenient_accessors() {
        let host = LocalHost::with_env("node-1", HashMap::new());
        host.set_var("name", Var::from("web"));
        host.set_var("count", Var::from(7i64));

        assert_eq!(string_var(&host, "name"), "web");
        assert_eq!(int_var(&host, "count"), 7);

        // absent and mismatched look the same
        assert_eq!(string_var(&host, "count"), "");
        assert_eq!(string_var(&host, "nope"), "");
        assert_eq!(int_var(&host, "name"), 0);
        assert_eq!(int_var(&host, "nope"), 0);
    }

    #[test]
    fn test_overwrite_replaces_type() {
        let store = VarStore::new();
        store.set("x", 1i64);
        store.set("x", true);
        assert_eq!(store.try_get::<bool>("x"), Ok(Some(true)));
        assert!(store.remove("x").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn test_display() {
        assert_eq!(Var::from(vec!["a".to_string(), "b".to_string()]).to_string(), "a,b");
        assert_eq!(Var::from(42i64).to_string(), "42");
    }
}
