//! Explicit environment maps.
//!
//! Session parameters travel to child processes through an [`Environment`] value that is
//! handed to the spawned command. The launcher's own process environment is never written.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Environment changes requested by the driver.
///
/// `null` deletes the variable; strings are set as-is; any other JSON value is set to its
/// JSON text (`true`, `42`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EnvOverlay(BTreeMap<String, serde_json::Value>);

impl EnvOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0
            .insert(key.into(), serde_json::Value::String(value.into()));
        self
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), serde_json::Value::Null);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The change requested for `key`: `Some(None)` means delete.
    pub fn get(&self, key: &str) -> Option<Option<String>> {
        self.0.get(key).map(env_value)
    }

    pub fn changes(&self) -> impl Iterator<Item = (&str, Option<String>)> {
        self.0.iter().map(|(k, v)| (k.as_str(), env_value(v)))
    }
}

fn env_value(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// A complete environment for a child process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of this process's environment. Non-UTF-8 entries are skipped.
    pub fn inherited() -> Self {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.vars.remove(key)
    }

    pub fn apply(&mut self, overlay: &EnvOverlay) {
        for (key, change) in overlay.changes() {
            match change {
                Some(value) => {
                    self.vars.insert(key.to_string(), value);
                }
                None => {
                    self.vars.remove(key);
                }
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
