//! Label-keyed breakdown maps stored alongside metric snapshots.
//!
//! Persisted as a JSON object. Reading back is tolerant: absent or
//! corrupt data yields an empty map and a warning, never an error.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BreakdownMap<V>(BTreeMap<String, V>);

/// Ticket counts keyed by category or priority label.
pub type CountBreakdown = BreakdownMap<u64>;

/// Mean durations in minutes keyed by priority label.
pub type DurationBreakdown = BreakdownMap<f64>;

async_graphql::scalar!(CountBreakdown, "CountBreakdown", "Label to ticket count mapping");
async_graphql::scalar!(DurationBreakdown, "DurationBreakdown", "Label to mean minutes mapping");

impl<V> Default for BreakdownMap<V> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<V> BreakdownMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<&V> {
        self.0.get(label)
    }

    pub fn insert(&mut self, label: impl Into<String>, value: V) {
        self.0.insert(label.into(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl CountBreakdown {
    /// Add one occurrence of `label`.
    pub fn increment(&mut self, label: &str) {
        *self.0.entry(label.to_string()).or_insert(0) += 1;
    }

    pub fn count(&self, label: &str) -> u64 {
        self.0.get(label).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.0.values().sum()
    }
}

impl<V: Serialize + DeserializeOwned> BreakdownMap<V> {
    /// Serialize for storage.
    pub fn to_persisted(&self) -> String {
        // A string-keyed map of numbers always serializes
        serde_json::to_string(&self.0).unwrap_or_else(|_| "{}".to_string())
    }

    /// Decode a stored value, defaulting to an empty map on absent or malformed input.
    pub fn from_persisted(raw: Option<&str>) -> Self {
        let raw = match raw.map(str::trim) {
            Some(raw) if !raw.is_empty() => raw,
            _ => return Self::default(),
        };

        match serde_json::from_str::<BTreeMap<String, V>>(raw) {
            Ok(map) => Self(map),
            Err(e) => {
                tracing::warn!(error = %e, "Malformed breakdown map in persisted snapshot, using empty map");
                Self::default()
            }
        }
    }
}

impl<V> FromIterator<(String, V)> for BreakdownMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
