//! Status conditions.
//!
//! A `Conditions` list holds at most one entry per condition type. Slots are
//! addressed by a stable index returned from [`Conditions::upsert`]; entries
//! are never removed, so an index stays valid for the lifetime of the list.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Well-known condition types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    /// The resource matches its upstream record.
    Ready,
    /// Upstream calls are still in progress.
    Pending,
    /// Upstream calls could not be completed.
    Error,
}

impl ConditionType {
    /// The string stored in `Condition::type`.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "Ready",
            Self::Pending => "Pending",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for ConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tri-state condition status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        };
        f.write_str(text)
    }
}

/// A single typed, timestamped status entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    /// A zero-valued placeholder for `type_`.
    pub fn placeholder(type_: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            ..Self::default()
        }
    }

    /// Whether the condition is `True`.
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Ordered list of conditions, unique by type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions(Vec<Condition>);

impl Conditions {
    /// Create an empty list.
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Position of the entry for `type_`, if any.
    pub fn position(&self, type_: &str) -> Option<usize> {
        self.0.iter().position(|c| c.type_ == type_)
    }

    /// Whether an entry for `type_` exists.
    pub fn contains(&self, type_: &str) -> bool {
        self.position(type_).is_some()
    }

    /// The entry for `type_`, if any.
    pub fn get(&self, type_: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// The entry at a slot index.
    pub fn slot(&self, index: usize) -> Option<&Condition> {
        self.0.get(index)
    }

    /// Mutable access to the entry at a slot index.
    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Condition> {
        self.0.get_mut(index)
    }

    /// Find the slot for `type_`, appending a placeholder when absent.
    ///
    /// Returns the slot index and whether the entry existed before the call.
    pub fn upsert(&mut self, type_: &str) -> (usize, bool) {
        if let Some(index) = self.position(type_) {
            return (index, true);
        }
        let index = self.0.len();
        self.0.push(Condition::placeholder(type_));
        (index, false)
    }

    /// Iterate the entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Condition> {
        self.0.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'a> IntoIterator for &'a Conditions {
    type Item = &'a Condition;
    type IntoIter = std::slice::Iter<'a, Condition>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
