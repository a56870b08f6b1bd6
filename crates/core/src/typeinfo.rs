//! Typed identifiers and the reference objects the upstream API expects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Minimum number of targets on one escalation rule.
pub const MIN_ESCALATION_RULE_TARGETS: usize = 1;
/// Maximum number of targets on one escalation rule.
pub const MAX_ESCALATION_RULE_TARGETS: usize = 10;

pub const USER_REFERENCE: &str = "user_reference";
pub const TEAM_REFERENCE: &str = "team_reference";
pub const ESCALATION_POLICY_REFERENCE: &str = "escalation_policy_reference";

/// Reference to another upstream object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiReference {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub type_: String,
}

impl ApiReference {
    /// Create a reference.
    pub fn new(id: impl Into<String>, type_: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_: type_.into(),
        }
    }
}

/// Generic upstream object header as returned in responses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiObject {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_url: Option<String>,
}

impl From<ApiReference> for ApiObject {
    fn from(reference: ApiReference) -> Self {
        Self {
            id: reference.id,
            type_: reference.type_,
            summary: None,
            html_url: None,
        }
    }
}

macro_rules! typed_id {
    ($(#[$doc:meta])* $name:ident, $reference:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an id.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// The raw id.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the id is empty.
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }

            /// The upstream reference for this id.
            pub fn to_reference(&self) -> ApiReference {
                ApiReference::new(self.0.clone(), $reference)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

typed_id!(
    /// Upstream user id.
    UserId,
    USER_REFERENCE
);
typed_id!(
    /// Upstream team id.
    TeamId,
    TEAM_REFERENCE
);
typed_id!(
    /// Upstream escalation policy id.
    EscalationPolicyId,
    ESCALATION_POLICY_REFERENCE
);

/// One step of an escalation policy as declared in a manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRule {
    #[serde(rename = "escalation_delay_in_minutes", default)]
    pub delay: u32,
    #[serde(default)]
    pub targets: Vec<UserId>,
}

impl EscalationRule {
    /// Create a rule.
    pub fn new(delay: u32, targets: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            delay,
            targets: targets.into_iter().collect(),
        }
    }

    /// Upstream shape of this rule.
    pub fn to_record(&self) -> EscalationRuleRecord {
        EscalationRuleRecord {
            id: None,
            delay: self.delay,
            targets: self
                .targets
                .iter()
                .map(|t| ApiObject::from(t.to_reference()))
                .collect(),
        }
    }

    /// Delay and targets match position by position.
    pub fn matches(&self, record: &EscalationRuleRecord) -> bool {
        self.delay == record.delay
            && self.targets.len() == record.targets.len()
            && self
                .targets
                .iter()
                .zip(&record.targets)
                .all(|(target, upstream)| target.as_str() == upstream.id)
    }
}

/// Upstream shape of an escalation rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationRuleRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "escalation_delay_in_minutes", default)]
    pub delay: u32,
    #[serde(default)]
    pub targets: Vec<ApiObject>,
}

/// Element-wise comparison of declared rules with upstream rules.
///
/// Any length or positional mismatch is inequality.
pub fn rules_match(rules: &[EscalationRule], records: &[EscalationRuleRecord]) -> bool {
    rules.len() == records.len()
        && rules
            .iter()
            .zip(records)
            .all(|(rule, record)| rule.matches(record))
}
