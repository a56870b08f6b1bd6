//! The `EscalationPolicy` kind.

use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::error::{Error, Result};
use crate::resource::{ManagedResource, ResourceSpec, ResourceStatus};
use crate::typeinfo::{
    ApiReference, EscalationRule, EscalationRuleRecord, MAX_ESCALATION_RULE_TARGETS,
    MIN_ESCALATION_RULE_TARGETS, TeamId, rules_match,
};

/// An escalation policy resource.
pub type EscalationPolicy = ManagedResource<EscalationPolicySpec>;

/// How on-call handoff notifications are sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnCallHandoffNotifications {
    #[default]
    IfHasServices,
    Always,
}

impl OnCallHandoffNotifications {
    /// Wire value.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IfHasServices => "if_has_services",
            Self::Always => "always",
        }
    }
}

const fn default_num_loops() -> u32 {
    1
}

/// Desired state of an escalation policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicySpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub on_call_handoff_notifications: OnCallHandoffNotifications,

    /// Times the policy repeats after reaching its last rule.
    #[serde(default = "default_num_loops")]
    pub num_loops: u32,

    #[serde(default)]
    pub escalation_rules: Vec<EscalationRule>,

    /// Owning team; only one team may be associated with a policy.
    #[serde(rename = "teams", default, skip_serializing_if = "Option::is_none")]
    pub team: Option<TeamId>,
}

impl EscalationPolicySpec {
    /// Create a spec with defaults and no rules.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            on_call_handoff_notifications: OnCallHandoffNotifications::default(),
            num_loops: default_num_loops(),
            escalation_rules: Vec::new(),
            team: None,
        }
    }

    /// Add an escalation rule.
    #[must_use]
    pub fn with_rule(mut self, rule: EscalationRule) -> Self {
        self.escalation_rules.push(rule);
        self
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the owning team.
    #[must_use]
    pub fn with_team(mut self, team: TeamId) -> Self {
        self.team = Some(team);
        self
    }
}

/// Observed state of an escalation policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicyStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub policy_id: String,

    #[serde(default)]
    pub conditions: Option<Conditions>,
}

impl ResourceStatus for EscalationPolicyStatus {
    fn external_id(&self) -> &str {
        &self.policy_id
    }

    fn set_external_id(&mut self, id: String) {
        self.policy_id = id;
    }

    fn conditions(&self) -> Option<&Conditions> {
        self.conditions.as_ref()
    }

    fn conditions_mut(&mut self) -> &mut Option<Conditions> {
        &mut self.conditions
    }
}

/// Upstream shape of an escalation policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicyRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub num_loops: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_call_handoff_notifications: Option<String>,
    #[serde(default)]
    pub escalation_rules: Vec<EscalationRuleRecord>,
    #[serde(default)]
    pub teams: Vec<ApiReference>,
}

impl ResourceSpec for EscalationPolicySpec {
    type Status = EscalationPolicyStatus;
    type Record = EscalationPolicyRecord;

    const KIND: &'static str = "EscalationPolicy";
    const FINALIZER: &'static str = "pagerduty.platform.share-now.com/escalation_policy";
    const READY_REASON: &'static str = "PDEscalationPolicyReady";
    const CREATED_MESSAGE: &'static str = "Escalation policy created";
    const MATCHES_MESSAGE: &'static str = "PagerDuty Escalation Policy matches upstream service";

    fn to_record(&self, status: &Self::Status) -> Self::Record {
        EscalationPolicyRecord {
            id: Some(status.policy_id.clone()).filter(|id| !id.is_empty()),
            type_: "escalation_policy".to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            num_loops: self.num_loops,
            on_call_handoff_notifications: Some(
                self.on_call_handoff_notifications.as_str().to_string(),
            ),
            escalation_rules: self
                .escalation_rules
                .iter()
                .map(EscalationRule::to_record)
                .collect(),
            teams: self.team.iter().map(TeamId::to_reference).collect(),
        }
    }

    fn matches(&self, _status: &Self::Status, record: &Self::Record) -> bool {
        let upstream_team = record.teams.first().map(|t| t.id.as_str());
        let desired_team = self.team.as_ref().map(TeamId::as_str);

        self.name == record.name
            && self.description == record.description
            && self.num_loops == record.num_loops
            && record
                .on_call_handoff_notifications
                .as_deref()
                .is_none_or(|v| v == self.on_call_handoff_notifications.as_str())
            && desired_team == upstream_team
            && rules_match(&self.escalation_rules, &record.escalation_rules)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::missing_field(Self::KIND, name, "name"));
        }
        if self.escalation_rules.is_empty() {
            return Err(Error::missing_field(Self::KIND, name, "escalation_rules"));
        }
        self.escalation_rules
            .iter()
            .enumerate()
            .try_for_each(|(index, rule)| {
                let count = rule.targets.len();
                if (MIN_ESCALATION_RULE_TARGETS..=MAX_ESCALATION_RULE_TARGETS).contains(&count) {
                    Ok(())
                } else {
                    Err(Error::invalid_field(
                        Self::KIND,
                        name,
                        format!("escalation_rules[{index}].targets"),
                        format!(
                            "invalid number of targets: {count} (allowed {MIN_ESCALATION_RULE_TARGETS}..={MAX_ESCALATION_RULE_TARGETS})"
                        ),
                    ))
                }
            })
    }
}
