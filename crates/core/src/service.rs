//! The `PagerdutyService` kind.
//!
//! A service names the escalation policy it pages through by the policy's
//! resource name. The upstream id of that policy is resolved at reconcile
//! time and kept in `status.escalation_policy_id`.

use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::error::{Error, Result};
use crate::resource::{ManagedResource, ResourceSpec, ResourceStatus};
use crate::typeinfo::{ApiReference, EscalationPolicyId};

/// A PagerDuty service resource.
pub type PagerdutyService = ManagedResource<PagerdutyServiceSpec>;

/// Operational state of a service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    #[default]
    Active,
    Warning,
    Critical,
    Maintenance,
    Disabled,
}

/// Whether a service opens alerts in addition to incidents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCreation {
    #[default]
    CreateIncidents,
    CreateAlertsAndIncidents,
}

#[allow(clippy::unnecessary_wraps)]
const fn default_auto_resolve_timeout() -> Option<u32> {
    Some(14_400)
}

#[allow(clippy::unnecessary_wraps)]
const fn default_acknowledgement_timeout() -> Option<u32> {
    Some(1_800)
}

/// Desired state of a PagerDuty service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagerdutyServiceSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Seconds until an open incident resolves itself. `None` or zero disables.
    #[serde(default = "default_auto_resolve_timeout")]
    pub auto_resolve_timeout: Option<u32>,

    /// Seconds until an acknowledged incident re-triggers. `None` or zero disables.
    #[serde(default = "default_acknowledgement_timeout")]
    pub acknowledgement_timeout: Option<u32>,

    #[serde(default)]
    pub status: ServiceState,

    /// Resource name of the escalation policy in the same namespace.
    #[serde(rename = "escalation_policy_ref", default)]
    pub escalation_policy: String,

    #[serde(default)]
    pub alert_creation: AlertCreation,
}

impl PagerdutyServiceSpec {
    /// Create a spec with defaults.
    pub fn new(name: impl Into<String>, escalation_policy: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            auto_resolve_timeout: default_auto_resolve_timeout(),
            acknowledgement_timeout: default_acknowledgement_timeout(),
            status: ServiceState::default(),
            escalation_policy: escalation_policy.into(),
            alert_creation: AlertCreation::default(),
        }
    }
}

/// Observed state of a PagerDuty service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagerdutyServiceStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_id: String,

    /// Upstream id of the referenced escalation policy.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub escalation_policy_id: String,

    #[serde(default)]
    pub conditions: Option<Conditions>,
}

impl ResourceStatus for PagerdutyServiceStatus {
    fn external_id(&self) -> &str {
        &self.service_id
    }

    fn set_external_id(&mut self, id: String) {
        self.service_id = id;
    }

    fn conditions(&self) -> Option<&Conditions> {
        self.conditions.as_ref()
    }

    fn conditions_mut(&mut self) -> &mut Option<Conditions> {
        &mut self.conditions
    }

    fn resolved_reference(&self) -> &str {
        &self.escalation_policy_id
    }

    fn set_resolved_reference(&mut self, id: String) {
        self.escalation_policy_id = id;
    }
}

/// Upstream shape of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub auto_resolve_timeout: Option<u32>,
    #[serde(default)]
    pub acknowledgement_timeout: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ServiceState>,
    #[serde(default)]
    pub escalation_policy: ApiReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_creation: Option<AlertCreation>,
}

impl ResourceSpec for PagerdutyServiceSpec {
    type Status = PagerdutyServiceStatus;
    type Record = ServiceRecord;

    const KIND: &'static str = "PagerdutyService";
    const FINALIZER: &'static str = "pagerduty.platform.share-now.com/service";
    const READY_REASON: &'static str = "PDServiceReady";
    const CREATED_MESSAGE: &'static str = "PagerDuty Service created";
    const MATCHES_MESSAGE: &'static str = "PagerDuty Service matches upstream service";

    fn to_record(&self, status: &Self::Status) -> Self::Record {
        ServiceRecord {
            id: Some(status.service_id.clone()).filter(|id| !id.is_empty()),
            type_: "service".to_string(),
            name: self.name.clone(),
            description: self.description.clone(),
            auto_resolve_timeout: self.auto_resolve_timeout,
            acknowledgement_timeout: self.acknowledgement_timeout,
            status: Some(self.status),
            escalation_policy: EscalationPolicyId::new(status.escalation_policy_id.clone())
                .to_reference(),
            alert_creation: Some(self.alert_creation),
        }
    }

    fn matches(&self, status: &Self::Status, record: &Self::Record) -> bool {
        self.name == record.name
            && self.description == record.description
            && disabled_as_none(self.auto_resolve_timeout)
                == disabled_as_none(record.auto_resolve_timeout)
            && disabled_as_none(self.acknowledgement_timeout)
                == disabled_as_none(record.acknowledgement_timeout)
            && record.status.is_none_or(|s| s == self.status)
            && record.alert_creation.is_none_or(|a| a == self.alert_creation)
            && status.escalation_policy_id == record.escalation_policy.id
    }

    fn reference(&self) -> Option<&str> {
        Some(self.escalation_policy.as_str())
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::missing_field(Self::KIND, name, "name"));
        }
        if self.escalation_policy.is_empty() {
            return Err(Error::missing_field(
                Self::KIND,
                name,
                "escalation_policy_ref",
            ));
        }
        Ok(())
    }
}

// Zero and null both disable a timeout upstream.
fn disabled_as_none(timeout: Option<u32>) -> Option<u32> {
    timeout.filter(|t| *t != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status() -> PagerdutyServiceStatus {
        PagerdutyServiceStatus {
            service_id: "PSVC".to_string(),
            escalation_policy_id: "PPOL".to_string(),
            conditions: None,
        }
    }

    #[test]
    fn test_record_uses_resolved_policy_id() {
        let spec = PagerdutyServiceSpec::new("checkout", "ops-policy");
        let record = spec.to_record(&status());

        assert_eq!(record.id.as_deref(), Some("PSVC"));
        assert_eq!(record.escalation_policy.id, "PPOL");
        assert_eq!(record.escalation_policy.type_, "escalation_policy_reference");
        assert!(spec.matches(&status(), &record));
    }

    #[test]
    fn test_reference_change_breaks_equality() {
        let spec = PagerdutyServiceSpec::new("checkout", "ops-policy");
        let record = spec.to_record(&status());

        let mut moved = status();
        moved.escalation_policy_id = "POTHER".to_string();
        assert!(!spec.matches(&moved, &record));
    }

    #[test]
    fn test_zero_timeout_equals_disabled() {
        let mut spec = PagerdutyServiceSpec::new("checkout", "ops-policy");
        spec.auto_resolve_timeout = Some(0);
        let mut record = spec.to_record(&status());
        record.auto_resolve_timeout = None;

        assert!(spec.matches(&status(), &record));
    }

    #[test]
    fn test_state_change_breaks_equality() {
        let spec = PagerdutyServiceSpec::new("checkout", "ops-policy");
        let mut record = spec.to_record(&status());
        record.status = Some(ServiceState::Maintenance);

        assert!(!spec.matches(&status(), &record));
    }

    #[test]
    fn test_validate_requires_reference() {
        let spec = PagerdutyServiceSpec::new("checkout", "");
        assert!(matches!(
            spec.validate("checkout"),
            Err(Error::MissingField { ref field, .. }) if field == "escalation_policy_ref"
        ));
        assert_eq!(
            PagerdutyServiceSpec::new("checkout", "ops").reference(),
            Some("ops")
        );
    }

    #[test]
    fn test_manifest_defaults() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let yaml = r"
kind: PagerdutyService
metadata:
  name: checkout
  namespace: payments
spec:
  name: Checkout
  escalation_policy_ref: ops-policy
";
        let service: PagerdutyService = serde_yaml::from_str(yaml)?;
        assert_eq!(service.spec.auto_resolve_timeout, Some(14_400));
        assert_eq!(service.spec.acknowledgement_timeout, Some(1_800));
        assert_eq!(service.spec.status, ServiceState::Active);
        assert_eq!(service.spec.alert_creation, AlertCreation::CreateIncidents);
        assert_eq!(service.metadata.namespace, "payments");
        Ok(())
    }
}
