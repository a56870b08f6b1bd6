//! The `BusinessService` kind.

use serde::{Deserialize, Serialize};

use crate::condition::Conditions;
use crate::error::{Error, Result};
use crate::resource::{ManagedResource, ResourceSpec, ResourceStatus};
use crate::typeinfo::ApiReference;

/// A business service resource.
pub type BusinessService = ManagedResource<BusinessServiceSpec>;

const BUSINESS_SERVICE_TEAM_REFERENCE: &str = "team_reference";

/// Desired state of a business service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessServiceSpec {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub point_of_contact: String,

    /// Owning team id; empty means no team.
    #[serde(default)]
    pub team: String,
}

impl BusinessServiceSpec {
    /// Create a spec without team or contact.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            point_of_contact: String::new(),
            team: String::new(),
        }
    }
}

/// Observed state of a business service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessServiceStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub business_service_id: String,

    #[serde(default)]
    pub conditions: Option<Conditions>,
}

impl ResourceStatus for BusinessServiceStatus {
    fn external_id(&self) -> &str {
        &self.business_service_id
    }

    fn set_external_id(&mut self, id: String) {
        self.business_service_id = id;
    }

    fn conditions(&self) -> Option<&Conditions> {
        self.conditions.as_ref()
    }

    fn conditions_mut(&mut self) -> &mut Option<Conditions> {
        &mut self.conditions
    }
}

/// Upstream shape of a business service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessServiceRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub point_of_contact: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<ApiReference>,
}

impl ResourceSpec for BusinessServiceSpec {
    type Status = BusinessServiceStatus;
    type Record = BusinessServiceRecord;

    const KIND: &'static str = "BusinessService";
    const FINALIZER: &'static str = "pagerduty.platform.share-now.com/business_service";
    const READY_REASON: &'static str = "BusinessServiceReady";
    const CREATED_MESSAGE: &'static str = "Business Service created";
    const MATCHES_MESSAGE: &'static str = "Business Service matches upstream service";

    fn to_record(&self, status: &Self::Status) -> Self::Record {
        BusinessServiceRecord {
            id: Some(status.business_service_id.clone()).filter(|id| !id.is_empty()),
            name: self.name.clone(),
            description: self.description.clone(),
            point_of_contact: self.point_of_contact.clone(),
            team: Some(self.team.as_str())
                .filter(|team| !team.is_empty())
                .map(|team| ApiReference::new(team, BUSINESS_SERVICE_TEAM_REFERENCE)),
        }
    }

    fn matches(&self, _status: &Self::Status, record: &Self::Record) -> bool {
        let upstream_team = record.team.as_ref().map_or("", |t| t.id.as_str());

        self.name == record.name
            && self.description == record.description
            && self.point_of_contact == record.point_of_contact
            && self.team == upstream_team
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::missing_field(Self::KIND, name, "name"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_team_equals_absent_team() {
        let spec = BusinessServiceSpec::new("Payments");
        let record = spec.to_record(&BusinessServiceStatus::default());

        assert!(record.team.is_none());
        assert!(spec.matches(&BusinessServiceStatus::default(), &record));
    }

    #[test]
    fn test_team_and_contact_compared() {
        let mut spec = BusinessServiceSpec::new("Payments");
        spec.team = "PTEAM".to_string();
        let status = BusinessServiceStatus::default();
        let record = spec.to_record(&status);
        assert!(spec.matches(&status, &record));

        let mut other = spec.clone();
        other.team.clear();
        assert!(!other.matches(&status, &record));

        let mut other = spec.clone();
        other.point_of_contact = "oncall@example.com".to_string();
        assert!(!other.matches(&status, &record));
    }

    #[test]
    fn test_validate_requires_name() {
        assert!(BusinessServiceSpec::new("").validate("bs").is_err());
        assert!(BusinessServiceSpec::new("Payments").validate("bs").is_ok());
    }
}
