//! # pd-operator core
//!
//! Resource kinds managed by the operator and the pieces every kind shares:
//!
//! - **Object metadata**: identity, resource version, deletion marker, guard set
//! - **Conditions**: typed, timestamped status entries, unique by type
//! - **Resources**: `ManagedResource<S>` plus the `ResourceSpec` trait
//! - **Kinds**: escalation policies, services and business services

#![forbid(unsafe_code)]
#![forbid(clippy::unwrap_used)]
#![forbid(clippy::panic)]
#![deny(clippy::expect_used)]

pub mod business_service;
pub mod condition;
pub mod error;
pub mod escalation_policy;
pub mod meta;
pub mod resource;
pub mod service;
pub mod typeinfo;

pub use business_service::{
    BusinessService, BusinessServiceRecord, BusinessServiceSpec, BusinessServiceStatus,
};
pub use condition::{Condition, ConditionStatus, ConditionType, Conditions};
pub use error::{Error, Result};
pub use escalation_policy::{
    EscalationPolicy, EscalationPolicyRecord, EscalationPolicySpec, EscalationPolicyStatus,
    OnCallHandoffNotifications,
};
pub use meta::{DEFAULT_NAMESPACE, ObjectKey, ObjectMeta};
pub use resource::{API_VERSION, ManagedResource, ResourceSpec, ResourceStatus};
pub use service::{
    AlertCreation, PagerdutyService, PagerdutyServiceSpec, PagerdutyServiceStatus, ServiceRecord,
    ServiceState,
};
pub use typeinfo::{
    ApiObject, ApiReference, EscalationPolicyId, EscalationRule, EscalationRuleRecord, TeamId,
    UserId,
};
