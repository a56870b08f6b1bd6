//! Upstream adapter over the REST client.

use std::marker::PhantomData;

use async_trait::async_trait;
use pd_operator_core::{
    BusinessServiceRecord, BusinessServiceSpec, EscalationPolicyRecord, EscalationPolicySpec,
    ManagedResource, PagerdutyServiceSpec, ResourceSpec, ServiceRecord,
};
use pd_operator_reconciler::{UpstreamAdapter, UpstreamError, UpstreamResult};
use tracing::info;

use crate::client::PagerDutyClient;

/// Where a kind lives in the REST API.
pub trait RestResource: ResourceSpec {
    /// Collection path segment, e.g. `services`.
    const COLLECTION: &'static str;

    /// Key wrapping request and response bodies, e.g. `service`.
    const WRAPPER: &'static str;

    /// Identifier of a record returned by the API.
    fn record_id(record: &Self::Record) -> Option<&str>;
}

impl RestResource for EscalationPolicySpec {
    const COLLECTION: &'static str = "escalation_policies";
    const WRAPPER: &'static str = "escalation_policy";

    fn record_id(record: &EscalationPolicyRecord) -> Option<&str> {
        record.id.as_deref()
    }
}

impl RestResource for PagerdutyServiceSpec {
    const COLLECTION: &'static str = "services";
    const WRAPPER: &'static str = "service";

    fn record_id(record: &ServiceRecord) -> Option<&str> {
        record.id.as_deref()
    }
}

impl RestResource for BusinessServiceSpec {
    const COLLECTION: &'static str = "business_services";
    const WRAPPER: &'static str = "business_service";

    fn record_id(record: &BusinessServiceRecord) -> Option<&str> {
        record.id.as_deref()
    }
}

/// Adapter for kind `S` backed by the REST API.
#[derive(Debug, Clone)]
pub struct RestAdapter<S> {
    client: PagerDutyClient,
    _kind: PhantomData<fn() -> S>,
}

impl<S: RestResource> RestAdapter<S> {
    /// Create an adapter sending requests through `client`.
    pub fn new(client: PagerDutyClient) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

#[async_trait]
impl<S: RestResource> UpstreamAdapter<S> for RestAdapter<S> {
    async fn create(&self, resource: &ManagedResource<S>) -> UpstreamResult<String> {
        let created: S::Record = self
            .client
            .create(S::COLLECTION, S::WRAPPER, &resource.to_record())
            .await
            .map_err(|e| e.into_upstream(S::KIND, ""))?;

        let id = S::record_id(&created)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| UpstreamError::invalid_response("created record has no id"))?;
        info!(kind = S::KIND, external_id = id, "PagerDuty object created");
        Ok(id.to_string())
    }

    async fn get(&self, external_id: &str) -> UpstreamResult<S::Record> {
        self.client
            .get(S::COLLECTION, S::WRAPPER, external_id)
            .await
            .map_err(|e| e.into_upstream(S::KIND, external_id))
    }

    async fn update(&self, resource: &ManagedResource<S>) -> UpstreamResult<()> {
        let external_id = resource.external_id();
        self.client
            .update(S::COLLECTION, S::WRAPPER, external_id, &resource.to_record())
            .await
            .map_err(|e| e.into_upstream(S::KIND, external_id))
    }

    async fn delete(&self, external_id: &str) -> UpstreamResult<()> {
        self.client
            .delete(S::COLLECTION, external_id)
            .await
            .map_err(|e| e.into_upstream(S::KIND, external_id))
    }
}
