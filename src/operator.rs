//! Wiring of stores, adapters and reconciliation loops.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use pd_operator_core::{
    BusinessServiceSpec, EscalationPolicySpec, ObjectKey, PagerdutyServiceSpec, ResourceSpec,
};
use pd_operator_pagerduty::{PagerDutyClient, PagerDutyConfig, RestAdapter};
use pd_operator_reconciler::{
    FakeUpstream, InMemoryStateStore, LoopStopper, Reconciler, ReconciliationLoop,
    StoreReferenceResolver, UpstreamAdapter,
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::OperatorConfig;
use crate::manifest::{Document, Manifest};

/// Identity of a loaded manifest across kinds.
pub type ManifestKey = (&'static str, ObjectKey);

/// One state store per kind.
#[derive(Clone, Default)]
pub struct Stores {
    pub policies: Arc<InMemoryStateStore<EscalationPolicySpec>>,
    pub services: Arc<InMemoryStateStore<PagerdutyServiceSpec>>,
    pub business_services: Arc<InMemoryStateStore<BusinessServiceSpec>>,
}

impl Stores {
    /// Create empty stores.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one manifest to the store of its kind.
    ///
    /// # Errors
    ///
    /// Fails when the store rejects the object.
    pub async fn apply(&self, manifest: Manifest) -> Result<()> {
        let key = manifest.key();
        let kind = manifest.kind();
        let result = match manifest {
            Manifest::EscalationPolicy(r) => self.policies.apply(r).await.map(drop),
            Manifest::Service(r) => self.services.apply(r).await.map(drop),
            Manifest::BusinessService(r) => self.business_services.apply(r).await.map(drop),
        };
        result.with_context(|| format!("failed to apply {kind} {key}"))
    }

    /// Request deletion of an object. Absent objects are ignored.
    ///
    /// # Errors
    ///
    /// Fails when the store rejects the request.
    pub async fn delete(&self, kind: &str, key: &ObjectKey) -> Result<()> {
        let result = match kind {
            k if k == EscalationPolicySpec::KIND => self.policies.delete(key).await,
            k if k == PagerdutyServiceSpec::KIND => self.services.delete(key).await,
            k if k == BusinessServiceSpec::KIND => self.business_services.delete(key).await,
            other => return Err(anyhow!("unknown kind '{other}'")),
        };
        match result {
            Err(e) if e.is_not_found() => Ok(()),
            other => other.with_context(|| format!("failed to delete {kind} {key}")),
        }
    }

    /// Bring the stores in line with a fresh read of the manifests.
    ///
    /// Valid documents are applied; objects loaded earlier whose documents
    /// are gone get a deletion request. Invalid documents are logged and
    /// keep whatever was applied for them before. Returns the keys now
    /// backed by a document.
    pub async fn sync(
        &self,
        documents: Vec<Document>,
        previous: &BTreeSet<ManifestKey>,
    ) -> BTreeSet<ManifestKey> {
        let mut current = BTreeSet::new();
        for document in documents {
            let location = document.to_string();
            match document.manifest {
                Ok(manifest) => {
                    let key = (manifest.kind(), manifest.key());
                    match self.apply(manifest).await {
                        Ok(()) => {
                            current.insert(key);
                        }
                        Err(e) => {
                            warn!(document = %location, error = %format!("{e:#}"), "Manifest rejected");
                        }
                    }
                }
                Err(e) => warn!(document = %location, error = %e, "Invalid manifest"),
            }
        }

        for (kind, key) in previous.difference(&current) {
            debug!(kind, %key, "Manifest removed");
            if let Err(e) = self.delete(kind, key).await {
                warn!(kind, %key, error = %format!("{e:#}"), "Deletion failed");
            }
        }
        current
    }
}

/// One upstream adapter per kind.
pub struct Adapters {
    pub policies: Arc<dyn UpstreamAdapter<EscalationPolicySpec>>,
    pub services: Arc<dyn UpstreamAdapter<PagerdutyServiceSpec>>,
    pub business_services: Arc<dyn UpstreamAdapter<BusinessServiceSpec>>,
}

impl Adapters {
    /// Adapters calling the PagerDuty REST API.
    ///
    /// # Errors
    ///
    /// Fails when the client cannot be built, e.g. without a token.
    pub fn rest(config: &PagerDutyConfig) -> Result<Self> {
        let client = PagerDutyClient::new(config).context("failed to create PagerDuty client")?;
        info!(base_url = %client.base_url(), "Using PagerDuty REST API");
        Ok(Self {
            policies: Arc::new(RestAdapter::<EscalationPolicySpec>::new(client.clone())),
            services: Arc::new(RestAdapter::<PagerdutyServiceSpec>::new(client.clone())),
            business_services: Arc::new(RestAdapter::<BusinessServiceSpec>::new(client)),
        })
    }

    /// In-memory adapters; nothing leaves the process.
    pub fn fake() -> Self {
        Self {
            policies: Arc::new(FakeUpstream::<EscalationPolicySpec>::default()),
            services: Arc::new(FakeUpstream::<PagerdutyServiceSpec>::default()),
            business_services: Arc::new(FakeUpstream::<BusinessServiceSpec>::default()),
        }
    }
}

/// The three reconciliation loops sharing one set of stores.
pub struct Operator {
    stores: Stores,
    policies: ReconciliationLoop<EscalationPolicySpec>,
    services: ReconciliationLoop<PagerdutyServiceSpec>,
    business_services: ReconciliationLoop<BusinessServiceSpec>,
}

impl Operator {
    /// Build the loops.
    ///
    /// Services resolve their escalation policy through the policy store and
    /// are re-queued whenever a policy in their namespace changes.
    ///
    /// # Errors
    ///
    /// Fails when a reconciler cannot be built.
    pub fn new(stores: Stores, adapters: Adapters, config: &OperatorConfig) -> Result<Self> {
        let reconciler_config = config.reconciler_config();
        let loop_config = config.loop_config();

        let policies = Reconciler::<EscalationPolicySpec>::builder()
            .with_store(stores.policies.clone())
            .with_adapter(adapters.policies)
            .with_config(reconciler_config.clone())
            .build()?;

        let services = Reconciler::<PagerdutyServiceSpec>::builder()
            .with_store(stores.services.clone())
            .with_adapter(adapters.services)
            .with_resolver(Arc::new(StoreReferenceResolver::<EscalationPolicySpec>::new(
                stores.policies.clone(),
            )))
            .with_config(reconciler_config.clone())
            .build()?;

        let business_services = Reconciler::<BusinessServiceSpec>::builder()
            .with_store(stores.business_services.clone())
            .with_adapter(adapters.business_services)
            .with_config(reconciler_config)
            .build()?;

        Ok(Self {
            policies: ReconciliationLoop::new(
                Arc::new(policies),
                stores.policies.clone(),
                loop_config.clone(),
            ),
            services: ReconciliationLoop::new(
                Arc::new(services),
                stores.services.clone(),
                loop_config.clone(),
            )
            .with_dependency::<EscalationPolicySpec>(stores.policies.as_ref()),
            business_services: ReconciliationLoop::new(
                Arc::new(business_services),
                stores.business_services.clone(),
                loop_config,
            ),
            stores,
        })
    }

    /// The stores the loops read from.
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Run every loop until `shutdown` completes, then stop them and wait
    /// for in-flight work.
    ///
    /// # Errors
    ///
    /// Fails when a loop exits with an error.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let Self {
            policies,
            services,
            business_services,
            ..
        } = self;
        let stoppers = [policies.stopper(), services.stopper(), business_services.stopper()];

        let mut loops = JoinSet::new();
        loops.spawn(drive(policies));
        loops.spawn(drive(services));
        loops.spawn(drive(business_services));
        info!("Reconciliation loops started");

        tokio::pin!(shutdown);
        let early = tokio::select! {
            () = &mut shutdown => None,
            finished = loops.join_next() => finished,
        };

        stoppers.iter().for_each(LoopStopper::stop);
        let mut outcome = early.map_or(Ok(()), flatten);
        while let Some(finished) = loops.join_next().await {
            let result = flatten(finished);
            if outcome.is_ok() {
                outcome = result;
            }
        }
        if outcome.is_ok() {
            info!("Reconciliation loops stopped");
        }
        outcome
    }
}

async fn drive<S: ResourceSpec>(mut reconciliation: ReconciliationLoop<S>) -> Result<()> {
    reconciliation
        .run()
        .await
        .with_context(|| format!("{} loop failed", S::KIND))
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.context("reconciliation loop task failed")?
}
