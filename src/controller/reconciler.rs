//! Main reconciler for KubeNova resources
//!
//! A pass runs a fixed pipeline of stages, each gated on the previous one:
//! validation, namespace check, RBAC, Secret, ConfigMaps, backend services,
//! web tier, then status aggregation. Stages only touch the in-memory status;
//! it is persisted when a stage fails and once more after aggregation.
//!
//! Progress made by stages of a pass that is interrupted before aggregation
//! is only visible through the dependent objects it created; the status
//! catches up on the next pass.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServiceAccount};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    api::{Api, ListParams},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        watcher::Config,
    },
    ResourceExt,
};
use tracing::{debug, error, info, instrument, warn};

use super::aggregate::{aggregate, node_address, web_node_port};
use super::conditions::{
    set_condition, CONDITION_STATUS_FALSE, CONDITION_STATUS_TRUE, CONDITION_TYPE_VALIDATED,
    REASON_VALIDATION_FAILED, REASON_VALIDATION_SUCCEEDED,
};
use super::diff::{deployment_spec_equal, splice_convergence_fields, DataPayload};
use super::finalizers::{add_finalizer, is_being_deleted, run_deletion};
use super::status::{set_phase, write_status, RetryPolicy};
use super::store::{KubeStore, ResourceStore, StoredObject, VersionToken};
use crate::builder::{
    build_all_config_maps, build_all_services, build_cluster_role_binding, build_secret,
    build_service_account, build_web_resources,
};
use crate::crd::{summarize, ExposeMode, KubeNova, Phase};
use crate::error::{Error, Result};

#[cfg(feature = "metrics")]
const CONTROLLER_NAME: &str = "kubenova";

/// Requeue timing and status retry settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// After a pass that found everything ready
    pub idle_requeue: Duration,
    /// After a pass that left some component not ready yet
    pub short_requeue: Duration,
    /// After a failed pass
    pub error_backoff: Duration,
    pub status_retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            idle_requeue: Duration::from_secs(300),
            short_requeue: Duration::from_secs(30),
            error_backoff: Duration::from_secs(60),
            status_retry: RetryPolicy::default(),
        }
    }
}

/// How a successful pass ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutcome {
    /// The root is gone
    Done,
    /// The finalizer was just added
    RequeueImmediate,
    /// Everything is converged and ready
    RequeueIdle,
    /// Converged, but not every component is ready yet
    RequeueShort,
}

impl PassOutcome {
    pub fn into_action(self, config: &ReconcilerConfig) -> Action {
        match self {
            PassOutcome::Done => Action::await_change(),
            PassOutcome::RequeueImmediate => Action::requeue(Duration::ZERO),
            PassOutcome::RequeueIdle => Action::requeue(config.idle_requeue),
            PassOutcome::RequeueShort => Action::requeue(config.short_requeue),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Stage {
    Validating,
    NamespaceCheck,
    RbacSync,
    SecretSync,
    ConfigSync,
    ServiceSync,
    WebSync,
}

impl Stage {
    const PIPELINE: [Stage; 7] = [
        Stage::Validating,
        Stage::NamespaceCheck,
        Stage::RbacSync,
        Stage::SecretSync,
        Stage::ConfigSync,
        Stage::ServiceSync,
        Stage::WebSync,
    ];

    fn name(self) -> &'static str {
        match self {
            Stage::Validating => "validation",
            Stage::NamespaceCheck => "namespace check",
            Stage::RbacSync => "rbac sync",
            Stage::SecretSync => "secret sync",
            Stage::ConfigSync => "config sync",
            Stage::ServiceSync => "service sync",
            Stage::WebSync => "web sync",
        }
    }

    fn progress_message(self) -> &'static str {
        match self {
            Stage::Validating => "validating configuration",
            Stage::NamespaceCheck => "checking namespace",
            Stage::RbacSync => "ensuring service account and role binding",
            Stage::SecretSync => "syncing runtime secret",
            Stage::ConfigSync => "syncing service configuration",
            Stage::ServiceSync => "deploying backend services",
            Stage::WebSync => "deploying web front end",
        }
    }
}

/// Drives one KubeNova towards its desired state through a [`ResourceStore`]
pub struct Reconciler<S> {
    store: S,
    config: ReconcilerConfig,
}

impl<S: ResourceStore> Reconciler<S> {
    pub fn new(store: S, config: ReconcilerConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one pass for the KubeNova `namespace/name`
    pub async fn reconcile_pass(&self, namespace: &str, name: &str) -> Result<PassOutcome> {
        let Some(mut root) = self.store.get::<KubeNova>(namespace, name).await? else {
            debug!("KubeNova {}/{} not found, nothing to do", namespace, name);
            return Ok(PassOutcome::Done);
        };

        if is_being_deleted(&root) {
            run_deletion(&self.store, &mut root, self.config.status_retry).await?;
            return Ok(PassOutcome::Done);
        }

        if add_finalizer(&self.store, &mut root).await? {
            return Ok(PassOutcome::RequeueImmediate);
        }

        let generation = root.metadata.generation;
        if let Some(status) = &root.status {
            if status.phase == Phase::Ready
                && status.observed_generation.is_some()
                && status.observed_generation == generation
            {
                debug!(
                    "KubeNova {}/{} is ready at generation {:?}, skipping",
                    namespace, name, generation
                );
                return Ok(PassOutcome::RequeueIdle);
            }
        }

        info!("Reconciling KubeNova {}/{}", namespace, name);
        for stage in Stage::PIPELINE {
            self.enter(&mut root, stage);
            if let Err(e) = self.run_stage(stage, &mut root).await {
                return Err(self.fail(&mut root, stage, e).await);
            }
        }

        let all_ready = aggregate(&self.store, &mut root).await;
        if let Err(e) = write_status(&self.store, &mut root, self.config.status_retry).await {
            warn!(
                "Resources of {}/{} are in place but status could not be written: {}",
                namespace, name, e
            );
            return Ok(PassOutcome::RequeueShort);
        }

        if all_ready {
            info!("KubeNova {}/{} is ready", namespace, name);
            Ok(PassOutcome::RequeueIdle)
        } else {
            Ok(PassOutcome::RequeueShort)
        }
    }

    fn enter(&self, root: &mut KubeNova, stage: Stage) {
        let phase = match stage {
            Stage::Validating => Phase::Validating,
            _ => {
                let observed = root.status.as_ref().and_then(|s| s.observed_generation);
                if observed.is_some() && observed != root.metadata.generation {
                    Phase::Updating
                } else {
                    Phase::Creating
                }
            }
        };
        debug!("Entering {} for {}", stage.name(), root.name_any());
        set_phase(root, phase, stage.progress_message());
    }

    /// Record a stage failure on the root and wrap the error with the stage
    async fn fail(&self, root: &mut KubeNova, stage: Stage, e: Error) -> Error {
        let name = root.name_any();
        warn!("{} failed for {}: {}", stage.name(), name, e);

        set_phase(root, Phase::Failed, format!("{} failed: {}", stage.name(), e));
        if let Err(write_err) = write_status(&self.store, root, self.config.status_retry).await {
            warn!("Failed to record failure on {}: {}", name, write_err);
        }
        e.in_stage(stage.name())
    }

    async fn run_stage(&self, stage: Stage, root: &mut KubeNova) -> Result<()> {
        let namespace = root.namespace().unwrap_or_default();
        match stage {
            Stage::Validating => self.validate(root),
            Stage::NamespaceCheck => self.check_namespace(&namespace).await,
            Stage::RbacSync => self.sync_rbac(root, &namespace).await,
            Stage::SecretSync => self.sync_secret(root, &namespace).await,
            Stage::ConfigSync => self.sync_config(root, &namespace).await,
            Stage::ServiceSync => self.sync_services(root, &namespace).await,
            Stage::WebSync => self.sync_web(root, &namespace).await,
        }
    }

    fn validate(&self, root: &mut KubeNova) -> Result<()> {
        let generation = root.metadata.generation;
        let result = root.spec.validate();
        let status = root.status.get_or_insert_with(Default::default);

        match result {
            Ok(()) => {
                set_condition(
                    &mut status.conditions,
                    CONDITION_TYPE_VALIDATED,
                    CONDITION_STATUS_TRUE,
                    REASON_VALIDATION_SUCCEEDED,
                    "configuration is valid",
                    generation,
                );
                Ok(())
            }
            Err(errors) => {
                let message = summarize(&errors);
                set_condition(
                    &mut status.conditions,
                    CONDITION_TYPE_VALIDATED,
                    CONDITION_STATUS_FALSE,
                    REASON_VALIDATION_FAILED,
                    &message,
                    generation,
                );
                Err(Error::ValidationError(message))
            }
        }
    }

    async fn check_namespace(&self, namespace: &str) -> Result<()> {
        if self.store.namespace_exists(namespace).await? {
            Ok(())
        } else {
            Err(Error::NamespaceMissing(namespace.to_string()))
        }
    }

    async fn sync_rbac(&self, root: &KubeNova, namespace: &str) -> Result<()> {
        self.ensure_exists(namespace, &build_service_account(root, namespace))
            .await?;
        self.ensure_exists("", &build_cluster_role_binding(root, namespace))
            .await
    }

    async fn sync_secret(&self, root: &KubeNova, namespace: &str) -> Result<()> {
        let web = &root.spec.web;
        let (node_ip, node_port) =
            if web.minio_proxy_enabled() && web.expose_mode() == Some(ExposeMode::NodePort) {
                let node_ip = node_address(&self.store).await.unwrap_or_default();
                (node_ip, web_node_port(&self.store, root).await)
            } else {
                (String::new(), 0)
            };

        let secret: Secret = build_secret(root, namespace, &node_ip, node_port);
        self.sync_payload(namespace, &secret).await
    }

    async fn sync_config(&self, root: &KubeNova, namespace: &str) -> Result<()> {
        for config_map in build_all_config_maps(root, namespace) {
            self.sync_payload(namespace, &config_map).await?;
        }
        Ok(())
    }

    async fn sync_services(&self, root: &KubeNova, namespace: &str) -> Result<()> {
        for resources in build_all_services(root, namespace) {
            debug!("Syncing backend service {}", resources.service);
            self.sync_deployment(namespace, &resources.deployment)
                .await?;
            self.ensure_exists(namespace, &resources.svc).await?;
        }
        Ok(())
    }

    async fn sync_web(&self, root: &KubeNova, namespace: &str) -> Result<()> {
        let web = build_web_resources(root, namespace);
        if let Some(config_map) = &web.nginx_config_map {
            self.sync_payload::<ConfigMap>(namespace, config_map).await?;
        }
        self.sync_deployment(namespace, &web.deployment).await?;
        self.ensure_exists::<Service>(namespace, &web.service).await?;
        if let Some(ingress) = &web.ingress {
            self.ensure_exists::<Ingress>(namespace, ingress).await?;
        }
        Ok(())
    }

    /// Create `desired` unless an object of that name exists; never updates
    async fn ensure_exists<K: StoredObject>(&self, namespace: &str, desired: &K) -> Result<()> {
        let name = desired.name_any();
        if self.store.get::<K>(namespace, &name).await?.is_some() {
            return Ok(());
        }
        self.store.create(namespace, desired).await?;
        info!("Created {} {}", K::kind(&()), name);
        record_write::<K>("create");
        Ok(())
    }

    /// Create, or overwrite when the payload differs as a whole
    async fn sync_payload<K: DataPayload>(&self, namespace: &str, desired: &K) -> Result<()> {
        let name = desired.name_any();
        match self.store.get::<K>(namespace, &name).await? {
            None => {
                self.store.create(namespace, desired).await?;
                info!("Created {} {}", K::kind(&()), name);
                record_write::<K>("create");
            }
            Some(current) if current.same_payload(desired) => {
                debug!("{} {} is up to date", K::kind(&()), name);
            }
            Some(mut current) => {
                let version = VersionToken::require(&current)?;
                current.take_payload(desired);
                self.store.replace(namespace, &current, &version).await?;
                info!("Updated {} {}", K::kind(&()), name);
                record_write::<K>("update");
            }
        }
        Ok(())
    }

    /// Create the Deployment, or splice the compared fields onto a fresh copy
    async fn sync_deployment(&self, namespace: &str, desired: &Deployment) -> Result<()> {
        let name = desired.name_any();
        let current = self.store.get::<Deployment>(namespace, &name).await?;
        if let Some(current) = &current {
            if deployment_spec_equal(current, desired) {
                debug!("Deployment {} is up to date", name);
                return Ok(());
            }
        }

        // Re-read so fields changed since the first read are not clobbered
        let fresh = match current {
            Some(_) => self.store.get::<Deployment>(namespace, &name).await?,
            None => None,
        };
        match fresh {
            Some(mut fresh) => {
                let version = VersionToken::require(&fresh)?;
                splice_convergence_fields(&mut fresh, desired);
                self.store.replace(namespace, &fresh, &version).await?;
                info!("Updated Deployment {}", name);
                record_write::<Deployment>("update");
            }
            None => {
                self.store.create(namespace, desired).await?;
                info!("Created Deployment {}", name);
                record_write::<Deployment>("create");
            }
        }
        Ok(())
    }
}

#[cfg(feature = "metrics")]
fn record_write<K: StoredObject>(op: &str) {
    super::metrics::inc_dependent_write(&K::kind(&()), op);
}

#[cfg(not(feature = "metrics"))]
fn record_write<K: StoredObject>(_op: &str) {}

/// Shared state for the controller
pub struct ControllerState {
    pub client: Client,
    pub config: ReconcilerConfig,
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let roots: Api<KubeNova> = Api::all(client.clone());

    info!("Starting KubeNova controller");

    // Verify CRD exists
    match roots.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("KubeNova CRD is available"),
        Err(e) => {
            error!(
                "KubeNova CRD not found. Please install the CRD first: {:?}",
                e
            );
            return Err(Error::ConfigError("KubeNova CRD not installed".to_string()));
        }
    }

    Controller::new(roots, Config::default())
        .owns::<Deployment>(Api::all(client.clone()), Config::default())
        .owns::<Service>(Api::all(client.clone()), Config::default())
        .owns::<ConfigMap>(Api::all(client.clone()), Config::default())
        .owns::<Secret>(Api::all(client.clone()), Config::default())
        .owns::<ServiceAccount>(Api::all(client.clone()), Config::default())
        .owns::<Ingress>(Api::all(client.clone()), Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, state)
        .for_each(|res| async move {
            match res {
                Ok(obj) => debug!("Reconciled: {:?}", obj),
                Err(e) => error!("Reconcile error: {:?}", e),
            }
        })
        .await;

    info!("KubeNova controller stopped");
    Ok(())
}

/// Reconciliation function, called on every change to a KubeNova or an
/// object it owns, and whenever a requeue timer fires
#[instrument(skip(obj, ctx), fields(name = %obj.name_any(), namespace = obj.namespace()))]
async fn reconcile(obj: Arc<KubeNova>, ctx: Arc<ControllerState>) -> Result<Action> {
    #[cfg(feature = "metrics")]
    let started = std::time::Instant::now();

    let namespace = obj.namespace().unwrap_or_default();
    let reconciler = Reconciler::new(KubeStore::new(ctx.client.clone()), ctx.config);
    let outcome = reconciler.reconcile_pass(&namespace, &obj.name_any()).await;

    #[cfg(feature = "metrics")]
    super::metrics::observe_reconcile_duration_seconds(
        CONTROLLER_NAME,
        started.elapsed().as_secs_f64(),
    );

    outcome.map(|o| o.into_action(&ctx.config))
}

/// Every failed pass waits out the same backoff; faster retries cannot fix a
/// bad spec or a missing namespace, and transient errors clear on their own
fn error_policy(root: Arc<KubeNova>, error: &Error, ctx: Arc<ControllerState>) -> Action {
    error!(
        "Reconciliation error for {} (retriable: {}): {}",
        root.name_any(),
        error.is_retriable(),
        error
    );

    #[cfg(feature = "metrics")]
    super::metrics::inc_reconcile_error(CONTROLLER_NAME, error.kind_label());

    Action::requeue(ctx.config.error_backoff)
}
