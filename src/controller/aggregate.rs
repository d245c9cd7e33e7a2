//! Component health and access information for the KubeNova status
//!
//! Runs at the end of every full pass. Health comes from the live
//! Deployments; access information is derived from the spec plus, in
//! nodeport mode, the live web Service and the node inventory.

use chrono::Utc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::ResourceExt;
use tracing::{debug, warn};

use super::conditions::{
    set_condition, status_for, CONDITION_TYPE_READY, REASON_ALL_COMPONENTS_READY,
    REASON_COMPONENTS_NOT_READY,
};
use super::status::set_phase;
use super::store::ResourceStore;
use crate::builder::{BackendService, WEB_NAME};
use crate::crd::{
    AccessInfo, ComponentState, ComponentStatus, ExposeMode, KubeNova, KubeNovaSpec, Phase,
    NODE_IP_PLACEHOLDER,
};

pub const MESSAGE_ALL_READY: &str = "all components are running";
pub const MESSAGE_NOT_READY: &str = "some components are not ready yet";

const ALLOCATING_NODE_PORT: &str = "NodePort (allocating...)";
const SERVICE_CREATING: &str = "Service creating...";

pub fn classify(ready: i32, desired: i32) -> ComponentState {
    if ready == desired {
        ComponentState::Ready
    } else if ready > 0 {
        ComponentState::Running
    } else {
        ComponentState::Pending
    }
}

/// Status for one component, keeping the transition time while its state holds
pub fn component_status(
    previous: Option<&ComponentStatus>,
    label: &str,
    ready: i32,
    desired: i32,
) -> ComponentStatus {
    let state = classify(ready, desired);
    let message = match state {
        ComponentState::Ready => format!("{label} is running"),
        ComponentState::Running => format!("{label} is partially ready ({ready}/{desired})"),
        _ => format!("{label} is waiting for pods to start"),
    };
    let last_transition_time = match previous {
        Some(p) if p.state == state && p.last_transition_time.is_some() => {
            p.last_transition_time.clone()
        }
        _ => Some(Utc::now().to_rfc3339()),
    };
    ComponentStatus {
        state,
        ready_replicas: ready,
        desired_replicas: desired,
        message,
        last_transition_time,
    }
}

fn replica_counts(deployment: &Deployment) -> (i32, i32) {
    let desired = deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1);
    let ready = deployment
        .status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0);
    (ready, desired)
}

async fn live_deployment<S: ResourceStore>(
    store: &S,
    namespace: &str,
    name: &str,
) -> Option<Deployment> {
    match store.get::<Deployment>(namespace, name).await {
        Ok(found) => found,
        Err(e) => {
            warn!("Failed to read Deployment {}/{}: {}", namespace, name, e);
            None
        }
    }
}

/// Fold live health into `root.status` and derive the root phase
///
/// Returns true only when every managed component reports Ready. Components
/// whose Deployment does not exist yet are skipped and keep the root out of
/// Ready. Nothing is persisted.
pub async fn aggregate<S: ResourceStore>(store: &S, root: &mut KubeNova) -> bool {
    let namespace = root.namespace().unwrap_or_default();
    let generation = root.metadata.generation;
    let mut status = root.status.take().unwrap_or_default();
    let mut all_ready = true;

    let enabled: Vec<BackendService> = BackendService::ALL
        .into_iter()
        .filter(|svc| svc.is_enabled(&root.spec.services))
        .collect();
    status
        .component_status
        .services
        .retain(|name, _| enabled.iter().any(|svc| svc.name() == name));

    for service in &enabled {
        let Some(deployment) = live_deployment(store, &namespace, service.name()).await else {
            debug!("Deployment {} not created yet", service);
            all_ready = false;
            continue;
        };
        let (ready, desired) = replica_counts(&deployment);
        let component = component_status(
            status.component_status.services.get(service.name()),
            service.name(),
            ready,
            desired,
        );
        all_ready &= component.state == ComponentState::Ready;
        status
            .component_status
            .services
            .insert(service.name().to_string(), component);
    }

    match live_deployment(store, &namespace, WEB_NAME).await {
        Some(deployment) => {
            let (ready, desired) = replica_counts(&deployment);
            let component =
                component_status(status.component_status.web.as_ref(), "web", ready, desired);
            all_ready &= component.state == ComponentState::Ready;
            status.component_status.web = Some(component);
        }
        None => all_ready = false,
    }

    status.access_info = Some(access_info(store, &root.spec, &namespace, &enabled).await);

    let (reason, message) = if all_ready {
        (REASON_ALL_COMPONENTS_READY, MESSAGE_ALL_READY)
    } else {
        (REASON_COMPONENTS_NOT_READY, MESSAGE_NOT_READY)
    };
    set_condition(
        &mut status.conditions,
        CONDITION_TYPE_READY,
        status_for(all_ready),
        reason,
        message,
        generation,
    );
    status.observed_generation = generation;
    root.status = Some(status);

    let phase = if all_ready { Phase::Ready } else { Phase::Creating };
    set_phase(root, phase, message);
    all_ready
}

async fn access_info<S: ResourceStore>(
    store: &S,
    spec: &KubeNovaSpec,
    namespace: &str,
    enabled: &[BackendService],
) -> AccessInfo {
    let web_url = match (spec.web.expose_mode(), spec.web.ingress.as_ref()) {
        (Some(ExposeMode::Ingress), Some(ingress)) => {
            let scheme = if ingress.tls_enabled() { "https" } else { "http" };
            format!("{}://{}", scheme, ingress.host)
        }
        (Some(ExposeMode::NodePort), _) => node_port_url(store, namespace).await,
        _ => String::new(),
    };

    AccessInfo {
        web_url,
        database_endpoint: spec.database.endpoint(),
        cache_endpoint: spec.cache.endpoint(),
        storage_endpoint: spec.storage.url(),
        jaeger_ui_url: spec
            .telemetry
            .as_ref()
            .filter(|t| t.enabled)
            .map(|t| t.jaeger_endpoint.clone())
            .unwrap_or_default(),
        service_endpoints: enabled
            .iter()
            .map(|svc| {
                (
                    svc.name().to_string(),
                    format!("{}.{}.svc.cluster.local", svc.name(), namespace),
                )
            })
            .collect(),
    }
}

/// Assigned node port of the named port on the web Service
fn node_port(service: &Service, port_name: &str) -> Option<i32> {
    service
        .spec
        .as_ref()?
        .ports
        .as_ref()?
        .iter()
        .find(|p| p.name.as_deref() == Some(port_name))
        .and_then(|p| p.node_port)
        .filter(|p| *p > 0)
}

async fn node_port_url<S: ResourceStore>(store: &S, namespace: &str) -> String {
    let service = match store.get::<Service>(namespace, WEB_NAME).await {
        Ok(Some(service)) => service,
        Ok(None) => return SERVICE_CREATING.to_string(),
        Err(e) => {
            warn!("Failed to read web Service: {}", e);
            return SERVICE_CREATING.to_string();
        }
    };

    let (scheme, port) = match (node_port(&service, "https"), node_port(&service, "http")) {
        (Some(https), _) => ("https", https),
        (None, Some(http)) => ("http", http),
        (None, None) => return ALLOCATING_NODE_PORT.to_string(),
    };
    let address = node_address(store)
        .await
        .unwrap_or_else(|| NODE_IP_PLACEHOLDER.to_string());
    format!("{scheme}://{address}:{port}")
}

/// Externally reachable address of some node, if any node reports one
pub async fn node_address<S: ResourceStore>(store: &S) -> Option<String> {
    match store.list_nodes().await {
        Ok(nodes) => pick_node_address(&nodes),
        Err(e) => {
            warn!("Failed to list nodes: {}", e);
            None
        }
    }
}

fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn address_of<'a>(node: &'a Node, type_: &str) -> Option<&'a str> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == type_)
        .map(|a| a.address.as_str())
}

/// First ready node's ExternalIP, else its InternalIP; failing that, any
/// address of the first node
pub fn pick_node_address(nodes: &[Node]) -> Option<String> {
    let from_ready = nodes.iter().filter(|n| is_ready(n)).find_map(|n| {
        address_of(n, "ExternalIP").or_else(|| address_of(n, "InternalIP"))
    });
    if let Some(address) = from_ready {
        return Some(address.to_string());
    }

    let first = nodes.first()?;
    first
        .status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "ExternalIP" || a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

/// Port the web tier is reachable on from outside, for the MinIO proxy address
///
/// 0 outside nodeport mode. Prefers the https node port when HTTPS is on,
/// then the http node port, then the configured or default port.
pub async fn web_node_port<S: ResourceStore>(store: &S, root: &KubeNova) -> i32 {
    let spec = &root.spec;
    if spec.web.expose_mode() != Some(ExposeMode::NodePort) {
        return 0;
    }

    let namespace = root.namespace().unwrap_or_default();
    let service = match store.get::<Service>(&namespace, WEB_NAME).await {
        Ok(Some(service)) => service,
        Ok(None) => return spec.fallback_node_port(),
        Err(e) => {
            warn!("Failed to read web Service, using fallback port: {}", e);
            return spec.fallback_node_port();
        }
    };

    spec.web
        .node_port_https()
        .and_then(|_| node_port(&service, "https"))
        .or_else(|| node_port(&service, "http"))
        .unwrap_or_else(|| spec.fallback_node_port())
}
