//! KubeNova Custom Resource Definition
//!
//! A KubeNova resource describes one complete Kube-Nova platform installation:
//! the external database, cache and object storage it connects to, the seven
//! backend services, and the nginx web front end.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    AccessInfo, CacheConfig, ComponentStatusMap, Condition, DatabaseConfig, ExposeMode,
    ImageRegistryConfig, Phase, ServicesConfig, StorageConfig, TelemetryConfig, WebConfig,
};

/// Placeholder used in derived URLs while no node address is resolvable
pub const NODE_IP_PLACEHOLDER: &str = "<NODE_IP>";

const DEFAULT_HTTP_NODE_PORT: i32 = 30080;
const DEFAULT_HTTPS_NODE_PORT: i32 = 30443;

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "apps.ikubeops.com",
    version = "v1",
    kind = "KubeNova",
    namespaced,
    status = "KubeNovaStatus",
    shortname = "kn",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Web","type":"string","jsonPath":".status.componentStatus.web.state"}"#,
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".status.accessInfo.webURL"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KubeNovaSpec {
    /// Defaults to the public Kube-Nova registry when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_registry: Option<ImageRegistryConfig>,

    pub database: DatabaseConfig,

    pub cache: CacheConfig,

    pub storage: StorageConfig,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetryConfig>,

    pub services: ServicesConfig,

    pub web: WebConfig,
}

impl KubeNovaSpec {
    /// Registry settings with defaults applied
    pub fn image_registry(&self) -> ImageRegistryConfig {
        self.image_registry.clone().unwrap_or_default()
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.telemetry.as_ref().is_some_and(|t| t.enabled)
    }

    /// MinIO address the backend services hand out to clients
    ///
    /// Without the web proxy this is the raw storage endpoint. With the proxy,
    /// an explicit `proxyEndpoint` wins; otherwise the address is derived from
    /// the web exposure: the ingress host, or a node address and node port.
    pub fn minio_endpoint_with_node_info(&self, node_ip: &str, node_port: i32) -> String {
        if !self.web.minio_proxy_enabled() {
            return self.storage.endpoint.clone();
        }
        if let Some(proxy) = &self.web.minio_proxy {
            if !proxy.proxy_endpoint.is_empty() {
                return proxy.proxy_endpoint.clone();
            }
        }

        let prefix = self.web.minio_proxy_path().trim_start_matches('/');

        if let (Some(ExposeMode::Ingress), Some(ingress)) =
            (self.web.expose_mode(), self.web.ingress.as_ref())
        {
            let scheme = if ingress.tls_enabled() { "https" } else { "http" };
            return format!("{}://{}/{}", scheme, ingress.host, prefix);
        }

        let https = self
            .web
            .node_port
            .as_ref()
            .and_then(|np| np.https.as_ref())
            .is_some_and(|h| h.enabled);
        let scheme = if https { "https" } else { "http" };
        let address = if node_ip.is_empty() {
            NODE_IP_PLACEHOLDER
        } else {
            node_ip
        };
        let port = match node_port {
            0 if https => DEFAULT_HTTPS_NODE_PORT,
            0 => DEFAULT_HTTP_NODE_PORT,
            p => p,
        };
        format!("{}://{}:{}/{}", scheme, address, port, prefix)
    }

    /// Value published as `MINIO_ENDPOINT_PROXY`
    pub fn minio_endpoint_proxy(&self, node_ip: &str, node_port: i32) -> String {
        if !self.storage.endpoint_proxy.is_empty() {
            self.storage.endpoint_proxy.clone()
        } else if self.web.minio_proxy_enabled() {
            self.minio_endpoint_with_node_info(node_ip, node_port)
        } else {
            self.storage.url()
        }
    }

    /// Fallback node port when the live Service has not been assigned one
    pub fn fallback_node_port(&self) -> i32 {
        self.web
            .configured_http_node_port()
            .unwrap_or(DEFAULT_HTTP_NODE_PORT)
    }
}

/// Status subresource for KubeNova
///
/// Written only by the operator. `observed_generation` advances when a full
/// reconciliation pass completes for that generation.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KubeNovaStatus {
    #[serde(default)]
    pub phase: Phase,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// RFC 3339 time of the last phase change written by the operator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    #[serde(default)]
    pub component_status: ComponentStatusMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_info: Option<AccessInfo>,
}
