//! Shared types for the KubeNova specification and status
//!
//! These types describe the external dependencies the platform connects to
//! (database, cache, object storage, tracing backend), the backend services and
//! web front end the operator deploys, and the status block the operator writes.
//!
//! # Type Hierarchy
//!
//! - [`ImageRegistryConfig`] - Where platform images are pulled from
//! - External dependencies: [`DatabaseConfig`], [`CacheConfig`], [`StorageConfig`], [`TelemetryConfig`]
//! - Backend tier: [`ServicesConfig`] holding one [`ServiceConfig`] per service
//! - Front-end tier: [`WebConfig`] with [`IngressConfig`], [`NodePortConfig`] and [`MinioProxyConfig`]
//! - Status: [`Phase`], [`Condition`], [`ComponentStatusMap`], [`AccessInfo`]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const DEFAULT_REGISTRY: &str = "registry.cn-hangzhou.aliyuncs.com";
pub const DEFAULT_ORGANIZATION: &str = "kube-nova";
pub const DEFAULT_TAG: &str = "latest";
pub const DEFAULT_PULL_POLICY: &str = "Always";

pub const DEFAULT_SERVICE_REPLICAS: i32 = 2;
pub const DEFAULT_WEB_REPLICAS: i32 = 3;
pub const DEFAULT_MINIO_PROXY_PATH: &str = "/storage";

fn default_mysql_port() -> i32 {
    3306
}

fn default_redis_port() -> i32 {
    6379
}

fn default_cache_type() -> String {
    "node".to_string()
}

fn default_ping_timeout() -> String {
    "3s".to_string()
}

fn default_sampler() -> String {
    "1.0".to_string()
}

fn default_batcher() -> String {
    "jaeger".to_string()
}

fn default_global_timeout() -> i64 {
    30000
}

fn default_access_expire() -> i64 {
    86400
}

fn default_refresh_expire() -> i64 {
    604800
}

fn default_ingress_class() -> String {
    "nginx".to_string()
}

fn default_proxy_path() -> String {
    DEFAULT_MINIO_PROXY_PATH.to_string()
}

// ============================================================================
// Image registry
// ============================================================================

/// Registry coordinates used to compose `{registry}/{organization}/{name}:{tag}`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageRegistryConfig {
    #[serde(default)]
    pub registry: String,
    #[serde(default)]
    pub organization: String,
    #[serde(default)]
    pub tag: String,
    /// Always, IfNotPresent or Never
    #[serde(default)]
    pub pull_policy: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pull_secrets: Vec<String>,
}

impl Default for ImageRegistryConfig {
    fn default() -> Self {
        Self {
            registry: DEFAULT_REGISTRY.to_string(),
            organization: DEFAULT_ORGANIZATION.to_string(),
            tag: DEFAULT_TAG.to_string(),
            pull_policy: DEFAULT_PULL_POLICY.to_string(),
            pull_secrets: Vec::new(),
        }
    }
}

impl ImageRegistryConfig {
    /// Full image reference for a platform component
    pub fn image_for(&self, component: &str) -> String {
        format!(
            "{}/{}/{}:{}",
            self.registry, self.organization, component, self.tag
        )
    }
}

// ============================================================================
// External dependencies
// ============================================================================

/// MySQL connection settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_mysql_port")]
    pub port: i32,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub max_open_conns: i32,
    #[serde(default)]
    pub max_idle_conns: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub conn_max_lifetime: String,
}

impl DatabaseConfig {
    pub fn effective_max_open_conns(&self) -> i32 {
        if self.max_open_conns <= 0 {
            100
        } else {
            self.max_open_conns
        }
    }

    pub fn effective_max_idle_conns(&self) -> i32 {
        if self.max_idle_conns <= 0 {
            50
        } else {
            self.max_idle_conns
        }
    }

    pub fn effective_conn_max_lifetime(&self) -> &str {
        if self.conn_max_lifetime.is_empty() {
            "30m"
        } else {
            &self.conn_max_lifetime
        }
    }

    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Redis connection settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: i32,
    /// `node` or `cluster`
    #[serde(rename = "type", default = "default_cache_type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub non_block: bool,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_redis_port(),
            type_: default_cache_type(),
            password: String::new(),
            tls: false,
            non_block: false,
            ping_timeout: default_ping_timeout(),
        }
    }
}

impl CacheConfig {
    /// `host:port`
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// TLS toggle that references a Secret holding the certificate material
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSecretConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_name: String,
}

/// MinIO object storage settings
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// `host:port` of the MinIO API, without scheme
    pub endpoint: String,
    /// Externally reachable URL handed to clients, overrides any derived value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint_proxy: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSecretConfig>,
}

impl StorageConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enabled)
    }

    /// Secret holding the MinIO CA material, when TLS is on
    pub fn tls_secret_name(&self) -> Option<&str> {
        self.tls
            .as_ref()
            .filter(|t| t.enabled && !t.secret_name.is_empty())
            .map(|t| t.secret_name.as_str())
    }

    /// Endpoint with the scheme implied by the TLS setting
    pub fn url(&self) -> String {
        let scheme = if self.tls_enabled() { "https" } else { "http" };
        format!("{}://{}", scheme, self.endpoint)
    }
}

/// Distributed tracing settings for the platform services
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jaeger_endpoint: String,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    #[serde(default = "default_batcher")]
    pub batcher: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            jaeger_endpoint: String::new(),
            sampler: default_sampler(),
            batcher: default_batcher(),
        }
    }
}

// ============================================================================
// Backend services
// ============================================================================

/// Token signing settings shared by the API services
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JwtConfig {
    pub access_secret: String,
    #[serde(default = "default_access_expire")]
    pub access_expire: i64,
    pub refresh_secret: String,
    #[serde(default = "default_refresh_expire")]
    pub refresh_expire: i64,
    #[serde(default = "default_refresh_expire")]
    pub refresh_after: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            access_secret: String::new(),
            access_expire: default_access_expire(),
            refresh_secret: String::new(),
            refresh_expire: default_refresh_expire(),
            refresh_after: default_refresh_expire(),
        }
    }
}

/// Branding for the portal UI
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PortalConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub demo_mode: bool,
}

/// Per-service overrides
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    /// Absent means enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub replicas: i32,
    /// Full image reference, overrides the registry-derived one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// Appended after the operator-managed variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

impl ServiceConfig {
    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn effective_replicas(&self) -> i32 {
        if self.replicas <= 0 {
            DEFAULT_SERVICE_REPLICAS
        } else {
            self.replicas
        }
    }
}

/// Settings for all backend services
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServicesConfig {
    /// Request timeout in milliseconds
    #[serde(default = "default_global_timeout")]
    pub global_timeout: i64,
    pub jwt: JwtConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub portal: Option<PortalConfig>,
    /// Token Alertmanager presents to the manager-api webhook
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub webhook_token: String,
    /// Image injected into workloads by workload-api
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub inject_image: String,

    #[serde(rename = "portalAPI", default, skip_serializing_if = "Option::is_none")]
    pub portal_api: Option<ServiceConfig>,
    #[serde(rename = "portalRPC", default, skip_serializing_if = "Option::is_none")]
    pub portal_rpc: Option<ServiceConfig>,
    #[serde(rename = "managerAPI", default, skip_serializing_if = "Option::is_none")]
    pub manager_api: Option<ServiceConfig>,
    #[serde(rename = "managerRPC", default, skip_serializing_if = "Option::is_none")]
    pub manager_rpc: Option<ServiceConfig>,
    #[serde(rename = "workloadAPI", default, skip_serializing_if = "Option::is_none")]
    pub workload_api: Option<ServiceConfig>,
    #[serde(rename = "consoleAPI", default, skip_serializing_if = "Option::is_none")]
    pub console_api: Option<ServiceConfig>,
    #[serde(rename = "consoleRPC", default, skip_serializing_if = "Option::is_none")]
    pub console_rpc: Option<ServiceConfig>,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            global_timeout: default_global_timeout(),
            jwt: JwtConfig::default(),
            portal: None,
            webhook_token: String::new(),
            inject_image: String::new(),
            portal_api: None,
            portal_rpc: None,
            manager_api: None,
            manager_rpc: None,
            workload_api: None,
            console_api: None,
            console_rpc: None,
        }
    }
}

// ============================================================================
// Web front end
// ============================================================================

/// How the web front end is reachable from outside the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExposeMode {
    Ingress,
    NodePort,
}

impl ExposeMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ingress" => Some(ExposeMode::Ingress),
            "nodeport" => Some(ExposeMode::NodePort),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExposeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExposeMode::Ingress => write!(f, "ingress"),
            ExposeMode::NodePort => write!(f, "nodeport"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngressConfig {
    #[serde(default = "default_ingress_class")]
    pub class_name: String,
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSecretConfig>,
    /// Merged over the operator's nginx annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            class_name: default_ingress_class(),
            host: String::new(),
            tls: None,
            annotations: BTreeMap::new(),
        }
    }
}

impl IngressConfig {
    pub fn tls_enabled(&self) -> bool {
        self.tls.as_ref().is_some_and(|t| t.enabled)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePortHttpsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Fixed node port, 0 lets the cluster allocate one
    #[serde(default)]
    pub port: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub secret_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePortConfig {
    /// Fixed node port for HTTP, 0 lets the cluster allocate one
    #[serde(default)]
    pub http_port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<NodePortHttpsConfig>,
}

/// Reverse proxy for MinIO served by the web tier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MinioProxyConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_path")]
    pub path_prefix: String,
    /// Explicit external URL of the proxy, skips derivation
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proxy_endpoint: String,
}

impl Default for MinioProxyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path_prefix: default_proxy_path(),
            proxy_endpoint: String::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebConfig {
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
    /// `ingress` or `nodeport`
    pub expose_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress: Option<IngressConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_port: Option<NodePortConfig>,
    #[serde(
        rename = "minioProxy",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub minio_proxy: Option<MinioProxyConfig>,
    /// Name of a user-supplied nginx ConfigMap, disables the generated one
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub custom_nginx_config_map: String,
}

impl WebConfig {
    pub fn expose_mode(&self) -> Option<ExposeMode> {
        ExposeMode::parse(&self.expose_type)
    }

    pub fn effective_replicas(&self) -> i32 {
        if self.replicas <= 0 {
            DEFAULT_WEB_REPLICAS
        } else {
            self.replicas
        }
    }

    /// HTTPS on the node port is only meaningful in nodeport mode
    pub fn node_port_https(&self) -> Option<&NodePortHttpsConfig> {
        if self.expose_mode() != Some(ExposeMode::NodePort) {
            return None;
        }
        self.node_port
            .as_ref()
            .and_then(|np| np.https.as_ref())
            .filter(|https| https.enabled)
    }

    pub fn configured_http_node_port(&self) -> Option<i32> {
        self.node_port
            .as_ref()
            .map(|np| np.http_port)
            .filter(|port| *port > 0)
    }

    pub fn minio_proxy_enabled(&self) -> bool {
        self.minio_proxy.as_ref().is_some_and(|p| p.enabled)
    }

    pub fn minio_proxy_path(&self) -> &str {
        match &self.minio_proxy {
            Some(p) if !p.path_prefix.is_empty() => &p.path_prefix,
            _ => DEFAULT_MINIO_PROXY_PATH,
        }
    }
}

// ============================================================================
// Status
// ============================================================================

/// Lifecycle phase of a KubeNova deployment
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    #[default]
    Pending,
    Validating,
    Creating,
    Updating,
    Ready,
    Failed,
    Deleting,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Pending => write!(f, "Pending"),
            Phase::Validating => write!(f, "Validating"),
            Phase::Creating => write!(f, "Creating"),
            Phase::Updating => write!(f, "Updating"),
            Phase::Ready => write!(f, "Ready"),
            Phase::Failed => write!(f, "Failed"),
            Phase::Deleting => write!(f, "Deleting"),
        }
    }
}

/// Health of a single managed workload
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ComponentState {
    #[default]
    Pending,
    Creating,
    Running,
    Ready,
    Failed,
    Updating,
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentState::Pending => write!(f, "Pending"),
            ComponentState::Creating => write!(f, "Creating"),
            ComponentState::Running => write!(f, "Running"),
            ComponentState::Ready => write!(f, "Ready"),
            ComponentState::Failed => write!(f, "Failed"),
            ComponentState::Updating => write!(f, "Updating"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    pub state: ComponentState,
    #[serde(default)]
    pub ready_replicas: i32,
    #[serde(default)]
    pub desired_replicas: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    /// Changes only when `state` changes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatusMap {
    /// Backend services keyed by service name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub services: BTreeMap<String, ComponentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web: Option<ComponentStatus>,
}

/// Addresses users and tools need to reach the platform
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccessInfo {
    #[serde(rename = "webURL", default, skip_serializing_if = "String::is_empty")]
    pub web_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database_endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cache_endpoint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub storage_endpoint: String,
    #[serde(
        rename = "jaegerUIURL",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub jaeger_ui_url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub service_endpoints: BTreeMap<String, String>,
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., "Ready", "Validated")
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition: "True", "False", or "Unknown"
    pub status: String,
    /// Last time the condition transitioned
    pub last_transition_time: String,
    /// Machine-readable reason for the condition
    pub reason: String,
    /// Human-readable message
    pub message: String,
    /// Generation of the resource the condition was computed from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}
