//! Desired-state builders for the objects a KubeNova owns
//!
//! Every function here is pure: it takes the `KubeNova` resource (plus, for the
//! Secret, the live node address and port) and returns typed k8s-openapi
//! objects. The controller decides whether to create, update or skip them.

pub mod config_maps;
mod nginx;
pub mod rbac;
pub mod secret;
pub mod services;
pub mod web;

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::crd::{KubeNova, ServiceConfig, ServicesConfig};

pub use config_maps::build_all_config_maps;
pub use rbac::{build_cluster_role_binding, build_service_account, cluster_role_binding_name};
pub use secret::build_secret;
pub use services::{build_all_services, ServiceResources};
pub use web::{build_web_resources, WebResources};

pub const SERVICE_ACCOUNT_NAME: &str = "kube-nova-sa";
pub const SECRET_NAME: &str = "kube-nova-secret";
pub const WEB_NAME: &str = "kube-nova-web";
pub const NGINX_CONFIG_MAP_NAME: &str = "frontend-nginx-config";
pub const METRICS_PORT: i32 = 9999;
pub const TIMEZONE: &str = "Asia/Shanghai";

const MANAGED_BY: &str = "kube-nova-operator";

/// The seven backend services of the platform
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendService {
    PortalApi,
    PortalRpc,
    ManagerApi,
    ManagerRpc,
    WorkloadApi,
    ConsoleApi,
    ConsoleRpc,
}

impl BackendService {
    pub const ALL: [BackendService; 7] = [
        BackendService::PortalApi,
        BackendService::PortalRpc,
        BackendService::ManagerApi,
        BackendService::ManagerRpc,
        BackendService::WorkloadApi,
        BackendService::ConsoleApi,
        BackendService::ConsoleRpc,
    ];

    /// Deployment, Service and image name
    pub fn name(self) -> &'static str {
        match self {
            BackendService::PortalApi => "portal-api",
            BackendService::PortalRpc => "portal-rpc",
            BackendService::ManagerApi => "manager-api",
            BackendService::ManagerRpc => "manager-rpc",
            BackendService::WorkloadApi => "workload-api",
            BackendService::ConsoleApi => "console-api",
            BackendService::ConsoleRpc => "console-rpc",
        }
    }

    pub fn port(self) -> i32 {
        match self {
            BackendService::PortalApi => 8810,
            BackendService::PortalRpc => 30010,
            BackendService::ManagerApi => 8811,
            BackendService::ManagerRpc => 30011,
            BackendService::WorkloadApi => 8812,
            BackendService::ConsoleApi => 8818,
            BackendService::ConsoleRpc => 30018,
        }
    }

    pub fn is_rpc(self) -> bool {
        matches!(
            self,
            BackendService::PortalRpc | BackendService::ManagerRpc | BackendService::ConsoleRpc
        )
    }

    /// `api` or `rpc`, used as the component label
    pub fn tier(self) -> &'static str {
        if self.is_rpc() {
            "rpc"
        } else {
            "api"
        }
    }

    pub fn config_map_name(self) -> String {
        format!("{}-config", self.name())
    }

    /// Console services keep a scratch cache on an emptyDir
    pub fn needs_cache_volume(self) -> bool {
        matches!(self, BackendService::ConsoleApi | BackendService::ConsoleRpc)
    }

    pub fn config(self, services: &ServicesConfig) -> Option<&ServiceConfig> {
        match self {
            BackendService::PortalApi => services.portal_api.as_ref(),
            BackendService::PortalRpc => services.portal_rpc.as_ref(),
            BackendService::ManagerApi => services.manager_api.as_ref(),
            BackendService::ManagerRpc => services.manager_rpc.as_ref(),
            BackendService::WorkloadApi => services.workload_api.as_ref(),
            BackendService::ConsoleApi => services.console_api.as_ref(),
            BackendService::ConsoleRpc => services.console_rpc.as_ref(),
        }
    }

    /// Services without an explicit config block are enabled
    pub fn is_enabled(self, services: &ServicesConfig) -> bool {
        self.config(services).map_or(true, ServiceConfig::is_enabled)
    }
}

impl std::fmt::Display for BackendService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Labels shared by everything the operator creates for one KubeNova
pub fn common_labels(kn: &KubeNova) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "kube-nova".to_string());
    labels.insert("app.kubernetes.io/instance".to_string(), kn.name_any());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        MANAGED_BY.to_string(),
    );
    labels
}

/// Create an OwnerReference for garbage collection
pub fn owner_reference(kn: &KubeNova) -> OwnerReference {
    OwnerReference {
        api_version: KubeNova::api_version(&()).to_string(),
        kind: KubeNova::kind(&()).to_string(),
        name: kn.name_any(),
        uid: kn.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Metadata for a namespaced object owned by `kn`
pub(crate) fn owned_meta(
    kn: &KubeNova,
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        owner_references: Some(vec![owner_reference(kn)]),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::fixtures::{kube_nova, valid_spec};

    #[test]
    fn test_owner_reference_points_at_root() {
        let kn = kube_nova("nova", "platform", valid_spec());
        let owner = owner_reference(&kn);
        assert_eq!(owner.kind, "KubeNova");
        assert_eq!(owner.api_version, "apps.ikubeops.com/v1");
        assert_eq!(owner.uid, "uid-nova");
        assert_eq!(owner.controller, Some(true));
    }

    #[test]
    fn test_disabled_service_is_skipped() {
        let mut spec = valid_spec();
        spec.services.console_rpc = Some(ServiceConfig {
            enabled: Some(false),
            ..Default::default()
        });
        spec.services.console_api = Some(ServiceConfig::default());

        assert!(!BackendService::ConsoleRpc.is_enabled(&spec.services));
        assert!(BackendService::ConsoleApi.is_enabled(&spec.services));
        assert!(BackendService::PortalApi.is_enabled(&spec.services));
    }

    #[test]
    fn test_catalog_names_and_ports_are_unique() {
        let mut names: Vec<_> = BackendService::ALL.iter().map(|s| s.name()).collect();
        let mut ports: Vec<_> = BackendService::ALL.iter().map(|s| s.port()).collect();
        names.dedup();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(names.len(), 7);
        assert_eq!(ports.len(), 7);
        assert_eq!(BackendService::ManagerRpc.config_map_name(), "manager-rpc-config");
        assert_eq!(BackendService::WorkloadApi.tier(), "api");
    }
}
