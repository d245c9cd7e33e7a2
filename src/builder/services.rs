//! Backend service Deployments and ClusterIP Services

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment,
};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource,
    EnvFromSource, EnvVar, EnvVarSource, HTTPGetAction, KeyToPath, LocalObjectReference,
    ObjectFieldSelector, PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecretEnvSource, SecretVolumeSource, SecurityContext, Service,
    ServicePort, ServiceSpec, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::secret::MINIO_CERTS_DIR;
use super::{
    common_labels, owned_meta, BackendService, METRICS_PORT, SECRET_NAME, SERVICE_ACCOUNT_NAME,
    TIMEZONE,
};
use crate::crd::KubeNova;

/// Desired Deployment and Service for one backend service
#[derive(Clone, Debug)]
pub struct ServiceResources {
    pub service: BackendService,
    pub deployment: Deployment,
    pub svc: Service,
}

/// Build resources for every enabled backend service, in catalog order
pub fn build_all_services(kn: &KubeNova, namespace: &str) -> Vec<ServiceResources> {
    BackendService::ALL
        .iter()
        .copied()
        .filter(|svc| svc.is_enabled(&kn.spec.services))
        .map(|svc| ServiceResources {
            service: svc,
            deployment: build_deployment(kn, namespace, svc),
            svc: build_service(kn, namespace, svc),
        })
        .collect()
}

fn workload_labels(kn: &KubeNova, service: BackendService) -> BTreeMap<String, String> {
    let mut labels = common_labels(kn);
    labels.insert("app".to_string(), service.name().to_string());
    labels.insert("component".to_string(), service.tier().to_string());
    labels.insert(
        "app.kubernetes.io/component".to_string(),
        service.tier().to_string(),
    );
    labels
}

pub fn build_deployment(kn: &KubeNova, namespace: &str, service: BackendService) -> Deployment {
    let config = service.config(&kn.spec.services);
    let registry = kn.spec.image_registry();
    let name = service.name();
    let labels = workload_labels(kn, service);

    let image = config
        .map(|c| c.image.clone())
        .filter(|image| !image.is_empty())
        .unwrap_or_else(|| registry.image_for(name));
    let replicas = config.map_or(crate::crd::DEFAULT_SERVICE_REPLICAS, |c| {
        c.effective_replicas()
    });

    let mut env = vec![
        EnvVar {
            name: "TZ".to_string(),
            value: Some(TIMEZONE.to_string()),
            ..Default::default()
        },
        EnvVar {
            name: "POD_NAMESPACE".to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: "metadata.namespace".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    if let Some(c) = config {
        env.extend(c.env.iter().cloned());
    }

    let minio_secret = match service {
        BackendService::PortalRpc => kn.spec.storage.tls_secret_name(),
        _ => None,
    };

    let mut mounts = vec![VolumeMount {
        name: "config".to_string(),
        mount_path: "/app/etc".to_string(),
        read_only: Some(true),
        ..Default::default()
    }];
    let mut volumes = vec![Volume {
        name: "config".to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(service.config_map_name()),
            ..Default::default()
        }),
        ..Default::default()
    }];

    if let Some(secret_name) = minio_secret {
        mounts.push(VolumeMount {
            name: "minio-certs".to_string(),
            mount_path: MINIO_CERTS_DIR.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        volumes.push(Volume {
            name: "minio-certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.to_string()),
                optional: Some(false),
                items: Some(
                    ["public.crt", "private.key"]
                        .iter()
                        .map(|key| KeyToPath {
                            key: key.to_string(),
                            path: key.to_string(),
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if service.needs_cache_volume() {
        mounts.push(VolumeMount {
            name: "cache".to_string(),
            mount_path: "/app/cache".to_string(),
            ..Default::default()
        });
        volumes.push(empty_dir_volume("cache", Some("1Gi")));
    }

    let container = Container {
        name: name.to_string(),
        image: Some(image),
        image_pull_policy: Some(registry.pull_policy.clone()),
        ports: Some(vec![
            ContainerPort {
                container_port: service.port(),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
            ContainerPort {
                name: Some("metrics".to_string()),
                container_port: METRICS_PORT,
                protocol: Some("TCP".to_string()),
                ..Default::default()
            },
        ]),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: Some(SECRET_NAME.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }]),
        env: Some(env),
        startup_probe: Some(http_probe("/healthz", METRICS_PORT, 0, 5, 12)),
        liveness_probe: Some(http_probe("/healthz", METRICS_PORT, 30, 10, 3)),
        readiness_probe: Some(http_probe("/healthz", METRICS_PORT, 10, 5, 3)),
        resources: Some(
            config
                .and_then(|c| c.resources.clone())
                .unwrap_or_else(|| resource_requirements(("200m", "256Mi"), ("1000m", "512Mi"))),
        ),
        volume_mounts: Some(mounts),
        security_context: Some(security_context()),
        ..Default::default()
    };

    Deployment {
        metadata: owned_meta(kn, name, namespace, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            strategy: Some(rolling_update()),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    name.to_string(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([
                        ("prometheus.io/scrape".to_string(), "true".to_string()),
                        ("prometheus.io/port".to_string(), METRICS_PORT.to_string()),
                        ("prometheus.io/path".to_string(), "/metrics".to_string()),
                    ])),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    service_account_name: Some(SERVICE_ACCOUNT_NAME.to_string()),
                    affinity: Some(spread_by_app(name)),
                    containers: vec![container],
                    volumes: Some(volumes),
                    image_pull_secrets: pull_secrets(&registry.pull_secrets),
                    dns_policy: Some("ClusterFirst".to_string()),
                    restart_policy: Some("Always".to_string()),
                    termination_grace_period_seconds: Some(30),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn build_service(kn: &KubeNova, namespace: &str, service: BackendService) -> Service {
    let mut labels = common_labels(kn);
    labels.insert("app".to_string(), service.name().to_string());
    labels.insert("component".to_string(), service.tier().to_string());

    Service {
        metadata: owned_meta(kn, service.name(), namespace, labels),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(BTreeMap::from([(
                "app".to_string(),
                service.name().to_string(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                port: service.port(),
                target_port: Some(IntOrString::Int(service.port())),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Pod template helpers shared with the web tier
// ============================================================================

pub(super) fn http_probe(
    path: &str,
    port: i32,
    initial_delay: i32,
    period: i32,
    failure_threshold: i32,
) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay),
        period_seconds: Some(period),
        failure_threshold: Some(failure_threshold),
        timeout_seconds: Some(3),
        ..Default::default()
    }
}

/// `(cpu, memory)` requests and limits
pub(super) fn resource_requirements(
    requests: (&str, &str),
    limits: (&str, &str),
) -> ResourceRequirements {
    let list = |(cpu, memory): (&str, &str)| {
        BTreeMap::from([
            ("cpu".to_string(), Quantity(cpu.to_string())),
            ("memory".to_string(), Quantity(memory.to_string())),
        ])
    };
    ResourceRequirements {
        requests: Some(list(requests)),
        limits: Some(list(limits)),
        ..Default::default()
    }
}

pub(super) fn security_context() -> SecurityContext {
    SecurityContext {
        run_as_non_root: Some(false),
        read_only_root_filesystem: Some(false),
        allow_privilege_escalation: Some(false),
        capabilities: Some(Capabilities {
            drop: Some(vec!["ALL".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(super) fn rolling_update() -> DeploymentStrategy {
    DeploymentStrategy {
        type_: Some("RollingUpdate".to_string()),
        rolling_update: Some(RollingUpdateDeployment {
            max_surge: Some(IntOrString::Int(1)),
            max_unavailable: Some(IntOrString::Int(0)),
        }),
    }
}

/// Prefer scheduling replicas of `app` on different nodes
pub(super) fn spread_by_app(app: &str) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 50,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_expressions: Some(vec![LabelSelectorRequirement {
                                key: "app".to_string(),
                                operator: "In".to_string(),
                                values: Some(vec![app.to_string()]),
                            }]),
                            ..Default::default()
                        }),
                        topology_key: "kubernetes.io/hostname".to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(super) fn empty_dir_volume(name: &str, size_limit: Option<&str>) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource {
            size_limit: size_limit.map(|s| Quantity(s.to_string())),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(super) fn pull_secrets(names: &[String]) -> Option<Vec<LocalObjectReference>> {
    if names.is_empty() {
        return None;
    }
    Some(
        names
            .iter()
            .map(|name| LocalObjectReference {
                name: Some(name.clone()),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::fixtures::{kube_nova, valid_spec};
    use crate::crd::{ImageRegistryConfig, ServiceConfig, TlsSecretConfig};

    fn container(deployment: &Deployment) -> &Container {
        &deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
    }

    fn volume_names(deployment: &Deployment) -> Vec<String> {
        deployment.spec.as_ref().unwrap().template.spec.as_ref().unwrap()
            .volumes
            .iter()
            .flatten()
            .map(|v| v.name.clone())
            .collect()
    }

    #[test]
    fn test_all_services_enabled_by_default() {
        let kn = kube_nova("nova", "platform", valid_spec());
        let built = build_all_services(&kn, "platform");
        assert_eq!(built.len(), 7);
        assert_eq!(built[0].service, BackendService::PortalApi);
    }

    #[test]
    fn test_disabled_service_not_built() {
        let mut spec = valid_spec();
        spec.services.workload_api = Some(ServiceConfig {
            enabled: Some(false),
            ..Default::default()
        });
        let kn = kube_nova("nova", "platform", spec);
        let built = build_all_services(&kn, "platform");
        assert_eq!(built.len(), 6);
        assert!(built.iter().all(|r| r.service != BackendService::WorkloadApi));
    }

    #[test]
    fn test_default_image_and_replicas() {
        let kn = kube_nova("nova", "platform", valid_spec());
        let deployment = build_deployment(&kn, "platform", BackendService::ManagerApi);

        assert_eq!(deployment.spec.as_ref().unwrap().replicas, Some(2));
        assert_eq!(
            container(&deployment).image.as_deref(),
            Some("registry.cn-hangzhou.aliyuncs.com/kube-nova/manager-api:latest")
        );
        assert_eq!(
            container(&deployment).image_pull_policy.as_deref(),
            Some("Always")
        );
        assert_eq!(volume_names(&deployment), vec!["config"]);
    }

    #[test]
    fn test_service_overrides() {
        let mut spec = valid_spec();
        spec.image_registry = Some(ImageRegistryConfig {
            pull_secrets: vec!["regcred".to_string()],
            ..Default::default()
        });
        spec.services.portal_api = Some(ServiceConfig {
            replicas: 4,
            image: "example.com/portal-api:dev".to_string(),
            env: vec![EnvVar {
                name: "FEATURE".to_string(),
                value: Some("on".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        });
        let kn = kube_nova("nova", "platform", spec);
        let deployment = build_deployment(&kn, "platform", BackendService::PortalApi);

        assert_eq!(deployment.spec.as_ref().unwrap().replicas, Some(4));
        let c = container(&deployment);
        assert_eq!(c.image.as_deref(), Some("example.com/portal-api:dev"));
        let env: Vec<_> = c.env.iter().flatten().map(|e| e.name.as_str()).collect();
        assert_eq!(env, vec!["TZ", "POD_NAMESPACE", "FEATURE"]);

        let pod = deployment.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            pod.image_pull_secrets.unwrap()[0].name.as_deref(),
            Some("regcred")
        );
    }

    #[test]
    fn test_portal_rpc_mounts_minio_certs_with_storage_tls() {
        let mut spec = valid_spec();
        spec.storage.tls = Some(TlsSecretConfig {
            enabled: true,
            secret_name: "minio-tls".to_string(),
        });
        let kn = kube_nova("nova", "platform", spec);

        let portal_rpc = build_deployment(&kn, "platform", BackendService::PortalRpc);
        assert_eq!(volume_names(&portal_rpc), vec!["config", "minio-certs"]);

        let manager_rpc = build_deployment(&kn, "platform", BackendService::ManagerRpc);
        assert_eq!(volume_names(&manager_rpc), vec!["config"]);
    }

    #[test]
    fn test_console_services_get_cache_volume() {
        let kn = kube_nova("nova", "platform", valid_spec());
        let deployment = build_deployment(&kn, "platform", BackendService::ConsoleRpc);
        assert_eq!(volume_names(&deployment), vec!["config", "cache"]);
    }

    #[test]
    fn test_cluster_ip_service() {
        let kn = kube_nova("nova", "platform", valid_spec());
        let svc = build_service(&kn, "platform", BackendService::ConsoleRpc);
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("ClusterIP"));
        let port = &spec.ports.unwrap()[0];
        assert_eq!(port.port, 30018);
        assert_eq!(port.target_port, Some(IntOrString::Int(30018)));
    }
}
