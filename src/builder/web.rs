//! Web front end: nginx Deployment, Service, optional ConfigMap and Ingress

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ClientIPConfig, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, KeyToPath,
    PodSpec, PodTemplateSpec, SecretVolumeSource, Service, ServicePort, ServiceSpec,
    SessionAffinityConfig, Volume, VolumeMount,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::nginx::{default_conf, nginx_conf, DEFAULT_CONF_KEY, NGINX_CONF_KEY};
use super::services::{
    empty_dir_volume, http_probe, pull_secrets, resource_requirements, rolling_update,
    spread_by_app,
};
use super::{common_labels, owned_meta, NGINX_CONFIG_MAP_NAME, TIMEZONE, WEB_NAME};
use crate::crd::{ExposeMode, KubeNova};

const HTTP_PORT: i32 = 80;
const HTTPS_PORT: i32 = 443;
const SESSION_AFFINITY_SECONDS: i32 = 10800;

/// Desired objects for the web tier
#[derive(Clone, Debug)]
pub struct WebResources {
    /// Absent when the user supplies `customNginxConfigMap`
    pub nginx_config_map: Option<ConfigMap>,
    pub deployment: Deployment,
    pub service: Service,
    /// Present only in ingress mode
    pub ingress: Option<Ingress>,
}

pub fn build_web_resources(kn: &KubeNova, namespace: &str) -> WebResources {
    let nginx_config_map = kn
        .spec
        .web
        .custom_nginx_config_map
        .is_empty()
        .then(|| build_nginx_config_map(kn, namespace));

    let ingress = match kn.spec.web.expose_mode() {
        Some(ExposeMode::Ingress) => build_ingress(kn, namespace),
        _ => None,
    };

    WebResources {
        nginx_config_map,
        deployment: build_web_deployment(kn, namespace),
        service: build_web_service(kn, namespace),
        ingress,
    }
}

fn web_labels(kn: &KubeNova) -> BTreeMap<String, String> {
    let mut labels = common_labels(kn);
    labels.insert("app".to_string(), WEB_NAME.to_string());
    labels.insert("tier".to_string(), "frontend".to_string());
    labels.insert("app.kubernetes.io/component".to_string(), "web".to_string());
    labels
}

fn build_nginx_config_map(kn: &KubeNova, namespace: &str) -> ConfigMap {
    ConfigMap {
        metadata: owned_meta(kn, NGINX_CONFIG_MAP_NAME, namespace, common_labels(kn)),
        data: Some(BTreeMap::from([
            (NGINX_CONF_KEY.to_string(), nginx_conf().to_string()),
            (DEFAULT_CONF_KEY.to_string(), default_conf(kn)),
        ])),
        ..Default::default()
    }
}

pub fn build_web_deployment(kn: &KubeNova, namespace: &str) -> Deployment {
    let web = &kn.spec.web;
    let registry = kn.spec.image_registry();
    let labels = web_labels(kn);
    let https = web.node_port_https();

    let image = if web.image.is_empty() {
        registry.image_for(WEB_NAME)
    } else {
        web.image.clone()
    };

    let mut ports = vec![ContainerPort {
        name: Some("http".to_string()),
        container_port: HTTP_PORT,
        protocol: Some("TCP".to_string()),
        ..Default::default()
    }];
    if https.is_some() {
        ports.push(ContainerPort {
            name: Some("https".to_string()),
            container_port: HTTPS_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        });
    }

    let config_map_name = if web.custom_nginx_config_map.is_empty() {
        NGINX_CONFIG_MAP_NAME.to_string()
    } else {
        web.custom_nginx_config_map.clone()
    };

    let mut mounts = vec![
        mount("cache", "/var/cache/nginx", None),
        mount("logs", "/var/log/nginx", None),
        mount("run", "/var/run", None),
        mount("nginx-config", "/etc/nginx/nginx.conf", Some(NGINX_CONF_KEY)),
        mount(
            "nginx-config",
            "/etc/nginx/conf.d/default.conf",
            Some(DEFAULT_CONF_KEY),
        ),
    ];
    let mut volumes = vec![
        Volume {
            name: "nginx-config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(config_map_name),
                items: Some(
                    [NGINX_CONF_KEY, DEFAULT_CONF_KEY]
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
        },
        empty_dir_volume("cache", Some("1Gi")),
        empty_dir_volume("logs", Some("500Mi")),
        empty_dir_volume("run", Some("10Mi")),
    ];

    if let Some(https) = https.filter(|h| !h.secret_name.is_empty()) {
        mounts.push(VolumeMount {
            name: "tls-certs".to_string(),
            mount_path: "/etc/nginx/certs".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
        volumes.push(Volume {
            name: "tls-certs".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(https.secret_name.clone()),
                optional: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    let env = [
        ("TZ", TIMEZONE),
        ("NGINX_WORKER_PROCESSES", "auto"),
        ("NGINX_WORKER_CONNECTIONS", "4096"),
    ]
    .iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        ..Default::default()
    })
    .collect();

    let container = Container {
        name: WEB_NAME.to_string(),
        image: Some(image),
        image_pull_policy: Some(registry.pull_policy.clone()),
        ports: Some(ports),
        env: Some(env),
        volume_mounts: Some(mounts),
        startup_probe: Some(http_probe("/health", HTTP_PORT, 0, 2, 30)),
        liveness_probe: Some(http_probe("/health", HTTP_PORT, 10, 10, 3)),
        readiness_probe: Some(http_probe("/health", HTTP_PORT, 5, 5, 3)),
        resources: Some(
            web.resources
                .clone()
                .unwrap_or_else(|| resource_requirements(("100m", "128Mi"), ("500m", "512Mi"))),
        ),
        ..Default::default()
    };

    Deployment {
        metadata: owned_meta(kn, WEB_NAME, namespace, labels.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(web.effective_replicas()),
            strategy: Some(rolling_update()),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([(
                    "app".to_string(),
                    WEB_NAME.to_string(),
                )])),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(spread_by_app(WEB_NAME)),
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

fn mount(name: &str, path: &str, sub_path: Option<&str>) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        sub_path: sub_path.map(str::to_string),
        ..Default::default()
    }
}

pub fn build_web_service(kn: &KubeNova, namespace: &str) -> Service {
    let web = &kn.spec.web;
    let mut http = ServicePort {
        name: Some("http".to_string()),
        port: HTTP_PORT,
        target_port: Some(IntOrString::Int(HTTP_PORT)),
        protocol: Some("TCP".to_string()),
        ..Default::default()
    };

    let mut spec = ServiceSpec {
        selector: Some(BTreeMap::from([("app".to_string(), WEB_NAME.to_string())])),
        ..Default::default()
    };

    match web.expose_mode() {
        Some(ExposeMode::NodePort) => {
            spec.type_ = Some("NodePort".to_string());
            spec.session_affinity = Some("ClientIP".to_string());
            spec.session_affinity_config = Some(SessionAffinityConfig {
                client_ip: Some(ClientIPConfig {
                    timeout_seconds: Some(SESSION_AFFINITY_SECONDS),
                }),
            });
            spec.external_traffic_policy = Some("Cluster".to_string());
            http.node_port = web.configured_http_node_port();

            let mut ports = vec![http];
            if let Some(https) = web.node_port_https() {
                ports.push(ServicePort {
                    name: Some("https".to_string()),
                    port: HTTPS_PORT,
                    target_port: Some(IntOrString::Int(HTTPS_PORT)),
                    protocol: Some("TCP".to_string()),
                    node_port: (https.port > 0).then_some(https.port),
                    ..Default::default()
                });
            }
            spec.ports = Some(ports);
        }
        _ => {
            spec.type_ = Some("ClusterIP".to_string());
            spec.ports = Some(vec![http]);
        }
    }

    Service {
        metadata: owned_meta(kn, WEB_NAME, namespace, web_labels(kn)),
        spec: Some(spec),
        ..Default::default()
    }
}

/// nginx ingress annotations, TLS-aware, with user annotations layered on top
fn ingress_annotations(kn: &KubeNova) -> BTreeMap<String, String> {
    let tls = kn
        .spec
        .web
        .ingress
        .as_ref()
        .is_some_and(|i| i.tls_enabled())
        .to_string();

    let mut annotations: BTreeMap<String, String> = [
        ("ssl-redirect", tls.as_str()),
        ("force-ssl-redirect", tls.as_str()),
        ("proxy-body-size", "1024m"),
        ("proxy-connect-timeout", "600"),
        ("proxy-send-timeout", "600"),
        ("proxy-read-timeout", "600"),
        ("proxy-buffer-size", "8k"),
        ("proxy-buffers-number", "4"),
        ("websocket-services", WEB_NAME),
        ("proxy-http-version", "1.1"),
        ("enable-cors", "true"),
        ("cors-allow-methods", "GET, POST, PUT, DELETE, OPTIONS, PATCH"),
        ("cors-allow-origin", "*"),
        ("cors-allow-credentials", "true"),
        ("cors-max-age", "3600"),
        ("limit-rps", "100"),
        ("limit-connections", "50"),
        ("affinity", "cookie"),
        ("affinity-mode", "persistent"),
        ("session-cookie-name", "route"),
        ("session-cookie-hash", "sha1"),
    ]
    .iter()
    .map(|(k, v)| (format!("nginx.ingress.kubernetes.io/{k}"), v.to_string()))
    .collect();

    if let Some(ingress) = &kn.spec.web.ingress {
        annotations.extend(ingress.annotations.clone());
    }
    annotations
}

fn build_ingress(kn: &KubeNova, namespace: &str) -> Option<Ingress> {
    let config = kn.spec.web.ingress.as_ref()?;

    let mut metadata = owned_meta(kn, WEB_NAME, namespace, web_labels(kn));
    metadata.annotations = Some(ingress_annotations(kn));

    let tls = config
        .tls
        .as_ref()
        .filter(|t| t.enabled && !t.secret_name.is_empty())
        .map(|t| {
            vec![IngressTLS {
                hosts: Some(vec![config.host.clone()]),
                secret_name: Some(t.secret_name.clone()),
            }]
        });

    Some(Ingress {
        metadata,
        spec: Some(IngressSpec {
            ingress_class_name: Some(config.class_name.clone()),
            rules: Some(vec![IngressRule {
                host: Some(config.host.clone()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(IngressServiceBackend {
                                name: WEB_NAME.to_string(),
                                port: Some(ServiceBackendPort {
                                    number: Some(HTTP_PORT),
                                    ..Default::default()
                                }),
                            }),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            tls,
            ..Default::default()
        }),
        ..Default::default()
    })
}
