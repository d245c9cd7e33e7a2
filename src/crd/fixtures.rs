//! Test fixtures shared by the crd, builder and controller tests

use kube::api::ObjectMeta;

use super::{
    CacheConfig, DatabaseConfig, IngressConfig, JwtConfig, KubeNova, KubeNovaSpec,
    NodePortConfig, NodePortHttpsConfig, ServicesConfig, StorageConfig, TlsSecretConfig,
    WebConfig,
};

pub const JWT_SECRET: &str = "0123456789abcdef0123456789abcdef";

/// A spec that passes validation, exposed through a node port
pub fn valid_spec() -> KubeNovaSpec {
    KubeNovaSpec {
        image_registry: None,
        database: DatabaseConfig {
            host: "mysql.infra".to_string(),
            port: 3306,
            database: "kube_nova".to_string(),
            user: "nova".to_string(),
            password: "s3cret".to_string(),
            ..Default::default()
        },
        cache: CacheConfig {
            host: "redis.infra".to_string(),
            ..Default::default()
        },
        storage: StorageConfig {
            endpoint: "minio.infra:9000".to_string(),
            access_key: "minio".to_string(),
            secret_key: "minio123".to_string(),
            bucket: "kube-nova".to_string(),
            ..Default::default()
        },
        telemetry: None,
        services: ServicesConfig {
            jwt: JwtConfig {
                access_secret: JWT_SECRET.to_string(),
                refresh_secret: JWT_SECRET.to_string(),
                ..Default::default()
            },
            ..Default::default()
        },
        web: WebConfig {
            expose_type: "nodeport".to_string(),
            ..Default::default()
        },
    }
}

/// Same as [`valid_spec`] but exposed through an ingress
pub fn ingress_spec(host: &str, tls: bool) -> KubeNovaSpec {
    let mut spec = valid_spec();
    spec.web.expose_type = "ingress".to_string();
    spec.web.ingress = Some(IngressConfig {
        host: host.to_string(),
        tls: tls.then(|| TlsSecretConfig {
            enabled: true,
            secret_name: "web-tls".to_string(),
        }),
        ..Default::default()
    });
    spec
}

/// Node-port exposure with HTTPS switched on
pub fn node_port_https_spec() -> KubeNovaSpec {
    let mut spec = valid_spec();
    spec.web.node_port = Some(NodePortConfig {
        http_port: 0,
        https: Some(NodePortHttpsConfig {
            enabled: true,
            port: 0,
            secret_name: "web-tls".to_string(),
        }),
    });
    spec
}

pub fn kube_nova(name: &str, namespace: &str, spec: KubeNovaSpec) -> KubeNova {
    let mut kn = KubeNova::new(name, spec);
    kn.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        uid: Some(format!("uid-{name}")),
        generation: Some(1),
        ..Default::default()
    };
    kn
}
