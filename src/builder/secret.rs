//! Runtime environment Secret shared by every backend service
//!
//! The config files rendered in [`super::config_maps`] refer to these keys as
//! `${VAR}` placeholders, and each Deployment loads the Secret via `envFrom`.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;

use super::{common_labels, owned_meta, SECRET_NAME};
use crate::crd::KubeNova;

pub const MINIO_CERTS_DIR: &str = "/app/etc/minio-certs";

const DEFAULT_PORTAL_NAME: &str = "Kube-Nova";

/// Build the Secret for `kn`
///
/// `node_ip` and `node_port` feed the MinIO proxy address in nodeport mode;
/// pass an empty address and 0 when they are not known yet.
pub fn build_secret(kn: &KubeNova, namespace: &str, node_ip: &str, node_port: i32) -> Secret {
    let spec = &kn.spec;
    let mut data: BTreeMap<String, String> = BTreeMap::new();
    let mut put = |key: &str, value: String| {
        data.insert(key.to_string(), value);
    };

    put("DEFAULT_TIMEOUT", spec.services.global_timeout.to_string());

    let db = &spec.database;
    put("MYSQL_HOST", db.host.clone());
    put("MYSQL_PORT", db.port.to_string());
    put("MYSQL_DATABASE", db.database.clone());
    put("MYSQL_USER", db.user.clone());
    put("MYSQL_PASSWORD", db.password.clone());
    put("MYSQL_MAX_OPEN_CONNS", db.effective_max_open_conns().to_string());
    put("MYSQL_MAX_IDLE_CONNS", db.effective_max_idle_conns().to_string());
    put(
        "MYSQL_CONN_MAX_LIFETIME",
        db.effective_conn_max_lifetime().to_string(),
    );

    let cache = &spec.cache;
    put("REDIS_HOST", cache.host.clone());
    put("REDIS_PORT", cache.port.to_string());
    put("REDIS_PASSWORD", cache.password.clone());
    put("REDIS_TYPE", cache.type_.clone());
    put("REDIS_TLS", cache.tls.to_string());
    put("REDIS_NONBLOCK", cache.non_block.to_string());
    put("REDIS_PING_TIMEOUT", cache.ping_timeout.clone());

    let storage = &spec.storage;
    put("MINIO_ENDPOINT", storage.endpoint.clone());
    put("MINIO_ACCESS_KEY", storage.access_key.clone());
    put("MINIO_SECRET_KEY", storage.secret_key.clone());
    put("MINIO_BUCKET", storage.bucket.clone());
    put("MINIO_USE_SSL", storage.tls_enabled().to_string());
    if storage.tls_enabled() {
        put("MINIO_CA_FILE", format!("{MINIO_CERTS_DIR}/public.crt"));
        put("MINIO_CA_KEY", format!("{MINIO_CERTS_DIR}/private.key"));
    } else {
        put("MINIO_CA_FILE", String::new());
        put("MINIO_CA_KEY", String::new());
    }
    put(
        "MINIO_ENDPOINT_PROXY",
        spec.minio_endpoint_proxy(node_ip, node_port),
    );

    let jwt = &spec.services.jwt;
    put("JWT_ACCESS_SECRET", jwt.access_secret.clone());
    put("JWT_ACCESS_EXPIRE", jwt.access_expire.to_string());
    put("JWT_REFRESH_SECRET", jwt.refresh_secret.clone());
    put("JWT_REFRESH_EXPIRE", jwt.refresh_expire.to_string());
    put("JWT_REFRESH_AFTER", jwt.refresh_after.to_string());

    put(
        "ALERTMANAGER_WEBHOOK_TOKEN",
        spec.services.webhook_token.clone(),
    );

    match spec.telemetry.as_ref().filter(|t| t.enabled) {
        Some(telemetry) => {
            put("JAEGER_ENDPOINT", telemetry.jaeger_endpoint.clone());
            put("TELEMETRY_SAMPLER", telemetry.sampler.clone());
            put("TELEMETRY_BATCHER", telemetry.batcher.clone());
        }
        None => {
            put("JAEGER_ENDPOINT", String::new());
            put("TELEMETRY_SAMPLER", "0".to_string());
            put("TELEMETRY_BATCHER", "jaeger".to_string());
        }
    }

    match &spec.services.portal {
        Some(portal) => {
            put("PORTAL_NAME", portal.name.clone());
            put("PORTAL_URL", portal.url.clone());
            put("DEMO_MODE", portal.demo_mode.to_string());
        }
        None => {
            put("PORTAL_NAME", DEFAULT_PORTAL_NAME.to_string());
            put("PORTAL_URL", String::new());
            put("DEMO_MODE", "false".to_string());
        }
    }

    put("INJECT_IMAGE", spec.services.inject_image.clone());

    Secret {
        metadata: owned_meta(kn, SECRET_NAME, namespace, common_labels(kn)),
        type_: Some("Opaque".to_string()),
        data: Some(
            data.into_iter()
                .map(|(k, v)| (k, ByteString(v.into_bytes())))
                .collect(),
        ),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::fixtures::{kube_nova, valid_spec};
    use crate::crd::{MinioProxyConfig, TelemetryConfig, TlsSecretConfig};

    fn value(secret: &Secret, key: &str) -> String {
        let bytes = &secret.data.as_ref().unwrap()[key];
        String::from_utf8(bytes.0.clone()).unwrap()
    }

    #[test]
    fn test_defaults_without_optional_blocks() {
        let kn = kube_nova("nova", "platform", valid_spec());
        let secret = build_secret(&kn, "platform", "", 0);

        assert_eq!(secret.metadata.name.as_deref(), Some("kube-nova-secret"));
        assert_eq!(secret.type_.as_deref(), Some("Opaque"));
        assert_eq!(value(&secret, "MYSQL_MAX_OPEN_CONNS"), "100");
        assert_eq!(value(&secret, "MYSQL_CONN_MAX_LIFETIME"), "30m");
        assert_eq!(value(&secret, "MINIO_USE_SSL"), "false");
        assert_eq!(value(&secret, "MINIO_CA_FILE"), "");
        assert_eq!(value(&secret, "MINIO_ENDPOINT_PROXY"), "http://minio.infra:9000");
        assert_eq!(value(&secret, "TELEMETRY_SAMPLER"), "0");
        assert_eq!(value(&secret, "DEMO_MODE"), "false");
        assert_eq!(value(&secret, "DEFAULT_TIMEOUT"), "30000");
    }

    #[test]
    fn test_storage_tls_and_telemetry() {
        let mut spec = valid_spec();
        spec.storage.tls = Some(TlsSecretConfig {
            enabled: true,
            secret_name: "minio-tls".to_string(),
        });
        spec.telemetry = Some(TelemetryConfig {
            enabled: true,
            jaeger_endpoint: "http://jaeger:14268/api/traces".to_string(),
            ..Default::default()
        });
        let kn = kube_nova("nova", "platform", spec);
        let secret = build_secret(&kn, "platform", "", 0);

        assert_eq!(value(&secret, "MINIO_USE_SSL"), "true");
        assert_eq!(
            value(&secret, "MINIO_CA_FILE"),
            "/app/etc/minio-certs/public.crt"
        );
        assert_eq!(value(&secret, "MINIO_ENDPOINT_PROXY"), "https://minio.infra:9000");
        assert_eq!(
            value(&secret, "JAEGER_ENDPOINT"),
            "http://jaeger:14268/api/traces"
        );
        assert_eq!(value(&secret, "TELEMETRY_SAMPLER"), "1.0");
    }

    #[test]
    fn test_proxy_endpoint_follows_node_info() {
        let mut spec = valid_spec();
        spec.web.minio_proxy = Some(MinioProxyConfig {
            enabled: true,
            ..Default::default()
        });
        let kn = kube_nova("nova", "platform", spec);

        let resolved = build_secret(&kn, "platform", "10.1.2.3", 31000);
        assert_eq!(
            value(&resolved, "MINIO_ENDPOINT_PROXY"),
            "http://10.1.2.3:31000/storage"
        );

        // Node info changing is the only reason the Secret changes between passes
        let unresolved = build_secret(&kn, "platform", "", 0);
        assert_ne!(resolved.data, unresolved.data);
    }
}
