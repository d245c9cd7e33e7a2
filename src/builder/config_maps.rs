//! Service configuration files for the backend tier
//!
//! Each backend service reads `/app/etc/config.yaml`. The file only holds
//! `${VAR}` placeholders that resolve against the `kube-nova-secret`
//! environment, so its content is fixed per service and never depends on
//! the spec. That keeps the ConfigMaps stable across passes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use k8s_openapi::api::core::v1::ConfigMap;

use super::{common_labels, owned_meta, BackendService, METRICS_PORT};
use crate::crd::KubeNova;

pub const CONFIG_FILE_KEY: &str = "config.yaml";

const API_MAX_BYTES: u64 = 10_485_760;
const CONSOLE_MAX_BYTES: u64 = 5_048_576_000;

/// Optional blocks appended after the common header and cache block
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Section {
    Mysql,
    DbCache,
    Storage,
    Auth,
    Rpc(BackendService),
}

/// Build the seven `{svc}-config` ConfigMaps, enabled or not
pub fn build_all_config_maps(kn: &KubeNova, namespace: &str) -> Vec<ConfigMap> {
    BackendService::ALL
        .iter()
        .map(|svc| build_config_map(kn, namespace, *svc))
        .collect()
}

pub fn build_config_map(kn: &KubeNova, namespace: &str, service: BackendService) -> ConfigMap {
    let mut data = BTreeMap::new();
    data.insert(CONFIG_FILE_KEY.to_string(), render_config(service));

    ConfigMap {
        metadata: owned_meta(
            kn,
            &service.config_map_name(),
            namespace,
            common_labels(kn),
        ),
        data: Some(data),
        ..Default::default()
    }
}

fn sections(service: BackendService) -> &'static [Section] {
    use BackendService::*;
    use Section::*;
    match service {
        PortalApi => &[Rpc(PortalRpc)],
        PortalRpc => &[Mysql, DbCache, Storage, Auth],
        ManagerApi => &[Rpc(ManagerRpc), Rpc(PortalRpc)],
        ManagerRpc => &[Mysql, DbCache, Rpc(PortalRpc)],
        WorkloadApi => &[Rpc(ManagerRpc), Rpc(PortalRpc)],
        ConsoleApi => &[Rpc(ManagerRpc), Rpc(ConsoleRpc), Rpc(PortalRpc)],
        ConsoleRpc => &[Mysql, DbCache],
    }
}

/// RPC services register as `portal.rpc`, API services by plain name
fn registered_name(service: BackendService) -> String {
    if service.is_rpc() {
        service.name().replace('-', ".")
    } else {
        service.name().to_string()
    }
}

/// Config key of an RPC client block, e.g. `PortalRpc`
fn rpc_client_key(service: BackendService) -> &'static str {
    match service {
        BackendService::PortalRpc => "PortalRpc",
        BackendService::ManagerRpc => "ManagerRpc",
        BackendService::ConsoleRpc => "ConsoleRpc",
        _ => "",
    }
}

pub(crate) fn render_config(service: BackendService) -> String {
    let mut out = String::new();
    let name = service.name();

    // Writing into a String cannot fail
    let _ = writeln!(out, "Name: {}", registered_name(service));
    if service.is_rpc() {
        let _ = writeln!(out, "ListenOn: 0.0.0.0:{}", service.port());
    } else {
        let _ = writeln!(out, "Host: 0.0.0.0");
        let _ = writeln!(out, "Port: {}", service.port());
    }
    out.push_str("Mode: pro\nTimeout: ${DEFAULT_TIMEOUT}\n");

    match service {
        BackendService::PortalApi => {
            let _ = writeln!(out, "MaxBytes: {API_MAX_BYTES}");
        }
        BackendService::PortalRpc => {
            out.push_str("DemoMode: ${DEMO_MODE}\nPortalName: ${PORTAL_NAME}\nPortalUrl: ${PORTAL_URL}\n");
        }
        BackendService::ManagerApi => {
            let _ = writeln!(out, "MaxBytes: {API_MAX_BYTES}");
            out.push_str("\nWebhook:\n  AlertmanagerToken: ${ALERTMANAGER_WEBHOOK_TOKEN}\n");
        }
        BackendService::WorkloadApi => out.push_str("InjectImage: ${INJECT_IMAGE}\n"),
        BackendService::ConsoleApi => {
            let _ = writeln!(out, "MaxBytes: {CONSOLE_MAX_BYTES}");
            out.push_str("LocalCacheDir: /app/cache\n");
        }
        BackendService::ManagerRpc | BackendService::ConsoleRpc => {}
    }

    let _ = write!(
        out,
        "
DevServer:
  Enabled: true
  Port: {METRICS_PORT}
  HealthPath: \"/healthz\"
  MetricsPath: \"/metrics\"
  EnableMetrics: true

Telemetry:
  Name: {name}
  Endpoint: ${{JAEGER_ENDPOINT}}
  Sampler: ${{TELEMETRY_SAMPLER}}
  Batcher: ${{TELEMETRY_BATCHER}}

Log:
  ServiceName: {name}
  Mode: console
  Encoding: plain
  TimeFormat: \"2006-01-02 15:04:05\"
  Path: logs
  Level: info
  MaxContentLength: 1024
  Compress: false
  Stat: true
  KeepDays: 7
  StackCooldownMillis: 100
  MaxBackups: 0
  MaxSize: 0
  Rotation: daily

Cache:
{cache}",
        cache = redis_fields("  ")
    );

    for section in sections(service) {
        out.push('\n');
        match section {
            Section::Mysql => out.push_str(
                "Mysql:
  DataSource: ${MYSQL_USER}:${MYSQL_PASSWORD}@tcp(${MYSQL_HOST}:${MYSQL_PORT})/${MYSQL_DATABASE}?charset=utf8mb4&parseTime=True&loc=Local&timeout=10s
  MaxOpenConns: ${MYSQL_MAX_OPEN_CONNS}
  MaxIdleConns: ${MYSQL_MAX_IDLE_CONNS}
  ConnMaxLifetime: ${MYSQL_CONN_MAX_LIFETIME}
",
            ),
            Section::DbCache => {
                let fields = redis_fields("    ");
                let _ = write!(out, "DBCache:\n  - {}", fields.trim_start());
            }
            Section::Storage => out.push_str(
                "StorageConf:
  Provider: minio
  Endpoints: [\"${MINIO_ENDPOINT}\"]
  EndpointProxy: ${MINIO_ENDPOINT_PROXY}
  AccessKey: ${MINIO_ACCESS_KEY}
  AccessSecret: ${MINIO_SECRET_KEY}
  BucketName: ${MINIO_BUCKET}
  UseTLS: ${MINIO_USE_SSL}
  CAFile: ${MINIO_CA_FILE}
  CAKey: ${MINIO_CA_KEY}
",
            ),
            Section::Auth => out.push_str(
                "AuthConfig:
  AccessSecret: ${JWT_ACCESS_SECRET}
  AccessExpire: ${JWT_ACCESS_EXPIRE}
  RefreshSecret: ${JWT_REFRESH_SECRET}
  RefreshExpire: ${JWT_REFRESH_EXPIRE}
  RefreshAfter: ${JWT_REFRESH_AFTER}
",
            ),
            Section::Rpc(target) => {
                let _ = write!(
                    out,
                    "{key}:
  Target: k8s://${{POD_NAMESPACE}}/{svc}:{port}
  Optional: true
  NonBlock: true
  Timeout: ${{DEFAULT_TIMEOUT}}
",
                    key = rpc_client_key(*target),
                    svc = target.name(),
                    port = target.port(),
                );
            }
        }
    }

    out
}

fn redis_fields(indent: &str) -> String {
    [
        "Host: ${REDIS_HOST}:${REDIS_PORT}",
        "Type: ${REDIS_TYPE}",
        "Pass: ${REDIS_PASSWORD}",
        "Tls: ${REDIS_TLS}",
        "NonBlock: ${REDIS_NONBLOCK}",
        "PingTimeout: ${REDIS_PING_TIMEOUT}",
    ]
    .iter()
    .map(|line| format!("{indent}{line}\n"))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::fixtures::{kube_nova, valid_spec};

    #[test]
    fn test_builds_one_config_map_per_service() {
        let kn = kube_nova("nova", "platform", valid_spec());
        let maps = build_all_config_maps(&kn, "platform");

        let names: Vec<_> = maps
            .iter()
            .filter_map(|cm| cm.metadata.name.clone())
            .collect();
        assert_eq!(
            names,
            vec![
                "portal-api-config",
                "portal-rpc-config",
                "manager-api-config",
                "manager-rpc-config",
                "workload-api-config",
                "console-api-config",
                "console-rpc-config",
            ]
        );
        assert!(maps
            .iter()
            .all(|cm| cm.data.as_ref().is_some_and(|d| d.contains_key(CONFIG_FILE_KEY))));
    }

    #[test]
    fn test_rpc_header_and_sections() {
        let config = render_config(BackendService::PortalRpc);
        assert!(config.starts_with("Name: portal.rpc\nListenOn: 0.0.0.0:30010\n"));
        assert!(config.contains("PortalName: ${PORTAL_NAME}"));
        assert!(config.contains("\nMysql:\n"));
        assert!(config.contains("\nDBCache:\n  - Host: ${REDIS_HOST}:${REDIS_PORT}\n    Type: ${REDIS_TYPE}\n"));
        assert!(config.contains("\nStorageConf:\n"));
        assert!(config.contains("\nAuthConfig:\n"));
        assert!(!config.contains("Target:"));

        let parsed: serde_yaml::Value = serde_yaml::from_str(&config).unwrap();
        assert_eq!(parsed["DevServer"]["Port"], 9999);
    }

    #[test]
    fn test_api_header_and_rpc_targets() {
        let config = render_config(BackendService::ConsoleApi);
        assert!(config.starts_with("Name: console-api\nHost: 0.0.0.0\nPort: 8818\n"));
        assert!(config.contains("MaxBytes: 5048576000"));
        assert!(config.contains("LocalCacheDir: /app/cache"));

        let parsed: serde_yaml::Value = serde_yaml::from_str(&config).unwrap();
        assert_eq!(
            parsed["ConsoleRpc"]["Target"],
            "k8s://${POD_NAMESPACE}/console-rpc:30018"
        );
        assert_eq!(
            parsed["ManagerRpc"]["Target"],
            "k8s://${POD_NAMESPACE}/manager-rpc:30011"
        );
        assert!(parsed.get("Mysql").is_none());
    }

    #[test]
    fn test_manager_api_webhook_block() {
        let parsed: serde_yaml::Value =
            serde_yaml::from_str(&render_config(BackendService::ManagerApi)).unwrap();
        assert_eq!(
            parsed["Webhook"]["AlertmanagerToken"],
            "${ALERTMANAGER_WEBHOOK_TOKEN}"
        );
    }

    #[test]
    fn test_content_does_not_depend_on_spec() {
        let a = kube_nova("a", "ns", valid_spec());
        let mut spec = valid_spec();
        spec.database.host = "elsewhere".to_string();
        let b = kube_nova("a", "ns", spec);
        assert_eq!(
            build_config_map(&a, "ns", BackendService::WorkloadApi).data,
            build_config_map(&b, "ns", BackendService::WorkloadApi).data
        );
    }
}
