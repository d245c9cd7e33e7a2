//! Well-formedness checks for `KubeNovaSpec`
//!
//! Validation collects every violation instead of stopping at the first one so
//! a single status update can tell the user everything that needs fixing.

use super::kube_nova::KubeNovaSpec;
use super::types::{
    CacheConfig, DatabaseConfig, ExposeMode, JwtConfig, StorageConfig, TelemetryConfig, WebConfig,
};

const MIN_JWT_SECRET_LEN: usize = 32;

/// Structured validation error for `KubeNovaSpec`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SpecValidationError {
    pub field: String,
    pub message: String,
    pub how_to_fix: String,
}

impl SpecValidationError {
    pub fn new(
        field: impl Into<String>,
        message: impl Into<String>,
        how_to_fix: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            how_to_fix: how_to_fix.into(),
        }
    }
}

impl std::fmt::Display for SpecValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Join validation errors into one status-friendly line
pub fn summarize(errors: &[SpecValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl KubeNovaSpec {
    /// Validate the spec, returning every violation found
    pub fn validate(&self) -> Result<(), Vec<SpecValidationError>> {
        let mut errors: Vec<SpecValidationError> = Vec::new();

        validate_database(&self.database, &mut errors);
        validate_cache(&self.cache, &mut errors);
        validate_storage(&self.storage, &mut errors);

        if let Some(telemetry) = &self.telemetry {
            if let Err(e) = validate_telemetry_endpoint(telemetry) {
                errors.push(e);
            }
        }

        validate_jwt(&self.services.jwt, &mut errors);
        validate_web(&self.web, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A TLS block that is switched on must name its certificate Secret
pub fn validate_tls_secret_name(
    field: &str,
    secret_name: &str,
) -> Result<(), SpecValidationError> {
    if secret_name.is_empty() {
        return Err(SpecValidationError::new(
            field,
            "TLS is enabled but no certificate Secret is named",
            format!("Set {field} to the name of a Secret holding the certificate and key, or disable TLS."),
        ));
    }
    Ok(())
}

/// Enabled tracing needs somewhere to send spans
pub fn validate_telemetry_endpoint(
    telemetry: &TelemetryConfig,
) -> Result<(), SpecValidationError> {
    if telemetry.enabled && telemetry.jaeger_endpoint.is_empty() {
        return Err(SpecValidationError::new(
            "spec.telemetry.jaegerEndpoint",
            "telemetry is enabled but jaegerEndpoint is empty",
            "Set spec.telemetry.jaegerEndpoint to the Jaeger collector address or set spec.telemetry.enabled to false.",
        ));
    }
    Ok(())
}

fn require_non_empty(
    value: &str,
    field: &str,
    errors: &mut Vec<SpecValidationError>,
) {
    if value.is_empty() {
        errors.push(SpecValidationError::new(
            field,
            format!("{field} must not be empty"),
            format!("Set {field}."),
        ));
    }
}

fn validate_port(port: i32, field: &str, errors: &mut Vec<SpecValidationError>) {
    if !(1..=65535).contains(&port) {
        errors.push(SpecValidationError::new(
            field,
            format!("port {port} is out of range"),
            format!("Set {field} to a value between 1 and 65535."),
        ));
    }
}

fn validate_database(db: &DatabaseConfig, errors: &mut Vec<SpecValidationError>) {
    require_non_empty(&db.host, "spec.database.host", errors);
    validate_port(db.port, "spec.database.port", errors);
    require_non_empty(&db.database, "spec.database.database", errors);
    require_non_empty(&db.user, "spec.database.user", errors);
    require_non_empty(&db.password, "spec.database.password", errors);
}

fn validate_cache(cache: &CacheConfig, errors: &mut Vec<SpecValidationError>) {
    require_non_empty(&cache.host, "spec.cache.host", errors);
    validate_port(cache.port, "spec.cache.port", errors);
    if cache.type_ != "node" && cache.type_ != "cluster" {
        errors.push(SpecValidationError::new(
            "spec.cache.type",
            format!("unsupported cache type '{}'", cache.type_),
            "Set spec.cache.type to either 'node' or 'cluster'.",
        ));
    }
}

fn validate_storage(storage: &StorageConfig, errors: &mut Vec<SpecValidationError>) {
    require_non_empty(&storage.endpoint, "spec.storage.endpoint", errors);
    require_non_empty(&storage.access_key, "spec.storage.accessKey", errors);
    require_non_empty(&storage.secret_key, "spec.storage.secretKey", errors);
    require_non_empty(&storage.bucket, "spec.storage.bucket", errors);

    if let Some(tls) = storage.tls.as_ref().filter(|t| t.enabled) {
        if let Err(e) = validate_tls_secret_name("spec.storage.tls.secretName", &tls.secret_name)
        {
            errors.push(e);
        }
    }
}

fn validate_jwt(jwt: &JwtConfig, errors: &mut Vec<SpecValidationError>) {
    for (value, field) in [
        (&jwt.access_secret, "spec.services.jwt.accessSecret"),
        (&jwt.refresh_secret, "spec.services.jwt.refreshSecret"),
    ] {
        if value.is_empty() {
            require_non_empty(value, field, errors);
        } else if value.chars().count() < MIN_JWT_SECRET_LEN {
            errors.push(SpecValidationError::new(
                field,
                format!("{field} must be at least {MIN_JWT_SECRET_LEN} characters"),
                format!("Use a random secret of {MIN_JWT_SECRET_LEN} or more characters for {field}."),
            ));
        }
    }
}

fn validate_web(web: &WebConfig, errors: &mut Vec<SpecValidationError>) {
    match web.expose_mode() {
        Some(ExposeMode::Ingress) => {
            let Some(ingress) = &web.ingress else {
                errors.push(SpecValidationError::new(
                    "spec.web.ingress",
                    "exposeType is ingress but no ingress block is configured",
                    "Add spec.web.ingress with at least a host, or switch spec.web.exposeType to nodeport.",
                ));
                return;
            };
            require_non_empty(&ingress.host, "spec.web.ingress.host", errors);
            if let Some(tls) = ingress.tls.as_ref().filter(|t| t.enabled) {
                if let Err(e) =
                    validate_tls_secret_name("spec.web.ingress.tls.secretName", &tls.secret_name)
                {
                    errors.push(e);
                }
            }
        }
        Some(ExposeMode::NodePort) => {
            if let Some(https) = web.node_port_https() {
                if let Err(e) = validate_tls_secret_name(
                    "spec.web.nodePort.https.secretName",
                    &https.secret_name,
                ) {
                    errors.push(e);
                }
            }
        }
        None => errors.push(SpecValidationError::new(
            "spec.web.exposeType",
            format!("unsupported exposeType '{}'", web.expose_type),
            "Set spec.web.exposeType to either 'ingress' or 'nodeport'.",
        )),
    }
}
