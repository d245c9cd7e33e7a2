//! Error types for the KubeNova operator

use thiserror::Error;

/// Errors produced while reconciling a `KubeNova` resource
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("namespace {0} does not exist, create it first")]
    NamespaceMissing(String),

    #[error("Conflict writing {kind} {name}: resource version is stale")]
    Conflict { kind: String, name: String },

    #[error("Status update failed after {attempts} attempts")]
    StatusRetriesExhausted { attempts: u32 },

    #[error("{stage} failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Wrap this error with the name of the pipeline stage that produced it
    pub fn in_stage(self, stage: &'static str) -> Self {
        Error::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// True for optimistic-concurrency conflicts, looking through stage wrappers
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::KubeError(kube::Error::Api(e)) => e.code == 409,
            Error::Stage { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Whether a retry without external intervention can succeed
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(_) | Error::Conflict { .. } | Error::StatusRetriesExhausted { .. } => {
                true
            }
            Error::Stage { source, .. } => source.is_retriable(),
            Error::ValidationError(_)
            | Error::NamespaceMissing(_)
            | Error::ConfigError(_)
            | Error::SerializationError(_) => false,
        }
    }

    /// Short label used for the reconcile error metric
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::ValidationError(_) => "validation",
            Error::NamespaceMissing(_) => "namespace_missing",
            Error::Conflict { .. } => "conflict",
            Error::StatusRetriesExhausted { .. } => "status_retries_exhausted",
            Error::Stage { source, .. } => source.kind_label(),
            Error::ConfigError(_) => "config",
            Error::SerializationError(_) => "serialization",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
