//! Custom Resource Definitions for the KubeNova operator
//!
//! This module defines the `KubeNova` CRD and the validator for its spec.

#[cfg(test)]
pub(crate) mod fixtures;
mod kube_nova;
pub mod types;
mod validation;


pub use kube_nova::{KubeNova, KubeNovaSpec, KubeNovaStatus, NODE_IP_PLACEHOLDER};
pub use types::*;
pub use validation::{
    summarize, validate_telemetry_endpoint, validate_tls_secret_name, SpecValidationError,
};
