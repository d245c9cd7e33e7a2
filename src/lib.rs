//! KubeNova operator: converges a complete Kube-Nova platform installation
//! from a single `KubeNova` custom resource.
//!
//! The crate holds the resource model and validator ([`crd`]), the pure
//! desired-state builders ([`builder`]) and the reconciliation engine
//! ([`controller`]).

pub mod builder;
pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

#[cfg(feature = "rest-api")]
pub mod rest_api;

pub use crate::error::{Error, Result};
