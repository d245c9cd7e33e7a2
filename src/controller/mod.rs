//! Controller module for KubeNova reconciliation
//! This module contains the controller loop, the reconciliation pipeline,
//! and the pieces it is built from: the store seam, drift detection, the
//! status writer and aggregator, and the deletion lifecycle.

pub mod aggregate;
pub mod conditions;
pub mod diff;
mod finalizers;
#[cfg(test)]
mod memory_store;
#[cfg(feature = "metrics")]
pub mod metrics;
mod reconciler;
pub mod status;
pub mod store;

pub use finalizers::KUBENOVA_FINALIZER;
pub use reconciler::{run_controller, ControllerState, PassOutcome, Reconciler, ReconcilerConfig};
pub use status::RetryPolicy;
pub use store::{KubeStore, ResourceStore, StoredObject, VersionToken};
