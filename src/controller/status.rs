//! Retry-safe status writes for the KubeNova root
//!
//! Status is written by several stages of a pass and raced by anything else
//! touching the object, so every attempt re-reads the root for a fresh
//! resource version, copies the in-memory status over, and writes the status
//! subresource. Conflicts back off linearly and retry a bounded number of
//! times.

use std::time::Duration;

use chrono::Utc;
use kube::ResourceExt;
use tracing::{debug, info, warn};

use super::store::{ResourceStore, VersionToken};
use crate::crd::{KubeNova, Phase};
use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    /// Sleep before attempt `n + 1` is `base_backoff * n`
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_backoff: Duration::from_millis(100),
        }
    }
}

/// Persist `root.status`
///
/// On success `root` carries the written status and its new resource version.
/// A root that no longer exists is not an error: there is nothing left to
/// report on.
pub async fn write_status<S: ResourceStore>(
    store: &S,
    root: &mut KubeNova,
    policy: RetryPolicy,
) -> Result<()> {
    let namespace = root.namespace().unwrap_or_default();
    let name = root.name_any();

    for attempt in 1..=policy.attempts {
        let Some(mut latest) = store.get::<KubeNova>(&namespace, &name).await? else {
            debug!("KubeNova {}/{} is gone, dropping status write", namespace, name);
            return Ok(());
        };
        let version = VersionToken::require(&latest)?;
        latest.status = root.status.clone();

        match store.replace_status(&latest, &version).await {
            Ok(written) => {
                root.metadata.resource_version = written.metadata.resource_version;
                root.status = written.status;
                if attempt > 1 {
                    info!(
                        "Status of {}/{} written on attempt {}",
                        namespace, name, attempt
                    );
                }
                return Ok(());
            }
            Err(e) if e.is_conflict() => {
                #[cfg(feature = "metrics")]
                super::metrics::inc_status_conflict();

                if attempt == policy.attempts {
                    warn!(
                        "Status of {}/{} still conflicting after {} attempts",
                        namespace, name, attempt
                    );
                    break;
                }
                debug!(
                    "Status conflict on {}/{} (attempt {}), retrying",
                    namespace, name, attempt
                );
                tokio::time::sleep(policy.base_backoff * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::StatusRetriesExhausted {
        attempts: policy.attempts,
    })
}

/// Set phase and message in memory; nothing is persisted
pub fn set_phase(root: &mut KubeNova, phase: Phase, message: impl Into<String>) {
    let status = root.status.get_or_insert_with(Default::default);
    status.phase = phase;
    status.message = message.into();
    status.last_update_time = Some(Utc::now().to_rfc3339());
}
