//! Finalizer handling for KubeNova cleanup
//!
//! Namespaced dependents carry an owner reference to the root and are
//! removed by the garbage collector. The ClusterRoleBinding cannot be owned
//! by a namespaced object, so it is deleted here before the finalizer is
//! released.

use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use kube::ResourceExt;
use tracing::{info, warn};

use super::status::{set_phase, write_status, RetryPolicy};
use super::store::{ResourceStore, VersionToken};
use crate::builder::cluster_role_binding_name;
use crate::crd::{KubeNova, Phase};
use crate::error::Result;

/// Finalizer name used to protect KubeNova resources
pub const KUBENOVA_FINALIZER: &str = "kubenova.io/finalizer";

pub fn is_being_deleted(root: &KubeNova) -> bool {
    root.metadata.deletion_timestamp.is_some()
}

pub fn has_finalizer(root: &KubeNova) -> bool {
    root.finalizers().iter().any(|f| f == KUBENOVA_FINALIZER)
}

/// Add the finalizer if it is missing
///
/// Returns true when a write happened. `root` is replaced with the stored
/// object so later writes in the same pass carry the new resource version.
pub async fn add_finalizer<S: ResourceStore>(store: &S, root: &mut KubeNova) -> Result<bool> {
    if has_finalizer(root) {
        return Ok(false);
    }

    let namespace = root.namespace().unwrap_or_default();
    let version = VersionToken::require(root)?;
    let mut updated = root.clone();
    updated.finalizers_mut().push(KUBENOVA_FINALIZER.to_string());

    *root = store.replace(&namespace, &updated, &version).await?;
    info!("Added finalizer to KubeNova {}/{}", namespace, root.name_any());
    Ok(true)
}

/// Remove the finalizer, letting the API server finish the deletion
pub async fn remove_finalizer<S: ResourceStore>(store: &S, root: &KubeNova) -> Result<()> {
    if !has_finalizer(root) {
        return Ok(());
    }

    let namespace = root.namespace().unwrap_or_default();
    let version = VersionToken::require(root)?;
    let mut updated = root.clone();
    updated
        .finalizers_mut()
        .retain(|f| f.as_str() != KUBENOVA_FINALIZER);

    store.replace(&namespace, &updated, &version).await?;
    info!(
        "Removed finalizer from KubeNova {}/{}",
        namespace,
        root.name_any()
    );
    Ok(())
}

/// Deletion lifecycle for a root carrying a deletion timestamp
///
/// The finalizer is only released after the ClusterRoleBinding delete has
/// returned success or not-found. Any other failure leaves the finalizer in
/// place and the next pass retries.
pub async fn run_deletion<S: ResourceStore>(
    store: &S,
    root: &mut KubeNova,
    policy: RetryPolicy,
) -> Result<()> {
    let namespace = root.namespace().unwrap_or_default();
    let name = root.name_any();
    info!("Cleaning up KubeNova {}/{}", namespace, name);

    set_phase(root, Phase::Deleting, "deleting resources");
    if let Err(e) = write_status(store, root, policy).await {
        warn!(
            "Failed to record Deleting phase on {}/{}: {}",
            namespace, name, e
        );
    }

    let binding = cluster_role_binding_name(&namespace, &name);
    if store.delete::<ClusterRoleBinding>("", &binding).await? {
        info!("Deleted ClusterRoleBinding {}", binding);
        #[cfg(feature = "metrics")]
        super::metrics::inc_dependent_write("ClusterRoleBinding", "delete");
    }

    // The status write above moved the resource version forward
    let latest = match store.get::<KubeNova>(&namespace, &name).await? {
        Some(latest) => latest,
        None => return Ok(()),
    };
    remove_finalizer(store, &latest).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_cluster_role_binding;
    use crate::controller::memory_store::MemoryStore;
    use crate::crd::fixtures::{kube_nova, valid_spec};

    fn seeded_with_finalizer() -> (MemoryStore, KubeNova) {
        let store = MemoryStore::with_namespace("ns");
        let mut root = kube_nova("nova", "ns", valid_spec());
        root.finalizers_mut().push(KUBENOVA_FINALIZER.to_string());
        store.put("ns", &root);
        store.put("", &build_cluster_role_binding(&root, "ns"));
        store.mark_for_deletion("ns", "nova");
        let root = store.object("ns", "nova").unwrap();
        (store, root)
    }

    #[test]
    fn test_finalizer_name() {
        assert_eq!(KUBENOVA_FINALIZER, "kubenova.io/finalizer");
    }

    #[tokio::test]
    async fn test_add_finalizer_once() {
        let store = MemoryStore::with_namespace("ns");
        let mut root = store.put("ns", &kube_nova("nova", "ns", valid_spec()));

        assert!(add_finalizer(&store, &mut root).await.unwrap());
        assert!(has_finalizer(&root));
        assert!(!add_finalizer(&store, &mut root).await.unwrap());
        assert_eq!(store.writes("KubeNova", "replace"), 1);
    }

    #[tokio::test]
    async fn test_binding_deleted_before_finalizer_released() {
        let (store, mut root) = seeded_with_finalizer();

        run_deletion(&store, &mut root, RetryPolicy::default())
            .await
            .unwrap();

        let binding = cluster_role_binding_name("ns", "nova");
        let ops = store.ops();
        let deleted = ops
            .iter()
            .position(|op| *op == format!("delete ClusterRoleBinding/{binding}"))
            .unwrap();
        let released = ops
            .iter()
            .position(|op| op == "replace KubeNova/nova")
            .unwrap();
        assert!(deleted < released, "unexpected order: {ops:?}");
        assert!(store.object::<KubeNova>("ns", "nova").is_none());
    }

    #[tokio::test]
    async fn test_failed_binding_delete_keeps_finalizer() {
        let (store, mut root) = seeded_with_finalizer();
        store.fail_deletes_of("ClusterRoleBinding");

        assert!(run_deletion(&store, &mut root, RetryPolicy::default())
            .await
            .is_err());

        let stored: KubeNova = store.object("ns", "nova").unwrap();
        assert!(has_finalizer(&stored));
        assert_eq!(stored.status.as_ref().unwrap().phase, Phase::Deleting);
        assert_eq!(store.writes("KubeNova", "replace"), 0);

        store.clear_failures();
        let mut root = stored;
        run_deletion(&store, &mut root, RetryPolicy::default())
            .await
            .unwrap();
        assert!(store.object::<KubeNova>("ns", "nova").is_none());
    }

    #[tokio::test]
    async fn test_absent_binding_counts_as_deleted() {
        let (store, mut root) = seeded_with_finalizer();
        let binding = cluster_role_binding_name("ns", "nova");
        store.delete::<ClusterRoleBinding>("", &binding).await.unwrap();
        store.reset_counters();

        run_deletion(&store, &mut root, RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(store.writes("ClusterRoleBinding", "delete"), 0);
        assert!(store.object::<KubeNova>("ns", "nova").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_failure_does_not_block_cleanup() {
        let (store, mut root) = seeded_with_finalizer();
        store.conflict_next_status_writes(3);

        run_deletion(&store, &mut root, RetryPolicy::default())
            .await
            .unwrap();
        assert!(store.object::<KubeNova>("ns", "nova").is_none());
    }
}
