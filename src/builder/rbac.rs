//! Identity for the backend services
//!
//! The ServiceAccount is namespaced and owned by the KubeNova. The binding to
//! `cluster-admin` is cluster scoped, so owner references cannot reach it and
//! the deletion lifecycle removes it by name.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{ClusterRoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;

use super::{common_labels, owned_meta, SERVICE_ACCOUNT_NAME};
use crate::crd::KubeNova;

const CLUSTER_ROLE: &str = "cluster-admin";

/// Deterministic name of the cluster-scoped binding for one KubeNova
pub fn cluster_role_binding_name(namespace: &str, name: &str) -> String {
    format!("kube-nova-{namespace}-{name}-cluster-admin")
}

fn rbac_labels(kn: &KubeNova, namespace: &str) -> BTreeMap<String, String> {
    let mut labels = common_labels(kn);
    labels.insert(
        "app.kubernetes.io/namespace".to_string(),
        namespace.to_string(),
    );
    labels.insert("app.kubernetes.io/component".to_string(), "rbac".to_string());
    labels
}

pub fn build_service_account(kn: &KubeNova, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: owned_meta(
            kn,
            SERVICE_ACCOUNT_NAME,
            namespace,
            rbac_labels(kn, namespace),
        ),
        ..Default::default()
    }
}

pub fn build_cluster_role_binding(kn: &KubeNova, namespace: &str) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata: ObjectMeta {
            name: Some(cluster_role_binding_name(namespace, &kn.name_any())),
            labels: Some(rbac_labels(kn, namespace)),
            ..Default::default()
        },
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: CLUSTER_ROLE.to_string(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: SERVICE_ACCOUNT_NAME.to_string(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}
