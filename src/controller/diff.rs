//! Drift detection for the dependent objects the operator writes
//!
//! Deployments are compared on a fixed set of fields only: replicas, the
//! first container's image, env, resources and mounts, pod volumes and the
//! service account. Everything else (labels or annotations added by other
//! controllers, defaults filled in by the API server, status) is ignored here
//! and left alone by [`splice_convergence_fields`].
//!
//! Secrets and ConfigMaps compare their whole payload.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EnvVar, KeyToPath, ResourceRequirements, Secret, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use super::store::StoredObject;

/// True when `current` already matches `desired` on every compared field
pub fn deployment_spec_equal(current: &Deployment, desired: &Deployment) -> bool {
    match (&current.spec, &desired.spec) {
        (Some(current), Some(desired)) => spec_equal(current, desired),
        (None, None) => true,
        _ => false,
    }
}

fn spec_equal(current: &DeploymentSpec, desired: &DeploymentSpec) -> bool {
    if current.replicas != desired.replicas {
        return false;
    }

    let (Some(current_pod), Some(desired_pod)) = (&current.template.spec, &desired.template.spec)
    else {
        return current.template.spec.is_none() && desired.template.spec.is_none();
    };

    if current_pod.containers.len() != desired_pod.containers.len() {
        return false;
    }
    if let (Some(c), Some(d)) = (current_pod.containers.first(), desired_pod.containers.first()) {
        if !container_equal(c, d) {
            return false;
        }
    }

    volume_set(current_pod.volumes.as_deref()) == volume_set(desired_pod.volumes.as_deref())
        && service_account(current_pod.service_account_name.as_deref())
            == service_account(desired_pod.service_account_name.as_deref())
}

fn container_equal(current: &Container, desired: &Container) -> bool {
    current.image == desired.image
        && env_equal(current.env.as_deref(), desired.env.as_deref())
        && resources_equal(current.resources.as_ref(), desired.resources.as_ref())
        && mount_set(current.volume_mounts.as_deref()) == mount_set(desired.volume_mounts.as_deref())
}

fn service_account(name: Option<&str>) -> Option<&str> {
    name.filter(|n| !n.is_empty())
}

/// Env vars compare as a set keyed by name
fn env_equal(current: Option<&[EnvVar]>, desired: Option<&[EnvVar]>) -> bool {
    let current = current.unwrap_or_default();
    let desired = desired.unwrap_or_default();
    current.len() == desired.len() && env_map(current) == env_map(desired)
}

fn env_map(env: &[EnvVar]) -> BTreeMap<&str, String> {
    env.iter()
        .map(|var| (var.name.as_str(), env_source(var)))
        .collect()
}

fn env_source(var: &EnvVar) -> String {
    let Some(from) = &var.value_from else {
        return format!("value:{}", var.value.as_deref().unwrap_or_default());
    };
    // apiVersion on fieldRef is defaulted by the API server
    if let Some(field) = &from.field_ref {
        return format!("field:{}", field.field_path);
    }
    if let Some(secret) = &from.secret_key_ref {
        return format!(
            "secret:{}/{}",
            secret.name.as_deref().unwrap_or_default(),
            secret.key
        );
    }
    if let Some(config_map) = &from.config_map_key_ref {
        return format!(
            "configmap:{}/{}",
            config_map.name.as_deref().unwrap_or_default(),
            config_map.key
        );
    }
    if let Some(resource) = &from.resource_field_ref {
        return format!("resource:{}", resource.resource);
    }
    "unknown".to_string()
}

fn resources_equal(
    current: Option<&ResourceRequirements>,
    desired: Option<&ResourceRequirements>,
) -> bool {
    let empty = ResourceRequirements::default();
    let current = current.unwrap_or(&empty);
    let desired = desired.unwrap_or(&empty);
    quantities_equal(current.requests.as_ref(), desired.requests.as_ref())
        && quantities_equal(current.limits.as_ref(), desired.limits.as_ref())
}

fn quantities_equal(
    current: Option<&BTreeMap<String, Quantity>>,
    desired: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let current = current.unwrap_or(&empty);
    let desired = desired.unwrap_or(&empty);
    current.len() == desired.len()
        && current.iter().all(|(name, q)| {
            desired
                .get(name)
                .is_some_and(|d| canonical_quantity(q) == canonical_quantity(d))
        })
}

/// Canonical form of a quantity so `1000m` and `1` compare equal
///
/// Falls back to the raw string for forms that are not parsed.
fn canonical_quantity(q: &Quantity) -> String {
    quantity_nanos(&q.0).map_or_else(|| q.0.trim().to_string(), |n| n.to_string())
}

/// Parse a Kubernetes quantity into nano-units
pub(crate) fn quantity_nanos(raw: &str) -> Option<i128> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);

    const NANO: i128 = 1_000_000_000;
    let scale: i128 = match suffix {
        "n" => 1,
        "u" => 1_000,
        "m" => 1_000_000,
        "" => NANO,
        "k" => NANO * 1_000,
        "M" => NANO * 1_000_000,
        "G" => NANO * 1_000_000_000,
        "T" => NANO * 1_000_000_000_000,
        "P" => NANO * 1_000_000_000_000_000,
        "E" => NANO * 1_000_000_000_000_000_000,
        "Ki" => NANO << 10,
        "Mi" => NANO << 20,
        "Gi" => NANO << 30,
        "Ti" => NANO << 40,
        "Pi" => NANO << 50,
        "Ei" => NANO << 60,
        _ => return None,
    };

    let negative = number.starts_with('-');
    let digits = number.trim_start_matches(['+', '-']);
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }

    let whole: i128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let mut total = whole.checked_mul(scale)?;
    if !fraction.is_empty() {
        let numerator: i128 = fraction.parse().ok()?;
        let denominator = 10i128.checked_pow(u32::try_from(fraction.len()).ok()?)?;
        total = total.checked_add(numerator.checked_mul(scale)? / denominator)?;
    }
    Some(if negative { -total } else { total })
}

/// Mounts compare as a set of (name, path, subPath, readOnly)
fn mount_set(mounts: Option<&[VolumeMount]>) -> BTreeSet<(&str, &str, &str, bool)> {
    mounts
        .unwrap_or_default()
        .iter()
        .map(|m| {
            (
                m.name.as_str(),
                m.mount_path.as_str(),
                m.sub_path.as_deref().unwrap_or_default(),
                m.read_only.unwrap_or(false),
            )
        })
        .collect()
}

fn volume_set(volumes: Option<&[Volume]>) -> BTreeSet<String> {
    volumes
        .unwrap_or_default()
        .iter()
        .map(volume_fingerprint)
        .collect()
}

/// Name, source kind and referenced object of a volume
///
/// Fields the API server defaults (`defaultMode`, `medium`) are left out.
fn volume_fingerprint(volume: &Volume) -> String {
    if let Some(config_map) = &volume.config_map {
        return format!(
            "{}:configMap:{}:{}",
            volume.name,
            config_map.name.as_deref().unwrap_or_default(),
            items_fingerprint(config_map.items.as_deref())
        );
    }
    if let Some(secret) = &volume.secret {
        return format!(
            "{}:secret:{}:{}",
            volume.name,
            secret.secret_name.as_deref().unwrap_or_default(),
            items_fingerprint(secret.items.as_deref())
        );
    }
    if let Some(empty_dir) = &volume.empty_dir {
        let limit = empty_dir
            .size_limit
            .as_ref()
            .map(canonical_quantity)
            .unwrap_or_default();
        return format!("{}:emptyDir:{}", volume.name, limit);
    }
    format!("{}:other", volume.name)
}

fn items_fingerprint(items: Option<&[KeyToPath]>) -> String {
    let mut pairs: Vec<String> = items
        .unwrap_or_default()
        .iter()
        .map(|item| format!("{}={}", item.key, item.path))
        .collect();
    pairs.sort();
    pairs.join(",")
}

/// Copy the compared fields of `desired` onto a freshly read `current`
///
/// Pull secrets are carried along with the service account.
pub fn splice_convergence_fields(current: &mut Deployment, desired: &Deployment) {
    let Some(desired_spec) = &desired.spec else {
        return;
    };
    let spec = current.spec.get_or_insert_with(|| desired_spec.clone());
    spec.replicas = desired_spec.replicas;

    let Some(desired_pod) = &desired_spec.template.spec else {
        return;
    };
    let pod = spec
        .template
        .spec
        .get_or_insert_with(|| desired_pod.clone());
    pod.containers = desired_pod.containers.clone();
    pod.volumes = desired_pod.volumes.clone();
    pod.service_account_name = desired_pod.service_account_name.clone();
    pod.image_pull_secrets = desired_pod.image_pull_secrets.clone();
}

/// Objects whose whole payload is owned by the operator
pub trait DataPayload: StoredObject {
    fn same_payload(&self, other: &Self) -> bool;

    /// Overwrite the payload with `desired`'s, keeping metadata
    fn take_payload(&mut self, desired: &Self);
}

impl DataPayload for Secret {
    fn same_payload(&self, other: &Self) -> bool {
        self.data == other.data
    }

    fn take_payload(&mut self, desired: &Self) {
        self.data = desired.data.clone();
    }
}

impl DataPayload for ConfigMap {
    fn same_payload(&self, other: &Self) -> bool {
        self.data == other.data && self.binary_data == other.binary_data
    }

    fn take_payload(&mut self, desired: &Self) {
        self.data = desired.data.clone();
        self.binary_data = desired.binary_data.clone();
    }
}
