//! Batch comparison of deployed and requested resources

use kube::ResourceExt;
use kube::core::DynamicObject;
use std::collections::{HashMap, HashSet};

use super::{Comparator, ResourceKind};
use crate::registry::ResourceMap;

type ObjectKey = (Option<String>, String);

fn key_of(obj: &DynamicObject) -> ObjectKey {
    (obj.namespace(), obj.name_any())
}

/// What a reconciler has to create, update and delete to reach the requested state
#[derive(Debug, Clone, Default)]
pub struct ResourceDelta {
    /// Requested objects missing from the cluster
    pub added: Vec<DynamicObject>,

    /// Requested objects that differ from the deployed ones, carrying the
    /// deployed resource version so they can be written back as is
    pub updated: Vec<DynamicObject>,

    /// Deployed objects that are no longer requested
    pub removed: Vec<DynamicObject>,
}

impl ResourceDelta {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.updated.is_empty() || !self.removed.is_empty()
    }

    /// One-line summary, e.g. "2 added, 1 updated"
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if !self.added.is_empty() {
            parts.push(format!("{} added", self.added.len()));
        }
        if !self.updated.is_empty() {
            parts.push(format!("{} updated", self.updated.len()));
        }
        if !self.removed.is_empty() {
            parts.push(format!("{} removed", self.removed.len()));
        }

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Compare deployed and requested objects of a single kind
///
/// Objects are matched by namespace and name. Output order follows the input order.
pub fn compare_resources(
    comparator: &Comparator,
    deployed: &[DynamicObject],
    requested: &[DynamicObject],
) -> ResourceDelta {
    let deployed_by_key: HashMap<ObjectKey, &DynamicObject> =
        deployed.iter().map(|obj| (key_of(obj), obj)).collect();
    let requested_keys: HashSet<ObjectKey> = requested.iter().map(key_of).collect();

    let mut delta = ResourceDelta::default();

    for obj in requested {
        match deployed_by_key.get(&key_of(obj)) {
            None => delta.added.push(obj.clone()),
            Some(current) if !comparator.equal(obj, *current) => {
                let mut update = obj.clone();
                update.metadata.resource_version = current.metadata.resource_version.clone();
                delta.updated.push(update);
            }
            Some(_) => {}
        }
    }

    delta.removed = deployed
        .iter()
        .filter(|obj| !requested_keys.contains(&key_of(obj)))
        .cloned()
        .collect();

    tracing::debug!(
        added = delta.added.len(),
        updated = delta.updated.len(),
        removed = delta.removed.len(),
        "computed resource delta"
    );
    delta
}

/// Compare two registry maps kind by kind
///
/// Every kind present on either side gets an entry, even without changes.
pub fn compare_by_kind(
    comparator: &Comparator,
    deployed: &ResourceMap,
    requested: &ResourceMap,
) -> HashMap<ResourceKind, ResourceDelta> {
    let kinds: HashSet<&ResourceKind> = deployed.keys().chain(requested.keys()).collect();

    kinds
        .into_iter()
        .map(|kind| {
            let deployed = deployed.get(kind).map(Vec::as_slice).unwrap_or_default();
            let requested = requested.get(kind).map(Vec::as_slice).unwrap_or_default();
            (kind.clone(), compare_resources(comparator, deployed, requested))
        })
        .collect()
}
