//! Grouping of heterogeneous resources by kind
//!
//! A reconciler usually produces a flat list of objects of many kinds. The
//! [`ResourceMapBuilder`] groups them by [`ResourceKind`] so that each group can be
//! compared against the matching deployed objects with
//! [`compare_by_kind`](crate::compare::compare_by_kind).

use kube::ResourceExt;
use kube::core::DynamicObject;
use serde::Serialize;
use std::collections::HashMap;

use crate::compare::ResourceKind;
use crate::error::Result;

/// Resources grouped by kind, in insertion order within each kind
///
/// Custom kinds are keyed by group and kind, see [`ResourceKind::Other`].
pub type ResourceMap = HashMap<ResourceKind, Vec<DynamicObject>>;

/// Fluent builder for a [`ResourceMap`]
#[derive(Debug, Clone, Default)]
pub struct ResourceMapBuilder {
    map: ResourceMap,
}

impl ResourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add resources to the map
    ///
    /// Missing entries and objects without type information are skipped.
    pub fn add<I, R>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<Option<DynamicObject>>,
    {
        for resource in resources {
            self.insert(resource.into());
        }
        self
    }

    /// Add typed resources (k8s-openapi types, custom resources) to the map
    pub fn add_typed<'a, K, I>(self, resources: I) -> Self
    where
        K: Serialize + 'a,
        I: IntoIterator<Item = &'a K>,
    {
        let converted: Vec<Option<DynamicObject>> = resources
            .into_iter()
            .map(|resource| match to_dynamic(resource) {
                Ok(obj) => Some(obj),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping resource that cannot be converted");
                    None
                }
            })
            .collect();
        self.add(converted)
    }

    fn insert(&mut self, resource: Option<DynamicObject>) {
        let Some(resource) = resource else {
            tracing::warn!("skipping missing resource");
            return;
        };
        let kind = match resource.types.as_ref() {
            Some(types) if !types.kind.is_empty() => {
                ResourceKind::from_type(&types.api_version, &types.kind)
            }
            _ => {
                tracing::warn!(
                    name = %resource.name_any(),
                    "skipping resource without type information"
                );
                return;
            }
        };
        self.map.entry(kind).or_default().push(resource);
    }

    pub fn as_map(&self) -> &ResourceMap {
        &self.map
    }

    pub fn into_map(self) -> ResourceMap {
        self.map
    }
}

/// Group resources by kind in one call
pub fn resource_map<I, R>(resources: I) -> ResourceMap
where
    I: IntoIterator<Item = R>,
    R: Into<Option<DynamicObject>>,
{
    ResourceMapBuilder::new().add(resources).into_map()
}

/// Convert a typed resource into a [`DynamicObject`] through its JSON form
pub fn to_dynamic<K: Serialize>(resource: &K) -> Result<DynamicObject> {
    let value = serde_json::to_value(resource)?;
    Ok(serde_json::from_value(value)?)
}
