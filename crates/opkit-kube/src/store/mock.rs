//! In-memory object store for testing
//!
//! Behaves like the API server for the operations the finalizer manager uses:
//! optimistic concurrency on `resourceVersion`, a new version on every write, and
//! injectable write failures.

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use super::ObjectStore;
use crate::error::StoreError;

type ObjectKey = (Option<String>, String);

/// In-memory object store
#[derive(Clone)]
pub struct MockStore<K> {
    objects: Arc<RwLock<HashMap<ObjectKey, K>>>,
    /// Track operation counts for assertions
    operations: Arc<RwLock<OperationCounts>>,
    failure: Arc<RwLock<FailureMode>>,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationCounts {
    pub gets: usize,
    pub updates: usize,
}

/// When updates should be rejected with a conflict
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    #[default]
    Never,
    Always,
    /// Let this many updates through, then fail every following one
    AfterSuccesses(usize),
}

impl<K> MockStore<K>
where
    K: Resource + Clone + Send + Sync,
{
    /// Create a new empty store
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            operations: Arc::new(RwLock::new(OperationCounts::default())),
            failure: Arc::new(RwLock::new(FailureMode::Never)),
        }
    }

    /// Create with pre-populated objects
    pub fn with_objects(objects: impl IntoIterator<Item = K>) -> Self {
        let store = Self::new();
        for obj in objects {
            store.insert(obj);
        }
        store
    }

    /// Store an object as is, bypassing version checks
    pub fn insert(&self, obj: K) {
        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        objects.insert(key_of(&obj), obj);
    }

    /// Current state of an object, without counting a get
    pub fn object(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        let objects = self.objects.read().unwrap_or_else(PoisonError::into_inner);
        objects
            .get(&(namespace.map(String::from), name.to_string()))
            .cloned()
    }

    pub fn set_failure_mode(&self, mode: FailureMode) {
        *self.failure.write().unwrap_or_else(PoisonError::into_inner) = mode;
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        self.operations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *self.operations.write().unwrap_or_else(PoisonError::into_inner) =
            OperationCounts::default();
    }

    /// Decide whether the next update fails, consuming one allowed success
    fn take_failure(&self) -> bool {
        let mut failure = self.failure.write().unwrap_or_else(PoisonError::into_inner);
        match *failure {
            FailureMode::Never => false,
            FailureMode::Always => true,
            FailureMode::AfterSuccesses(0) => true,
            FailureMode::AfterSuccesses(n) => {
                *failure = FailureMode::AfterSuccesses(n - 1);
                false
            }
        }
    }
}

impl<K> Default for MockStore<K>
where
    K: Resource + Clone + Send + Sync,
{
    fn default() -> Self {
        Self::new()
    }
}

fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    (obj.namespace(), obj.name_any())
}

fn next_version(current: Option<&str>) -> String {
    let version = current.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    (version + 1).to_string()
}

#[async_trait]
impl<K> ObjectStore<K> for MockStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K, StoreError> {
        {
            let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
            ops.gets += 1;
        }

        self.object(namespace, name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        {
            let mut ops = self.operations.write().unwrap_or_else(PoisonError::into_inner);
            ops.updates += 1;
        }

        let name = obj.name_any();
        if self.take_failure() {
            return Err(StoreError::Conflict(format!("injected failure updating {}", name)));
        }

        let mut objects = self.objects.write().unwrap_or_else(PoisonError::into_inner);
        let Some(current) = objects.get(&key_of(obj)) else {
            return Err(StoreError::NotFound(name));
        };

        let stored_version = current.resource_version();
        if let Some(version) = obj.resource_version() {
            if Some(&version) != stored_version.as_ref() {
                return Err(StoreError::Conflict(format!(
                    "{} has been modified (version {} is stale)",
                    name, version
                )));
            }
        }

        let mut persisted = obj.clone();
        persisted.meta_mut().resource_version = Some(next_version(stored_version.as_deref()));
        objects.insert(key_of(obj), persisted.clone());
        Ok(persisted)
    }
}
