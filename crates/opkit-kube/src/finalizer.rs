//! Finalizer lifecycle management
//!
//! A finalizer blocks the deletion of an object until the controller that added
//! it has cleaned up. The [`FinalizerManager`] keeps the finalizer list of the
//! live object and the in-memory cleanup callbacks in step:
//!
//! - Registration persists the finalizer first and only then records the callback
//! - Once the object is being deleted, each callback runs and its finalizer is removed
//! - A failing callback stops finalization; it is retried on the next reconcile
//!
//! Callbacks are keyed by the object's UID, so a recreated object with the same
//! name never inherits the callbacks of its predecessor.
//!
//! A callback that succeeds but whose finalizer cannot be removed stays
//! registered and runs again on the next attempt. Callbacks must be idempotent.

use futures::future::BoxFuture;
use kube::{Resource, ResourceExt};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{BoxError, KubeError, Result};
use crate::store::ObjectStore;

/// Cleanup callback run when the owning object is deleted
pub type OnFinalize =
    Arc<dyn Fn() -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send + Sync>;

/// Callbacks per object UID, by finalizer name
type Registry = HashMap<String, BTreeMap<String, OnFinalize>>;

/// Whether the object has been marked for deletion
pub fn is_finalizing<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Registers finalizers on objects of type `K` and runs them on deletion
pub struct FinalizerManager<K, S> {
    store: S,
    registry: Mutex<Registry>,
    _kind: PhantomData<fn() -> K>,
}

impl<K, S> FinalizerManager<K, S>
where
    K: Resource + Clone + Send + Sync + 'static,
    S: ObjectStore<K>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: Mutex::new(HashMap::new()),
            _kind: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a finalizer to `owner` and record its cleanup callback
    ///
    /// Does nothing on an object that is already being deleted. On success `owner`
    /// is replaced by the persisted object. Registering the same name again keeps a
    /// single finalizer on the object and replaces the callback.
    pub async fn register_finalizer<F, Fut>(
        &self,
        owner: &mut K,
        name: &str,
        callback: F,
    ) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        if is_finalizing(&*owner) {
            tracing::debug!(
                object = %owner.name_any(),
                finalizer = name,
                "object is being deleted, not registering finalizer"
            );
            return Ok(());
        }
        validate_name(name)?;
        let uid = owner.uid().ok_or_else(|| {
            KubeError::InvalidArgument(format!("object {} has no uid", owner.name_any()))
        })?;

        let mut updated = owner.clone();
        let finalizers = updated.finalizers_mut();
        if !finalizers.iter().any(|f| f == name) {
            finalizers.push(name.to_string());
        }
        let persisted = self.store.update(&updated).await?;
        *owner = persisted;

        let callback: OnFinalize =
            Arc::new(move || -> BoxFuture<'static, std::result::Result<(), BoxError>> {
                Box::pin(callback())
            });
        self.registry()
            .entry(uid)
            .or_default()
            .insert(name.to_string(), callback);

        tracing::info!(object = %owner.name_any(), finalizer = name, "registered finalizer");
        Ok(())
    }

    /// Remove a finalizer from `owner` and forget its callback
    ///
    /// A name missing from the object is ignored, the object is still written.
    pub async fn unregister_finalizer(&self, owner: &mut K, name: &str) -> Result<()> {
        validate_name(name)?;

        let mut updated = owner.clone();
        updated.finalizers_mut().retain(|f| f != name);
        let persisted = self.store.update(&updated).await?;
        *owner = persisted;

        if let Some(uid) = owner.uid() {
            let mut registry = self.registry();
            if let Some(callbacks) = registry.get_mut(&uid) {
                callbacks.remove(name);
                if callbacks.is_empty() {
                    registry.remove(&uid);
                }
            }
        }

        tracing::info!(object = %owner.name_any(), finalizer = name, "unregistered finalizer");
        Ok(())
    }

    /// Run the registered finalizers of an object being deleted
    ///
    /// Finalizers run in name order. Each one is unregistered right after its
    /// callback succeeds. The first failure stops the run and leaves that finalizer
    /// and the remaining ones registered.
    pub async fn finalize_on_delete(&self, owner: &mut K) -> Result<()> {
        if !is_finalizing(&*owner) {
            return Ok(());
        }
        let Some(uid) = owner.uid() else {
            return Ok(());
        };

        let pending: Vec<(String, OnFinalize)> = self
            .registry()
            .get(&uid)
            .map(|callbacks| {
                callbacks
                    .iter()
                    .map(|(name, callback)| (name.clone(), Arc::clone(callback)))
                    .collect()
            })
            .unwrap_or_default();

        for (name, callback) in pending {
            tracing::debug!(object = %owner.name_any(), finalizer = %name, "running finalizer");
            if let Err(source) = callback().await {
                tracing::warn!(
                    object = %owner.name_any(),
                    finalizer = %name,
                    error = %source,
                    "finalizer failed"
                );
                return Err(KubeError::Callback {
                    finalizer: name,
                    source,
                });
            }
            self.unregister_finalizer(owner, &name).await?;
        }
        Ok(())
    }

    /// Load an object for a reconcile request and finalize it if it is being deleted
    ///
    /// Returns `None` when the object no longer exists, or when it is being deleted
    /// and all its finalizers have run; otherwise the live object for the
    /// reconciler to work on.
    pub async fn reconcile_object(&self, namespace: Option<&str>, name: &str) -> Result<Option<K>> {
        let mut owner = match self.store.get(namespace, name).await {
            Ok(owner) => owner,
            Err(e) if e.is_not_found() => {
                tracing::debug!(name, "object no longer exists, nothing to reconcile");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        if !is_finalizing(&owner) {
            return Ok(Some(owner));
        }
        self.finalize_on_delete(&mut owner).await?;
        Ok(None)
    }

    pub fn is_finalizing(&self, owner: &K) -> bool {
        is_finalizing(owner)
    }

    /// Names of the finalizers registered for an object, in name order
    pub fn registered_finalizers(&self, uid: &str) -> Vec<String> {
        self.registry()
            .get(uid)
            .map(|callbacks| callbacks.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_registered(&self, uid: &str, name: &str) -> bool {
        self.registry()
            .get(uid)
            .is_some_and(|callbacks| callbacks.contains_key(name))
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(KubeError::InvalidArgument(
            "finalizer name must not be blank".to_string(),
        ));
    }
    Ok(())
}
