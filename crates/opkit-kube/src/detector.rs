//! Background detection of API capabilities
//!
//! Operators often enable optional features once a CRD shows up in the cluster
//! (e.g. monitoring once `ServiceMonitor` is served). The [`Detector`] polls API
//! discovery and calls a trigger the first time each registered kind is served.
//!
//! A pass first queries every group version it needs, then records and fires the
//! newly detected kinds. A group version the server does not serve yet counts as
//! "not present"; any other discovery failure aborts the pass before anything is
//! recorded, and the next tick retries.
//!
//! Treating a 404 as absence is deliberate: it departs from the simpler rule
//! that every discovery error aborts the pass, since with that rule a single
//! uninstalled CRD would keep every other trigger from ever firing.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;
use kube::core::GroupVersionKind;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::config::DetectorConfig;
use crate::discovery::Discovery;
use crate::error::Result;

/// Callback fired once when a capability is first detected
pub type Trigger = Arc<dyn Fn(&GroupVersionKind) + Send + Sync>;

/// Kinds already detected, shared between detectors and readers
///
/// Clones share the same state. Entries are never cleared.
#[derive(Debug, Clone, Default)]
pub struct CapabilityState {
    detected: Arc<Mutex<HashMap<String, bool>>>,
}

impl CapabilityState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_detected(&self, kind: &str) -> bool {
        let detected = self.detected.lock().unwrap_or_else(PoisonError::into_inner);
        detected.get(kind).copied().unwrap_or(false)
    }

    /// Mark a kind as detected, returning `true` if it was not detected before
    pub fn mark_detected(&self, kind: &str) -> bool {
        let mut detected = self.detected.lock().unwrap_or_else(PoisonError::into_inner);
        !detected.insert(kind.to_string(), true).unwrap_or(false)
    }

    /// Detected kinds, sorted by name
    pub fn detected(&self) -> Vec<String> {
        let detected = self.detected.lock().unwrap_or_else(PoisonError::into_inner);
        let mut kinds: Vec<String> = detected
            .iter()
            .filter(|(_, found)| **found)
            .map(|(kind, _)| kind.clone())
            .collect();
        kinds.sort();
        kinds
    }
}

type Registrations = Arc<Mutex<Vec<(GroupVersionKind, Trigger)>>>;

/// Periodic capability detector
pub struct Detector<D> {
    discovery: Arc<D>,
    state: CapabilityState,
    triggers: Registrations,
    stop_tx: Option<watch::Sender<bool>>,
}

impl<D: Discovery + 'static> Detector<D> {
    pub fn new(discovery: D, state: CapabilityState) -> Self {
        Self::from_arc(Arc::new(discovery), state)
    }

    pub fn from_arc(discovery: Arc<D>, state: CapabilityState) -> Self {
        Self {
            discovery,
            state,
            triggers: Arc::new(Mutex::new(Vec::new())),
            stop_tx: None,
        }
    }

    pub fn state(&self) -> &CapabilityState {
        &self.state
    }

    /// Run `trigger` the first time `gvk` is served
    pub fn add_crd_trigger<F>(&self, gvk: GroupVersionKind, trigger: F)
    where
        F: Fn(&GroupVersionKind) + Send + Sync + 'static,
    {
        self.register(gvk, Arc::new(trigger));
    }

    /// Run `trigger` the first time each of the kinds is served
    pub fn add_crds_trigger<I, F>(&self, gvks: I, trigger: F)
    where
        I: IntoIterator<Item = GroupVersionKind>,
        F: Fn(&GroupVersionKind) + Send + Sync + 'static,
    {
        let trigger: Trigger = Arc::new(trigger);
        for gvk in gvks {
            self.register(gvk, Arc::clone(&trigger));
        }
    }

    /// Register a trigger per kind
    pub fn add_crds_with_triggers<I>(&self, triggers: I)
    where
        I: IntoIterator<Item = (GroupVersionKind, Trigger)>,
    {
        for (gvk, trigger) in triggers {
            self.register(gvk, trigger);
        }
    }

    fn register(&self, gvk: GroupVersionKind, trigger: Trigger) {
        tracing::debug!(kind = %gvk.kind, api_version = %gvk.api_version(), "registered capability trigger");
        let mut triggers = self.triggers.lock().unwrap_or_else(PoisonError::into_inner);
        triggers.push((gvk, trigger));
    }

    /// Start polling in the background
    ///
    /// The first pass runs immediately. Starting a running detector restarts it
    /// with the new interval.
    pub fn start(&mut self, config: &DetectorConfig) -> Result<()> {
        config.validate()?;
        self.stop();

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let discovery = Arc::clone(&self.discovery);
        let state = self.state.clone();
        let triggers = Arc::clone(&self.triggers);
        let interval = config.interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = run_pass(discovery.as_ref(), &state, &triggers).await {
                            tracing::warn!(error = %e, "capability detection failed, retrying next tick");
                        }
                    }
                    _ = stop_rx.changed() => break,
                }
            }
            tracing::debug!("capability detector stopped");
        });

        tracing::info!(interval = ?interval, "started capability detector");
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    /// Stop polling; a pass already running completes
    pub fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop_tx.is_some()
    }

    /// Run a single detection pass, returning the kinds detected by it
    pub async fn detect_once(&self) -> Result<Vec<GroupVersionKind>> {
        run_pass(self.discovery.as_ref(), &self.state, &self.triggers).await
    }
}

async fn run_pass<D: Discovery + ?Sized>(
    discovery: &D,
    state: &CapabilityState,
    triggers: &Mutex<Vec<(GroupVersionKind, Trigger)>>,
) -> Result<Vec<GroupVersionKind>> {
    let registered = triggers
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();

    let mut served: BTreeMap<String, Vec<APIResource>> = BTreeMap::new();
    for (gvk, _) in &registered {
        let group_version = gvk.api_version();
        if served.contains_key(&group_version) {
            continue;
        }
        let resources = match discovery.resources_for_group_version(&group_version).await {
            Ok(resources) => resources,
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => return Err(e),
        };
        served.insert(group_version, resources);
    }

    let mut fired = Vec::new();
    for (gvk, trigger) in registered {
        let present = served
            .get(&gvk.api_version())
            .is_some_and(|resources| resources.iter().any(|r| r.kind == gvk.kind));
        if present && state.mark_detected(&gvk.kind) {
            tracing::info!(kind = %gvk.kind, api_version = %gvk.api_version(), "detected capability");
            trigger(&gvk);
            fired.push(gvk);
        }
    }

    tracing::debug!(
        group_versions = served.len(),
        detected = fired.len(),
        "capability detection pass complete"
    );
    Ok(fired)
}
