//! opkit Kube - reconciliation helpers for Kubernetes and OpenShift controllers
//!
//! This crate provides:
//! - **Comparator**: Decide whether a desired resource differs from the deployed one,
//!   ignoring everything the API server fills in
//! - **Resource Map**: Group heterogeneous resources by kind for batch comparison
//! - **Finalizers**: Register cleanup callbacks on objects and run them exactly once on deletion
//! - **Capability Detection**: Fire a trigger the first time a CRD is served
//! - **Platform Detection**: Tell OpenShift from vanilla Kubernetes

pub mod compare;
pub mod config;
pub mod detector;
pub mod discovery;
pub mod error;
pub mod finalizer;
pub mod registry;
pub mod store;

pub use compare::{
    CompareFn, Comparator, ResourceDelta, ResourceKind, compare_by_kind, compare_resources, equal,
};
pub use config::{ComparatorConfig, DetectorConfig};
pub use detector::{CapabilityState, Detector, Trigger};
pub use discovery::{Discovery, MockDiscovery, detect_platform, is_openshift};
pub use error::{BoxError, KubeError, Result, StoreError};
pub use finalizer::{FinalizerManager, OnFinalize, is_finalizing};
pub use registry::{ResourceMap, ResourceMapBuilder, resource_map, to_dynamic};
pub use store::{ClusterKubeStore, FailureMode, KubeStore, MockStore, ObjectStore, OperationCounts};
