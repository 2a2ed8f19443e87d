//! API discovery
//!
//! The capability detector and platform detection only need a handful of
//! discovery calls. [`Discovery`] is implemented for [`kube::Client`] and for the
//! in-memory [`MockDiscovery`] used in tests.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;
use k8s_openapi::apimachinery::pkg::version::Info;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use opkit_core::{PlatformInfo, PlatformType};

use crate::error::{KubeError, Result};

/// API group served by OpenShift routers
pub const ROUTE_API_GROUP: &str = "route.openshift.io";

/// Read access to the API server's discovery endpoints
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Resources served under a group version ("v1", "apps/v1", "route.openshift.io/v1")
    async fn resources_for_group_version(&self, group_version: &str) -> Result<Vec<APIResource>>;

    /// Names of the API groups served, excluding the core group
    async fn api_groups(&self) -> Result<Vec<String>>;

    /// Version information of the API server
    async fn server_version(&self) -> Result<Info>;
}

#[async_trait]
impl Discovery for kube::Client {
    async fn resources_for_group_version(&self, group_version: &str) -> Result<Vec<APIResource>> {
        let list = if group_version.contains('/') {
            self.list_api_group_resources(group_version).await?
        } else {
            self.list_core_api_resources(group_version).await?
        };
        Ok(list.resources)
    }

    async fn api_groups(&self) -> Result<Vec<String>> {
        let groups = self.list_api_groups().await?;
        Ok(groups.groups.into_iter().map(|g| g.name).collect())
    }

    async fn server_version(&self) -> Result<Info> {
        Ok(self.apiserver_version().await?)
    }
}

/// Identify the platform behind a discovery client
///
/// The cluster is OpenShift when it serves the route API group. The Kubernetes
/// version is reported as `MAJOR.MINOR` of the API server.
pub async fn detect_platform<D: Discovery + ?Sized>(discovery: &D) -> Result<PlatformInfo> {
    let version = discovery.server_version().await?;
    let groups = discovery.api_groups().await?;

    let name = if groups.iter().any(|g| g == ROUTE_API_GROUP) {
        PlatformType::OpenShift
    } else {
        PlatformType::Kubernetes
    };

    let mut info = PlatformInfo::new(name, format!("{}.{}", version.major, version.minor));
    info.os = version.platform;

    tracing::info!(platform = %info, "detected platform");
    Ok(info)
}

/// Whether the cluster behind a discovery client is OpenShift
pub async fn is_openshift<D: Discovery + ?Sized>(discovery: &D) -> Result<bool> {
    Ok(detect_platform(discovery).await?.is_openshift())
}

/// In-memory discovery for testing
#[derive(Clone, Default)]
pub struct MockDiscovery {
    resources: Arc<RwLock<HashMap<String, Vec<APIResource>>>>,
    version: Arc<RwLock<Info>>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl MockDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a resource of the given kind under a group version
    pub fn add_resource(&self, group_version: &str, kind: &str) {
        let (group, version) = match group_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", group_version),
        };
        let resource = APIResource {
            name: format!("{}s", kind.to_lowercase()),
            singular_name: kind.to_lowercase(),
            kind: kind.to_string(),
            namespaced: true,
            group: Some(group.to_string()),
            version: Some(version.to_string()),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        };

        let mut resources = self.resources.write().unwrap_or_else(PoisonError::into_inner);
        resources
            .entry(group_version.to_string())
            .or_default()
            .push(resource);
    }

    pub fn set_version(&self, major: &str, minor: &str, platform: &str) {
        let mut version = self.version.write().unwrap_or_else(PoisonError::into_inner);
        version.major = major.to_string();
        version.minor = minor.to_string();
        version.platform = platform.to_string();
    }

    /// Make every call fail until reset
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of discovery calls served (or failed)
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin_call(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(KubeError::Discovery("discovery unavailable".to_string()));
        }
        Ok(())
    }
}

/// The error the API server returns for a group version it does not serve
fn not_served(group_version: &str) -> KubeError {
    KubeError::Api(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("the server could not find the requested resource ({})", group_version),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

#[async_trait]
impl Discovery for MockDiscovery {
    async fn resources_for_group_version(&self, group_version: &str) -> Result<Vec<APIResource>> {
        self.begin_call()?;
        let resources = self.resources.read().unwrap_or_else(PoisonError::into_inner);
        resources
            .get(group_version)
            .cloned()
            .ok_or_else(|| not_served(group_version))
    }

    async fn api_groups(&self) -> Result<Vec<String>> {
        self.begin_call()?;
        let resources = self.resources.read().unwrap_or_else(PoisonError::into_inner);
        let mut groups: Vec<String> = resources
            .keys()
            .filter_map(|gv| gv.split_once('/').map(|(group, _)| group.to_string()))
            .collect();
        groups.sort();
        groups.dedup();
        Ok(groups)
    }

    async fn server_version(&self) -> Result<Info> {
        self.begin_call()?;
        Ok(self
            .version
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }
}
