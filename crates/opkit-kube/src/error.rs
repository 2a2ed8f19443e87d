//! Error types for opkit-kube

use thiserror::Error;

/// Result type for opkit-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Error returned by a finalizer callback
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while reconciling resources
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Caller supplied an unusable argument (blank finalizer name, object without uid)
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The object store rejected a write
    #[error("failed to persist object: {0}")]
    Persistence(#[from] StoreError),

    /// A finalizer callback failed; the finalizer stays registered
    #[error("finalizer '{finalizer}' failed: {source}")]
    Callback {
        finalizer: String,
        #[source]
        source: BoxError,
    },

    /// API discovery failed
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this error wraps a conflicting write
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Persistence(e) if e.is_conflict())
    }

    /// Check if this error wraps a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::Persistence(e) if e.is_not_found())
            || matches!(self, KubeError::Api(kube::Error::Api(resp)) if resp.code == 404)
    }
}

/// Errors produced by an [`ObjectStore`](crate::store::ObjectStore)
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// Object does not exist
    #[error("object not found: {0}")]
    NotFound(String),

    /// Object was modified concurrently (stale resourceVersion)
    #[error("conflict: {0}")]
    Conflict(String),

    /// Any other Kubernetes API failure
    #[error("Kubernetes API error: {0}")]
    Api(#[source] kube::Error),

    /// Store-specific failure
    #[error("{0}")]
    Other(String),
}

impl From<kube::Error> for StoreError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(resp.message),
            kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict(resp.message),
            other => StoreError::Api(other),
        }
    }
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}
