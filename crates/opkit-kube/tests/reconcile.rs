//! Integration tests for a reconcile loop built on opkit-kube

use kube::ResourceExt;
use kube::core::DynamicObject;
use serde::Deserialize;

/// Get the fixtures path
fn fixtures_path() -> &'static str {
    concat!(env!("CARGO_MANIFEST_DIR"), "/../../fixtures")
}

/// Load every document of a multi-document YAML fixture
fn load(name: &str) -> Vec<DynamicObject> {
    let path = format!("{}/reconcile/{}", fixtures_path(), name);
    let content = std::fs::read_to_string(&path).expect("Failed to read fixture");
    serde_yaml::Deserializer::from_str(&content)
        .map(|doc| DynamicObject::deserialize(doc).expect("Invalid fixture document"))
        .collect()
}

mod comparison {
    use super::*;
    use opkit_kube::{Comparator, ResourceKind, compare_by_kind, resource_map};

    #[test]
    fn test_delta_between_fixtures() {
        let deployed = resource_map(load("deployed.yaml"));
        let requested = resource_map(load("desired.yaml"));

        let deltas = compare_by_kind(&Comparator::new(), &deployed, &requested);

        let services = &deltas[&ResourceKind::Service];
        assert!(!services.has_changes(), "{}", services.summary());

        let deployments = &deltas[&ResourceKind::Deployment];
        assert_eq!(deployments.summary(), "1 updated");
        assert_eq!(
            deployments.updated[0].resource_version().as_deref(),
            Some("4712")
        );

        assert_eq!(deltas[&ResourceKind::Route].summary(), "1 added");

        let config_maps = &deltas[&ResourceKind::Other("ConfigMap".to_string())];
        assert_eq!(config_maps.removed[0].name_any(), "shop-legacy");
    }

    #[test]
    fn test_deployed_objects_equal_themselves() {
        let comparator = Comparator::new();
        for obj in load("deployed.yaml") {
            assert!(comparator.equal(&obj, &obj), "{}", obj.name_any());
        }
    }
}

mod finalizers {
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use kube::ResourceExt;
    use kube::core::ObjectMeta;
    use opkit_kube::{BoxError, FinalizerManager, MockStore, ObjectStore};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FINALIZER: &str = "shop.example.com/cleanup";

    fn owner() -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some("shop".to_string()),
                namespace: Some("shop".to_string()),
                uid: Some("7d1e".to_string()),
                resource_version: Some("1".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_finalizer_lifecycle() {
        let store = MockStore::with_objects([owner()]);
        let manager = FinalizerManager::new(store.clone());
        let cleanups = Arc::new(AtomicUsize::new(0));

        // first reconcile registers the finalizer
        let mut live = store.get(Some("shop"), "shop").await.unwrap();
        let counter = Arc::clone(&cleanups);
        manager
            .register_finalizer(&mut live, FINALIZER, move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), BoxError>(())
                }
            })
            .await
            .unwrap();
        assert_eq!(live.finalizers(), [FINALIZER]);

        // the user deletes the object, the API server only sets the timestamp
        live.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        store.insert(live.clone());

        let mut deleting = store.get(Some("shop"), "shop").await.unwrap();
        manager.finalize_on_delete(&mut deleting).await.unwrap();
        manager.finalize_on_delete(&mut deleting).await.unwrap();

        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert!(deleting.finalizers().is_empty());
        assert!(manager.registered_finalizers("7d1e").is_empty());
        let stored = store.object(Some("shop"), "shop").unwrap();
        assert!(stored.finalizers().is_empty());
    }
}

mod capabilities {
    use kube::core::GroupVersionKind;
    use opkit_kube::{CapabilityState, Detector, MockDiscovery, detect_platform};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_openshift_features_enabled_once() {
        let discovery = MockDiscovery::new();
        discovery.set_version("1", "16+", "linux/amd64");

        let state = CapabilityState::new();
        let detector = Detector::new(discovery.clone(), state.clone());
        let enabled = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&enabled);
        detector.add_crds_trigger(
            [
                GroupVersionKind::gvk("route.openshift.io", "v1", "Route"),
                GroupVersionKind::gvk("apps.openshift.io", "v1", "DeploymentConfig"),
            ],
            move |gvk| sink.lock().unwrap().push(gvk.kind.clone()),
        );

        assert!(detector.detect_once().await.unwrap().is_empty());
        assert!(detect_platform(&discovery).await.unwrap().is_kubernetes());

        discovery.add_resource("route.openshift.io/v1", "Route");
        discovery.add_resource("apps.openshift.io/v1", "DeploymentConfig");
        detector.detect_once().await.unwrap();
        detector.detect_once().await.unwrap();

        assert_eq!(*enabled.lock().unwrap(), vec!["Route", "DeploymentConfig"]);
        assert_eq!(state.detected(), vec!["DeploymentConfig", "Route"]);

        let platform = detect_platform(&discovery).await.unwrap();
        assert!(platform.is_openshift());
        assert_eq!(
            opkit_core::k8s_openshift_version_map(&platform).version,
            "v4.3"
        );
    }
}
