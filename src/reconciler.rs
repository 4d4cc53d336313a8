//! Idempotent resource application
//!
//! The [`Applier`] trait is the seam between resource generation and the
//! Kubernetes API: the controller computes a plan of desired resources and
//! hands each one over for server-side apply. [`KubeApplier`] is the real
//! implementation; tests substitute an in-memory fake.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::{Client, Resource};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;
use tracing::debug;

use crate::error::{OperatorError, Result};
use crate::resources::{DesiredResource, DynamicResource};

/// Field manager name used for server-side apply.
pub const FIELD_MANAGER: &str = "observability-operator";

/// Applies a single desired resource to the cluster.
#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, namespace: &str, resource: &DesiredResource) -> Result<()>;
}

/// Apply a plan of desired resources in order.
///
/// Stops at the first failure; already-applied resources stay in place and
/// the next reconciliation converges the rest.
pub async fn apply_plan(
    applier: &dyn Applier,
    namespace: &str,
    plan: &[DesiredResource],
) -> Result<()> {
    for resource in plan {
        applier.apply(namespace, resource).await?;
    }
    Ok(())
}

/// [`Applier`] backed by the Kubernetes API, using force server-side apply.
pub struct KubeApplier {
    client: Client,
}

impl KubeApplier {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn apply_typed<K>(&self, namespace: &str, resource: &K) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + Debug + DeserializeOwned + Serialize,
        K::DynamicType: Default,
    {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let name = resource.meta().name.clone().unwrap_or_default();

        // Verify ownership before force-applying
        if let Ok(existing) = api.get(&name).await {
            verify_ownership(&existing)?;
        }

        let patch = Patch::Apply(resource);
        let params = PatchParams::apply(FIELD_MANAGER).force();

        api.patch(&name, &params, &patch).await.map_err(|e| {
            OperatorError::ReconcileFailed(format!("{}: {}", K::kind(&Default::default()), e))
        })?;

        debug!(
            name = %name,
            kind = %K::kind(&Default::default()),
            "Applied resource"
        );
        Ok(())
    }

    async fn apply_dynamic(&self, namespace: &str, resource: &DynamicResource) -> Result<()> {
        let (group, version) = resource
            .api_version
            .split_once('/')
            .unwrap_or(("", resource.api_version.as_str()));
        let gvk = GroupVersionKind::gvk(group, version, &resource.kind);
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &ApiResource::from_gvk(&gvk));

        if let Ok(existing) = api.get(&resource.name).await {
            verify_ownership(&existing)?;
        }

        let patch = Patch::Apply(&resource.manifest);
        let params = PatchParams::apply(FIELD_MANAGER).force();

        api.patch(&resource.name, &params, &patch)
            .await
            .map_err(|e| OperatorError::ReconcileFailed(format!("{}: {}", resource.kind, e)))?;

        debug!(name = %resource.name, kind = %resource.kind, "Applied resource");
        Ok(())
    }
}

#[async_trait]
impl Applier for KubeApplier {
    async fn apply(&self, namespace: &str, resource: &DesiredResource) -> Result<()> {
        match resource {
            DesiredResource::ServiceAccount(sa) => self.apply_typed(namespace, sa).await,
            DesiredResource::Deployment(dep) => self.apply_typed(namespace, dep).await,
            DesiredResource::Service(svc) => self.apply_typed(namespace, svc).await,
            DesiredResource::ServiceMonitor(sm) => self.apply_dynamic(namespace, sm).await,
        }
    }
}

/// Verify the operator still owns a resource before force-applying.
fn verify_ownership<K: Resource>(existing: &K) -> Result<()> {
    let labels = existing.meta().labels.as_ref();
    let managed_by = labels.and_then(|l| l.get("app.kubernetes.io/managed-by"));
    match managed_by {
        Some(manager) if manager != FIELD_MANAGER => {
            let name = existing.meta().name.as_deref().unwrap_or("<unknown>");
            Err(OperatorError::InvalidConfig(format!(
                "resource '{}' is managed by '{}', refusing to overwrite",
                name, manager
            )))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThanosConfiguration;
    use crate::crd::{ThanosQuerier, ThanosQuerierSpec};
    use crate::resources::build_plan;
    use k8s_openapi::api::core::v1::ServiceAccount;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    /// Records applied resources instead of talking to a cluster.
    struct FakeApplier {
        applied: Mutex<Vec<(String, String, String)>>,
        fail_on_kind: Option<&'static str>,
    }

    impl FakeApplier {
        fn new() -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                fail_on_kind: None,
            }
        }

        fn failing_on(kind: &'static str) -> Self {
            Self {
                applied: Mutex::new(Vec::new()),
                fail_on_kind: Some(kind),
            }
        }

        fn applied(&self) -> Vec<(String, String, String)> {
            self.applied.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Applier for FakeApplier {
        async fn apply(&self, namespace: &str, resource: &DesiredResource) -> Result<()> {
            if self.fail_on_kind == Some(resource.kind()) {
                return Err(OperatorError::ReconcileFailed(format!(
                    "{}: injected failure",
                    resource.kind()
                )));
            }
            self.applied.lock().unwrap().push((
                namespace.to_string(),
                resource.kind().to_string(),
                resource.name().unwrap_or_default().to_string(),
            ));
            Ok(())
        }
    }

    fn create_test_querier() -> ThanosQuerier {
        ThanosQuerier {
            metadata: ObjectMeta {
                name: Some("foo".to_string()),
                namespace: Some("monitoring".to_string()),
                uid: Some("uid-1".to_string()),
                ..Default::default()
            },
            spec: ThanosQuerierSpec::default(),
            status: None,
        }
    }

    #[tokio::test]
    async fn test_apply_plan_applies_all_in_order() {
        let querier = create_test_querier();
        let plan = build_plan(&querier, &[], &ThanosConfiguration::default()).unwrap();
        let applier = FakeApplier::new();

        apply_plan(&applier, "monitoring", &plan).await.unwrap();

        let applied = applier.applied();
        let kinds: Vec<&str> = applied.iter().map(|(_, k, _)| k.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["ServiceAccount", "Deployment", "Service", "ServiceMonitor"]
        );
        for (namespace, _, name) in &applied {
            assert_eq!(namespace, "monitoring");
            assert_eq!(name, "thanos-querier-foo");
        }
    }

    #[tokio::test]
    async fn test_apply_plan_stops_at_first_failure() {
        let querier = create_test_querier();
        let plan = build_plan(&querier, &[], &ThanosConfiguration::default()).unwrap();
        let applier = FakeApplier::failing_on("Deployment");

        let err = apply_plan(&applier, "monitoring", &plan).await.unwrap_err();
        assert!(matches!(err, OperatorError::ReconcileFailed(_)));
        assert!(err.is_retryable());

        let applied = applier.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].1, "ServiceAccount");
    }

    #[test]
    fn test_verify_ownership_accepts_own_and_unlabelled() {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        );
        let owned = ServiceAccount {
            metadata: ObjectMeta {
                name: Some("thanos-querier-foo".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(verify_ownership(&owned).is_ok());

        let unlabelled = ServiceAccount::default();
        assert!(verify_ownership(&unlabelled).is_ok());
    }

    #[test]
    fn test_verify_ownership_rejects_foreign_manager() {
        let mut labels = BTreeMap::new();
        labels.insert(
            "app.kubernetes.io/managed-by".to_string(),
            "helm".to_string(),
        );
        let foreign = ServiceAccount {
            metadata: ObjectMeta {
                name: Some("thanos-querier-foo".to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = verify_ownership(&foreign).unwrap_err();
        assert!(err.to_string().contains("helm"));
        assert!(!err.is_retryable());
    }
}
