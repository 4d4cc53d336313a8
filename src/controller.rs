//! ThanosQuerier Controller
//!
//! This module implements the Kubernetes controller pattern for managing
//! ThanosQuerier custom resources. It watches for changes and reconciles
//! the generated child resources to match the desired specification.
//!
//! Child resources carry an owner reference with `controller: true`, so
//! deletion of a ThanosQuerier cascades through garbage collection and no
//! finalizer is needed.

use crate::config::ThanosConfiguration;
use crate::crd::{QuerierCondition, QuerierPhase, ThanosQuerier, ThanosQuerierStatus};
use crate::error::{OperatorError, Result};
use crate::reconciler::{apply_plan, Applier, KubeApplier};
use crate::resources::build_plan;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use validator::Validate;

/// Default requeue interval for successful reconciliations
const DEFAULT_REQUEUE_SECONDS: u64 = 300; // 5 minutes

/// Requeue interval for error cases (base for exponential backoff)
const ERROR_REQUEUE_SECONDS: u64 = 30;

/// Maximum requeue delay for error backoff
const MAX_ERROR_REQUEUE_SECONDS: u64 = 600;

/// Context passed to the controller
pub struct ControllerContext {
    /// Kubernetes client
    pub client: Client,
    /// Resource application backend
    pub applier: Arc<dyn Applier>,
    /// Static configuration for generated querier workloads
    pub thanos: ThanosConfiguration,
    /// Sidecar gRPC endpoints the queriers fan out to
    pub sidecar_endpoints: Vec<String>,
    /// Metrics recorder (optional)
    pub metrics: Option<ControllerMetrics>,
    /// Per-querier error retry counts for exponential backoff
    pub error_counts: dashmap::DashMap<String, u32>,
}

/// Metrics for the controller
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for reconciliation errors
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
}

impl ControllerMetrics {
    /// Create new controller metrics
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("observability_operator_reconciliations_total"),
            errors: metrics::counter!("observability_operator_reconciliation_errors_total"),
            duration: metrics::histogram!(
                "observability_operator_reconciliation_duration_seconds"
            ),
        }
    }
}

impl Default for ControllerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the ThanosQuerier controller
pub async fn run_controller(
    client: Client,
    namespace: Option<String>,
    thanos: ThanosConfiguration,
    sidecar_endpoints: Vec<String>,
) -> Result<()> {
    let queriers: Api<ThanosQuerier> = match &namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let ctx = Arc::new(ControllerContext {
        client: client.clone(),
        applier: Arc::new(KubeApplier::new(client.clone())),
        thanos,
        sidecar_endpoints,
        metrics: Some(ControllerMetrics::new()),
        error_counts: dashmap::DashMap::new(),
    });

    info!(
        namespace = namespace.as_deref().unwrap_or("all"),
        "Starting ThanosQuerier controller"
    );

    // Watch related resources for changes
    let deployments = match &namespace {
        Some(ns) => Api::<Deployment>::namespaced(client.clone(), ns),
        None => Api::<Deployment>::all(client.clone()),
    };

    let services = match &namespace {
        Some(ns) => Api::<Service>::namespaced(client.clone(), ns),
        None => Api::<Service>::all(client.clone()),
    };

    Controller::new(queriers.clone(), Config::default())
        .owns(deployments, Config::default())
        .owns(services, Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    debug!(
                        name = obj.name,
                        namespace = obj.namespace,
                        ?action,
                        "Reconciliation completed"
                    );
                }
                Err(e) => {
                    error!(error = %e, "Reconciliation failed");
                }
            }
        })
        .await;

    Ok(())
}

/// Main reconciliation function
#[instrument(skip(querier, ctx), fields(name = %querier.name_any(), namespace = querier.namespace()))]
async fn reconcile(querier: Arc<ThanosQuerier>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let start = std::time::Instant::now();

    if let Some(ref metrics) = ctx.metrics {
        metrics.reconciliations.increment(1);
    }

    let querier_name = querier.name_any();

    let result = apply_querier(querier.clone(), ctx.clone()).await;

    if let Some(ref metrics) = ctx.metrics {
        metrics.duration.record(start.elapsed().as_secs_f64());
    }

    // Reset error backoff counter on success
    if result.is_ok() {
        ctx.error_counts.remove(&querier_name);
    }

    if let Err(ref e) = result {
        if let Some(ref metrics) = ctx.metrics {
            metrics.errors.increment(1);
        }
        // Best-effort: surface the failure on the status subresource.
        let namespace = querier.namespace().unwrap_or_else(|| "default".to_string());
        let status = degraded_status(&querier, e);
        if let Err(status_err) =
            update_status(&ctx.client, &namespace, &querier_name, status).await
        {
            warn!(error = %status_err, "Failed to record degraded status");
        }
    }

    result
}

/// Apply (create/update) the querier child resources
#[instrument(skip(querier, ctx))]
async fn apply_querier(querier: Arc<ThanosQuerier>, ctx: Arc<ControllerContext>) -> Result<Action> {
    let name = querier.name_any();
    let namespace = querier.namespace().unwrap_or_else(|| "default".to_string());

    info!(name = %name, namespace = %namespace, "Reconciling ThanosQuerier");

    // Validate the querier spec before reconciliation
    if let Err(errors) = querier.spec.validate() {
        let error_messages: Vec<String> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errs)| {
                errs.iter()
                    .map(move |e| format!("{}: {:?}", field, e.message))
            })
            .collect();
        let error_msg = error_messages.join("; ");
        warn!(name = %name, errors = %error_msg, "Querier spec validation failed");
        return Err(OperatorError::InvalidConfig(error_msg));
    }

    // The plan is computed in full before anything is written, so a
    // malformed endpoint fails the reconciliation without side effects.
    let plan = build_plan(&querier, &ctx.sidecar_endpoints, &ctx.thanos)?;
    apply_plan(ctx.applier.as_ref(), &namespace, &plan).await?;

    let status = build_status(&querier);
    update_status(&ctx.client, &namespace, &name, status).await?;

    info!(name = %name, "Reconciliation complete");

    Ok(Action::requeue(Duration::from_secs(
        DEFAULT_REQUEUE_SECONDS,
    )))
}

/// Build the status for a successfully reconciled querier
fn build_status(querier: &ThanosQuerier) -> ThanosQuerierStatus {
    let now = Utc::now().to_rfc3339();

    ThanosQuerierStatus {
        phase: QuerierPhase::Reconciled,
        message: None,
        observed_generation: querier.metadata.generation.unwrap_or(0),
        conditions: vec![QuerierCondition {
            condition_type: "Reconciled".to_string(),
            status: "True".to_string(),
            reason: Some("ChildResourcesApplied".to_string()),
            message: None,
            last_transition_time: Some(now.clone()),
        }],
        last_updated: Some(now),
    }
}

/// Build the status for a failed reconciliation
fn degraded_status(querier: &ThanosQuerier, error: &OperatorError) -> ThanosQuerierStatus {
    let now = Utc::now().to_rfc3339();

    ThanosQuerierStatus {
        phase: QuerierPhase::Degraded,
        message: Some(error.to_string()),
        observed_generation: querier.metadata.generation.unwrap_or(0),
        conditions: vec![QuerierCondition {
            condition_type: "Reconciled".to_string(),
            status: "False".to_string(),
            reason: Some("ReconcileError".to_string()),
            message: Some(error.to_string()),
            last_transition_time: Some(now.clone()),
        }],
        last_updated: Some(now),
    }
}

/// Update the querier status subresource
async fn update_status(
    client: &Client,
    namespace: &str,
    name: &str,
    status: ThanosQuerierStatus,
) -> Result<()> {
    let api: Api<ThanosQuerier> = Api::namespaced(client.clone(), namespace);

    debug!(name = %name, phase = ?status.phase, "Updating querier status");

    let patch = serde_json::json!({
        "status": status
    });

    let patch_params = PatchParams::default();
    api.patch_status(name, &patch_params, &Patch::Merge(&patch))
        .await
        .map_err(OperatorError::from)?;

    Ok(())
}

/// Error policy for the controller — exponential backoff.
fn error_policy(
    querier: Arc<ThanosQuerier>,
    error: &OperatorError,
    ctx: Arc<ControllerContext>,
) -> Action {
    let key = querier.name_any();
    let retries = {
        let mut entry = ctx.error_counts.entry(key.clone()).or_insert(0);
        *entry += 1;
        *entry
    };

    let delay = backoff_delay(error, retries);

    warn!(
        error = %error,
        retry = retries,
        delay_secs = delay.as_secs(),
        "Reconciliation error for '{}', will retry",
        key
    );

    Action::requeue(delay)
}

/// Use the error's suggested delay OR exponential backoff:
/// 30s → 60s → 120s → 240s → 480s → 600s (capped)
fn backoff_delay(error: &OperatorError, retries: u32) -> Duration {
    error.requeue_delay().unwrap_or_else(|| {
        let base = Duration::from_secs(ERROR_REQUEUE_SECONDS);
        let backoff = base * 2u32.saturating_pow(retries.saturating_sub(1).min(5));
        backoff.min(Duration::from_secs(MAX_ERROR_REQUEUE_SECONDS))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ThanosQuerierSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn create_test_querier() -> ThanosQuerier {
        ThanosQuerier {
            metadata: ObjectMeta {
                name: Some("test-querier".to_string()),
                namespace: Some("monitoring".to_string()),
                uid: Some("test-uid".to_string()),
                generation: Some(3),
                ..Default::default()
            },
            spec: ThanosQuerierSpec {
                replica_labels: vec!["zone".to_string()],
            },
            status: None,
        }
    }

    #[test]
    fn test_build_status_reconciled() {
        let querier = create_test_querier();
        let status = build_status(&querier);

        assert_eq!(status.phase, QuerierPhase::Reconciled);
        assert_eq!(status.observed_generation, 3);
        assert_eq!(status.conditions.len(), 1);
        assert_eq!(status.conditions[0].condition_type, "Reconciled");
        assert_eq!(status.conditions[0].status, "True");
        assert!(status.last_updated.is_some());
    }

    #[test]
    fn test_degraded_status_carries_error() {
        let querier = create_test_querier();
        let err = OperatorError::InvalidEndpoint {
            endpoint: "bad".to_string(),
            reason: "missing '://' scheme separator".to_string(),
        };
        let status = degraded_status(&querier, &err);

        assert_eq!(status.phase, QuerierPhase::Degraded);
        assert!(status.message.as_ref().unwrap().contains("bad"));
        assert_eq!(status.conditions[0].status, "False");
        assert_eq!(
            status.conditions[0].reason.as_deref(),
            Some("ReconcileError")
        );
    }

    #[test]
    fn test_backoff_delay_uses_error_suggestion() {
        let retryable = OperatorError::ReconcileFailed("boom".to_string());
        assert_eq!(backoff_delay(&retryable, 1), Duration::from_secs(30));
        assert_eq!(backoff_delay(&retryable, 5), Duration::from_secs(30));
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let non_retryable = OperatorError::InvalidConfig("bad".to_string());
        assert_eq!(backoff_delay(&non_retryable, 1), Duration::from_secs(30));
        assert_eq!(backoff_delay(&non_retryable, 2), Duration::from_secs(60));
        assert_eq!(backoff_delay(&non_retryable, 3), Duration::from_secs(120));
        assert_eq!(backoff_delay(&non_retryable, 5), Duration::from_secs(480));
        assert_eq!(backoff_delay(&non_retryable, 6), Duration::from_secs(600));
        assert_eq!(backoff_delay(&non_retryable, 50), Duration::from_secs(600));
    }
}
