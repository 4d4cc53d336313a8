//! Custom Resource Definitions for the observability operator
//!
//! This module defines the `ThanosQuerier` CRD. Each instance describes one
//! Thanos query layer that fans out to a set of sidecar endpoints.

use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Regex for validating Prometheus label names
static LABEL_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").unwrap());

/// ThanosQuerier custom resource definition
///
/// Represents a single Thanos query deployment. The operator reconciles each
/// instance into a ServiceAccount, a Deployment, a Service and a
/// ServiceMonitor, all named `thanos-querier-<name>` in the instance's
/// namespace.
#[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "monitoring.rhobs",
    version = "v1alpha1",
    kind = "ThanosQuerier",
    plural = "thanosqueriers",
    namespaced,
    status = "ThanosQuerierStatus",
    shortname = "tq"
)]
#[serde(rename_all = "camelCase")]
pub struct ThanosQuerierSpec {
    /// Labels treated as replica indicators when deduplicating series across
    /// sidecars. Order is preserved in the generated querier arguments.
    #[serde(default)]
    #[validate(custom(function = "validate_replica_labels"))]
    pub replica_labels: Vec<String>,
}

/// Validate replica label names (Prometheus label grammar, bounded count)
fn validate_replica_labels(labels: &[String]) -> Result<(), ValidationError> {
    const MAX_REPLICA_LABELS: usize = 20;
    if labels.len() > MAX_REPLICA_LABELS {
        return Err(ValidationError::new("too_many_replica_labels").with_message(
            format!("maximum {} replica labels allowed", MAX_REPLICA_LABELS).into(),
        ));
    }
    for label in labels {
        if !LABEL_NAME_REGEX.is_match(label) {
            return Err(ValidationError::new("invalid_replica_label").with_message(
                format!("'{}' is not a valid Prometheus label name", label).into(),
            ));
        }
    }
    Ok(())
}

/// Status of a ThanosQuerier resource
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ThanosQuerierStatus {
    /// Current lifecycle phase
    #[serde(default)]
    pub phase: QuerierPhase,

    /// Human-readable detail about the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Generation most recently acted upon by the operator
    #[serde(default)]
    pub observed_generation: i64,

    /// Detailed status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<QuerierCondition>,

    /// Last status update timestamp (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

/// Lifecycle phase of a ThanosQuerier
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum QuerierPhase {
    /// Not yet reconciled
    #[default]
    Pending,
    /// All child resources applied
    Reconciled,
    /// Last reconciliation failed
    Degraded,
}

/// A status condition in the standard Kubernetes shape
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct QuerierCondition {
    /// Condition type (e.g. "Reconciled")
    pub condition_type: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Transition timestamp (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_spec_serde_defaults() {
        let json = r#"{}"#;
        let spec: ThanosQuerierSpec = serde_json::from_str(json).unwrap();
        assert!(spec.replica_labels.is_empty());
    }

    #[test]
    fn test_replica_label_order_preserved() {
        let json = r#"{"replicaLabels": ["zone", "rack", "replica"]}"#;
        let spec: ThanosQuerierSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.replica_labels, vec!["zone", "rack", "replica"]);
    }

    #[test]
    fn test_replica_label_validation() {
        let spec = ThanosQuerierSpec {
            replica_labels: vec!["prometheus_replica".to_string(), "zone".to_string()],
        };
        assert!(spec.validate().is_ok());

        let spec = ThanosQuerierSpec {
            replica_labels: vec!["bad-label".to_string()],
        };
        assert!(spec.validate().is_err());

        let spec = ThanosQuerierSpec {
            replica_labels: vec!["1starts_with_digit".to_string()],
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_replica_label_count_limit() {
        let spec = ThanosQuerierSpec {
            replica_labels: (0..21).map(|i| format!("label_{}", i)).collect(),
        };
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_crd_identity() {
        let crd = ThanosQuerier::crd();
        assert_eq!(crd.spec.group, "monitoring.rhobs");
        assert_eq!(crd.spec.names.kind, "ThanosQuerier");
        assert_eq!(crd.spec.names.plural, "thanosqueriers");
        assert!(crd.spec.versions.iter().any(|v| v.name == "v1alpha1"));
    }

    #[test]
    fn test_status_default_phase() {
        let status = ThanosQuerierStatus::default();
        assert_eq!(status.phase, QuerierPhase::Pending);
    }
}
