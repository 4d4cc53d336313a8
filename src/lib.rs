//! # Observability Operator
//!
//! Kubernetes operator for deploying and managing Thanos query layers on top
//! of Prometheus sidecars.
//!
//! Each `ThanosQuerier` custom resource is reconciled into a fixed set of
//! child resources in its namespace, all named `thanos-querier-<name>`:
//!
//! 1. a **ServiceAccount** for the querier pod
//! 2. a **Deployment** running `thanos query` against the configured
//!    sidecar endpoints
//! 3. a **ClusterIP Service** exposing the querier HTTP API
//! 4. a **ServiceMonitor** scraping the querier's own metrics
//!
//! Resource generation is a pure function of the custom resource, the
//! sidecar endpoint list and the static operator configuration; application
//! uses force server-side apply, so reconciliation converges to a no-op once
//! the cluster matches the desired state. Child resources carry controller
//! owner references and are garbage-collected with their ThanosQuerier.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use observability_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!
//!     let endpoints = vec!["dns:///thanos-sidecar.monitoring.svc:10901".to_string()];
//!     run_controller(client, None, ThanosConfiguration::default(), endpoints).await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`crd`] - The `ThanosQuerier` Custom Resource Definition with validation
//! - [`controller`] - Reconciliation logic and controller setup
//! - [`resources`] - Child resource builders and querier argument generation
//! - [`reconciler`] - Server-side apply backend behind the [`reconciler::Applier`] trait
//! - [`endpoint`] - Sidecar endpoint parsing
//! - [`config`] - Static operator configuration
//! - [`error`] - Error types for operator operations

pub mod config;
pub mod controller;
pub mod crd;
pub mod endpoint;
pub mod error;
pub mod reconciler;
pub mod resources;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::config::{SidecarTlsConfig, ThanosConfiguration};
    pub use crate::controller::run_controller;
    pub use crate::crd::{ThanosQuerier, ThanosQuerierSpec, ThanosQuerierStatus};
    pub use crate::error::{OperatorError, Result};
}
