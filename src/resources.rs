//! Kubernetes resource builders
//!
//! This module generates the child resources (ServiceAccount, Deployment,
//! Service, ServiceMonitor) for a ThanosQuerier custom resource, plus the
//! querier process argument list. Every builder is a pure function over its
//! arguments: repeated invocation with identical input yields byte-identical
//! objects, which keeps server-side apply convergent.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, ContainerPort, PodSecurityContext, PodSpec, PodTemplateSpec,
    SeccompProfile, SecretVolumeSource, SecurityContext, Service, ServiceAccount, ServicePort,
    ServiceSpec, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};

use crate::config::{SidecarTlsConfig, ThanosConfiguration, SIDECAR_CA_MOUNT_PATH};
use crate::crd::ThanosQuerier;
use crate::endpoint::tls_server_name;
use crate::error::{OperatorError, Result};

/// Label key identifying which querier instance owns a child resource.
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// Port the querier serves HTTP (and metrics) on.
const HTTP_PORT: i32 = 10902;

/// Volume name for the mounted sidecar CA secret.
const CA_VOLUME_NAME: &str = "sidecar-ca";

/// Identity and ownership labels shared by every generated resource.
///
/// The Service and ServiceMonitor selectors rely on these matching the
/// Deployment pod template exactly, so all builders must go through here.
pub fn component_labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(INSTANCE_LABEL.to_string(), name.to_string());
    labels.insert(
        "app.kubernetes.io/part-of".to_string(),
        "ThanosQuerier".to_string(),
    );
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "observability-operator".to_string(),
    );
    labels
}

/// Build the querier process argument list.
///
/// Flag order is part of the contract: identical input must produce an
/// identical sequence across reconciliations so that apply stays a no-op.
/// The layout is fixed prefix, per-endpoint flags in input order, TLS block,
/// then replica labels in input order.
pub fn build_args(
    endpoints: &[String],
    replica_labels: &[String],
    tls: &SidecarTlsConfig,
) -> Result<Vec<String>> {
    let mut args = vec![
        "query".to_string(),
        "--log.format=logfmt".to_string(),
        "--query.replica-label=prometheus_replica".to_string(),
        "--query.auto-downsampling".to_string(),
    ];
    for endpoint in endpoints {
        args.push(format!("--endpoint={}", endpoint));
        if tls.enabled {
            args.push(format!(
                "--grpc-client-server-name={}",
                tls_server_name(endpoint)?
            ));
        }
    }
    if tls.enabled {
        args.push(format!("--grpc-client-tls-ca={}", tls.ca_file_path()));
        args.push("--grpc-client-tls-secure".to_string());
    }
    for label in replica_labels {
        args.push(format!("--query.replica-label={}", label));
    }
    Ok(args)
}

/// A resource applied through the dynamic API (no typed k8s-openapi struct).
#[derive(Clone, Debug, PartialEq)]
pub struct DynamicResource {
    /// apiVersion of the manifest (e.g. "monitoring.coreos.com/v1")
    pub api_version: String,
    /// Kind of the manifest
    pub kind: String,
    /// metadata.name of the manifest
    pub name: String,
    /// Full manifest as JSON, suitable for server-side apply
    pub manifest: serde_json::Value,
}

/// One desired child resource of a ThanosQuerier.
#[derive(Clone, Debug)]
pub enum DesiredResource {
    ServiceAccount(ServiceAccount),
    Deployment(Deployment),
    Service(Service),
    ServiceMonitor(DynamicResource),
}

impl DesiredResource {
    /// Kind of the wrapped resource
    pub fn kind(&self) -> &'static str {
        match self {
            DesiredResource::ServiceAccount(_) => "ServiceAccount",
            DesiredResource::Deployment(_) => "Deployment",
            DesiredResource::Service(_) => "Service",
            DesiredResource::ServiceMonitor(_) => "ServiceMonitor",
        }
    }

    /// metadata.name of the wrapped resource
    pub fn name(&self) -> Option<&str> {
        match self {
            DesiredResource::ServiceAccount(sa) => sa.metadata.name.as_deref(),
            DesiredResource::Deployment(dep) => dep.metadata.name.as_deref(),
            DesiredResource::Service(svc) => svc.metadata.name.as_deref(),
            DesiredResource::ServiceMonitor(sm) => Some(&sm.name),
        }
    }
}

/// Builder for generating child resources from a ThanosQuerier
pub struct ResourceBuilder<'a> {
    querier: &'a ThanosQuerier,
    /// Name of the owning custom resource
    querier_name: String,
    /// Shared name of every generated resource
    name: String,
    namespace: String,
}

impl<'a> ResourceBuilder<'a> {
    /// Create a new resource builder
    pub fn new(querier: &'a ThanosQuerier) -> Result<Self> {
        let querier_name = querier.metadata.name.clone().ok_or_else(|| {
            OperatorError::InvalidConfig("ThanosQuerier is missing metadata.name".to_string())
        })?;
        let namespace = querier
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let name = format!("thanos-querier-{}", querier_name);
        Ok(Self {
            querier,
            querier_name,
            name,
            namespace,
        })
    }

    /// Owner reference pointing back at the ThanosQuerier, so Kubernetes
    /// garbage-collects every child when the custom resource is deleted.
    fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: "monitoring.rhobs/v1alpha1".to_string(),
            kind: "ThanosQuerier".to_string(),
            name: self.querier_name.clone(),
            uid: self.querier.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Shared metadata: same name, namespace and label set on every resource.
    fn object_meta(&self) -> ObjectMeta {
        ObjectMeta {
            name: Some(self.name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(component_labels(&self.name)),
            owner_references: Some(vec![self.owner_reference()]),
            ..Default::default()
        }
    }

    /// Build the ServiceAccount for the querier pod
    pub fn build_service_account(&self) -> ServiceAccount {
        ServiceAccount {
            metadata: self.object_meta(),
            ..Default::default()
        }
    }

    /// Build the querier Deployment
    pub fn build_deployment(
        &self,
        sidecar_endpoints: &[String],
        cfg: &ThanosConfiguration,
    ) -> Result<Deployment> {
        let args = build_args(
            sidecar_endpoints,
            &self.querier.spec.replica_labels,
            &cfg.sidecar_tls,
        )?;
        let labels = component_labels(&self.name);

        // The CA volume only exists when TLS towards the sidecars is on.
        let (volumes, volume_mounts) = if cfg.sidecar_tls.enabled {
            (
                Some(vec![Volume {
                    name: CA_VOLUME_NAME.to_string(),
                    secret: Some(SecretVolumeSource {
                        secret_name: Some(cfg.sidecar_tls.ca_secret_name.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                Some(vec![VolumeMount {
                    name: CA_VOLUME_NAME.to_string(),
                    mount_path: SIDECAR_CA_MOUNT_PATH.to_string(),
                    read_only: Some(true),
                    ..Default::default()
                }]),
            )
        } else {
            (None, None)
        };

        let container = Container {
            name: "thanos-querier".to_string(),
            image: Some(cfg.image.clone()),
            args: Some(args),
            ports: Some(vec![ContainerPort {
                container_port: HTTP_PORT,
                name: Some("metrics".to_string()),
                ..Default::default()
            }]),
            termination_message_policy: Some("FallbackToLogsOnError".to_string()),
            security_context: Some(SecurityContext {
                allow_privilege_escalation: Some(false),
                capabilities: Some(Capabilities {
                    drop: Some(vec!["ALL".to_string()]),
                    ..Default::default()
                }),
                run_as_non_root: Some(true),
                seccomp_profile: Some(SeccompProfile {
                    type_: "RuntimeDefault".to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            volume_mounts,
            ..Default::default()
        };

        let mut node_selector = BTreeMap::new();
        node_selector.insert("kubernetes.io/os".to_string(), "linux".to_string());

        Ok(Deployment {
            metadata: self.object_meta(),
            spec: Some(DeploymentSpec {
                replicas: Some(1),
                selector: LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        node_selector: Some(node_selector),
                        security_context: Some(PodSecurityContext {
                            run_as_non_root: Some(true),
                            seccomp_profile: Some(SeccompProfile {
                                type_: "RuntimeDefault".to_string(),
                                ..Default::default()
                            }),
                            ..Default::default()
                        }),
                        volumes,
                        ..Default::default()
                    }),
                },
                progress_deadline_seconds: Some(300),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    /// Build the ClusterIP Service in front of the querier pod
    pub fn build_service(&self) -> Service {
        Service {
            metadata: self.object_meta(),
            spec: Some(ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(component_labels(&self.name)),
                ports: Some(vec![ServicePort {
                    name: Some("http".to_string()),
                    port: HTTP_PORT,
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Build the ServiceMonitor scraping the querier Service.
    ///
    /// The ServiceMonitor CRD has no typed binding, so this emits the
    /// manifest as JSON for dynamic apply. The port name and scheme must
    /// agree with [`Self::build_service`].
    pub fn build_service_monitor(&self) -> DynamicResource {
        let manifest = serde_json::json!({
            "apiVersion": "monitoring.coreos.com/v1",
            "kind": "ServiceMonitor",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "labels": component_labels(&self.name),
                "ownerReferences": [self.owner_reference()],
            },
            "spec": {
                "endpoints": [
                    {
                        "port": "http",
                        "scheme": "http",
                    }
                ],
                "selector": {
                    "matchLabels": component_labels(&self.name),
                },
            },
        });
        DynamicResource {
            api_version: "monitoring.coreos.com/v1".to_string(),
            kind: "ServiceMonitor".to_string(),
            name: self.name.clone(),
            manifest,
        }
    }
}

/// Compute the full desired child-resource set for one ThanosQuerier.
///
/// Returns the resources in the fixed order {ServiceAccount, Deployment,
/// Service, ServiceMonitor}. The plan is built atomically in memory; the
/// only failure mode is a malformed sidecar endpoint.
pub fn build_plan(
    querier: &ThanosQuerier,
    sidecar_endpoints: &[String],
    cfg: &ThanosConfiguration,
) -> Result<Vec<DesiredResource>> {
    let builder = ResourceBuilder::new(querier)?;
    Ok(vec![
        DesiredResource::ServiceAccount(builder.build_service_account()),
        DesiredResource::Deployment(builder.build_deployment(sidecar_endpoints, cfg)?),
        DesiredResource::Service(builder.build_service()),
        DesiredResource::ServiceMonitor(builder.build_service_monitor()),
    ])
}
