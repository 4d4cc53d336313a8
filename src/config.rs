//! Static operator configuration
//!
//! Everything here is process-wide and supplied by the caller (CLI flags or
//! environment). None of it is derived from a custom resource, which keeps
//! the resource builders pure functions over their arguments.

/// Default Thanos container image used when none is configured.
pub const DEFAULT_THANOS_IMAGE: &str = "quay.io/thanos/thanos:v0.37.2";

/// Mount path for the sidecar CA secret inside the querier pod.
pub const SIDECAR_CA_MOUNT_PATH: &str = "/etc/thanos/tls-assets/ca-secret";

/// Static configuration for generated Thanos querier workloads.
#[derive(Clone, Debug)]
pub struct ThanosConfiguration {
    /// Container image for the querier deployment
    pub image: String,
    /// TLS settings for the gRPC connections towards the sidecars
    pub sidecar_tls: SidecarTlsConfig,
}

impl Default for ThanosConfiguration {
    fn default() -> Self {
        Self {
            image: DEFAULT_THANOS_IMAGE.to_string(),
            sidecar_tls: SidecarTlsConfig::default(),
        }
    }
}

/// TLS settings for querier-to-sidecar gRPC connections.
///
/// The referenced secret is issued and rotated elsewhere; the operator only
/// mounts it into the querier pod.
#[derive(Clone, Debug)]
pub struct SidecarTlsConfig {
    /// Enable TLS towards the sidecars
    pub enabled: bool,
    /// Name of the secret holding the sidecar CA certificate
    pub ca_secret_name: String,
    /// Key within the secret under which the CA certificate is stored
    pub ca_key: String,
}

impl Default for SidecarTlsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_secret_name: "cert-thanos-sidecar-svc".to_string(),
            ca_key: "ca.crt".to_string(),
        }
    }
}

impl SidecarTlsConfig {
    /// Full path of the mounted CA certificate inside the querier pod.
    pub fn ca_file_path(&self) -> String {
        format!("{}/{}", SIDECAR_CA_MOUNT_PATH, self.ca_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ThanosConfiguration::default();
        assert_eq!(cfg.image, DEFAULT_THANOS_IMAGE);
        assert!(cfg.sidecar_tls.enabled);
        assert_eq!(cfg.sidecar_tls.ca_secret_name, "cert-thanos-sidecar-svc");
        assert_eq!(cfg.sidecar_tls.ca_key, "ca.crt");
    }

    #[test]
    fn test_ca_file_path() {
        let tls = SidecarTlsConfig::default();
        assert_eq!(tls.ca_file_path(), "/etc/thanos/tls-assets/ca-secret/ca.crt");
    }
}
