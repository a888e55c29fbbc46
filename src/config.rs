//! Operator configuration, from flags or the environment.

use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::orchestrator::OrchestratorSettings;
use crate::retry::RetryConfig;

/// Timeout for fetching an endpoint's certificate.
pub const THUMBPRINT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Parser)]
#[command(name = "irsa-operator", about = "Publishes OIDC trust for cluster service accounts", version)]
pub struct OperatorConfig {
  /// Kubeconfig context to use when in-cluster config is unavailable
  #[arg(long, env = "KUBE_CTX")]
  pub kube_context: Option<String>,

  /// Installation name, tagged on every AWS resource
  #[arg(long, env = "IRSA_INSTALLATION")]
  pub installation: String,

  /// Base domain for CloudFront aliases of Cluster API clusters
  #[arg(long, env = "IRSA_BASE_DOMAIN")]
  pub base_domain: Option<String>,

  #[arg(long, env = "IRSA_ENABLE_LEGACY", default_value_t = true, action = ArgAction::Set)]
  pub enable_legacy: bool,

  #[arg(long, env = "IRSA_ENABLE_CAPA", default_value_t = true, action = ArgAction::Set)]
  pub enable_capa: bool,

  #[arg(long, env = "IRSA_ENABLE_EKS", default_value_t = true, action = ArgAction::Set)]
  pub enable_eks: bool,

  /// Periodic re-reconcile, which also refreshes thumbprints and tags
  #[arg(long, env = "IRSA_REQUEUE_SECONDS", default_value_t = 300)]
  pub requeue_seconds: u64,

  /// Requeue while AWS resources are still converging
  #[arg(long, env = "IRSA_NOT_READY_REQUEUE_SECONDS", default_value_t = 30)]
  pub not_ready_requeue_seconds: u64,

  /// Requeue after a retryable error; fatal errors wait five times longer
  #[arg(long, env = "IRSA_ERROR_REQUEUE_SECONDS", default_value_t = 60)]
  pub error_requeue_seconds: u64,

  #[arg(long, env = "IRSA_UPLOAD_ATTEMPTS", default_value_t = 6)]
  pub upload_attempts: u32,

  #[arg(long, env = "IRSA_DISTRIBUTION_DELETE_ATTEMPTS", default_value_t = 10)]
  pub distribution_delete_attempts: u32,

  #[arg(long, env = "IRSA_DISTRIBUTION_DELETE_INTERVAL_SECONDS", default_value_t = 30)]
  pub distribution_delete_interval_seconds: u64,
}

/// Requeue intervals used by the controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requeue {
  pub converged: Duration,
  pub not_ready: Duration,
  pub retryable: Duration,
  pub fatal: Duration,
}

impl Default for Requeue {
  fn default() -> Self {
    Self {
      converged: Duration::from_secs(300),
      not_ready: Duration::from_secs(30),
      retryable: Duration::from_secs(60),
      fatal: Duration::from_secs(300),
    }
  }
}

impl OperatorConfig {
  pub fn requeue(&self) -> Requeue {
    Requeue {
      converged: Duration::from_secs(self.requeue_seconds),
      not_ready: Duration::from_secs(self.not_ready_requeue_seconds),
      retryable: Duration::from_secs(self.error_requeue_seconds),
      fatal: Duration::from_secs(self.error_requeue_seconds.saturating_mul(5)),
    }
  }

  pub fn orchestrator_settings(&self) -> OrchestratorSettings {
    OrchestratorSettings {
      upload_retry: RetryConfig::with_max_attempts(self.upload_attempts),
      distribution_delete_retry: RetryConfig::fixed(
        self.distribution_delete_attempts,
        Duration::from_secs(self.distribution_delete_interval_seconds),
      ),
      ..OrchestratorSettings::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults() {
    let config = OperatorConfig::try_parse_from(["operator", "--installation", "gauss"]).unwrap();
    assert!(config.enable_legacy && config.enable_capa && config.enable_eks);
    assert_eq!(config.requeue(), Requeue::default());

    let settings = config.orchestrator_settings();
    assert_eq!(settings.upload_retry.max_attempts, 6);
    assert_eq!(settings.distribution_delete_retry.max_attempts, 10);
    assert_eq!(settings.distribution_delete_retry.initial_delay, Duration::from_secs(30));
  }

  #[test]
  fn flavors_can_be_disabled() {
    let config = OperatorConfig::try_parse_from([
      "operator",
      "--installation",
      "gauss",
      "--enable-legacy",
      "false",
      "--error-requeue-seconds",
      "10",
    ])
    .unwrap();
    assert!(!config.enable_legacy);
    assert!(config.enable_capa);
    assert_eq!(config.requeue().fatal, Duration::from_secs(50));
  }

  #[test]
  fn installation_is_required() {
    assert!(OperatorConfig::try_parse_from(["operator"]).is_err());
  }
}
