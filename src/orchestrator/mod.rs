//! Convergence engine for one cluster's IRSA footprint.
//!
//! [`Orchestrator::reconcile`] drives the cluster towards its desired state
//! and is safe to run to completion on every reconcile, including after a
//! partial failure: every step first checks what already exists. Nothing is
//! rolled back on error; the next reconcile resumes from whatever AWS holds.
//!
//! [`Orchestrator::delete`] runs the ordered [`TeardownStep`] plan. No step
//! progress is stored anywhere, so a teardown interrupted half way restarts
//! from the first step, which is fine because every step tolerates the
//! resource already being gone.
//!
//! The flavors differ only in how the [`ClusterScope`] was resolved and in
//! which steps apply: legacy and CAPA clusters publish their own discovery
//! documents from S3 (optionally behind CloudFront), EKS clusters only get an
//! identity provider for the issuer EKS already serves.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::cloud::{provider_arn, CloudClients, CloudConnector};
use crate::diff::tag_diff;
use crate::discovery::STS_CLIENT_ID;
use crate::error::{Result, ResultExt};
use crate::metrics::{Metrics, Outcome};
use crate::retry::RetryConfig;
use crate::scope::{Cache, ClusterScope, Flavor};
use crate::state::StateStore;
use crate::tags::TagSet;
use crate::thumbprint::Thumbprinter;

mod cloudfront;
mod eks;
mod publish;
mod teardown;

pub use teardown::{teardown_plan, TeardownStep};

/// Retry policies for the eventually consistent steps.
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
  /// Discovery and JWKS uploads right after bucket creation
  pub upload_retry: RetryConfig,
  /// Bucket policy and public access block propagation
  pub policy_retry: RetryConfig,
  /// Distribution deletion while the disable propagates
  pub distribution_delete_retry: RetryConfig,
}

impl Default for OrchestratorSettings {
  fn default() -> Self {
    Self {
      upload_retry: RetryConfig::default(),
      policy_retry: RetryConfig::default(),
      distribution_delete_retry: RetryConfig::fixed(10, Duration::from_secs(30)),
    }
  }
}

impl OrchestratorSettings {
  /// Every retry without delay, for tests.
  pub fn immediate() -> Self {
    Self {
      upload_retry: RetryConfig::immediate(3),
      policy_retry: RetryConfig::immediate(3),
      distribution_delete_retry: RetryConfig::immediate(3),
    }
  }
}

pub struct Orchestrator {
  connector: Arc<dyn CloudConnector>,
  state: Arc<dyn StateStore>,
  thumbprints: Arc<dyn Thumbprinter>,
  metrics: Arc<dyn Metrics>,
  cache: Cache,
  settings: OrchestratorSettings,
}

impl Orchestrator {
  pub fn new(
    connector: Arc<dyn CloudConnector>,
    state: Arc<dyn StateStore>,
    thumbprints: Arc<dyn Thumbprinter>,
    metrics: Arc<dyn Metrics>,
    cache: Cache,
    settings: OrchestratorSettings,
  ) -> Self {
    Self {
      connector,
      state,
      thumbprints,
      metrics,
      cache,
      settings,
    }
  }

  /// Cache shared with the scopes built for this orchestrator.
  pub fn cache(&self) -> &Cache {
    &self.cache
  }

  /// Converge the cluster's footprint to the desired state.
  pub async fn reconcile(&self, scope: &ClusterScope) -> Result<()> {
    let result = async {
      let clients = self.connector.connect(scope).await.context(format!("{scope}: connect"))?;
      let run = Run::new(self, scope, clients);
      match scope.flavor() {
        Flavor::Legacy | Flavor::Capa => run.publish().await,
        Flavor::Eks => run.reconcile_eks().await,
      }
    }
    .await;
    self.record(scope, &result, |m, f, o| m.reconcile_finished(f, o));
    result
  }

  /// Remove the cluster's footprint.
  pub async fn delete(&self, scope: &ClusterScope) -> Result<()> {
    let result = async {
      let clients = self.connector.connect(scope).await.context(format!("{scope}: connect"))?;
      Run::new(self, scope, clients).teardown().await
    }
    .await;
    self.record(scope, &result, |m, f, o| m.teardown_finished(f, o));
    result
  }

  fn record(&self, scope: &ClusterScope, result: &Result<()>, finished: impl Fn(&dyn Metrics, Flavor, Outcome)) {
    let outcome = match result {
      Ok(()) => Outcome::Converged,
      Err(e) => {
        if let Some(op) = e.aws_operation() {
          self.metrics.aws_error(op);
        }
        Outcome::from_kind(e.kind())
      }
    };
    finished(self.metrics.as_ref(), scope.flavor(), outcome);
  }
}

/// One reconcile or teardown of one cluster.
struct Run<'a> {
  orchestrator: &'a Orchestrator,
  scope: &'a ClusterScope,
  clients: CloudClients,
}

impl<'a> Run<'a> {
  fn new(orchestrator: &'a Orchestrator, scope: &'a ClusterScope, clients: CloudClients) -> Self {
    Self {
      orchestrator,
      scope,
      clients,
    }
  }

  fn settings(&self) -> &OrchestratorSettings {
    &self.orchestrator.settings
  }

  fn state(&self) -> &dyn StateStore {
    self.orchestrator.state.as_ref()
  }

  fn ctx(&self, what: impl std::fmt::Display) -> String {
    format!("{}: {what}", self.scope)
  }

  /// Register or refresh the identity provider for `issuer_url`, then
  /// converge its tags. The thumbprint comes from the certificate `tls_host`
  /// serves. Returns the provider ARN.
  async fn ensure_identity_provider(&self, issuer_url: &str, tls_host: &str, desired_tags: &TagSet) -> Result<String> {
    let scope = self.scope;
    let issuer = issuer_url.strip_prefix("https://").unwrap_or(issuer_url);
    let thumbprint = self
      .orchestrator
      .thumbprints
      .thumbprint(tls_host)
      .await
      .context(self.ctx("thumbprint"))?;
    let arn = provider_arn(scope.partition(), scope.account_id(), issuer);

    let live = self
      .clients
      .identity
      .get_provider(&arn)
      .await
      .context(self.ctx(format!("get provider {arn}")))?;

    let live_tags = match live {
      None => {
        scope.ensure_active()?;
        let created = self
          .clients
          .identity
          .create_provider(issuer_url, STS_CLIENT_ID, &thumbprint, desired_tags)
          .await
          .context(self.ctx(format!("create provider for {issuer_url}")))?;
        info!("{scope}: created oidc provider {created}");
        desired_tags.clone()
      }
      Some(provider) => {
        if !provider.thumbprints.contains(&thumbprint) {
          scope.ensure_active()?;
          self
            .clients
            .identity
            .update_thumbprints(&arn, &[thumbprint.clone()])
            .await
            .context(self.ctx(format!("update thumbprint of {arn}")))?;
          info!("{scope}: refreshed thumbprint of {arn}");
        } else {
          debug!("{scope}: oidc provider {arn} is current");
        }
        provider.tags
      }
    };

    let diff = tag_diff(&live_tags, desired_tags);
    if !diff.to_add.is_empty() {
      scope.ensure_active()?;
      self
        .clients
        .identity
        .tag_provider(&arn, &diff.to_add)
        .await
        .context(self.ctx(format!("tag provider {arn}")))?;
    }
    if !diff.to_remove.is_empty() {
      scope.ensure_active()?;
      self
        .clients
        .identity
        .untag_provider(&arn, &diff.to_remove)
        .await
        .context(self.ctx(format!("untag provider {arn}")))?;
      debug!("{scope}: removed stale provider tags {:?}", diff.to_remove);
    }
    Ok(arn)
  }

  /// Delete a provider, tolerating its absence.
  async fn delete_identity_provider(&self, issuer_host: &str) -> Result<()> {
    let arn = provider_arn(self.scope.partition(), self.scope.account_id(), issuer_host);
    self.scope.ensure_active()?;
    self
      .clients
      .identity
      .delete_provider(&arn)
      .await
      .context(self.ctx(format!("delete provider {arn}")))?;
    info!("{}: deleted oidc provider {arn}", self.scope);
    Ok(())
  }
}
