//! Managed control planes serve their own issuer. The provider for it is
//! registered here but may be shared with whatever created the cluster, so
//! teardown only takes back the tags this operator put on it.

use log::{debug, info, warn};

use super::Run;
use crate::cloud::provider_arn;
use crate::diff::tag_diff;
use crate::discovery::host_of;
use crate::error::{Error, Result, ResultExt};
use crate::tags::TagSet;

const CLUSTER_NOT_FOUND: &str = "ResourceNotFoundException";

impl Run<'_> {
  fn eks_cluster_name(&self) -> Result<&str> {
    self
      .scope
      .eks_cluster_name()
      .ok_or_else(|| Error::validation(format!("{}: eks cluster name is missing", self.scope)))
  }

  pub(super) async fn reconcile_eks(&self) -> Result<()> {
    let scope = self.scope;
    let name = self.eks_cluster_name()?;
    let issuer = match self.clients.managed.oidc_issuer(name).await {
      Ok(issuer) => issuer,
      Err(e) if e.aws_code() == Some(CLUSTER_NOT_FOUND) => {
        return Err(Error::not_ready(format!("eks cluster {name}"), "control plane does not exist yet"))
      }
      Err(e) => return Err(e.context(self.ctx(format!("describe eks cluster {name}")))),
    };
    if issuer.is_empty() {
      return Err(Error::not_ready(format!("eks cluster {name}"), "no oidc issuer yet"));
    }

    let arn = self
      .ensure_identity_provider(&issuer, host_of(&issuer), &scope.desired_tags())
      .await?;
    debug!("{scope}: eks issuer {issuer} trusted through {arn}");
    Ok(())
  }

  /// Merge an empty tag set over the provider's tags we own. The provider
  /// itself stays. A control plane that is already gone leaves nothing to
  /// resolve the issuer from.
  pub(super) async fn release_eks_provider(&self) -> Result<()> {
    let scope = self.scope;
    let name = self.eks_cluster_name()?;
    let issuer = match self.clients.managed.oidc_issuer(name).await {
      Ok(issuer) => issuer,
      Err(e) if e.aws_code() == Some(CLUSTER_NOT_FOUND) => {
        warn!("{scope}: eks cluster {name} is gone, leaving its oidc provider as is");
        return Ok(());
      }
      Err(e) => return Err(e.context(self.ctx(format!("describe eks cluster {name}")))),
    };
    let issuer = issuer.strip_prefix("https://").unwrap_or(&issuer);
    if issuer.is_empty() {
      return Ok(());
    }

    let arn = provider_arn(scope.partition(), scope.account_id(), issuer);
    let Some(provider) = self
      .clients
      .identity
      .get_provider(&arn)
      .await
      .context(self.ctx(format!("get provider {arn}")))?
    else {
      debug!("{scope}: no oidc provider {arn} to release");
      return Ok(());
    };

    let managed: TagSet = scope
      .desired_tags()
      .keys()
      .filter_map(|k| provider.tags.get(k).map(|v| (k, v)))
      .collect();
    let diff = tag_diff(&managed, &TagSet::new());
    if diff.to_remove.is_empty() {
      return Ok(());
    }
    scope.ensure_active()?;
    self
      .clients
      .identity
      .untag_provider(&arn, &diff.to_remove)
      .await
      .context(self.ctx(format!("untag provider {arn}")))?;
    info!("{scope}: released oidc provider {arn}");
    Ok(())
  }
}
