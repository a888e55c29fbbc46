use async_trait::async_trait;
use aws_sdk_eks::Client;

use super::aws_error;
use crate::cloud::ManagedClusters;
use crate::error::Result;

pub struct EksClusters {
  client: Client,
}

impl EksClusters {
  pub fn new(client: Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl ManagedClusters for EksClusters {
  /// Empty while the control plane has no issuer yet.
  async fn oidc_issuer(&self, cluster_name: &str) -> Result<String> {
    let resp = self
      .client
      .describe_cluster()
      .name(cluster_name)
      .send()
      .await
      .map_err(|e| aws_error("eks:DescribeCluster", e))?;
    Ok(
      resp
        .cluster()
        .and_then(|c| c.identity())
        .and_then(|i| i.oidc())
        .and_then(|o| o.issuer())
        .unwrap_or_default()
        .to_string(),
    )
  }
}
