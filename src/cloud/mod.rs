//! Capability contracts for the AWS services the operator drives.
//!
//! Each trait exposes the verbs the orchestrator needs and nothing more.
//! Implementations normalise provider errors into [`crate::Error`] and absorb
//! the idempotence cases themselves: deleting something already gone and
//! creating something we already own both succeed.
//!
//! [`aws`] holds the SDK-backed adapters, [`memory`] the in-memory doubles.

use std::sync::Arc;

use async_trait::async_trait;

use crate::diff::ViewerConfig;
use crate::error::Result;
use crate::scope::ClusterScope;
use crate::tags::TagSet;

pub mod aws;
pub mod memory;

/// CloudFront certificates must live in us-east-1 whatever the cluster region.
pub const CLOUDFRONT_CERTIFICATE_REGION: &str = "us-east-1";

#[async_trait]
pub trait ObjectStore: Send + Sync {
  async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

  /// Create a bucket; one we already own counts as created.
  async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()>;

  /// Default server side encryption at rest.
  async fn encrypt_bucket(&self, bucket: &str) -> Result<()>;

  /// Replace the bucket tag set.
  async fn put_bucket_tags(&self, bucket: &str, tags: &TagSet) -> Result<()>;

  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;

  /// Object keys, empty for a missing bucket.
  async fn list_objects(&self, bucket: &str) -> Result<Vec<String>>;

  async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

  /// Missing bucket counts as deleted.
  async fn delete_bucket(&self, bucket: &str) -> Result<()>;

  async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()>;

  async fn block_public_access(&self, bucket: &str) -> Result<()>;

  /// Drop the public access block so a public-read policy can apply.
  async fn allow_public_access(&self, bucket: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OidcProvider {
  pub arn: String,
  pub url: String,
  pub client_ids: Vec<String>,
  pub thumbprints: Vec<String>,
  pub tags: TagSet,
}

/// ARN IAM assigns to the provider for `issuer_host`.
pub fn provider_arn(partition: &str, account_id: &str, issuer_host: &str) -> String {
  format!("arn:{partition}:iam::{account_id}:oidc-provider/{issuer_host}")
}

#[async_trait]
pub trait IdentityProviders: Send + Sync {
  async fn get_provider(&self, arn: &str) -> Result<Option<OidcProvider>>;

  /// Register a provider; an existing one for the same URL counts as created.
  /// Returns the provider ARN.
  async fn create_provider(
    &self,
    url: &str,
    client_id: &str,
    thumbprint: &str,
    tags: &TagSet,
  ) -> Result<String>;

  async fn update_thumbprints(&self, arn: &str, thumbprints: &[String]) -> Result<()>;

  async fn tag_provider(&self, arn: &str, tags: &TagSet) -> Result<()>;

  async fn untag_provider(&self, arn: &str, keys: &[String]) -> Result<()>;

  /// Missing provider counts as deleted.
  async fn delete_provider(&self, arn: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Distribution {
  pub arn: String,
  pub id: String,
  pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionState {
  pub distribution: Distribution,
  pub enabled: bool,
  /// Last change finished propagating
  pub deployed: bool,
  pub viewer: ViewerConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionSpec {
  /// Stable per cluster so a repeated create is recognised
  pub caller_reference: String,
  pub comment: String,
  pub origin_domain: String,
  pub origin_access_identity_id: String,
  pub viewer: ViewerConfig,
  pub tags: TagSet,
}

#[async_trait]
pub trait Cdn: Send + Sync {
  /// Create an origin access identity; an existing one with the same caller
  /// reference is returned instead. Returns its ID.
  async fn create_origin_access_identity(&self, caller_reference: &str, comment: &str) -> Result<String>;

  /// Missing identity counts as deleted.
  async fn delete_origin_access_identity(&self, id: &str) -> Result<()>;

  /// Create a distribution. A second create for the same caller reference
  /// fails with `DistributionAlreadyExists`.
  async fn create_distribution(&self, spec: &DistributionSpec) -> Result<Distribution>;

  /// Distribution whose comment is `comment`, if any.
  async fn find_distribution(&self, comment: &str) -> Result<Option<Distribution>>;

  async fn get_distribution(&self, id: &str) -> Result<Option<DistributionState>>;

  async fn update_viewer(&self, id: &str, viewer: &ViewerConfig) -> Result<()>;

  /// No-op when already disabled or gone.
  async fn disable_distribution(&self, id: &str) -> Result<()>;

  /// Missing distribution counts as deleted. A distribution that is not yet
  /// disabled everywhere fails with [`crate::Kind::NotYetReady`].
  async fn delete_distribution(&self, id: &str) -> Result<()>;

  async fn list_tags(&self, arn: &str) -> Result<TagSet>;

  async fn tag_resource(&self, arn: &str, tags: &TagSet) -> Result<()>;

  async fn untag_resource(&self, arn: &str, keys: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateStatus {
  Issued,
  PendingValidation,
  Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsRecord {
  pub name: String,
  pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
  pub arn: String,
  pub status: CertificateStatus,
  /// DNS validation record, once ACM has produced it
  pub validation: Option<DnsRecord>,
}

#[async_trait]
pub trait Certificates: Send + Sync {
  async fn find_certificate(&self, domain: &str) -> Result<Option<String>>;

  /// Request a DNS validated certificate. Returns its ARN.
  async fn request_certificate(&self, domain: &str, tags: &TagSet) -> Result<String>;

  async fn describe_certificate(&self, arn: &str) -> Result<Certificate>;

  /// Missing certificate counts as deleted.
  async fn delete_certificate(&self, arn: &str) -> Result<()>;
}

#[async_trait]
pub trait Dns: Send + Sync {
  /// ID of the public zone serving `domain`.
  async fn find_hosted_zone(&self, domain: &str) -> Result<Option<String>>;

  async fn upsert_cname(&self, zone_id: &str, record: &DnsRecord) -> Result<()>;

  /// Missing record counts as deleted.
  async fn delete_cname(&self, zone_id: &str, record: &DnsRecord) -> Result<()>;
}

#[async_trait]
pub trait ManagedClusters: Send + Sync {
  /// Issuer URL of the managed control plane's own OIDC endpoint.
  async fn oidc_issuer(&self, cluster_name: &str) -> Result<String>;
}

/// Clients for one cluster, authenticated as that cluster's role.
#[derive(Clone)]
pub struct CloudClients {
  pub objects: Arc<dyn ObjectStore>,
  pub identity: Arc<dyn IdentityProviders>,
  pub cdn: Arc<dyn Cdn>,
  /// Bound to [`CLOUDFRONT_CERTIFICATE_REGION`]
  pub certificates: Arc<dyn Certificates>,
  pub dns: Arc<dyn Dns>,
  pub managed: Arc<dyn ManagedClusters>,
}

/// Produces [`CloudClients`] for a scope, assuming its role.
#[async_trait]
pub trait CloudConnector: Send + Sync {
  async fn connect(&self, scope: &ClusterScope) -> Result<CloudClients>;
}
