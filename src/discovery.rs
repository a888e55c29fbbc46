//! OIDC discovery document, where it is served from, and who may read it.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::scope::{endpoint_suffix, ClusterScope};

pub const DISCOVERY_OBJECT_KEY: &str = ".well-known/openid-configuration";
pub const JWKS_OBJECT_KEY: &str = "keys.json";

/// Audience registered on every identity provider.
pub const STS_CLIENT_ID: &str = "sts.amazonaws.com";

const AUTHORIZATION_ENDPOINT: &str = "urn:kubernetes:programmatic_authorization";

/// How relying parties reach the published documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
  /// Straight from the S3 regional endpoint, `host` includes the bucket path.
  Direct { host: String },
  /// Through CloudFront, either its own domain or the cluster alias.
  CloudFront { host: String },
}

impl Delivery {
  /// Delivery for a scope. `distribution_domain` is required once CloudFront
  /// is enabled and no alias applies.
  pub fn for_scope(scope: &ClusterScope, distribution_domain: Option<&str>) -> Result<Self> {
    if !scope.cloudfront_enabled() {
      return Ok(Self::Direct {
        host: direct_host(scope.region(), scope.bucket_name()),
      });
    }
    if let Some(alias) = scope.alias_domain() {
      return Ok(Self::CloudFront { host: alias.to_string() });
    }
    let domain = distribution_domain
      .filter(|d| !d.is_empty())
      .ok_or_else(|| Error::partial_state(scope.config_name(), "distribution domain is empty"))?;
    Ok(Self::CloudFront { host: domain.to_string() })
  }

  /// Issuer without scheme, as IAM keys providers by it.
  pub fn issuer_host(&self) -> &str {
    match self {
      Self::Direct { host } | Self::CloudFront { host } => host,
    }
  }

  pub fn issuer_url(&self) -> String {
    format!("https://{}", self.issuer_host())
  }

  pub fn jwks_uri(&self) -> String {
    format!("{}/{JWKS_OBJECT_KEY}", self.issuer_url())
  }

  /// Host the TLS handshake for the thumbprint goes to.
  pub fn tls_host(&self) -> &str {
    host_of(self.issuer_host())
  }

  pub fn document(&self) -> DiscoveryDocument {
    DiscoveryDocument::new(self.issuer_url(), self.jwks_uri())
  }
}

pub fn direct_host(region: &str, bucket: &str) -> String {
  format!("s3.{region}.{}/{bucket}", endpoint_suffix(region))
}

/// Strip scheme and path from an issuer.
pub fn host_of(issuer: &str) -> &str {
  let without_scheme = issuer.strip_prefix("https://").unwrap_or(issuer);
  without_scheme.split('/').next().unwrap_or(without_scheme)
}

/// Every issuer host a cluster may have been published under, oldest first.
/// Teardown removes providers for all of them.
pub fn candidate_issuer_hosts(scope: &ClusterScope, distribution_domain: Option<&str>) -> Vec<String> {
  let mut hosts = Vec::new();
  if !scope.bucket_name().is_empty() {
    hosts.push(direct_host(scope.region(), scope.bucket_name()));
  }
  if let Some(domain) = distribution_domain.filter(|d| !d.is_empty()) {
    hosts.push(domain.to_string());
  }
  if let Some(alias) = scope.alias_domain() {
    hosts.push(alias.to_string());
  }
  hosts.dedup();
  hosts
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
  pub issuer: String,
  pub jwks_uri: String,
  pub authorization_endpoint: String,
  pub response_types_supported: Vec<String>,
  pub subject_types_supported: Vec<String>,
  pub id_token_signing_alg_values_supported: Vec<String>,
  pub claims_supported: Vec<String>,
}

impl DiscoveryDocument {
  pub fn new(issuer: String, jwks_uri: String) -> Self {
    Self {
      issuer,
      jwks_uri,
      authorization_endpoint: AUTHORIZATION_ENDPOINT.to_string(),
      response_types_supported: vec!["id_token".to_string()],
      subject_types_supported: vec!["public".to_string()],
      id_token_signing_alg_values_supported: vec!["RS256".to_string()],
      claims_supported: vec!["sub".to_string(), "iss".to_string()],
    }
  }

  pub fn to_json(&self) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec_pretty(self)?)
  }
}

/// Anyone may read objects; used for direct S3 delivery.
pub fn public_read_policy(partition: &str, bucket: &str) -> String {
  json!({
    "Version": "2012-10-17",
    "Statement": [{
      "Sid": "PublicReadGetObject",
      "Effect": "Allow",
      "Principal": "*",
      "Action": "s3:GetObject",
      "Resource": format!("arn:{partition}:s3:::{bucket}/*"),
    }],
  })
  .to_string()
}

/// Only the distribution's origin access identity may read objects.
pub fn origin_access_policy(partition: &str, bucket: &str, origin_access_identity_id: &str) -> String {
  json!({
    "Version": "2012-10-17",
    "Statement": [{
      "Sid": "CloudFrontOriginAccessIdentity",
      "Effect": "Allow",
      "Principal": {
        "AWS": format!("arn:aws:iam::cloudfront:user/CloudFront Origin Access Identity {origin_access_identity_id}"),
      },
      "Action": "s3:GetObject",
      "Resource": format!("arn:{partition}:s3:::{bucket}/*"),
    }],
  })
  .to_string()
}
