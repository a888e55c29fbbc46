//! Per-reconcile view of one cluster.
//!
//! A [`ClusterScope`] is rebuilt from the watched object on every reconcile and
//! is never persisted. The only thing that outlives it is the [`Cache`], which
//! is shared across reconciles purely to skip repeated lookups.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use semver::Version;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::tags::{internal_tags, organization_from_namespace, Ownership, TagSet};

pub const KEEP_OIDC_PROVIDER_ANNOTATION: &str = "irsa-operator.controlant.com/keep-oidc-provider";
pub const PRE_CLOUDFRONT_ALIAS_ANNOTATION: &str = "irsa-operator.controlant.com/pre-cloudfront-alias";
pub const MIGRATION_ANNOTATION: &str = "irsa-operator.controlant.com/migration";
pub const RELEASE_VERSION_LABEL: &str = "release.controlant.com/version";
pub const ORGANIZATION_LABEL: &str = "controlant.com/organization";

/// First release served through CloudFront.
pub const CLOUDFRONT_MAJOR_RELEASE: u64 = 18;
/// First release served through a CloudFront alias.
pub const ALIAS_MAJOR_RELEASE: u64 = 19;

const MAX_BUCKET_NAME_LEN: usize = 63;

/// Which kind of cluster object the scope was resolved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
  Legacy,
  Capa,
  Eks,
}

impl fmt::Display for Flavor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Legacy => "legacy",
      Self::Capa => "capa",
      Self::Eks => "eks",
    })
  }
}

/// China regions have no CloudFront and their own partition.
pub fn is_restricted_region(region: &str) -> bool {
  region.starts_with("cn-")
}

pub fn partition(region: &str) -> &'static str {
  if is_restricted_region(region) {
    "aws-cn"
  } else {
    "aws"
  }
}

pub fn endpoint_suffix(region: &str) -> &'static str {
  if is_restricted_region(region) {
    "amazonaws.com.cn"
  } else {
    "amazonaws.com"
  }
}

/// Account ID is the first run of decimal digits in the role ARN.
pub fn account_id_from_arn(arn: &str) -> Result<String> {
  let digits: String = arn
    .chars()
    .skip_while(|c| !c.is_ascii_digit())
    .take_while(|c| c.is_ascii_digit())
    .collect();
  if digits.is_empty() {
    return Err(Error::validation(format!("no account id in role arn {arn:?}")));
  }
  Ok(digits)
}

/// Process-wide cache of derived values.
///
/// Entries are an optimisation only: a miss or a stale hit leads to a
/// redundant lookup, never to a different resource identity.
#[derive(Debug, Clone, Default)]
pub struct Cache {
  entries: Arc<DashMap<String, String>>,
}

impl Cache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> Option<String> {
    self.entries.get(key).map(|v| v.value().clone())
  }

  pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
    self.entries.insert(key.into(), value.into());
  }

  pub fn remove(&self, key: &str) {
    self.entries.remove(key);
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn account_id(&self, role_arn: &str) -> Result<String> {
    let key = format!("account-id/{role_arn}");
    if let Some(id) = self.get(&key) {
      return Ok(id);
    }
    let id = account_id_from_arn(role_arn)?;
    self.insert(key, id.clone());
    Ok(id)
  }
}

/// Parse a boolean feature annotation. Absent means false.
pub fn parse_flag(annotations: &BTreeMap<String, String>, key: &str) -> Result<bool> {
  match annotations.get(key).map(|v| v.trim()) {
    None => Ok(false),
    Some(v) => v
      .parse::<bool>()
      .map_err(|_| Error::validation(format!("annotation {key} must be true or false, got {v:?}"))),
  }
}

/// Parse the release label, tolerating a leading `v`.
pub fn parse_release(labels: &BTreeMap<String, String>) -> Result<Option<Version>> {
  match labels.get(RELEASE_VERSION_LABEL) {
    None => Ok(None),
    Some(raw) => Version::parse(raw.trim().trim_start_matches('v'))
      .map(Some)
      .map_err(|e| Error::validation(format!("label {RELEASE_VERSION_LABEL}={raw:?}: {e}"))),
  }
}

pub fn bucket_name(account_id: &str, cluster: &str) -> String {
  format!("{account_id}-{cluster}-oidc-pod-identity")
}

pub fn signing_secret_name(cluster: &str) -> String {
  format!("{cluster}-service-account-v2")
}

pub fn distribution_config_name(cluster: &str) -> String {
  format!("{cluster}-irsa-cloudfront")
}

pub fn alias_domain(cluster: &str, base_domain: &str) -> String {
  format!("irsa.{cluster}.{base_domain}")
}

/// Everything one reconcile needs to know about a cluster.
#[derive(Debug, Clone)]
pub struct ClusterScope {
  flavor: Flavor,
  account_id: String,
  role_arn: String,
  region: String,
  cluster_name: String,
  cluster_namespace: String,
  bucket_name: String,
  config_name: String,
  secret_name: String,
  release_version: Option<Version>,
  migration_needed: bool,
  keep_oidc_provider_on_delete: bool,
  pre_cloudfront_alias: bool,
  installation_name: String,
  organization: Option<String>,
  base_domain: Option<String>,
  alias_domain: Option<String>,
  eks_cluster_name: Option<String>,
  customer_tags: TagSet,
  cache: Cache,
  cancel: CancellationToken,
}

impl ClusterScope {
  pub fn builder(flavor: Flavor, name: impl Into<String>, namespace: impl Into<String>) -> ClusterScopeBuilder {
    ClusterScopeBuilder {
      flavor: Some(flavor),
      name: name.into(),
      namespace: namespace.into(),
      ..ClusterScopeBuilder::default()
    }
  }

  pub fn flavor(&self) -> Flavor {
    self.flavor
  }

  pub fn account_id(&self) -> &str {
    &self.account_id
  }

  pub fn role_arn(&self) -> &str {
    &self.role_arn
  }

  pub fn region(&self) -> &str {
    &self.region
  }

  pub fn partition(&self) -> &'static str {
    partition(&self.region)
  }

  pub fn cluster_name(&self) -> &str {
    &self.cluster_name
  }

  pub fn cluster_namespace(&self) -> &str {
    &self.cluster_namespace
  }

  pub fn bucket_name(&self) -> &str {
    &self.bucket_name
  }

  pub fn config_name(&self) -> &str {
    &self.config_name
  }

  pub fn secret_name(&self) -> &str {
    &self.secret_name
  }

  pub fn release_version(&self) -> Option<&Version> {
    self.release_version.as_ref()
  }

  pub fn migration_needed(&self) -> bool {
    self.migration_needed
  }

  pub fn keep_oidc_provider_on_delete(&self) -> bool {
    self.keep_oidc_provider_on_delete
  }

  pub fn pre_cloudfront_alias(&self) -> bool {
    self.pre_cloudfront_alias
  }

  pub fn installation_name(&self) -> &str {
    &self.installation_name
  }

  pub fn base_domain(&self) -> Option<&str> {
    self.base_domain.as_deref()
  }

  pub fn eks_cluster_name(&self) -> Option<&str> {
    self.eks_cluster_name.as_deref()
  }

  pub fn customer_tags(&self) -> &TagSet {
    &self.customer_tags
  }

  pub fn cache(&self) -> &Cache {
    &self.cache
  }

  pub fn cancellation(&self) -> &CancellationToken {
    &self.cancel
  }

  pub fn is_restricted_region(&self) -> bool {
    is_restricted_region(&self.region)
  }

  /// Whether discovery is served through CloudFront instead of S3 directly.
  pub fn cloudfront_enabled(&self) -> bool {
    if self.flavor == Flavor::Eks || self.is_restricted_region() {
      return false;
    }
    self.flavor == Flavor::Capa || self.migration_needed || self.release_at_least(CLOUDFRONT_MAJOR_RELEASE)
  }

  /// Custom domain in front of the distribution, when one applies.
  pub fn alias_domain(&self) -> Option<&str> {
    self.alias_domain.as_deref()
  }

  /// Tags guaranteed by the operator, independent of the cluster spec.
  pub fn internal_tags(&self) -> TagSet {
    let ownership = match self.flavor {
      Flavor::Legacy => Ownership::Legacy,
      Flavor::Capa | Flavor::Eks => Ownership::ClusterApi,
    };
    internal_tags(
      &self.cluster_name,
      &self.installation_name,
      self.organization.as_deref(),
      ownership,
    )
  }

  /// Customer tags with internal tags layered on top.
  pub fn desired_tags(&self) -> TagSet {
    self.customer_tags.merged(&self.internal_tags())
  }

  /// Fails once the reconcile has been cancelled; call before every write.
  pub fn ensure_active(&self) -> Result<()> {
    if self.cancel.is_cancelled() {
      return Err(Error::Cancelled);
    }
    Ok(())
  }

  fn release_at_least(&self, major: u64) -> bool {
    self.release_version.as_ref().is_some_and(|v| v.major >= major)
  }
}

impl fmt::Display for ClusterScope {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.cluster_namespace, self.cluster_name)
  }
}

#[derive(Debug, Default)]
pub struct ClusterScopeBuilder {
  flavor: Option<Flavor>,
  name: String,
  namespace: String,
  role_arn: Option<String>,
  region: Option<String>,
  release_version: Option<Version>,
  migration_needed: bool,
  keep_oidc_provider_on_delete: bool,
  pre_cloudfront_alias: bool,
  installation_name: String,
  organization: Option<String>,
  base_domain: Option<String>,
  eks_cluster_name: Option<String>,
  customer_tags: TagSet,
  cancel: Option<CancellationToken>,
}

impl ClusterScopeBuilder {
  pub fn role_arn(mut self, arn: impl Into<String>) -> Self {
    self.role_arn = Some(arn.into());
    self
  }

  pub fn region(mut self, region: impl Into<String>) -> Self {
    self.region = Some(region.into());
    self
  }

  pub fn release_version(mut self, version: Option<Version>) -> Self {
    self.release_version = version;
    self
  }

  pub fn migration_needed(mut self, value: bool) -> Self {
    self.migration_needed = value;
    self
  }

  pub fn keep_oidc_provider_on_delete(mut self, value: bool) -> Self {
    self.keep_oidc_provider_on_delete = value;
    self
  }

  pub fn pre_cloudfront_alias(mut self, value: bool) -> Self {
    self.pre_cloudfront_alias = value;
    self
  }

  pub fn installation_name(mut self, name: impl Into<String>) -> Self {
    self.installation_name = name.into();
    self
  }

  pub fn organization(mut self, org: Option<String>) -> Self {
    self.organization = org;
    self
  }

  pub fn base_domain(mut self, domain: Option<String>) -> Self {
    self.base_domain = domain.filter(|d| !d.is_empty());
    self
  }

  pub fn eks_cluster_name(mut self, name: impl Into<String>) -> Self {
    self.eks_cluster_name = Some(name.into());
    self
  }

  pub fn customer_tags(mut self, tags: TagSet) -> Self {
    self.customer_tags = tags;
    self
  }

  pub fn cancellation(mut self, token: CancellationToken) -> Self {
    self.cancel = Some(token);
    self
  }

  /// Validate the inputs and derive identifiers.
  pub fn build(self, cache: &Cache) -> Result<ClusterScope> {
    let flavor = self
      .flavor
      .ok_or_else(|| Error::validation("cluster flavor is required"))?;
    if self.name.is_empty() || self.namespace.is_empty() {
      return Err(Error::validation("cluster name and namespace are required"));
    }
    let role_arn = self
      .role_arn
      .filter(|arn| !arn.is_empty())
      .ok_or_else(|| Error::validation(format!("cluster {}/{} has no role arn", self.namespace, self.name)))?;
    let region = self
      .region
      .filter(|r| !r.is_empty())
      .ok_or_else(|| Error::validation(format!("cluster {}/{} has no region", self.namespace, self.name)))?;
    if self.installation_name.is_empty() {
      return Err(Error::validation("installation name is required"));
    }
    let account_id = cache.account_id(&role_arn)?;

    let bucket_name = bucket_name(&account_id, &self.name);
    if flavor != Flavor::Eks && bucket_name.len() > MAX_BUCKET_NAME_LEN {
      return Err(Error::validation(format!(
        "bucket name {bucket_name} is longer than {MAX_BUCKET_NAME_LEN} characters"
      )));
    }

    let organization = self
      .organization
      .or_else(|| organization_from_namespace(&self.namespace).map(str::to_string));

    let mut scope = ClusterScope {
      flavor,
      account_id,
      role_arn,
      config_name: distribution_config_name(&self.name),
      secret_name: signing_secret_name(&self.name),
      bucket_name,
      region,
      release_version: self.release_version,
      migration_needed: self.migration_needed,
      keep_oidc_provider_on_delete: self.keep_oidc_provider_on_delete,
      pre_cloudfront_alias: self.pre_cloudfront_alias,
      installation_name: self.installation_name,
      organization,
      base_domain: self.base_domain,
      alias_domain: None,
      eks_cluster_name: self.eks_cluster_name,
      customer_tags: self.customer_tags,
      cache: cache.clone(),
      cancel: self.cancel.unwrap_or_default(),
      cluster_name: self.name,
      cluster_namespace: self.namespace,
    };
    if flavor == Flavor::Eks && scope.eks_cluster_name.is_none() {
      scope.eks_cluster_name = Some(format!("{}_{}", scope.cluster_namespace, scope.cluster_name));
    }
    scope.alias_domain = resolve_alias(&scope)?;
    Ok(scope)
  }
}

fn resolve_alias(scope: &ClusterScope) -> Result<Option<String>> {
  if !scope.cloudfront_enabled() {
    return Ok(None);
  }
  match scope.flavor {
    Flavor::Capa => Ok(scope.base_domain().map(|d| alias_domain(&scope.cluster_name, d))),
    Flavor::Legacy => {
      if !(scope.pre_cloudfront_alias || scope.release_at_least(ALIAS_MAJOR_RELEASE)) {
        return Ok(None);
      }
      let domain = scope
        .base_domain()
        .ok_or_else(|| Error::validation(format!("cluster {scope} needs a base domain for its alias")))?;
      Ok(Some(alias_domain(&scope.cluster_name, domain)))
    }
    Flavor::Eks => Ok(None),
  }
}
