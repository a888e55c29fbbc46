//! In-memory implementations of every capability, for tests.
//!
//! All doubles created by one [`MemoryCloud`] share a [`Journal`] that records
//! each call as `service:Operation target`, so tests can assert on ordering and
//! on which calls were (not) made. Failures are injected per operation name
//! with [`Faults::inject`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use super::{
  provider_arn, Cdn, Certificate, CertificateStatus, Certificates, CloudClients, CloudConnector, Distribution,
  DistributionSpec, DistributionState, Dns, DnsRecord, IdentityProviders, ManagedClusters, ObjectStore,
  OidcProvider,
};
use crate::diff::ViewerConfig;
use crate::discovery::host_of;
use crate::error::{Error, Result};
use crate::scope::ClusterScope;
use crate::tags::TagSet;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
  m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Ordered record of calls across all doubles.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
  fn record(&self, entry: String) {
    lock(&self.0).push(entry);
  }

  pub fn entries(&self) -> Vec<String> {
    lock(&self.0).clone()
  }

  pub fn clear(&self) {
    lock(&self.0).clear();
  }

  /// Number of entries for an operation, e.g. `s3:CreateBucket`.
  pub fn count(&self, operation: &str) -> usize {
    lock(&self.0).iter().filter(|e| Self::matches(e, operation)).count()
  }

  /// Index of the first entry for an operation.
  pub fn position(&self, operation: &str) -> Option<usize> {
    lock(&self.0).iter().position(|e| Self::matches(e, operation))
  }

  /// Index of the last entry for an operation.
  pub fn last_position(&self, operation: &str) -> Option<usize> {
    lock(&self.0).iter().rposition(|e| Self::matches(e, operation))
  }

  fn matches(entry: &str, operation: &str) -> bool {
    entry == operation || entry.starts_with(&format!("{operation} "))
  }
}

/// Injected failures, keyed by operation name.
#[derive(Debug, Clone, Default)]
pub struct Faults(Arc<Mutex<HashMap<String, (u32, String)>>>);

impl Faults {
  /// Fail the next `times` calls of `operation` with AWS error `code`.
  pub fn inject(&self, operation: &str, times: u32, code: &str) {
    lock(&self.0).insert(operation.to_string(), (times, code.to_string()));
  }

  pub fn clear(&self) {
    lock(&self.0).clear();
  }

  pub(crate) fn check(&self, operation: &'static str) -> Result<()> {
    let mut faults = lock(&self.0);
    if let Some((remaining, code)) = faults.get_mut(operation) {
      if *remaining > 0 {
        *remaining -= 1;
        return Err(Error::aws(operation, Some(code.as_str()), "injected failure"));
      }
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Default)]
struct Ledger {
  journal: Journal,
  faults: Faults,
}

impl Ledger {
  fn call(&self, operation: &'static str, target: &str) -> Result<()> {
    self.journal.record(format!("{operation} {target}"));
    self.faults.check(operation)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketState {
  pub region: String,
  pub objects: BTreeMap<String, Vec<u8>>,
  pub tags: TagSet,
  pub encrypted: bool,
  pub policy: Option<String>,
  pub public_access_blocked: bool,
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
  ledger: Ledger,
  buckets: Mutex<BTreeMap<String, BucketState>>,
}

impl MemoryObjectStore {
  pub fn bucket(&self, name: &str) -> Option<BucketState> {
    lock(&self.buckets).get(name).cloned()
  }

  pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
    lock(&self.buckets).get(bucket).and_then(|b| b.objects.get(key).cloned())
  }

  fn with_bucket<T>(
    &self,
    operation: &'static str,
    bucket: &str,
    f: impl FnOnce(&mut BucketState) -> T,
  ) -> Result<T> {
    let mut buckets = lock(&self.buckets);
    let state = buckets
      .get_mut(bucket)
      .ok_or_else(|| Error::aws(operation, Some("NoSuchBucket"), format!("bucket {bucket} does not exist")))?;
    Ok(f(state))
  }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
  async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
    self.ledger.call("s3:HeadBucket", bucket)?;
    Ok(lock(&self.buckets).contains_key(bucket))
  }

  async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
    self.ledger.call("s3:CreateBucket", bucket)?;
    lock(&self.buckets).entry(bucket.to_string()).or_insert_with(|| BucketState {
      region: region.to_string(),
      ..BucketState::default()
    });
    Ok(())
  }

  async fn encrypt_bucket(&self, bucket: &str) -> Result<()> {
    self.ledger.call("s3:PutBucketEncryption", bucket)?;
    self.with_bucket("s3:PutBucketEncryption", bucket, |b| b.encrypted = true)
  }

  async fn put_bucket_tags(&self, bucket: &str, tags: &TagSet) -> Result<()> {
    self.ledger.call("s3:PutBucketTagging", bucket)?;
    self.with_bucket("s3:PutBucketTagging", bucket, |b| b.tags = tags.clone())
  }

  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, _content_type: &str) -> Result<()> {
    self.ledger.call("s3:PutObject", &format!("{bucket}/{key}"))?;
    self.with_bucket("s3:PutObject", bucket, |b| {
      b.objects.insert(key.to_string(), body);
    })
  }

  async fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
    self.ledger.call("s3:ListObjectsV2", bucket)?;
    Ok(
      lock(&self.buckets)
        .get(bucket)
        .map(|b| b.objects.keys().cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
    self.ledger.call("s3:DeleteObject", &format!("{bucket}/{key}"))?;
    if let Some(b) = lock(&self.buckets).get_mut(bucket) {
      b.objects.remove(key);
    }
    Ok(())
  }

  async fn delete_bucket(&self, bucket: &str) -> Result<()> {
    self.ledger.call("s3:DeleteBucket", bucket)?;
    let mut buckets = lock(&self.buckets);
    if buckets.get(bucket).is_some_and(|b| !b.objects.is_empty()) {
      return Err(Error::aws("s3:DeleteBucket", Some("BucketNotEmpty"), "bucket is not empty"));
    }
    buckets.remove(bucket);
    Ok(())
  }

  async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()> {
    self.ledger.call("s3:PutBucketPolicy", bucket)?;
    self.with_bucket("s3:PutBucketPolicy", bucket, |b| b.policy = Some(policy.to_string()))
  }

  async fn block_public_access(&self, bucket: &str) -> Result<()> {
    self.ledger.call("s3:PutPublicAccessBlock", bucket)?;
    self.with_bucket("s3:PutPublicAccessBlock", bucket, |b| b.public_access_blocked = true)
  }

  async fn allow_public_access(&self, bucket: &str) -> Result<()> {
    self.ledger.call("s3:DeletePublicAccessBlock", bucket)?;
    self.with_bucket("s3:DeletePublicAccessBlock", bucket, |b| b.public_access_blocked = false)
  }
}

#[derive(Debug, Default)]
pub struct MemoryIdentityProviders {
  ledger: Ledger,
  partition: String,
  account_id: String,
  providers: Mutex<BTreeMap<String, OidcProvider>>,
}

impl MemoryIdentityProviders {
  pub fn providers(&self) -> Vec<OidcProvider> {
    lock(&self.providers).values().cloned().collect()
  }

  pub fn provider(&self, arn: &str) -> Option<OidcProvider> {
    lock(&self.providers).get(arn).cloned()
  }

  /// Add tags behind the operator's back.
  pub fn tag_externally(&self, arn: &str, key: &str, value: &str) {
    if let Some(p) = lock(&self.providers).get_mut(arn) {
      p.tags.insert(key, value);
    }
  }
}

#[async_trait]
impl IdentityProviders for MemoryIdentityProviders {
  async fn get_provider(&self, arn: &str) -> Result<Option<OidcProvider>> {
    self.ledger.call("iam:GetOpenIDConnectProvider", arn)?;
    Ok(lock(&self.providers).get(arn).cloned())
  }

  async fn create_provider(&self, url: &str, client_id: &str, thumbprint: &str, tags: &TagSet) -> Result<String> {
    self.ledger.call("iam:CreateOpenIDConnectProvider", url)?;
    let issuer = url.strip_prefix("https://").unwrap_or(url);
    let arn = provider_arn(&self.partition, &self.account_id, issuer);
    lock(&self.providers).entry(arn.clone()).or_insert_with(|| OidcProvider {
      arn: arn.clone(),
      url: url.to_string(),
      client_ids: vec![client_id.to_string()],
      thumbprints: vec![thumbprint.to_string()],
      tags: tags.clone(),
    });
    Ok(arn)
  }

  async fn update_thumbprints(&self, arn: &str, thumbprints: &[String]) -> Result<()> {
    self.ledger.call("iam:UpdateOpenIDConnectProviderThumbprint", arn)?;
    let mut providers = lock(&self.providers);
    let p = providers
      .get_mut(arn)
      .ok_or_else(|| Error::aws("iam:UpdateOpenIDConnectProviderThumbprint", Some("NoSuchEntity"), arn))?;
    p.thumbprints = thumbprints.to_vec();
    Ok(())
  }

  async fn tag_provider(&self, arn: &str, tags: &TagSet) -> Result<()> {
    self.ledger.call("iam:TagOpenIDConnectProvider", arn)?;
    let mut providers = lock(&self.providers);
    let p = providers
      .get_mut(arn)
      .ok_or_else(|| Error::aws("iam:TagOpenIDConnectProvider", Some("NoSuchEntity"), arn))?;
    p.tags = p.tags.merged(tags);
    Ok(())
  }

  async fn untag_provider(&self, arn: &str, keys: &[String]) -> Result<()> {
    self.ledger.call("iam:UntagOpenIDConnectProvider", arn)?;
    if let Some(p) = lock(&self.providers).get_mut(arn) {
      for key in keys {
        p.tags.remove(key);
      }
    }
    Ok(())
  }

  async fn delete_provider(&self, arn: &str) -> Result<()> {
    self.ledger.call("iam:DeleteOpenIDConnectProvider", arn)?;
    lock(&self.providers).remove(arn);
    Ok(())
  }
}

#[derive(Debug, Clone)]
pub struct DistributionRecordState {
  pub distribution: Distribution,
  pub caller_reference: String,
  pub comment: String,
  pub origin_access_identity_id: String,
  pub enabled: bool,
  /// Delete attempts still rejected after disabling, simulating propagation
  pub pending_deploys: u32,
  pub viewer: ViewerConfig,
  pub tags: TagSet,
}

#[derive(Debug, Default)]
pub struct MemoryCdn {
  ledger: Ledger,
  account_id: String,
  next_id: Mutex<u32>,
  /// Propagation delay applied to every disable
  disable_propagation: Mutex<u32>,
  identities: Mutex<BTreeMap<String, String>>,
  distributions: Mutex<BTreeMap<String, DistributionRecordState>>,
}

impl MemoryCdn {
  pub fn distributions(&self) -> Vec<DistributionRecordState> {
    lock(&self.distributions).values().cloned().collect()
  }

  pub fn distribution(&self, id: &str) -> Option<DistributionRecordState> {
    lock(&self.distributions).get(id).cloned()
  }

  pub fn origin_access_identities(&self) -> Vec<String> {
    lock(&self.identities).keys().cloned().collect()
  }

  /// Reject this many delete attempts after each disable.
  pub fn set_disable_propagation(&self, attempts: u32) {
    *lock(&self.disable_propagation) = attempts;
  }

  fn next_id(&self, prefix: &str) -> String {
    let mut next = lock(&self.next_id);
    *next += 1;
    format!("{prefix}{:07}", *next)
  }
}

#[async_trait]
impl Cdn for MemoryCdn {
  async fn create_origin_access_identity(&self, caller_reference: &str, _comment: &str) -> Result<String> {
    self.ledger.call("cloudfront:CreateCloudFrontOriginAccessIdentity", caller_reference)?;
    if let Some((id, _)) = lock(&self.identities).iter().find(|(_, r)| *r == caller_reference) {
      return Ok(id.clone());
    }
    let id = self.next_id("EOAI");
    lock(&self.identities).insert(id.clone(), caller_reference.to_string());
    Ok(id)
  }

  async fn delete_origin_access_identity(&self, id: &str) -> Result<()> {
    self.ledger.call("cloudfront:DeleteCloudFrontOriginAccessIdentity", id)?;
    if lock(&self.distributions).values().any(|d| d.origin_access_identity_id == id) {
      return Err(Error::aws(
        "cloudfront:DeleteCloudFrontOriginAccessIdentity",
        Some("CloudFrontOriginAccessIdentityInUse"),
        id,
      ));
    }
    lock(&self.identities).remove(id);
    Ok(())
  }

  async fn create_distribution(&self, spec: &DistributionSpec) -> Result<Distribution> {
    self.ledger.call("cloudfront:CreateDistributionWithTags", &spec.caller_reference)?;
    let mut distributions = lock(&self.distributions);
    if distributions.values().any(|d| d.caller_reference == spec.caller_reference) {
      return Err(Error::aws(
        "cloudfront:CreateDistributionWithTags",
        Some("DistributionAlreadyExists"),
        format!("caller reference {} is taken", spec.caller_reference),
      ));
    }
    let id = self.next_id("E");
    let distribution = Distribution {
      arn: format!("arn:aws:cloudfront::{}:distribution/{id}", self.account_id),
      domain: format!("{}.cloudfront.net", id.to_lowercase()),
      id: id.clone(),
    };
    distributions.insert(
      id,
      DistributionRecordState {
        distribution: distribution.clone(),
        caller_reference: spec.caller_reference.clone(),
        comment: spec.comment.clone(),
        origin_access_identity_id: spec.origin_access_identity_id.clone(),
        enabled: true,
        pending_deploys: 0,
        viewer: spec.viewer.clone(),
        tags: spec.tags.clone(),
      },
    );
    Ok(distribution)
  }

  async fn find_distribution(&self, comment: &str) -> Result<Option<Distribution>> {
    self.ledger.call("cloudfront:ListDistributions", comment)?;
    Ok(
      lock(&self.distributions)
        .values()
        .find(|d| d.comment == comment)
        .map(|d| d.distribution.clone()),
    )
  }

  async fn get_distribution(&self, id: &str) -> Result<Option<DistributionState>> {
    self.ledger.call("cloudfront:GetDistribution", id)?;
    Ok(lock(&self.distributions).get(id).map(|d| DistributionState {
      distribution: d.distribution.clone(),
      enabled: d.enabled,
      deployed: d.pending_deploys == 0,
      viewer: d.viewer.clone(),
    }))
  }

  async fn update_viewer(&self, id: &str, viewer: &ViewerConfig) -> Result<()> {
    self.ledger.call("cloudfront:UpdateDistribution", id)?;
    let mut distributions = lock(&self.distributions);
    let d = distributions
      .get_mut(id)
      .ok_or_else(|| Error::aws("cloudfront:UpdateDistribution", Some("NoSuchDistribution"), id))?;
    d.viewer = viewer.clone();
    Ok(())
  }

  async fn disable_distribution(&self, id: &str) -> Result<()> {
    self.ledger.call("cloudfront:UpdateDistribution(disable)", id)?;
    let propagation = *lock(&self.disable_propagation);
    if let Some(d) = lock(&self.distributions).get_mut(id) {
      if d.enabled {
        d.enabled = false;
        d.pending_deploys = propagation;
      }
    }
    Ok(())
  }

  async fn delete_distribution(&self, id: &str) -> Result<()> {
    self.ledger.call("cloudfront:DeleteDistribution", id)?;
    let mut distributions = lock(&self.distributions);
    let Some(d) = distributions.get_mut(id) else {
      return Ok(());
    };
    if d.enabled {
      return Err(Error::not_ready(format!("distribution {id}"), "distribution is still enabled"));
    }
    if d.pending_deploys > 0 {
      d.pending_deploys -= 1;
      return Err(Error::not_ready(format!("distribution {id}"), "disable is still propagating"));
    }
    distributions.remove(id);
    Ok(())
  }

  async fn list_tags(&self, arn: &str) -> Result<TagSet> {
    self.ledger.call("cloudfront:ListTagsForResource", arn)?;
    Ok(
      lock(&self.distributions)
        .values()
        .find(|d| d.distribution.arn == arn)
        .map(|d| d.tags.clone())
        .unwrap_or_default(),
    )
  }

  async fn tag_resource(&self, arn: &str, tags: &TagSet) -> Result<()> {
    self.ledger.call("cloudfront:TagResource", arn)?;
    if let Some(d) = lock(&self.distributions).values_mut().find(|d| d.distribution.arn == arn) {
      d.tags = d.tags.merged(tags);
    }
    Ok(())
  }

  async fn untag_resource(&self, arn: &str, keys: &[String]) -> Result<()> {
    self.ledger.call("cloudfront:UntagResource", arn)?;
    if let Some(d) = lock(&self.distributions).values_mut().find(|d| d.distribution.arn == arn) {
      for key in keys {
        d.tags.remove(key);
      }
    }
    Ok(())
  }
}

#[derive(Debug, Default)]
pub struct MemoryCertificates {
  ledger: Ledger,
  /// Issue certificates as soon as they are requested
  issue_immediately: Mutex<bool>,
  certificates: Mutex<BTreeMap<String, (String, CertificateStatus)>>,
}

impl MemoryCertificates {
  pub fn set_issue_immediately(&self, value: bool) {
    *lock(&self.issue_immediately) = value;
  }

  pub fn set_status(&self, arn: &str, status: CertificateStatus) {
    if let Some(cert) = lock(&self.certificates).get_mut(arn) {
      cert.1 = status;
    }
  }

  pub fn certificates(&self) -> Vec<(String, String)> {
    lock(&self.certificates)
      .iter()
      .map(|(arn, (domain, _))| (arn.clone(), domain.clone()))
      .collect()
  }

  fn validation_record(domain: &str) -> DnsRecord {
    DnsRecord {
      name: format!("_3639ac514e785e898d2646601fa951d5.{domain}."),
      value: "_98d2646601fa951d53639ac514e785e8.acm-validations.aws.".to_string(),
    }
  }
}

#[async_trait]
impl Certificates for MemoryCertificates {
  async fn find_certificate(&self, domain: &str) -> Result<Option<String>> {
    self.ledger.call("acm:ListCertificates", domain)?;
    Ok(
      lock(&self.certificates)
        .iter()
        .find(|(_, (d, _))| d == domain)
        .map(|(arn, _)| arn.clone()),
    )
  }

  async fn request_certificate(&self, domain: &str, _tags: &TagSet) -> Result<String> {
    self.ledger.call("acm:RequestCertificate", domain)?;
    let mut certificates = lock(&self.certificates);
    let arn = format!("arn:aws:acm:us-east-1:000000000000:certificate/{}", certificates.len() + 1);
    let status = if *lock(&self.issue_immediately) {
      CertificateStatus::Issued
    } else {
      CertificateStatus::PendingValidation
    };
    certificates.insert(arn.clone(), (domain.to_string(), status));
    Ok(arn)
  }

  async fn describe_certificate(&self, arn: &str) -> Result<Certificate> {
    self.ledger.call("acm:DescribeCertificate", arn)?;
    let certificates = lock(&self.certificates);
    let (domain, status) = certificates
      .get(arn)
      .ok_or_else(|| Error::aws("acm:DescribeCertificate", Some("ResourceNotFoundException"), arn))?;
    Ok(Certificate {
      arn: arn.to_string(),
      status: status.clone(),
      validation: Some(Self::validation_record(domain)),
    })
  }

  async fn delete_certificate(&self, arn: &str) -> Result<()> {
    self.ledger.call("acm:DeleteCertificate", arn)?;
    lock(&self.certificates).remove(arn);
    Ok(())
  }
}

#[derive(Debug, Default)]
pub struct MemoryDns {
  ledger: Ledger,
  zones: Mutex<BTreeMap<String, String>>,
  records: Mutex<BTreeMap<(String, String), String>>,
}

impl MemoryDns {
  pub fn add_zone(&self, id: &str, domain: &str) {
    lock(&self.zones).insert(id.to_string(), domain.trim_end_matches('.').to_string());
  }

  pub fn record(&self, zone_id: &str, name: &str) -> Option<String> {
    lock(&self.records).get(&(zone_id.to_string(), name.to_string())).cloned()
  }

  fn known_zone(&self, operation: &'static str, zone_id: &str) -> Result<()> {
    if lock(&self.zones).contains_key(zone_id) {
      return Ok(());
    }
    Err(Error::aws(operation, Some("NoSuchHostedZone"), format!("no hosted zone {zone_id}")))
  }

  pub fn records(&self) -> Vec<(String, String, String)> {
    lock(&self.records)
      .iter()
      .map(|((zone, name), value)| (zone.clone(), name.clone(), value.clone()))
      .collect()
  }
}

#[async_trait]
impl Dns for MemoryDns {
  async fn find_hosted_zone(&self, domain: &str) -> Result<Option<String>> {
    self.ledger.call("route53:ListHostedZonesByName", domain)?;
    let domain = domain.trim_end_matches('.');
    Ok(
      lock(&self.zones)
        .iter()
        .filter(|(_, zone)| domain == zone.as_str() || domain.ends_with(&format!(".{zone}")))
        .max_by_key(|(_, zone)| zone.len())
        .map(|(id, _)| id.clone()),
    )
  }

  async fn upsert_cname(&self, zone_id: &str, record: &DnsRecord) -> Result<()> {
    const OP: &str = "route53:ChangeResourceRecordSets(UPSERT)";
    self.ledger.call(OP, &record.name)?;
    self.known_zone(OP, zone_id)?;
    lock(&self.records).insert((zone_id.to_string(), record.name.clone()), record.value.clone());
    Ok(())
  }

  async fn delete_cname(&self, zone_id: &str, record: &DnsRecord) -> Result<()> {
    const OP: &str = "route53:ChangeResourceRecordSets(DELETE)";
    self.ledger.call(OP, &record.name)?;
    self.known_zone(OP, zone_id)?;
    lock(&self.records).remove(&(zone_id.to_string(), record.name.clone()));
    Ok(())
  }
}

#[derive(Debug, Default)]
pub struct MemoryManagedClusters {
  ledger: Ledger,
  issuers: Mutex<BTreeMap<String, String>>,
}

impl MemoryManagedClusters {
  pub fn set_issuer(&self, cluster: &str, issuer: &str) {
    lock(&self.issuers).insert(cluster.to_string(), issuer.to_string());
  }
}

#[async_trait]
impl ManagedClusters for MemoryManagedClusters {
  async fn oidc_issuer(&self, cluster_name: &str) -> Result<String> {
    self.ledger.call("eks:DescribeCluster", cluster_name)?;
    lock(&self.issuers)
      .get(cluster_name)
      .cloned()
      .ok_or_else(|| Error::aws("eks:DescribeCluster", Some("ResourceNotFoundException"), cluster_name))
  }
}

/// One fake AWS account holding every double.
#[derive(Debug, Clone)]
pub struct MemoryCloud {
  pub journal: Journal,
  pub faults: Faults,
  pub objects: Arc<MemoryObjectStore>,
  pub identity: Arc<MemoryIdentityProviders>,
  pub cdn: Arc<MemoryCdn>,
  pub certificates: Arc<MemoryCertificates>,
  pub dns: Arc<MemoryDns>,
  pub managed: Arc<MemoryManagedClusters>,
}

impl MemoryCloud {
  pub fn new(account_id: &str) -> Self {
    Self::with_partition(account_id, "aws")
  }

  /// Account in a specific partition, so provider ARNs match the scope's.
  pub fn with_partition(account_id: &str, partition: &str) -> Self {
    let ledger = Ledger::default();
    let certificates = MemoryCertificates {
      ledger: ledger.clone(),
      ..MemoryCertificates::default()
    };
    certificates.set_issue_immediately(true);
    Self {
      journal: ledger.journal.clone(),
      faults: ledger.faults.clone(),
      objects: Arc::new(MemoryObjectStore {
        ledger: ledger.clone(),
        ..MemoryObjectStore::default()
      }),
      identity: Arc::new(MemoryIdentityProviders {
        ledger: ledger.clone(),
        partition: partition.to_string(),
        account_id: account_id.to_string(),
        ..MemoryIdentityProviders::default()
      }),
      cdn: Arc::new(MemoryCdn {
        ledger: ledger.clone(),
        account_id: account_id.to_string(),
        ..MemoryCdn::default()
      }),
      certificates: Arc::new(certificates),
      dns: Arc::new(MemoryDns {
        ledger: ledger.clone(),
        ..MemoryDns::default()
      }),
      managed: Arc::new(MemoryManagedClusters {
        ledger,
        ..MemoryManagedClusters::default()
      }),
    }
  }

  pub fn clients(&self) -> CloudClients {
    CloudClients {
      objects: self.objects.clone(),
      identity: self.identity.clone(),
      cdn: self.cdn.clone(),
      certificates: self.certificates.clone(),
      dns: self.dns.clone(),
      managed: self.managed.clone(),
    }
  }

  /// Provider registered for an issuer host, if any.
  pub fn provider_for(&self, issuer_host: &str) -> Option<OidcProvider> {
    self
      .identity
      .providers()
      .into_iter()
      .find(|p| p.url.strip_prefix("https://").unwrap_or(&p.url) == issuer_host)
  }

  /// Whether any provider is registered against `host`.
  pub fn has_provider_on_host(&self, host: &str) -> bool {
    self.identity.providers().iter().any(|p| host_of(&p.url) == host)
  }
}

#[async_trait]
impl CloudConnector for MemoryCloud {
  async fn connect(&self, _scope: &ClusterScope) -> Result<CloudClients> {
    Ok(self.clients())
  }
}
