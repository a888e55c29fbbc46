//! CloudFront distribution, its tags, and the optional alias in front of it.

use log::{debug, info};

use super::Run;
use crate::cloud::{CertificateStatus, DistributionSpec, DnsRecord};
use crate::diff::{distribution_needs_update, tag_diff, ViewerConfig};
use crate::error::{Error, Result, ResultExt};
use crate::scope::endpoint_suffix;
use crate::state::DistributionRecord;

const DISTRIBUTION_ALREADY_EXISTS: &str = "DistributionAlreadyExists";
const STALE_ZONE_CODES: &[&str] = &["NoSuchHostedZone", "AccessDenied"];

impl Run<'_> {
  /// Reuse the recorded distribution or create one with its origin access
  /// identity, then converge its tags.
  pub(super) async fn ensure_distribution(&self) -> Result<DistributionRecord> {
    let scope = self.scope;
    let (namespace, name) = (scope.cluster_namespace(), scope.config_name());

    let record = match self
      .state()
      .load_distribution(namespace, name)
      .await
      .context(self.ctx(format!("load configmap {name}")))?
    {
      Some(record) => {
        debug!("{scope}: reusing distribution {}", record.distribution_id);
        record
      }
      None => {
        let record = self.create_distribution().await?;
        scope.ensure_active()?;
        self
          .state()
          .store_distribution(namespace, name, &record)
          .await
          .context(self.ctx(format!("store configmap {name}")))?;
        record
      }
    };

    self.converge_distribution_tags(&record).await?;
    Ok(record)
  }

  async fn create_distribution(&self) -> Result<DistributionRecord> {
    let scope = self.scope;
    let bucket = scope.bucket_name();
    let cdn = &self.clients.cdn;
    let comment = format!("IRSA discovery for {scope}");

    scope.ensure_active()?;
    let origin_access_identity_id = cdn
      .create_origin_access_identity(bucket, &comment)
      .await
      .context(self.ctx("create origin access identity"))?;

    let spec = DistributionSpec {
      caller_reference: bucket.to_string(),
      comment,
      origin_domain: format!("{bucket}.s3.{}.{}", scope.region(), endpoint_suffix(scope.region())),
      origin_access_identity_id: origin_access_identity_id.clone(),
      viewer: ViewerConfig::default(),
      tags: scope.desired_tags(),
    };
    scope.ensure_active()?;
    let distribution = match cdn.create_distribution(&spec).await {
      Ok(distribution) => {
        info!(
          "{scope}: created distribution {} ({}) with origin access identity {origin_access_identity_id}",
          distribution.id, distribution.domain
        );
        distribution
      }
      // created by a run that stopped before recording it
      Err(e) if e.aws_code() == Some(DISTRIBUTION_ALREADY_EXISTS) => {
        let found = cdn
          .find_distribution(&spec.comment)
          .await
          .context(self.ctx("find distribution"))?
          .ok_or_else(|| e.context(self.ctx("create distribution")))?;
        info!("{scope}: adopted existing distribution {} ({})", found.id, found.domain);
        found
      }
      Err(e) => return Err(e.context(self.ctx("create distribution"))),
    };

    Ok(DistributionRecord {
      arn: distribution.arn,
      domain: distribution.domain,
      distribution_id: distribution.id,
      origin_access_identity_id,
    })
  }

  async fn converge_distribution_tags(&self, record: &DistributionRecord) -> Result<()> {
    let scope = self.scope;
    let cdn = &self.clients.cdn;
    let live = cdn
      .list_tags(&record.arn)
      .await
      .context(self.ctx(format!("list tags of {}", record.distribution_id)))?;
    let diff = tag_diff(&live, &scope.desired_tags());
    if diff.is_empty() {
      return Ok(());
    }
    if !diff.to_add.is_empty() {
      scope.ensure_active()?;
      cdn
        .tag_resource(&record.arn, &diff.to_add)
        .await
        .context(self.ctx(format!("tag distribution {}", record.distribution_id)))?;
    }
    if !diff.to_remove.is_empty() {
      scope.ensure_active()?;
      cdn
        .untag_resource(&record.arn, &diff.to_remove)
        .await
        .context(self.ctx(format!("untag distribution {}", record.distribution_id)))?;
    }
    debug!("{scope}: converged tags of distribution {}", record.distribution_id);
    Ok(())
  }

  /// Certificate, DNS records and viewer settings for `alias`.
  ///
  /// A certificate still waiting for DNS validation is reported as not ready;
  /// the distribution only gets the alias once the certificate is issued.
  pub(super) async fn ensure_alias(&self, record: &DistributionRecord, alias: &str) -> Result<()> {
    let scope = self.scope;
    if self.hosted_zone().await?.is_none() {
      return Err(self.no_hosted_zone());
    }
    let certificates = &self.clients.certificates;

    let certificate_arn = match certificates
      .find_certificate(alias)
      .await
      .context(self.ctx(format!("find certificate for {alias}")))?
    {
      Some(arn) => arn,
      None => {
        scope.ensure_active()?;
        let arn = certificates
          .request_certificate(alias, &scope.desired_tags())
          .await
          .context(self.ctx(format!("request certificate for {alias}")))?;
        info!("{scope}: requested certificate {arn} for {alias}");
        arn
      }
    };
    let certificate = certificates
      .describe_certificate(&certificate_arn)
      .await
      .context(self.ctx(format!("describe certificate {certificate_arn}")))?;

    let mut records: Vec<DnsRecord> = certificate.validation.iter().cloned().collect();
    records.push(alias_record(alias, record));
    if !self.change_records(RecordChange::Upsert, &records).await? {
      return Err(self.no_hosted_zone());
    }

    match certificate.status {
      CertificateStatus::Issued => {}
      CertificateStatus::PendingValidation => {
        return Err(Error::not_ready(
          format!("certificate {certificate_arn}"),
          "waiting for dns validation",
        ))
      }
      CertificateStatus::Failed(reason) => {
        return Err(Error::validation(format!(
          "{scope}: certificate {certificate_arn} for {alias} failed: {reason}"
        )))
      }
    }

    let live = self
      .clients
      .cdn
      .get_distribution(&record.distribution_id)
      .await
      .context(self.ctx(format!("get distribution {}", record.distribution_id)))?
      .ok_or_else(|| {
        Error::partial_state(
          scope.config_name(),
          format!("distribution {} no longer exists", record.distribution_id),
        )
      })?;
    let desired = ViewerConfig::new(vec![alias.to_string()], Some(certificate_arn));
    if distribution_needs_update(&live.viewer, &desired) {
      scope.ensure_active()?;
      self
        .clients
        .cdn
        .update_viewer(&record.distribution_id, &desired)
        .await
        .context(self.ctx(format!("update distribution {}", record.distribution_id)))?;
      info!("{scope}: distribution {} now serves {alias}", record.distribution_id);
    }
    Ok(())
  }

  fn no_hosted_zone(&self) -> Error {
    Error::validation(format!(
      "{}: no hosted zone serves {}",
      self.scope,
      self.scope.base_domain().unwrap_or_default()
    ))
  }

  /// Zone ids differ per account even for the same base domain.
  fn hosted_zone_key(&self, base: &str) -> String {
    format!("hosted-zone/{}/{base}", self.scope.account_id())
  }

  /// Zone serving the base domain, cached per account and domain.
  pub(super) async fn hosted_zone(&self) -> Result<Option<HostedZone>> {
    let scope = self.scope;
    let Some(base) = scope.base_domain() else {
      return Ok(None);
    };
    let key = self.hosted_zone_key(base);
    if let Some(id) = scope.cache().get(&key) {
      return Ok(Some(HostedZone { id, cached: true }));
    }
    let zone = self
      .clients
      .dns
      .find_hosted_zone(base)
      .await
      .context(self.ctx(format!("find hosted zone for {base}")))?;
    Ok(zone.map(|id| {
      scope.cache().insert(key, id.clone());
      HostedZone { id, cached: false }
    }))
  }

  fn forget_hosted_zone(&self) {
    if let Some(base) = self.scope.base_domain() {
      self.scope.cache().remove(&self.hosted_zone_key(base));
    }
  }

  /// Apply `records` in the zone serving the base domain. A cached zone id
  /// the account rejects is dropped and resolved once more. Returns false
  /// when no zone serves the base domain.
  pub(super) async fn change_records(&self, change: RecordChange, records: &[DnsRecord]) -> Result<bool> {
    let Some(zone) = self.hosted_zone().await? else {
      return Ok(false);
    };
    match self.apply_records(&zone.id, change, records).await {
      Err(e) if is_stale_zone(&e) => {
        self.forget_hosted_zone();
        if !zone.cached {
          return Err(e);
        }
        debug!("{}: cached hosted zone {} rejected, looking it up again: {e}", self.scope, zone.id);
        let Some(zone) = self.hosted_zone().await? else {
          return Ok(false);
        };
        self.apply_records(&zone.id, change, records).await?;
        Ok(true)
      }
      other => other.map(|()| true),
    }
  }

  async fn apply_records(&self, zone_id: &str, change: RecordChange, records: &[DnsRecord]) -> Result<()> {
    let dns = &self.clients.dns;
    for record in records {
      self.scope.ensure_active()?;
      match change {
        RecordChange::Upsert => dns
          .upsert_cname(zone_id, record)
          .await
          .context(self.ctx(format!("upsert record {} in {zone_id}", record.name)))?,
        RecordChange::Delete => dns
          .delete_cname(zone_id, record)
          .await
          .context(self.ctx(format!("delete record {} in {zone_id}", record.name)))?,
      }
    }
    Ok(())
  }
}

pub(super) struct HostedZone {
  id: String,
  /// Taken from the cache rather than looked up in this run
  cached: bool,
}

#[derive(Debug, Clone, Copy)]
pub(super) enum RecordChange {
  Upsert,
  Delete,
}

/// The account does not know the zone id, or no longer lets us use it.
fn is_stale_zone(err: &Error) -> bool {
  err.aws_code().is_some_and(|code| STALE_ZONE_CODES.contains(&code))
}

pub(super) fn alias_record(alias: &str, record: &DistributionRecord) -> DnsRecord {
  DnsRecord {
    name: alias.to_string(),
    value: record.domain.clone(),
  }
}
