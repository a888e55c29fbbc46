//! Ordered teardown of a cluster's footprint.
//!
//! The plan is a pure function of what the cluster may own. Each step
//! tolerates its resource being absent already, which is what makes it safe
//! to restart the whole plan after a crash.

use log::{debug, info};

use super::cloudfront::{alias_record, RecordChange};
use super::Run;
use crate::discovery::candidate_issuer_hosts;
use crate::error::{Error, Result, ResultExt};
use crate::retry::retry_with_backoff;
use crate::scope::Flavor;
use crate::state::DistributionRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownStep {
  DeleteObjects,
  DeleteBucket,
  DeleteProvider,
  DisableDistribution,
  DeleteDistribution,
  DeleteOriginAccessIdentity,
  DeleteAliasRecords,
  DeleteCertificate,
  DeleteDistributionRecord,
  /// Managed control planes only: drop our tags, keep the provider
  UntagProvider,
}

/// Steps to run, in order. Finalizer removal is left to the caller.
pub fn teardown_plan(
  flavor: Flavor,
  keep_oidc_provider: bool,
  has_distribution: bool,
  has_alias: bool,
) -> Vec<TeardownStep> {
  use TeardownStep::*;

  if flavor == Flavor::Eks {
    return if keep_oidc_provider { vec![] } else { vec![UntagProvider] };
  }

  let mut plan = vec![DeleteObjects, DeleteBucket];
  if keep_oidc_provider {
    return plan;
  }
  plan.push(DeleteProvider);
  if has_distribution {
    plan.extend([DisableDistribution, DeleteDistribution, DeleteOriginAccessIdentity]);
  }
  if has_alias {
    plan.extend([DeleteAliasRecords, DeleteCertificate]);
  }
  if has_distribution {
    plan.push(DeleteDistributionRecord);
  }
  plan
}

impl Run<'_> {
  pub(super) async fn teardown(&self) -> Result<()> {
    let scope = self.scope;
    let record = match scope.flavor() {
      Flavor::Eks => None,
      Flavor::Legacy | Flavor::Capa => self
        .state()
        .load_distribution(scope.cluster_namespace(), scope.config_name())
        .await
        .context(self.ctx(format!("load configmap {}", scope.config_name())))?,
    };

    let plan = teardown_plan(
      scope.flavor(),
      scope.keep_oidc_provider_on_delete(),
      record.is_some(),
      scope.alias_domain().is_some(),
    );
    debug!("{scope}: teardown plan {plan:?}");
    for step in plan {
      self.run_step(step, record.as_ref()).await?;
    }
    info!("{scope}: teardown finished");
    Ok(())
  }

  async fn run_step(&self, step: TeardownStep, record: Option<&DistributionRecord>) -> Result<()> {
    let scope = self.scope;
    let bucket = scope.bucket_name();
    let objects = &self.clients.objects;
    let cdn = &self.clients.cdn;

    match step {
      TeardownStep::DeleteObjects => {
        let keys = objects
          .list_objects(bucket)
          .await
          .context(self.ctx(format!("list objects in {bucket}")))?;
        for key in keys {
          scope.ensure_active()?;
          objects
            .delete_object(bucket, &key)
            .await
            .context(self.ctx(format!("delete object {bucket}/{key}")))?;
        }
      }
      TeardownStep::DeleteBucket => {
        scope.ensure_active()?;
        objects
          .delete_bucket(bucket)
          .await
          .context(self.ctx(format!("delete bucket {bucket}")))?;
        info!("{scope}: deleted bucket {bucket}");
      }
      TeardownStep::DeleteProvider => {
        for host in candidate_issuer_hosts(scope, record.map(|r| r.domain.as_str())) {
          self.delete_identity_provider(&host).await?;
        }
      }
      TeardownStep::UntagProvider => self.release_eks_provider().await?,
      TeardownStep::DisableDistribution => {
        let record = required(step, record)?;
        scope.ensure_active()?;
        cdn
          .disable_distribution(&record.distribution_id)
          .await
          .context(self.ctx(format!("disable distribution {}", record.distribution_id)))?;
      }
      TeardownStep::DeleteDistribution => {
        let id = required(step, record)?.distribution_id.as_str();
        retry_with_backoff(
          &self.settings().distribution_delete_retry,
          &self.ctx(format!("delete distribution {id}")),
          move || async move {
            scope.ensure_active()?;
            cdn.delete_distribution(id).await
          },
        )
        .await?;
        info!("{scope}: deleted distribution {id}");
      }
      TeardownStep::DeleteOriginAccessIdentity => {
        let id = required(step, record)?.origin_access_identity_id.as_str();
        scope.ensure_active()?;
        cdn
          .delete_origin_access_identity(id)
          .await
          .context(self.ctx(format!("delete origin access identity {id}")))?;
      }
      TeardownStep::DeleteAliasRecords => self.delete_alias_records(record).await?,
      TeardownStep::DeleteCertificate => {
        let Some(alias) = scope.alias_domain() else {
          return Ok(());
        };
        let certificates = &self.clients.certificates;
        if let Some(arn) = certificates
          .find_certificate(alias)
          .await
          .context(self.ctx(format!("find certificate for {alias}")))?
        {
          scope.ensure_active()?;
          certificates
            .delete_certificate(&arn)
            .await
            .context(self.ctx(format!("delete certificate {arn}")))?;
          info!("{scope}: deleted certificate {arn}");
        }
      }
      TeardownStep::DeleteDistributionRecord => {
        scope.ensure_active()?;
        self
          .state()
          .delete_distribution(scope.cluster_namespace(), scope.config_name())
          .await
          .context(self.ctx(format!("delete configmap {}", scope.config_name())))?;
      }
    }
    Ok(())
  }

  async fn delete_alias_records(&self, record: Option<&DistributionRecord>) -> Result<()> {
    let scope = self.scope;
    let Some(alias) = scope.alias_domain() else {
      return Ok(());
    };
    if self.hosted_zone().await?.is_none() {
      debug!("{scope}: no hosted zone for {alias}, nothing to delete");
      return Ok(());
    }

    let mut records = Vec::new();
    if let Some(record) = record {
      records.push(alias_record(alias, record));
    }
    let certificates = &self.clients.certificates;
    if let Some(arn) = certificates
      .find_certificate(alias)
      .await
      .context(self.ctx(format!("find certificate for {alias}")))?
    {
      let certificate = certificates
        .describe_certificate(&arn)
        .await
        .context(self.ctx(format!("describe certificate {arn}")))?;
      records.extend(certificate.validation);
    }
    self.change_records(RecordChange::Delete, &records).await?;
    Ok(())
  }
}

fn required(step: TeardownStep, record: Option<&DistributionRecord>) -> Result<&DistributionRecord> {
  record.ok_or_else(|| Error::partial_state("distribution record", format!("{step:?} needs a distribution record")))
}
