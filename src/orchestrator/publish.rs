//! Create/update path for clusters that publish their own discovery documents.

use log::{debug, info};

use super::Run;
use crate::discovery::{origin_access_policy, public_read_policy, Delivery, DISCOVERY_OBJECT_KEY, JWKS_OBJECT_KEY};
use crate::error::{Result, ResultExt};
use crate::keys::SigningKey;
use crate::retry::retry_with_backoff;
use crate::state::DistributionRecord;

const JSON_CONTENT_TYPE: &str = "application/json";

impl Run<'_> {
  pub(super) async fn publish(&self) -> Result<()> {
    let scope = self.scope;
    let key = self.ensure_signing_key().await?;
    self.ensure_bucket().await?;

    let record = if scope.cloudfront_enabled() {
      Some(self.ensure_distribution().await?)
    } else {
      None
    };
    let delivery = Delivery::for_scope(scope, record.as_ref().map(|r| r.domain.as_str()))?;

    self.upload_documents(&key, &delivery).await?;
    self.apply_bucket_access(record.as_ref()).await?;

    if let (Some(record), Some(alias)) = (record.as_ref(), scope.alias_domain()) {
      self.ensure_alias(record, alias).await?;
    }

    let arn = self
      .ensure_identity_provider(&delivery.issuer_url(), delivery.tls_host(), &scope.desired_tags())
      .await?;
    debug!("{scope}: published {} for {arn}", delivery.issuer_url());
    Ok(())
  }

  /// The stored key, or a fresh one persisted before any AWS write.
  async fn ensure_signing_key(&self) -> Result<SigningKey> {
    let scope = self.scope;
    let (namespace, name) = (scope.cluster_namespace(), scope.secret_name());
    if let Some(key) = self
      .state()
      .load_signing_key(namespace, name)
      .await
      .context(self.ctx(format!("load secret {name}")))?
    {
      return Ok(key);
    }

    let key = SigningKey::generate()?;
    scope.ensure_active()?;
    self
      .state()
      .store_signing_key(namespace, name, &key)
      .await
      .context(self.ctx(format!("store secret {name}")))?;
    info!("{scope}: generated signing key {}", key.key_id()?);
    Ok(key)
  }

  async fn ensure_bucket(&self) -> Result<()> {
    let scope = self.scope;
    let bucket = scope.bucket_name();
    let objects = &self.clients.objects;

    if !objects
      .bucket_exists(bucket)
      .await
      .context(self.ctx(format!("head bucket {bucket}")))?
    {
      scope.ensure_active()?;
      objects
        .create_bucket(bucket, scope.region())
        .await
        .context(self.ctx(format!("create bucket {bucket}")))?;
      info!("{scope}: created bucket {bucket}");
    }

    let tags = scope.desired_tags();
    let tags = &tags;
    retry_with_backoff(&self.settings().policy_retry, &self.ctx("configure bucket"), move || async move {
      scope.ensure_active()?;
      objects.encrypt_bucket(bucket).await?;
      objects.put_bucket_tags(bucket, tags).await
    })
    .await
  }

  async fn upload_documents(&self, key: &SigningKey, delivery: &Delivery) -> Result<()> {
    let scope = self.scope;
    let bucket = scope.bucket_name();
    let objects = &self.clients.objects;
    let discovery = delivery.document().to_json()?;
    let jwks = key.jwks()?.to_json()?;
    let (discovery, jwks) = (&discovery, &jwks);

    retry_with_backoff(&self.settings().upload_retry, &self.ctx("upload discovery documents"), move || async move {
      scope.ensure_active()?;
      objects
        .put_object(bucket, DISCOVERY_OBJECT_KEY, discovery.clone(), JSON_CONTENT_TYPE)
        .await?;
      objects.put_object(bucket, JWKS_OBJECT_KEY, jwks.clone(), JSON_CONTENT_TYPE).await
    })
    .await?;
    debug!("{scope}: uploaded discovery documents for {}", delivery.issuer_url());
    Ok(())
  }

  /// Public read for direct delivery, origin access identity only otherwise.
  async fn apply_bucket_access(&self, record: Option<&DistributionRecord>) -> Result<()> {
    let scope = self.scope;
    let bucket = scope.bucket_name();
    let objects = &self.clients.objects;

    match record {
      None => {
        let policy = public_read_policy(scope.partition(), bucket);
        let policy = &policy;
        retry_with_backoff(&self.settings().policy_retry, &self.ctx("apply public read policy"), move || async move {
          scope.ensure_active()?;
          objects.allow_public_access(bucket).await?;
          objects.put_bucket_policy(bucket, policy).await
        })
        .await
      }
      Some(record) => {
        let policy = origin_access_policy(scope.partition(), bucket, &record.origin_access_identity_id);
        let policy = &policy;
        retry_with_backoff(&self.settings().policy_retry, &self.ctx("apply origin access policy"), move || async move {
          scope.ensure_active()?;
          objects.put_bucket_policy(bucket, policy).await?;
          objects.block_public_access(bucket).await
        })
        .await
      }
    }
  }
}
