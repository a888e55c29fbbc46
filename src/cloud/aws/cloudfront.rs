use async_trait::async_trait;
use aws_sdk_cloudfront::error::ProvideErrorMetadata;
use aws_sdk_cloudfront::types::{
  Aliases, CloudFrontOriginAccessIdentityConfig, DefaultCacheBehavior, DistributionConfig,
  DistributionConfigWithTags, MinimumProtocolVersion, Origin, Origins, S3OriginConfig, SslSupportMethod, Tag,
  TagKeys, Tags, ViewerCertificate, ViewerProtocolPolicy,
};
use aws_sdk_cloudfront::Client;

use super::{aws_error, invalid_request};
use crate::cloud::{Cdn, Distribution, DistributionSpec, DistributionState};
use crate::diff::ViewerConfig;
use crate::error::{Error, Result};
use crate::tags::TagSet;

/// AWS managed "CachingOptimized" cache policy.
const CACHING_OPTIMIZED_POLICY_ID: &str = "658327ea-f89d-4fab-a63d-7e88639e58f6";
const ORIGIN_ID: &str = "irsa-bucket";
const DEPLOYED: &str = "Deployed";

const NO_SUCH_DISTRIBUTION: &str = "NoSuchDistribution";
const NO_SUCH_ORIGIN_ACCESS_IDENTITY: &str = "NoSuchCloudFrontOriginAccessIdentity";

pub struct CloudFrontCdn {
  client: Client,
}

impl CloudFrontCdn {
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  /// Current config and its ETag, `None` for a missing distribution.
  async fn config(&self, id: &str) -> Result<Option<(DistributionConfig, String)>> {
    const OP: &str = "cloudfront:GetDistributionConfig";
    let resp = match self.client.get_distribution_config().id(id).send().await {
      Ok(resp) => resp,
      Err(e) if e.code() == Some(NO_SUCH_DISTRIBUTION) => return Ok(None),
      Err(e) => return Err(aws_error(OP, e)),
    };
    let etag = resp.e_tag().unwrap_or_default().to_string();
    let config = resp
      .distribution_config()
      .cloned()
      .ok_or_else(|| Error::aws(OP, None, format!("distribution {id} has no config")))?;
    Ok(Some((config, etag)))
  }

  async fn update(&self, operation: &'static str, id: &str, config: DistributionConfig, etag: &str) -> Result<()> {
    self
      .client
      .update_distribution()
      .id(id)
      .if_match(etag)
      .distribution_config(config)
      .send()
      .await
      .map_err(|e| aws_error(operation, e))?;
    Ok(())
  }

  async fn find_origin_access_identity(&self, comment: &str) -> Result<Option<String>> {
    let mut marker: Option<String> = None;
    loop {
      let resp = self
        .client
        .list_cloud_front_origin_access_identities()
        .set_marker(marker.take())
        .send()
        .await
        .map_err(|e| aws_error("cloudfront:ListCloudFrontOriginAccessIdentities", e))?;
      let Some(list) = resp.cloud_front_origin_access_identity_list() else {
        return Ok(None);
      };
      if let Some(found) = list.items().iter().find(|i| i.comment() == comment) {
        return Ok(Some(found.id().to_string()));
      }
      match list.next_marker() {
        Some(next) if list.is_truncated() => marker = Some(next.to_string()),
        _ => return Ok(None),
      }
    }
  }
}

fn cloudfront_tags(operation: &'static str, tags: &TagSet) -> Result<Tags> {
  let items = tags
    .iter()
    .map(|(k, v)| Tag::builder().key(k).value(v).build().map_err(|e| invalid_request(operation, e)))
    .collect::<Result<Vec<_>>>()?;
  Ok(Tags::builder().set_items(Some(items)).build())
}

fn aliases(operation: &'static str, viewer: &ViewerConfig) -> Result<Aliases> {
  Aliases::builder()
    .quantity(viewer.aliases.len() as i32)
    .set_items(Some(viewer.aliases.clone()))
    .build()
    .map_err(|e| invalid_request(operation, e))
}

fn viewer_certificate(viewer: &ViewerConfig) -> ViewerCertificate {
  match &viewer.certificate_arn {
    Some(arn) => ViewerCertificate::builder()
      .acm_certificate_arn(arn)
      .ssl_support_method(SslSupportMethod::from("sni-only"))
      .minimum_protocol_version(MinimumProtocolVersion::from("TLSv1.2_2021"))
      .build(),
    None => ViewerCertificate::builder().cloud_front_default_certificate(true).build(),
  }
}

/// The managed part of a live config.
pub(crate) fn viewer_of(config: &DistributionConfig) -> ViewerConfig {
  ViewerConfig::new(
    config.aliases().map(|a| a.items().to_vec()).unwrap_or_default(),
    config
      .viewer_certificate()
      .and_then(|v| v.acm_certificate_arn())
      .map(str::to_string),
  )
}

fn distribution_config(spec: &DistributionSpec) -> Result<DistributionConfig> {
  const OP: &str = "cloudfront:CreateDistributionWithTags";
  let invalid = |e| invalid_request(OP, e);

  let origin = Origin::builder()
    .id(ORIGIN_ID)
    .domain_name(&spec.origin_domain)
    .s3_origin_config(
      S3OriginConfig::builder()
        .origin_access_identity(format!("origin-access-identity/cloudfront/{}", spec.origin_access_identity_id))
        .build(),
    )
    .build()
    .map_err(invalid)?;
  let behavior = DefaultCacheBehavior::builder()
    .target_origin_id(ORIGIN_ID)
    .viewer_protocol_policy(ViewerProtocolPolicy::from("redirect-to-https"))
    .cache_policy_id(CACHING_OPTIMIZED_POLICY_ID)
    .build()
    .map_err(invalid)?;

  DistributionConfig::builder()
    .caller_reference(&spec.caller_reference)
    .comment(&spec.comment)
    .enabled(true)
    .origins(Origins::builder().quantity(1).items(origin).build().map_err(invalid)?)
    .default_cache_behavior(behavior)
    .aliases(aliases(OP, &spec.viewer)?)
    .viewer_certificate(viewer_certificate(&spec.viewer))
    .build()
    .map_err(invalid)
}

#[async_trait]
impl Cdn for CloudFrontCdn {
  async fn create_origin_access_identity(&self, caller_reference: &str, comment: &str) -> Result<String> {
    const OP: &str = "cloudfront:CreateCloudFrontOriginAccessIdentity";
    let config = CloudFrontOriginAccessIdentityConfig::builder()
      .caller_reference(caller_reference)
      .comment(comment)
      .build()
      .map_err(|e| invalid_request(OP, e))?;
    match self
      .client
      .create_cloud_front_origin_access_identity()
      .cloud_front_origin_access_identity_config(config)
      .send()
      .await
    {
      Ok(resp) => resp
        .cloud_front_origin_access_identity()
        .map(|i| i.id().to_string())
        .ok_or_else(|| Error::aws(OP, None, "response carries no identity")),
      Err(e) if e.code() == Some("CloudFrontOriginAccessIdentityAlreadyExists") => self
        .find_origin_access_identity(comment)
        .await?
        .ok_or_else(|| aws_error(OP, e)),
      Err(e) => Err(aws_error(OP, e)),
    }
  }

  async fn delete_origin_access_identity(&self, id: &str) -> Result<()> {
    const OP: &str = "cloudfront:DeleteCloudFrontOriginAccessIdentity";
    let etag = match self.client.get_cloud_front_origin_access_identity().id(id).send().await {
      Ok(resp) => resp.e_tag().unwrap_or_default().to_string(),
      Err(e) if e.code() == Some(NO_SUCH_ORIGIN_ACCESS_IDENTITY) => return Ok(()),
      Err(e) => return Err(aws_error("cloudfront:GetCloudFrontOriginAccessIdentity", e)),
    };
    match self
      .client
      .delete_cloud_front_origin_access_identity()
      .id(id)
      .if_match(etag)
      .send()
      .await
    {
      Ok(_) => Ok(()),
      Err(e) if e.code() == Some(NO_SUCH_ORIGIN_ACCESS_IDENTITY) => Ok(()),
      Err(e) => Err(aws_error(OP, e)),
    }
  }

  async fn create_distribution(&self, spec: &DistributionSpec) -> Result<Distribution> {
    const OP: &str = "cloudfront:CreateDistributionWithTags";
    let with_tags = DistributionConfigWithTags::builder()
      .distribution_config(distribution_config(spec)?)
      .tags(cloudfront_tags(OP, &spec.tags)?)
      .build();
    match self
      .client
      .create_distribution_with_tags()
      .distribution_config_with_tags(with_tags)
      .send()
      .await
    {
      Ok(resp) => resp
        .distribution()
        .map(|d| Distribution {
          arn: d.arn().to_string(),
          id: d.id().to_string(),
          domain: d.domain_name().to_string(),
        })
        .ok_or_else(|| Error::aws(OP, None, "response carries no distribution")),
      Err(e) => Err(aws_error(OP, e)),
    }
  }

  async fn find_distribution(&self, comment: &str) -> Result<Option<Distribution>> {
    let mut marker: Option<String> = None;
    loop {
      let resp = self
        .client
        .list_distributions()
        .set_marker(marker.take())
        .send()
        .await
        .map_err(|e| aws_error("cloudfront:ListDistributions", e))?;
      let Some(list) = resp.distribution_list() else {
        return Ok(None);
      };
      if let Some(found) = list.items().iter().find(|d| d.comment() == comment) {
        return Ok(Some(Distribution {
          arn: found.arn().to_string(),
          id: found.id().to_string(),
          domain: found.domain_name().to_string(),
        }));
      }
      match list.next_marker() {
        Some(next) if list.is_truncated() => marker = Some(next.to_string()),
        _ => return Ok(None),
      }
    }
  }

  async fn get_distribution(&self, id: &str) -> Result<Option<DistributionState>> {
    let resp = match self.client.get_distribution().id(id).send().await {
      Ok(resp) => resp,
      Err(e) if e.code() == Some(NO_SUCH_DISTRIBUTION) => return Ok(None),
      Err(e) => return Err(aws_error("cloudfront:GetDistribution", e)),
    };
    let Some(d) = resp.distribution() else {
      return Ok(None);
    };
    let config = d.distribution_config();
    Ok(Some(DistributionState {
      distribution: Distribution {
        arn: d.arn().to_string(),
        id: d.id().to_string(),
        domain: d.domain_name().to_string(),
      },
      enabled: config.is_some_and(|c| c.enabled()),
      deployed: d.status() == DEPLOYED,
      viewer: config.map(viewer_of).unwrap_or_default(),
    }))
  }

  async fn update_viewer(&self, id: &str, viewer: &ViewerConfig) -> Result<()> {
    const OP: &str = "cloudfront:UpdateDistribution";
    let (mut config, etag) = self
      .config(id)
      .await?
      .ok_or_else(|| Error::aws(OP, Some(NO_SUCH_DISTRIBUTION), format!("distribution {id} does not exist")))?;
    config.aliases = Some(aliases(OP, viewer)?);
    config.viewer_certificate = Some(viewer_certificate(viewer));
    self.update(OP, id, config, &etag).await
  }

  async fn disable_distribution(&self, id: &str) -> Result<()> {
    let Some((mut config, etag)) = self.config(id).await? else {
      return Ok(());
    };
    if !config.enabled() {
      return Ok(());
    }
    config.enabled = false;
    self.update("cloudfront:UpdateDistribution", id, config, &etag).await
  }

  async fn delete_distribution(&self, id: &str) -> Result<()> {
    let Some(state) = self.get_distribution(id).await? else {
      return Ok(());
    };
    if state.enabled {
      return Err(Error::not_ready(format!("distribution {id}"), "distribution is still enabled"));
    }
    if !state.deployed {
      return Err(Error::not_ready(format!("distribution {id}"), "disable is still propagating"));
    }
    let Some((_, etag)) = self.config(id).await? else {
      return Ok(());
    };
    match self.client.delete_distribution().id(id).if_match(etag).send().await {
      Ok(_) => Ok(()),
      Err(e) if e.code() == Some(NO_SUCH_DISTRIBUTION) => Ok(()),
      Err(e) if e.code() == Some("DistributionNotDisabled") => {
        Err(Error::not_ready(format!("distribution {id}"), "distribution is not disabled yet"))
      }
      Err(e) => Err(aws_error("cloudfront:DeleteDistribution", e)),
    }
  }

  async fn list_tags(&self, arn: &str) -> Result<TagSet> {
    let resp = self
      .client
      .list_tags_for_resource()
      .resource(arn)
      .send()
      .await
      .map_err(|e| aws_error("cloudfront:ListTagsForResource", e))?;
    Ok(
      resp
        .tags()
        .map(|t| {
          t.items()
            .iter()
            .map(|tag| (tag.key(), tag.value().unwrap_or_default()))
            .collect()
        })
        .unwrap_or_default(),
    )
  }

  async fn tag_resource(&self, arn: &str, tags: &TagSet) -> Result<()> {
    const OP: &str = "cloudfront:TagResource";
    self
      .client
      .tag_resource()
      .resource(arn)
      .tags(cloudfront_tags(OP, tags)?)
      .send()
      .await
      .map_err(|e| aws_error(OP, e))?;
    Ok(())
  }

  async fn untag_resource(&self, arn: &str, keys: &[String]) -> Result<()> {
    self
      .client
      .untag_resource()
      .resource(arn)
      .tag_keys(TagKeys::builder().set_items(Some(keys.to_vec())).build())
      .send()
      .await
      .map_err(|e| aws_error("cloudfront:UntagResource", e))?;
    Ok(())
  }
}
