use async_trait::async_trait;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::operation::head_bucket::HeadBucketError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
  BucketLocationConstraint, CreateBucketConfiguration, PublicAccessBlockConfiguration, ServerSideEncryption,
  ServerSideEncryptionByDefault, ServerSideEncryptionConfiguration, ServerSideEncryptionRule, Tag, Tagging,
};
use aws_sdk_s3::Client;
use log::debug;

use super::{aws_error, invalid_request};
use crate::cloud::ObjectStore;
use crate::error::Result;
use crate::tags::TagSet;

/// us-east-1 buckets must be created without a location constraint.
const DEFAULT_REGION: &str = "us-east-1";

const NO_SUCH_BUCKET: &str = "NoSuchBucket";

pub struct S3ObjectStore {
  client: Client,
}

impl S3ObjectStore {
  pub fn new(client: Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
  async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
    match self.client.head_bucket().bucket(bucket).send().await {
      Ok(_) => Ok(true),
      Err(e) if matches!(e.as_service_error(), Some(HeadBucketError::NotFound(_))) => Ok(false),
      Err(e) => Err(aws_error("s3:HeadBucket", e)),
    }
  }

  async fn create_bucket(&self, bucket: &str, region: &str) -> Result<()> {
    let mut request = self.client.create_bucket().bucket(bucket);
    if region != DEFAULT_REGION {
      request = request.create_bucket_configuration(
        CreateBucketConfiguration::builder()
          .location_constraint(BucketLocationConstraint::from(region))
          .build(),
      );
    }
    match request.send().await {
      Ok(_) => Ok(()),
      Err(e) if e.code() == Some("BucketAlreadyOwnedByYou") => {
        debug!("bucket {bucket} already owned");
        Ok(())
      }
      Err(e) => Err(aws_error("s3:CreateBucket", e)),
    }
  }

  async fn encrypt_bucket(&self, bucket: &str) -> Result<()> {
    const OP: &str = "s3:PutBucketEncryption";
    let by_default = ServerSideEncryptionByDefault::builder()
      .sse_algorithm(ServerSideEncryption::from("AES256"))
      .build()
      .map_err(|e| invalid_request(OP, e))?;
    let config = ServerSideEncryptionConfiguration::builder()
      .rules(
        ServerSideEncryptionRule::builder()
          .apply_server_side_encryption_by_default(by_default)
          .build(),
      )
      .build()
      .map_err(|e| invalid_request(OP, e))?;
    self
      .client
      .put_bucket_encryption()
      .bucket(bucket)
      .server_side_encryption_configuration(config)
      .send()
      .await
      .map_err(|e| aws_error(OP, e))?;
    Ok(())
  }

  async fn put_bucket_tags(&self, bucket: &str, tags: &TagSet) -> Result<()> {
    const OP: &str = "s3:PutBucketTagging";
    let tag_set = tags
      .iter()
      .map(|(k, v)| Tag::builder().key(k).value(v).build().map_err(|e| invalid_request(OP, e)))
      .collect::<Result<Vec<_>>>()?;
    let tagging = Tagging::builder()
      .set_tag_set(Some(tag_set))
      .build()
      .map_err(|e| invalid_request(OP, e))?;
    self
      .client
      .put_bucket_tagging()
      .bucket(bucket)
      .tagging(tagging)
      .send()
      .await
      .map_err(|e| aws_error(OP, e))?;
    Ok(())
  }

  async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
    self
      .client
      .put_object()
      .bucket(bucket)
      .key(key)
      .content_type(content_type)
      .body(ByteStream::from(body))
      .send()
      .await
      .map_err(|e| aws_error("s3:PutObject", e))?;
    Ok(())
  }

  async fn list_objects(&self, bucket: &str) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut token: Option<String> = None;
    loop {
      let resp = match self
        .client
        .list_objects_v2()
        .bucket(bucket)
        .set_continuation_token(token.take())
        .send()
        .await
      {
        Ok(resp) => resp,
        Err(e) if e.code() == Some(NO_SUCH_BUCKET) => return Ok(keys),
        Err(e) => return Err(aws_error("s3:ListObjectsV2", e)),
      };
      keys.extend(resp.contents().iter().filter_map(|o| o.key().map(str::to_string)));
      match resp.next_continuation_token() {
        Some(next) if resp.is_truncated().unwrap_or(false) => token = Some(next.to_string()),
        _ => return Ok(keys),
      }
    }
  }

  async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
    match self.client.delete_object().bucket(bucket).key(key).send().await {
      Ok(_) => Ok(()),
      Err(e) if matches!(e.code(), Some(NO_SUCH_BUCKET) | Some("NoSuchKey")) => Ok(()),
      Err(e) => Err(aws_error("s3:DeleteObject", e)),
    }
  }

  async fn delete_bucket(&self, bucket: &str) -> Result<()> {
    match self.client.delete_bucket().bucket(bucket).send().await {
      Ok(_) => Ok(()),
      Err(e) if e.code() == Some(NO_SUCH_BUCKET) => {
        debug!("bucket {bucket} already gone");
        Ok(())
      }
      Err(e) => Err(aws_error("s3:DeleteBucket", e)),
    }
  }

  async fn put_bucket_policy(&self, bucket: &str, policy: &str) -> Result<()> {
    self
      .client
      .put_bucket_policy()
      .bucket(bucket)
      .policy(policy)
      .send()
      .await
      .map_err(|e| aws_error("s3:PutBucketPolicy", e))?;
    Ok(())
  }

  async fn block_public_access(&self, bucket: &str) -> Result<()> {
    let config = PublicAccessBlockConfiguration::builder()
      .block_public_acls(true)
      .ignore_public_acls(true)
      .block_public_policy(true)
      .restrict_public_buckets(true)
      .build();
    self
      .client
      .put_public_access_block()
      .bucket(bucket)
      .public_access_block_configuration(config)
      .send()
      .await
      .map_err(|e| aws_error("s3:PutPublicAccessBlock", e))?;
    Ok(())
  }

  async fn allow_public_access(&self, bucket: &str) -> Result<()> {
    match self.client.delete_public_access_block().bucket(bucket).send().await {
      Ok(_) => Ok(()),
      Err(e) if e.code() == Some("NoSuchPublicAccessBlockConfiguration") => Ok(()),
      Err(e) => Err(aws_error("s3:DeletePublicAccessBlock", e)),
    }
  }
}
