use async_trait::async_trait;
use aws_sdk_iam::error::ProvideErrorMetadata;
use aws_sdk_iam::types::Tag;
use aws_sdk_iam::Client;
use log::debug;

use super::{aws_error, invalid_request};
use crate::cloud::{provider_arn, IdentityProviders, OidcProvider};
use crate::error::Result;
use crate::tags::TagSet;

const NO_SUCH_ENTITY: &str = "NoSuchEntity";

pub struct IamIdentityProviders {
  client: Client,
  partition: String,
  account_id: String,
}

impl IamIdentityProviders {
  pub fn new(client: Client, partition: &str, account_id: &str) -> Self {
    Self {
      client,
      partition: partition.to_string(),
      account_id: account_id.to_string(),
    }
  }
}

fn iam_tags(operation: &'static str, tags: &TagSet) -> Result<Vec<Tag>> {
  tags
    .iter()
    .map(|(k, v)| {
      Tag::builder()
        .key(k)
        .value(v)
        .build()
        .map_err(|e| invalid_request(operation, e))
    })
    .collect()
}

#[async_trait]
impl IdentityProviders for IamIdentityProviders {
  async fn get_provider(&self, arn: &str) -> Result<Option<OidcProvider>> {
    let resp = match self
      .client
      .get_open_id_connect_provider()
      .open_id_connect_provider_arn(arn)
      .send()
      .await
    {
      Ok(resp) => resp,
      Err(e) if e.code() == Some(NO_SUCH_ENTITY) => return Ok(None),
      Err(e) => return Err(aws_error("iam:GetOpenIDConnectProvider", e)),
    };
    Ok(Some(OidcProvider {
      arn: arn.to_string(),
      url: resp.url().unwrap_or_default().to_string(),
      client_ids: resp.client_id_list().to_vec(),
      thumbprints: resp.thumbprint_list().to_vec(),
      tags: resp.tags().iter().map(|t| (t.key(), t.value())).collect(),
    }))
  }

  async fn create_provider(&self, url: &str, client_id: &str, thumbprint: &str, tags: &TagSet) -> Result<String> {
    const OP: &str = "iam:CreateOpenIDConnectProvider";
    let result = self
      .client
      .create_open_id_connect_provider()
      .url(url)
      .client_id_list(client_id)
      .thumbprint_list(thumbprint)
      .set_tags(Some(iam_tags(OP, tags)?))
      .send()
      .await;
    let issuer = url.strip_prefix("https://").unwrap_or(url);
    match result {
      Ok(resp) => Ok(
        resp
          .open_id_connect_provider_arn()
          .map(str::to_string)
          .unwrap_or_else(|| provider_arn(&self.partition, &self.account_id, issuer)),
      ),
      Err(e) if e.code() == Some("EntityAlreadyExists") => {
        debug!("oidc provider for {url} already exists");
        Ok(provider_arn(&self.partition, &self.account_id, issuer))
      }
      Err(e) => Err(aws_error(OP, e)),
    }
  }

  async fn update_thumbprints(&self, arn: &str, thumbprints: &[String]) -> Result<()> {
    self
      .client
      .update_open_id_connect_provider_thumbprint()
      .open_id_connect_provider_arn(arn)
      .set_thumbprint_list(Some(thumbprints.to_vec()))
      .send()
      .await
      .map_err(|e| aws_error("iam:UpdateOpenIDConnectProviderThumbprint", e))?;
    Ok(())
  }

  async fn tag_provider(&self, arn: &str, tags: &TagSet) -> Result<()> {
    const OP: &str = "iam:TagOpenIDConnectProvider";
    self
      .client
      .tag_open_id_connect_provider()
      .open_id_connect_provider_arn(arn)
      .set_tags(Some(iam_tags(OP, tags)?))
      .send()
      .await
      .map_err(|e| aws_error(OP, e))?;
    Ok(())
  }

  async fn untag_provider(&self, arn: &str, keys: &[String]) -> Result<()> {
    match self
      .client
      .untag_open_id_connect_provider()
      .open_id_connect_provider_arn(arn)
      .set_tag_keys(Some(keys.to_vec()))
      .send()
      .await
    {
      Ok(_) => Ok(()),
      Err(e) if e.code() == Some(NO_SUCH_ENTITY) => Ok(()),
      Err(e) => Err(aws_error("iam:UntagOpenIDConnectProvider", e)),
    }
  }

  async fn delete_provider(&self, arn: &str) -> Result<()> {
    match self
      .client
      .delete_open_id_connect_provider()
      .open_id_connect_provider_arn(arn)
      .send()
      .await
    {
      Ok(_) => Ok(()),
      Err(e) if e.code() == Some(NO_SUCH_ENTITY) => {
        debug!("oidc provider {arn} already gone");
        Ok(())
      }
      Err(e) => Err(aws_error("iam:DeleteOpenIDConnectProvider", e)),
    }
  }
}
