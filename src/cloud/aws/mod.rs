//! SDK-backed capability adapters.
//!
//! Every adapter maps SDK failures through [`aws_error`], which keeps the
//! service error code so [`crate::Error::kind`] can classify it, and absorbs
//! the not-found and already-exists codes its trait documents as success.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::sts::AssumeRoleProvider;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata};
use log::debug;

use super::{CloudClients, CloudConnector, CLOUDFRONT_CERTIFICATE_REGION};
use crate::error::{Error, Result};
use crate::scope::ClusterScope;

mod acm;
mod cloudfront;
mod eks;
mod iam;
mod route53;
mod s3;

pub use acm::AcmCertificates;
pub use cloudfront::CloudFrontCdn;
pub use eks::EksClusters;
pub use iam::IamIdentityProviders;
pub use route53::Route53Dns;
pub use s3::S3ObjectStore;

const SESSION_NAME: &str = "irsa-operator";

/// Normalise an SDK error, keeping its service error code.
pub(crate) fn aws_error<E>(operation: &'static str, err: E) -> Error
where
  E: ProvideErrorMetadata + std::error::Error,
{
  let code = err.code().map(str::to_string);
  Error::aws(operation, code.as_deref(), DisplayErrorContext(&err).to_string())
}

/// A request the SDK refused to build is a bug in our input, not transient.
pub(crate) fn invalid_request(operation: &'static str, err: impl fmt::Display) -> Error {
  Error::validation(format!("{operation}: {err}"))
}

/// Builds clients that act as the cluster's own role.
pub struct AwsConnector {
  base: SdkConfig,
}

impl AwsConnector {
  /// Operator credentials from the default chain; they must be allowed to
  /// assume every cluster role.
  pub async fn from_env() -> Self {
    Self {
      base: aws_config::load_defaults(BehaviorVersion::latest()).await,
    }
  }
}

#[async_trait]
impl CloudConnector for AwsConnector {
  async fn connect(&self, scope: &ClusterScope) -> Result<CloudClients> {
    let region = Region::new(scope.region().to_string());
    let credentials = AssumeRoleProvider::builder(scope.role_arn())
      .session_name(SESSION_NAME)
      .region(region.clone())
      .configure(&self.base)
      .build()
      .await;
    let config = aws_config::defaults(BehaviorVersion::latest())
      .region(region)
      .credentials_provider(credentials)
      .load()
      .await;
    debug!("{scope}: assumed {} in {}", scope.role_arn(), scope.region());

    let acm = aws_sdk_acm::config::Builder::from(&config)
      .region(Region::new(CLOUDFRONT_CERTIFICATE_REGION))
      .build();

    Ok(CloudClients {
      objects: Arc::new(S3ObjectStore::new(aws_sdk_s3::Client::new(&config))),
      identity: Arc::new(IamIdentityProviders::new(
        aws_sdk_iam::Client::new(&config),
        scope.partition(),
        scope.account_id(),
      )),
      cdn: Arc::new(CloudFrontCdn::new(aws_sdk_cloudfront::Client::new(&config))),
      certificates: Arc::new(AcmCertificates::new(aws_sdk_acm::Client::from_conf(acm))),
      dns: Arc::new(Route53Dns::new(aws_sdk_route53::Client::new(&config))),
      managed: Arc::new(EksClusters::new(aws_sdk_eks::Client::new(&config))),
    })
  }
}
