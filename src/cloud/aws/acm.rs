use async_trait::async_trait;
use aws_sdk_acm::error::ProvideErrorMetadata;
use aws_sdk_acm::types::{CertificateStatus as AcmStatus, Tag, ValidationMethod};
use aws_sdk_acm::Client;
use sha1::{Digest, Sha1};

use super::{aws_error, invalid_request};
use crate::cloud::{Certificate, CertificateStatus, Certificates, DnsRecord};
use crate::error::Result;
use crate::tags::TagSet;

const NOT_FOUND: &str = "ResourceNotFoundException";

/// Idempotency tokens are at most 32 alphanumeric characters.
const IDEMPOTENCY_TOKEN_LEN: usize = 32;

pub struct AcmCertificates {
  client: Client,
}

impl AcmCertificates {
  pub fn new(client: Client) -> Self {
    Self { client }
  }
}

/// Same token for the same domain, so a retried request yields one certificate.
pub(crate) fn idempotency_token(domain: &str) -> String {
  let mut token = hex::encode(Sha1::digest(domain.as_bytes()));
  token.truncate(IDEMPOTENCY_TOKEN_LEN);
  token
}

fn status_of(status: Option<&AcmStatus>, failure: Option<String>) -> CertificateStatus {
  match status {
    Some(AcmStatus::Issued) => CertificateStatus::Issued,
    Some(AcmStatus::PendingValidation) | None => CertificateStatus::PendingValidation,
    Some(other) => CertificateStatus::Failed(failure.unwrap_or_else(|| other.as_str().to_string())),
  }
}

#[async_trait]
impl Certificates for AcmCertificates {
  async fn find_certificate(&self, domain: &str) -> Result<Option<String>> {
    let mut token: Option<String> = None;
    loop {
      let resp = self
        .client
        .list_certificates()
        .certificate_statuses(AcmStatus::Issued)
        .certificate_statuses(AcmStatus::PendingValidation)
        .set_next_token(token.take())
        .send()
        .await
        .map_err(|e| aws_error("acm:ListCertificates", e))?;
      let found = resp
        .certificate_summary_list()
        .iter()
        .find(|c| c.domain_name() == Some(domain))
        .and_then(|c| c.certificate_arn());
      if let Some(arn) = found {
        return Ok(Some(arn.to_string()));
      }
      match resp.next_token() {
        Some(next) => token = Some(next.to_string()),
        None => return Ok(None),
      }
    }
  }

  async fn request_certificate(&self, domain: &str, tags: &TagSet) -> Result<String> {
    const OP: &str = "acm:RequestCertificate";
    let tags = tags
      .iter()
      .map(|(k, v)| Tag::builder().key(k).value(v).build().map_err(|e| invalid_request(OP, e)))
      .collect::<Result<Vec<_>>>()?;
    let resp = self
      .client
      .request_certificate()
      .domain_name(domain)
      .validation_method(ValidationMethod::Dns)
      .idempotency_token(idempotency_token(domain))
      .set_tags(Some(tags))
      .send()
      .await
      .map_err(|e| aws_error(OP, e))?;
    resp
      .certificate_arn()
      .map(str::to_string)
      .ok_or_else(|| crate::Error::aws(OP, None, "response carries no certificate arn"))
  }

  async fn describe_certificate(&self, arn: &str) -> Result<Certificate> {
    const OP: &str = "acm:DescribeCertificate";
    let resp = self
      .client
      .describe_certificate()
      .certificate_arn(arn)
      .send()
      .await
      .map_err(|e| aws_error(OP, e))?;
    let detail = resp
      .certificate()
      .ok_or_else(|| crate::Error::aws(OP, Some(NOT_FOUND), format!("certificate {arn} has no detail")))?;
    let validation = detail
      .domain_validation_options()
      .iter()
      .find_map(|o| o.resource_record())
      .map(|r| DnsRecord {
        name: r.name().to_string(),
        value: r.value().to_string(),
      });
    Ok(Certificate {
      arn: arn.to_string(),
      status: status_of(
        detail.status(),
        detail.failure_reason().map(|r| r.as_str().to_string()),
      ),
      validation,
    })
  }

  async fn delete_certificate(&self, arn: &str) -> Result<()> {
    match self.client.delete_certificate().certificate_arn(arn).send().await {
      Ok(_) => Ok(()),
      Err(e) if e.code() == Some(NOT_FOUND) => Ok(()),
      Err(e) => Err(aws_error("acm:DeleteCertificate", e)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_is_stable_and_bounded() {
    let token = idempotency_token("irsa.demo.gauss.example.com");
    assert_eq!(token.len(), IDEMPOTENCY_TOKEN_LEN);
    assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
    assert_eq!(token, idempotency_token("irsa.demo.gauss.example.com"));
    assert_ne!(token, idempotency_token("irsa.other.gauss.example.com"));
  }

  #[test]
  fn statuses_map_to_readiness() {
    assert_eq!(status_of(Some(&AcmStatus::Issued), None), CertificateStatus::Issued);
    assert_eq!(status_of(None, None), CertificateStatus::PendingValidation);
    assert_eq!(
      status_of(Some(&AcmStatus::Failed), Some("CAA_ERROR".into())),
      CertificateStatus::Failed("CAA_ERROR".into())
    );
  }
}
