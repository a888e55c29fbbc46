use async_trait::async_trait;
use aws_sdk_route53::error::ProvideErrorMetadata;
use aws_sdk_route53::types::{Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType};
use aws_sdk_route53::Client;
use log::debug;

use super::{aws_error, invalid_request};
use crate::cloud::{Dns, DnsRecord};
use crate::error::Result;

const RECORD_TTL: i64 = 300;
const OP_CHANGE: &str = "route53:ChangeResourceRecordSets";

pub struct Route53Dns {
  client: Client,
}

impl Route53Dns {
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  async fn change(&self, zone_id: &str, action: ChangeAction, set: ResourceRecordSet) -> Result<()> {
    let change = Change::builder()
      .action(action)
      .resource_record_set(set)
      .build()
      .map_err(|e| invalid_request(OP_CHANGE, e))?;
    let batch = ChangeBatch::builder()
      .changes(change)
      .build()
      .map_err(|e| invalid_request(OP_CHANGE, e))?;
    self
      .client
      .change_resource_record_sets()
      .hosted_zone_id(zone_id)
      .change_batch(batch)
      .send()
      .await
      .map_err(|e| aws_error(OP_CHANGE, e))?;
    Ok(())
  }

  /// The live CNAME set for `name`, Route53 only deletes exact matches.
  async fn live_cname(&self, zone_id: &str, name: &str) -> Result<Option<ResourceRecordSet>> {
    let resp = self
      .client
      .list_resource_record_sets()
      .hosted_zone_id(zone_id)
      .start_record_name(name)
      .start_record_type(RrType::Cname)
      .max_items(1)
      .send()
      .await
      .map_err(|e| aws_error("route53:ListResourceRecordSets", e))?;
    Ok(
      resp
        .resource_record_sets()
        .iter()
        .find(|set| same_name(set.name(), name) && set.r#type() == &RrType::Cname)
        .cloned(),
    )
  }
}

fn same_name(a: &str, b: &str) -> bool {
  a.trim_end_matches('.').eq_ignore_ascii_case(b.trim_end_matches('.'))
}

/// `/hostedzone/Z123` as returned by the API, `Z123` as accepted by it.
pub(crate) fn zone_id(raw: &str) -> &str {
  raw.trim_start_matches("/hostedzone/")
}

/// `domain` and each parent with at least two labels, most specific first.
pub(crate) fn zone_candidates(domain: &str) -> Vec<&str> {
  let domain = domain.trim_end_matches('.');
  let mut out = vec![domain];
  let mut rest = domain;
  while let Some((_, parent)) = rest.split_once('.') {
    if !parent.contains('.') {
      break;
    }
    out.push(parent);
    rest = parent;
  }
  out
}

#[async_trait]
impl Dns for Route53Dns {
  async fn find_hosted_zone(&self, domain: &str) -> Result<Option<String>> {
    for candidate in zone_candidates(domain) {
      let resp = self
        .client
        .list_hosted_zones_by_name()
        .dns_name(candidate)
        .max_items(1)
        .send()
        .await
        .map_err(|e| aws_error("route53:ListHostedZonesByName", e))?;
      let public = resp
        .hosted_zones()
        .iter()
        .find(|z| same_name(z.name(), candidate) && !z.config().is_some_and(|c| c.private_zone()));
      if let Some(zone) = public {
        return Ok(Some(zone_id(zone.id()).to_string()));
      }
    }
    Ok(None)
  }

  async fn upsert_cname(&self, zone_id: &str, record: &DnsRecord) -> Result<()> {
    let set = ResourceRecordSet::builder()
      .name(&record.name)
      .r#type(RrType::Cname)
      .ttl(RECORD_TTL)
      .resource_records(
        ResourceRecord::builder()
          .value(&record.value)
          .build()
          .map_err(|e| invalid_request(OP_CHANGE, e))?,
      )
      .build()
      .map_err(|e| invalid_request(OP_CHANGE, e))?;
    self.change(zone_id, ChangeAction::Upsert, set).await
  }

  async fn delete_cname(&self, zone_id: &str, record: &DnsRecord) -> Result<()> {
    let Some(set) = self.live_cname(zone_id, &record.name).await? else {
      debug!("cname {} already gone", record.name);
      return Ok(());
    };
    match self.change(zone_id, ChangeAction::Delete, set).await {
      Err(e) if e.aws_code() == Some("InvalidChangeBatch") => Ok(()),
      other => other,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zone_ids_lose_their_prefix() {
    assert_eq!(zone_id("/hostedzone/Z0123456789"), "Z0123456789");
    assert_eq!(zone_id("Z0123456789"), "Z0123456789");
  }

  #[test]
  fn candidates_walk_up_to_the_registrable_domain() {
    assert_eq!(
      zone_candidates("gauss.example.com."),
      vec!["gauss.example.com", "example.com"]
    );
    assert_eq!(zone_candidates("example.com"), vec!["example.com"]);
  }

  #[test]
  fn names_compare_without_trailing_dot() {
    assert!(same_name("Irsa.Demo.example.com.", "irsa.demo.example.com"));
    assert!(!same_name("irsa.demo.example.com", "demo.example.com"));
  }
}
