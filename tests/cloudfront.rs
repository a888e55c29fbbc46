mod common;

use std::time::Duration;

use kube::runtime::controller::Action;

use irsa::cloud::memory::MemoryCloud;
use irsa::cloud::CertificateStatus;
use irsa::discovery::{DiscoveryDocument, DISCOVERY_OBJECT_KEY};
use irsa::{Error, Kind};

use common::*;

const ALIAS: &str = "irsa.demo.gauss.example.com";
const BUCKET: &str = "123456789012-demo-oidc-pod-identity";

fn with_zone() -> Harness {
  let h = Harness::new();
  h.cloud.dns.add_zone("Z0GAUSS", "gauss.example.com");
  h
}

#[tokio::test]
async fn issued_certificate_puts_alias_in_front() {
  let h = with_zone();
  let scope = h.build(capa("demo").base_domain(Some("gauss.example.com".into())));

  let action = h.converge(&meta("demo"), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(300)));

  let distribution = h.cloud.cdn.distributions().remove(0);
  let (certificate_arn, domain) = h.cloud.certificates.certificates().remove(0);
  assert_eq!(domain, ALIAS);
  assert_eq!(distribution.viewer.aliases, vec![ALIAS.to_string()]);
  assert_eq!(distribution.viewer.certificate_arn, Some(certificate_arn));
  assert_eq!(
    h.cloud.dns.record("Z0GAUSS", ALIAS),
    Some(distribution.distribution.domain.clone())
  );
  assert_eq!(h.cloud.dns.records().len(), 2);

  let document: DiscoveryDocument =
    serde_json::from_slice(&h.cloud.objects.object(BUCKET, DISCOVERY_OBJECT_KEY).unwrap()).unwrap();
  assert_eq!(document.issuer, format!("https://{ALIAS}"));
  assert!(h.cloud.provider_for(ALIAS).is_some());

  let bucket = h.cloud.objects.bucket(BUCKET).unwrap();
  assert!(bucket.public_access_blocked);
  assert!(bucket.policy.unwrap().contains(&distribution.origin_access_identity_id));

  // converged distribution is not updated again
  h.cloud.journal.clear();
  h.converge(&h.refreshed(&meta("demo")), &scope).await.unwrap();
  assert_eq!(h.cloud.journal.count("cloudfront:UpdateDistribution"), 0);
  assert_eq!(h.cloud.journal.count("acm:RequestCertificate"), 0);
  assert_eq!(h.cloud.journal.count("cloudfront:CreateDistributionWithTags"), 0);
}

#[tokio::test]
async fn pending_certificate_waits_for_validation() {
  let h = with_zone();
  h.cloud.certificates.set_issue_immediately(false);
  let scope = h.build(capa("demo").base_domain(Some("gauss.example.com".into())));

  let action = h.converge(&meta("demo"), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(30)));
  assert!(h.cloud.provider_for(ALIAS).is_none());
  assert!(h.cloud.cdn.distributions()[0].viewer.aliases.is_empty());
  // validation record is published while waiting
  assert_eq!(h.cloud.dns.records().len(), 2);
  assert_eq!(h.metrics.get("reconcile/capa/NotYetReady"), 1);

  let (arn, _) = h.cloud.certificates.certificates().remove(0);
  h.cloud.certificates.set_status(&arn, CertificateStatus::Issued);
  let action = h.converge(&h.refreshed(&meta("demo")), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(300)));
  assert!(h.cloud.provider_for(ALIAS).is_some());
  assert_eq!(h.cloud.journal.count("acm:RequestCertificate"), 1);
}

#[tokio::test]
async fn failed_certificate_is_fatal() {
  let h = with_zone();
  h.cloud.certificates.set_issue_immediately(false);
  let scope = h.build(capa("demo").base_domain(Some("gauss.example.com".into())));
  h.converge(&meta("demo"), &scope).await.unwrap();

  let (arn, _) = h.cloud.certificates.certificates().remove(0);
  h.cloud.certificates.set_status(&arn, CertificateStatus::Failed("CAA_ERROR".into()));
  let err = h.converge(&h.refreshed(&meta("demo")), &scope).await.unwrap_err();
  assert_eq!(err.kind(), Kind::Fatal);
}

#[tokio::test]
async fn missing_hosted_zone_is_fatal() {
  let h = Harness::new();
  let scope = h.build(capa("demo").base_domain(Some("gauss.example.com".into())));

  let err = h.converge(&meta("demo"), &scope).await.unwrap_err();
  assert!(matches!(err, Error::Validation(_)));
  assert_eq!(h.cloud.journal.count("acm:RequestCertificate"), 0);
}

#[tokio::test]
async fn hosted_zone_is_resolved_per_account() {
  let first = with_zone();
  let scope = first.build(capa("demo").base_domain(Some("gauss.example.com".into())));
  first.converge(&meta("demo"), &scope).await.unwrap();

  let second = Harness::with_cloud_and_cache(MemoryCloud::new("210987654321"), first.cache.clone());
  second.cloud.dns.add_zone("Z0OTHER", "gauss.example.com");
  let scope = second.build(
    capa("demo")
      .role_arn("arn:aws:iam::210987654321:role/irsa-operator")
      .base_domain(Some("gauss.example.com".into())),
  );
  let action = second.converge(&meta("demo"), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(300)));

  assert_eq!(second.cloud.journal.count("route53:ListHostedZonesByName"), 1);
  assert_eq!(second.cloud.journal.count("route53:ChangeResourceRecordSets(UPSERT)"), 2);
  assert!(second.cloud.dns.record("Z0OTHER", ALIAS).is_some());
  assert_eq!(first.cloud.dns.records().len(), 2);
}

#[tokio::test]
async fn stale_cached_zone_is_looked_up_again() {
  let h = with_zone();
  let key = format!("hosted-zone/{ACCOUNT}/gauss.example.com");
  h.cache.insert(key.clone(), "Z0GONE");
  let scope = h.build(capa("demo").base_domain(Some("gauss.example.com".into())));

  let action = h.converge(&meta("demo"), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(300)));
  assert_eq!(h.cloud.journal.count("route53:ListHostedZonesByName"), 1);
  assert_eq!(h.cache.get(&key).as_deref(), Some("Z0GAUSS"));
  assert!(h.cloud.dns.record("Z0GAUSS", ALIAS).is_some());
  assert!(h.cloud.dns.records().iter().all(|(zone, _, _)| zone == "Z0GAUSS"));
}

#[tokio::test]
async fn distribution_created_before_a_crash_is_adopted() {
  let h = Harness::new();
  let scope = h.build(capa("demo"));
  // distribution exists, its record never made it to the configmap
  h.state.faults.inject("kube:ApplyConfigMap", 1, "ServiceUnavailable");
  let err = h.converge(&meta("demo"), &scope).await.unwrap_err();
  assert_eq!(err.kind(), Kind::Retryable);
  assert_eq!(h.cloud.cdn.distributions().len(), 1);
  assert!(h.state.configmap_data(NAMESPACE, "demo-irsa-cloudfront").is_none());

  h.cloud.journal.clear();
  let action = h.converge(&h.refreshed(&meta("demo")), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(300)));

  let distributions = h.cloud.cdn.distributions();
  assert_eq!(distributions.len(), 1);
  assert_eq!(h.cloud.journal.count("cloudfront:CreateDistributionWithTags"), 1);
  assert_eq!(h.cloud.journal.count("cloudfront:ListDistributions"), 1);
  let record = h.state.configmap_data(NAMESPACE, "demo-irsa-cloudfront").unwrap();
  assert_eq!(record["distributionId"], distributions[0].distribution.id);
  assert!(h.cloud.provider_for(&distributions[0].distribution.domain).is_some());
}

#[tokio::test]
async fn alias_teardown_removes_records_and_certificate() {
  let h = with_zone();
  let scope = h.build(capa("demo").base_domain(Some("gauss.example.com".into())));
  h.converge(&meta("demo"), &scope).await.unwrap();

  let meta = deleting(&h.refreshed(&meta("demo")));
  h.cloud.journal.clear();
  assert_eq!(h.converge(&meta, &scope).await.unwrap(), Action::await_change());

  let journal = &h.cloud.journal;
  assert!(
    journal.position("cloudfront:DeleteCloudFrontOriginAccessIdentity").unwrap()
      < journal.position("route53:ChangeResourceRecordSets(DELETE)").unwrap()
  );
  assert!(
    journal.last_position("route53:ChangeResourceRecordSets(DELETE)").unwrap()
      < journal.position("acm:DeleteCertificate").unwrap()
  );
  assert!(h.cloud.dns.records().is_empty());
  assert!(h.cloud.certificates.certificates().is_empty());
  assert!(h.cloud.identity.providers().is_empty());
  assert!(h.state.configmap_data(NAMESPACE, "demo-irsa-cloudfront").is_none());
}

#[tokio::test]
async fn slow_disable_is_waited_out() {
  let h = Harness::new();
  let scope = h.build(capa("demo"));
  h.converge(&meta("demo"), &scope).await.unwrap();
  let meta = deleting(&h.refreshed(&meta("demo")));

  // two rejected deletes fit in the three attempts
  h.cloud.cdn.set_disable_propagation(2);
  assert_eq!(h.converge(&meta, &scope).await.unwrap(), Action::await_change());
  assert_eq!(h.cloud.journal.count("cloudfront:DeleteDistribution"), 3);
  assert!(h.cloud.cdn.distributions().is_empty());
}

#[tokio::test]
async fn slower_disable_requeues_and_resumes() {
  let h = Harness::new();
  let scope = h.build(capa("demo"));
  h.converge(&meta("demo"), &scope).await.unwrap();
  let meta = deleting(&h.refreshed(&meta("demo")));

  h.cloud.cdn.set_disable_propagation(4);
  let action = h.converge(&meta, &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(30)));
  assert_eq!(h.finalizers.written(&meta), Some(vec![irsa::finalizer::FINALIZER.to_string()]));
  assert_eq!(h.cloud.cdn.distributions().len(), 1);

  assert_eq!(h.converge(&meta, &scope).await.unwrap(), Action::await_change());
  assert!(h.cloud.cdn.distributions().is_empty());
  assert!(h.cloud.cdn.origin_access_identities().is_empty());
  assert_eq!(h.finalizers.written(&meta), Some(vec![]));
}

#[tokio::test]
async fn keep_flag_leaves_provider_and_distribution() {
  let h = Harness::new();
  let scope = h.build(legacy("a1b2c", "18.0.0").keep_oidc_provider_on_delete(true));
  h.converge(&meta("a1b2c"), &scope).await.unwrap();

  let meta = deleting(&h.refreshed(&meta("a1b2c")));
  assert_eq!(h.converge(&meta, &scope).await.unwrap(), Action::await_change());
  assert!(h.cloud.objects.bucket("123456789012-a1b2c-oidc-pod-identity").is_none());
  assert_eq!(h.cloud.identity.providers().len(), 1);
  assert_eq!(h.cloud.cdn.distributions().len(), 1);
  assert!(h.state.configmap_data(NAMESPACE, "a1b2c-irsa-cloudfront").is_some());
  assert_eq!(h.finalizers.written(&meta), Some(vec![]));
}

#[tokio::test]
async fn china_region_publishes_directly_in_its_partition() {
  let h = Harness::with_cloud(MemoryCloud::with_partition("000111222333", "aws-cn"));
  let scope = h.build(
    capa("demo")
      .role_arn("arn:aws-cn:iam::000111222333:role/irsa-operator")
      .region("cn-north-1")
      .base_domain(Some("gauss.example.com".into())),
  );
  assert!(!scope.cloudfront_enabled());

  h.converge(&meta("demo"), &scope).await.unwrap();
  let host = "s3.cn-north-1.amazonaws.com.cn/000111222333-demo-oidc-pod-identity";
  let provider = h.cloud.provider_for(host).unwrap();
  assert!(provider.arn.starts_with("arn:aws-cn:iam::000111222333:oidc-provider/"));

  let bucket = h.cloud.objects.bucket("000111222333-demo-oidc-pod-identity").unwrap();
  assert!(bucket.policy.unwrap().contains("arn:aws-cn:s3:::000111222333-demo-oidc-pod-identity/*"));
  assert_eq!(h.cloud.journal.count("cloudfront:CreateCloudFrontOriginAccessIdentity"), 0);
  assert_eq!(h.cloud.journal.count("acm:RequestCertificate"), 0);
}
