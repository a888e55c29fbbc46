mod common;

use std::time::Duration;

use kube::runtime::controller::Action;

use irsa::discovery::{DiscoveryDocument, DISCOVERY_OBJECT_KEY, JWKS_OBJECT_KEY, STS_CLIENT_ID};
use irsa::finalizer::{DEPRECATED_FINALIZER, FINALIZER};
use irsa::thumbprint::FixedThumbprints;
use irsa::Kind;

use common::*;

const BUCKET: &str = "123456789012-a1b2c-oidc-pod-identity";
const DIRECT_HOST: &str = "s3.eu-west-1.amazonaws.com/123456789012-a1b2c-oidc-pod-identity";

#[tokio::test]
async fn new_pre_migration_cluster_publishes_from_bucket() {
  let h = Harness::new();
  let scope = h.build(legacy("a1b2c", "17.3.0"));
  let meta = meta("a1b2c");

  let action = h.converge(&meta, &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(300)));
  assert_eq!(h.finalizers.written(&meta), Some(vec![FINALIZER.to_string()]));

  let bucket = h.cloud.objects.bucket(BUCKET).unwrap();
  assert!(bucket.encrypted);
  assert!(!bucket.public_access_blocked);
  assert!(bucket.policy.unwrap().contains("PublicReadGetObject"));
  assert_eq!(bucket.tags.get("controlant.com/cluster"), Some("a1b2c"));
  assert_eq!(bucket.tags.get("kubernetes.io/cluster/a1b2c"), Some("owned"));

  let document: DiscoveryDocument =
    serde_json::from_slice(&h.cloud.objects.object(BUCKET, DISCOVERY_OBJECT_KEY).unwrap()).unwrap();
  assert_eq!(document.issuer, format!("https://{DIRECT_HOST}"));
  assert_eq!(document.jwks_uri, format!("https://{DIRECT_HOST}/keys.json"));

  let jwks: serde_json::Value =
    serde_json::from_slice(&h.cloud.objects.object(BUCKET, JWKS_OBJECT_KEY).unwrap()).unwrap();
  assert_eq!(jwks["keys"][0]["alg"], "RS256");
  assert!(!jwks["keys"][0]["kid"].as_str().unwrap().is_empty());

  let provider = h.cloud.provider_for(DIRECT_HOST).unwrap();
  assert!(provider.arn.starts_with("arn:aws:iam::123456789012:oidc-provider/"));
  assert_eq!(provider.client_ids, vec![STS_CLIENT_ID.to_string()]);
  assert_eq!(provider.thumbprints, vec![FixedThumbprints::DEFAULT.to_string()]);
  assert_eq!(h.thumbprints.lookups(), vec!["s3.eu-west-1.amazonaws.com".to_string()]);

  assert!(h.state.secret_data(NAMESPACE, "a1b2c-service-account-v2").is_some());
  assert_eq!(h.cloud.journal.count("cloudfront:CreateDistributionWithTags"), 0);
  assert_eq!(h.metrics.get("reconcile/legacy/Converged"), 1);
}

#[tokio::test]
async fn second_reconcile_only_refreshes() {
  let h = Harness::new();
  let scope = h.build(legacy("a1b2c", "17.3.0"));
  let meta = meta("a1b2c");
  h.converge(&meta, &scope).await.unwrap();
  let meta = h.refreshed(&meta);
  let secret = h.state.secret_data(NAMESPACE, "a1b2c-service-account-v2");
  let jwks = h.cloud.objects.object(BUCKET, JWKS_OBJECT_KEY);

  h.cloud.journal.clear();
  h.converge(&meta, &scope).await.unwrap();

  assert_eq!(h.cloud.journal.count("s3:CreateBucket"), 0);
  assert_eq!(h.cloud.journal.count("iam:CreateOpenIDConnectProvider"), 0);
  assert_eq!(h.cloud.journal.count("iam:UpdateOpenIDConnectProviderThumbprint"), 0);
  assert_eq!(h.cloud.journal.count("iam:TagOpenIDConnectProvider"), 0);
  assert_eq!(h.cloud.journal.count("s3:HeadBucket"), 1);
  assert_eq!(h.cloud.journal.count("iam:GetOpenIDConnectProvider"), 1);
  assert_eq!(h.state.secret_data(NAMESPACE, "a1b2c-service-account-v2"), secret);
  assert_eq!(h.cloud.objects.object(BUCKET, JWKS_OBJECT_KEY), jwks);

  // rotated endpoint certificate
  h.thumbprints.set("s3.eu-west-1.amazonaws.com", "0123456789abcdef0123456789abcdef01234567");
  h.converge(&meta, &scope).await.unwrap();
  assert_eq!(h.cloud.journal.count("iam:UpdateOpenIDConnectProviderThumbprint"), 1);
  assert_eq!(
    h.cloud.provider_for(DIRECT_HOST).unwrap().thumbprints,
    vec!["0123456789abcdef0123456789abcdef01234567".to_string()]
  );
}

#[tokio::test]
async fn uploads_ride_out_a_lagging_bucket() {
  let h = Harness::new();
  let scope = h.build(legacy("a1b2c", "17.3.0"));
  h.cloud.faults.inject("s3:PutObject", 2, "NoSuchBucket");

  let action = h.converge(&meta("a1b2c"), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(300)));
  assert_eq!(h.cloud.journal.count("s3:PutObject"), 4);
  assert!(h.cloud.objects.object(BUCKET, DISCOVERY_OBJECT_KEY).is_some());
  assert!(h.cloud.objects.object(BUCKET, JWKS_OBJECT_KEY).is_some());
  assert!(h.cloud.provider_for(DIRECT_HOST).is_some());
}

#[tokio::test]
async fn delete_runs_in_order_and_survives_a_crash() {
  let h = Harness::new();
  let scope = h.build(legacy("a1b2c", "18.0.0"));
  let meta = meta("a1b2c");
  h.converge(&meta, &scope).await.unwrap();
  let record = h.state.configmap_data(NAMESPACE, "a1b2c-irsa-cloudfront").unwrap();
  let domain = record["domain"].clone();
  assert!(h.cloud.provider_for(&domain).is_some());

  let meta = deleting(&h.refreshed(&meta));
  h.cloud.journal.clear();
  // crash while the distribution is being deleted
  h.cloud.faults.inject("cloudfront:DeleteDistribution", 10, "ServiceUnavailable");
  let err = h.converge(&meta, &scope).await.unwrap_err();
  assert_eq!(err.kind(), Kind::Retryable);
  assert_eq!(h.finalizers.written(&meta), Some(vec![FINALIZER.to_string()]));
  assert!(h.cloud.objects.bucket(BUCKET).is_none());

  let journal = &h.cloud.journal;
  let order = [
    "s3:DeleteObject",
    "s3:DeleteBucket",
    "iam:DeleteOpenIDConnectProvider",
    "cloudfront:UpdateDistribution(disable)",
    "cloudfront:DeleteDistribution",
  ];
  for pair in order.windows(2) {
    assert!(
      journal.position(pair[0]).unwrap() < journal.position(pair[1]).unwrap(),
      "{} before {}",
      pair[0],
      pair[1]
    );
  }
  assert_eq!(journal.count("cloudfront:DeleteCloudFrontOriginAccessIdentity"), 0);

  h.cloud.faults.clear();
  journal.clear();
  let action = h.converge(&meta, &scope).await.unwrap();
  assert_eq!(action, Action::await_change());
  assert!(
    journal.last_position("cloudfront:DeleteDistribution").unwrap()
      < journal.position("cloudfront:DeleteCloudFrontOriginAccessIdentity").unwrap()
  );
  assert!(h.cloud.cdn.distributions().is_empty());
  assert!(h.cloud.cdn.origin_access_identities().is_empty());
  assert!(h.cloud.identity.providers().is_empty());
  assert!(h.state.configmap_data(NAMESPACE, "a1b2c-irsa-cloudfront").is_none());
  assert_eq!(h.finalizers.written(&meta), Some(vec![]));
}

#[tokio::test]
async fn customer_tag_changes_converge_everywhere() {
  let h = Harness::new();
  let meta = meta("demo");
  let scope = h.build(capa("demo").customer_tags(tags(&[("a", "b")])));
  h.converge(&meta, &scope).await.unwrap();
  let meta = h.refreshed(&meta);
  let distribution = h.cloud.cdn.distributions().remove(0);
  let provider = h.cloud.provider_for(&distribution.distribution.domain).unwrap();
  assert_eq!(provider.tags.get("a"), Some("b"));

  let scope = h.build(capa("demo").customer_tags(tags(&[("a", "c"), ("d", "e")])));
  h.converge(&meta, &scope).await.unwrap();
  let provider = h.cloud.identity.provider(&provider.arn).unwrap();
  assert_eq!(provider.tags.get("a"), Some("c"));
  assert_eq!(provider.tags.get("d"), Some("e"));
  assert_eq!(h.cloud.cdn.distribution(&distribution.distribution.id).unwrap().tags.get("d"), Some("e"));
  assert_eq!(
    h.cloud.objects.bucket("123456789012-demo-oidc-pod-identity").unwrap().tags.get("a"),
    Some("c")
  );

  // tags the cluster no longer asks for are removed
  h.cloud.identity.tag_externally(&provider.arn, "x", "y");
  h.converge(&meta, &scope).await.unwrap();
  assert_eq!(h.cloud.identity.provider(&provider.arn).unwrap().tags.get("x"), None);
  assert_eq!(h.cloud.journal.count("iam:UntagOpenIDConnectProvider"), 1);
}

#[tokio::test]
async fn deprecated_finalizer_is_migrated_and_removed() {
  let h = Harness::new();
  let scope = h.build(legacy("a1b2c", "17.3.0"));
  let mut meta = meta("a1b2c");
  meta.finalizers = Some(vec![DEPRECATED_FINALIZER.to_string()]);

  h.converge(&meta, &scope).await.unwrap();
  assert_eq!(
    h.finalizers.written(&meta),
    Some(vec![DEPRECATED_FINALIZER.to_string(), FINALIZER.to_string()])
  );

  let meta = deleting(&h.refreshed(&meta));
  assert_eq!(h.converge(&meta, &scope).await.unwrap(), Action::await_change());
  assert_eq!(h.finalizers.written(&meta), Some(vec![]));
}

#[tokio::test]
async fn deleted_object_without_finalizer_is_left_alone() {
  let h = Harness::new();
  let scope = h.build(legacy("a1b2c", "17.3.0"));
  let meta = deleting(&meta("a1b2c"));

  assert_eq!(h.converge(&meta, &scope).await.unwrap(), Action::await_change());
  assert!(h.cloud.journal.entries().is_empty());
  assert_eq!(h.finalizers.written(&meta), None);
}

#[tokio::test]
async fn fatal_errors_surface_to_the_controller() {
  let h = Harness::new();
  let scope = h.build(legacy("a1b2c", "17.3.0"));
  h.cloud.faults.inject("s3:CreateBucket", 1, "AccessDenied");

  let err = h.converge(&meta("a1b2c"), &scope).await.unwrap_err();
  assert_eq!(err.kind(), Kind::Fatal);
  assert_eq!(err.aws_code(), Some("AccessDenied"));
  assert_eq!(h.metrics.get("aws_error/s3:CreateBucket"), 1);
  assert_eq!(h.metrics.get("reconcile/legacy/Failed"), 1);
}

#[tokio::test]
async fn cancelled_reconcile_stops_before_writing() {
  let h = Harness::new();
  let token = tokio_util::sync::CancellationToken::new();
  token.cancel();
  let scope = h.build(legacy("a1b2c", "17.3.0").cancellation(token));

  let err = h.converge(&meta("a1b2c"), &scope).await.unwrap_err();
  assert!(matches!(err, irsa::Error::Cancelled));
  assert_eq!(h.finalizers.written(&meta("a1b2c")), None);
  assert!(h.cloud.journal.entries().is_empty());
}
