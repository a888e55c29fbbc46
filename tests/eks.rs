mod common;

use std::time::Duration;

use kube::runtime::controller::Action;

use common::*;

const ISSUER: &str = "https://oidc.eks.us-west-2.amazonaws.com/id/5C7B9AE6D5AC4D2E84CF5D5B2A4F0E11";
const ISSUER_HOST: &str = "oidc.eks.us-west-2.amazonaws.com/id/5C7B9AE6D5AC4D2E84CF5D5B2A4F0E11";

#[tokio::test]
async fn registers_provider_for_eks_issuer() {
  let h = Harness::new();
  h.cloud.managed.set_issuer("org-acme_demo", ISSUER);
  let scope = h.build(eks("demo").customer_tags(tags(&[("team", "platform")])));

  let action = h.converge(&meta("demo"), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(300)));

  let provider = h.cloud.provider_for(ISSUER_HOST).unwrap();
  assert_eq!(provider.url, ISSUER);
  assert_eq!(provider.tags.get("team"), Some("platform"));
  assert_eq!(
    provider.tags.get("sigs.k8s.io/cluster-api-provider-aws/cluster/demo"),
    Some("owned")
  );
  assert_eq!(h.thumbprints.lookups(), vec!["oidc.eks.us-west-2.amazonaws.com".to_string()]);
  assert_eq!(h.cloud.journal.count("s3:HeadBucket"), 0);
  assert!(h.state.secret_data(NAMESPACE, "demo-service-account-v2").is_none());
}

#[tokio::test]
async fn control_plane_without_issuer_is_not_ready() {
  let h = Harness::new();
  let scope = h.build(eks("demo"));

  // not created yet
  let action = h.converge(&meta("demo"), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(30)));

  // created, issuer not assigned yet
  h.cloud.managed.set_issuer("org-acme_demo", "");
  let action = h.converge(&h.refreshed(&meta("demo")), &scope).await.unwrap();
  assert_eq!(action, Action::requeue(Duration::from_secs(30)));
  assert!(h.cloud.identity.providers().is_empty());
}

#[tokio::test]
async fn explicit_cluster_name_is_used() {
  let h = Harness::new();
  h.cloud.managed.set_issuer("prod-eks", ISSUER);
  let scope = h.build(eks("demo").eks_cluster_name("prod-eks"));

  h.converge(&meta("demo"), &scope).await.unwrap();
  assert_eq!(h.cloud.journal.position("eks:DescribeCluster prod-eks"), Some(0));
  assert!(h.cloud.provider_for(ISSUER_HOST).is_some());
}

#[tokio::test]
async fn delete_releases_the_provider_without_deleting_it() {
  let h = Harness::new();
  h.cloud.managed.set_issuer("org-acme_demo", ISSUER);
  let scope = h.build(eks("demo").customer_tags(tags(&[("team", "platform")])));
  h.converge(&meta("demo"), &scope).await.unwrap();
  let arn = h.cloud.provider_for(ISSUER_HOST).unwrap().arn;
  h.cloud.identity.tag_externally(&arn, "owner", "infrastructure");

  let meta = deleting(&h.refreshed(&meta("demo")));
  h.cloud.journal.clear();
  assert_eq!(h.converge(&meta, &scope).await.unwrap(), Action::await_change());

  assert_eq!(h.cloud.journal.count("iam:DeleteOpenIDConnectProvider"), 0);
  assert_eq!(h.cloud.journal.count("iam:UntagOpenIDConnectProvider"), 1);
  assert_eq!(h.cloud.journal.count("s3:DeleteBucket"), 0);
  assert_eq!(h.cloud.journal.count("cloudfront:DeleteDistribution"), 0);

  let provider = h.cloud.identity.provider(&arn).unwrap();
  assert_eq!(provider.tags.get("team"), None);
  assert_eq!(
    provider.tags.get("sigs.k8s.io/cluster-api-provider-aws/cluster/demo"),
    None
  );
  assert_eq!(provider.tags.get("owner"), Some("infrastructure"));
  assert_eq!(h.finalizers.written(&meta), Some(vec![]));
}

#[tokio::test]
async fn delete_after_control_plane_is_gone_still_finishes() {
  let h = Harness::new();
  let scope = h.build(eks("demo"));
  let mut meta = deleting(&meta("demo"));
  meta.finalizers = Some(vec![irsa::finalizer::FINALIZER.to_string()]);

  assert_eq!(h.converge(&meta, &scope).await.unwrap(), Action::await_change());
  assert_eq!(h.cloud.journal.count("iam:DeleteOpenIDConnectProvider"), 0);
  assert_eq!(h.finalizers.written(&meta), Some(vec![]));
}

#[tokio::test]
async fn kept_provider_survives_delete() {
  let h = Harness::new();
  h.cloud.managed.set_issuer("org-acme_demo", ISSUER);
  let scope = h.build(eks("demo").keep_oidc_provider_on_delete(true));
  h.converge(&meta("demo"), &scope).await.unwrap();

  let meta = deleting(&h.refreshed(&meta("demo")));
  h.cloud.journal.clear();
  assert_eq!(h.converge(&meta, &scope).await.unwrap(), Action::await_change());
  assert_eq!(h.cloud.identity.providers().len(), 1);
  assert_eq!(h.cloud.journal.count("eks:DescribeCluster"), 0);
  assert_eq!(h.cloud.journal.count("iam:UntagOpenIDConnectProvider"), 0);
}
