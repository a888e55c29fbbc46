//! Turns a watched cluster object into a [`ClusterScope`].
//!
//! The three flavors differ only here: where the region, the role ARN and the
//! customer tags come from. Everything after resolution is shared.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::{Client, Resource};
use tokio_util::sync::CancellationToken;

use crate::crd::{capa, eks, legacy};
use crate::error::{Error, Result};
use crate::scope::{
  parse_flag, parse_release, Cache, ClusterScope, ClusterScopeBuilder, Flavor, KEEP_OIDC_PROVIDER_ANNOTATION,
  MIGRATION_ANNOTATION, ORGANIZATION_LABEL, PRE_CLOUDFRONT_ALIAS_ANNOTATION,
};
use crate::tags::TagSet;

/// Key of the role ARN inside a legacy credential secret.
pub const CREDENTIAL_ROLE_KEY: &str = "aws.awsoperator.arn";

/// Where role ARNs referenced by cluster objects are read from.
#[async_trait]
pub trait RoleLookup: Send + Sync {
  async fn credential_secret_role(&self, namespace: &str, name: &str) -> Result<String>;

  async fn cluster_role_identity(&self, name: &str) -> Result<String>;
}

pub struct KubeRoleLookup {
  client: Client,
}

impl KubeRoleLookup {
  pub fn new(client: Client) -> Self {
    Self { client }
  }
}

#[async_trait]
impl RoleLookup for KubeRoleLookup {
  async fn credential_secret_role(&self, namespace: &str, name: &str) -> Result<String> {
    let api = Api::<Secret>::namespaced(self.client.clone(), namespace);
    let secret = api
      .get_opt(name)
      .await?
      .ok_or_else(|| Error::not_ready(format!("secret {namespace}/{name}"), "credential secret does not exist"))?;
    let raw = secret
      .data
      .unwrap_or_default()
      .remove(CREDENTIAL_ROLE_KEY)
      .ok_or_else(|| Error::validation(format!("secret {namespace}/{name} has no {CREDENTIAL_ROLE_KEY}")))?;
    String::from_utf8(raw.0)
      .map(|arn| arn.trim().to_string())
      .map_err(|_| Error::validation(format!("secret {namespace}/{name}: {CREDENTIAL_ROLE_KEY} is not utf-8")))
  }

  async fn cluster_role_identity(&self, name: &str) -> Result<String> {
    let api = Api::<capa::AwsClusterRoleIdentity>::all(self.client.clone());
    let identity = api
      .get_opt(name)
      .await?
      .ok_or_else(|| Error::not_ready(format!("{} {name}", capa::ROLE_IDENTITY_KIND), "identity does not exist"))?;
    Ok(identity.spec.role_arn)
  }
}

/// Role ARNs held in memory, for tests.
#[derive(Debug, Default)]
pub struct MemoryRoleLookup {
  secrets: Mutex<BTreeMap<String, String>>,
  identities: Mutex<BTreeMap<String, String>>,
}

impl MemoryRoleLookup {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_secret(self, namespace: &str, name: &str, arn: &str) -> Self {
    self
      .secrets
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .insert(format!("{namespace}/{name}"), arn.to_string());
    self
  }

  pub fn with_identity(self, name: &str, arn: &str) -> Self {
    self
      .identities
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .insert(name.to_string(), arn.to_string());
    self
  }
}

#[async_trait]
impl RoleLookup for MemoryRoleLookup {
  async fn credential_secret_role(&self, namespace: &str, name: &str) -> Result<String> {
    self
      .secrets
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .get(&format!("{namespace}/{name}"))
      .cloned()
      .ok_or_else(|| Error::not_ready(format!("secret {namespace}/{name}"), "credential secret does not exist"))
  }

  async fn cluster_role_identity(&self, name: &str) -> Result<String> {
    self
      .identities
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .get(name)
      .cloned()
      .ok_or_else(|| Error::not_ready(format!("{} {name}", capa::ROLE_IDENTITY_KIND), "identity does not exist"))
  }
}

/// A cluster object the operator can resolve.
#[async_trait]
pub trait ResolveIdentity: Resource + Send + Sync {
  const FLAVOR: Flavor;

  /// Fill in the flavor specific inputs.
  async fn complete(&self, builder: ClusterScopeBuilder, resolver: &Resolver) -> Result<ClusterScopeBuilder>;
}

/// Shared inputs for resolving any flavor.
pub struct Resolver {
  roles: std::sync::Arc<dyn RoleLookup>,
  installation: String,
  base_domain: Option<String>,
  cache: Cache,
}

impl Resolver {
  pub fn new(
    roles: std::sync::Arc<dyn RoleLookup>,
    installation: impl Into<String>,
    base_domain: Option<String>,
    cache: Cache,
  ) -> Self {
    Self {
      roles,
      installation: installation.into(),
      base_domain: base_domain.filter(|d| !d.is_empty()),
      cache,
    }
  }

  pub async fn resolve<K: ResolveIdentity>(&self, cluster: &K, cancel: CancellationToken) -> Result<ClusterScope> {
    let meta = cluster.meta();
    let name = meta.name.clone().unwrap_or_default();
    let namespace = meta.namespace.clone().unwrap_or_default();
    let annotations = meta.annotations.clone().unwrap_or_default();
    let labels = meta.labels.clone().unwrap_or_default();

    let builder = ClusterScope::builder(K::FLAVOR, name, namespace)
      .installation_name(self.installation.clone())
      .release_version(parse_release(&labels)?)
      .organization(labels.get(ORGANIZATION_LABEL).cloned())
      .keep_oidc_provider_on_delete(parse_flag(&annotations, KEEP_OIDC_PROVIDER_ANNOTATION)?)
      .pre_cloudfront_alias(parse_flag(&annotations, PRE_CLOUDFRONT_ALIAS_ANNOTATION)?)
      .migration_needed(parse_flag(&annotations, MIGRATION_ANNOTATION)?)
      .base_domain(self.base_domain.clone())
      .cancellation(cancel);

    cluster.complete(builder, self).await?.build(&self.cache)
  }

  async fn identity_role(&self, identity: Option<&capa::IdentityRef>) -> Result<String> {
    let name = match identity {
      None => capa::DEFAULT_IDENTITY_NAME,
      Some(r) if r.kind == capa::ROLE_IDENTITY_KIND => r.name.as_str(),
      Some(r) => {
        return Err(Error::validation(format!(
          "identity kind {} is not supported, use {}",
          r.kind,
          capa::ROLE_IDENTITY_KIND
        )))
      }
    };
    self.roles.cluster_role_identity(name).await
  }
}

fn customer_tags(tags: Option<&BTreeMap<String, String>>) -> TagSet {
  tags.cloned().map(TagSet::from).unwrap_or_default()
}

#[async_trait]
impl ResolveIdentity for legacy::AwsCluster {
  const FLAVOR: Flavor = Flavor::Legacy;

  async fn complete(&self, builder: ClusterScopeBuilder, resolver: &Resolver) -> Result<ClusterScopeBuilder> {
    let secret = self
      .spec
      .provider
      .credential_secret
      .as_ref()
      .ok_or_else(|| Error::validation("legacy cluster has no credential secret"))?;
    let role_arn = resolver
      .roles
      .credential_secret_role(&secret.namespace, &secret.name)
      .await?;
    let domain = Some(self.spec.cluster.dns.domain.clone())
      .filter(|d| !d.is_empty())
      .or_else(|| resolver.base_domain.clone());
    Ok(
      builder
        .role_arn(role_arn)
        .region(self.spec.provider.region.clone())
        .base_domain(domain),
    )
  }
}

#[async_trait]
impl ResolveIdentity for capa::AwsCluster {
  const FLAVOR: Flavor = Flavor::Capa;

  async fn complete(&self, builder: ClusterScopeBuilder, resolver: &Resolver) -> Result<ClusterScopeBuilder> {
    let role_arn = resolver.identity_role(self.spec.identity_ref.as_ref()).await?;
    Ok(
      builder
        .role_arn(role_arn)
        .region(self.spec.region.clone())
        .customer_tags(customer_tags(self.spec.additional_tags.as_ref())),
    )
  }
}

#[async_trait]
impl ResolveIdentity for eks::AwsManagedControlPlane {
  const FLAVOR: Flavor = Flavor::Eks;

  async fn complete(&self, builder: ClusterScopeBuilder, resolver: &Resolver) -> Result<ClusterScopeBuilder> {
    let role_arn = resolver.identity_role(self.spec.identity_ref.as_ref()).await?;
    let mut builder = builder
      .role_arn(role_arn)
      .region(self.spec.region.clone())
      .customer_tags(customer_tags(self.spec.additional_tags.as_ref()));
    if let Some(name) = self.spec.eks_cluster_name.as_ref().filter(|n| !n.is_empty()) {
      builder = builder.eks_cluster_name(name.clone());
    }
    Ok(builder)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Kind;
  use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
  use std::sync::Arc;

  const ARN: &str = "arn:aws:iam::123456789012:role/capa";

  fn meta(annotations: &[(&str, &str)], labels: &[(&str, &str)]) -> ObjectMeta {
    let map = |pairs: &[(&str, &str)]| {
      pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>()
    };
    ObjectMeta {
      name: Some("demo".into()),
      namespace: Some("org-acme".into()),
      annotations: Some(map(annotations)),
      labels: Some(map(labels)),
      ..ObjectMeta::default()
    }
  }

  fn resolver(roles: MemoryRoleLookup) -> Resolver {
    Resolver::new(Arc::new(roles), "gauss", Some("gauss.example.com".into()), Cache::new())
  }

  fn capa_cluster(meta: ObjectMeta, identity: Option<capa::IdentityRef>) -> capa::AwsCluster {
    let mut cluster = capa::AwsCluster::new(
      "demo",
      capa::AwsClusterSpec {
        region: "eu-west-1".into(),
        identity_ref: identity,
        additional_tags: Some(BTreeMap::from([("team".to_string(), "platform".to_string())])),
      },
    );
    cluster.metadata = meta;
    cluster
  }

  #[tokio::test]
  async fn capa_uses_default_identity_and_customer_tags() {
    let resolver = resolver(MemoryRoleLookup::new().with_identity("default", ARN));
    let scope = resolver
      .resolve(&capa_cluster(meta(&[], &[]), None), CancellationToken::new())
      .await
      .unwrap();

    assert_eq!(scope.flavor(), Flavor::Capa);
    assert_eq!(scope.account_id(), "123456789012");
    assert_eq!(scope.bucket_name(), "123456789012-demo-oidc-pod-identity");
    assert_eq!(scope.customer_tags().get("team"), Some("platform"));
    assert_eq!(scope.alias_domain(), Some("irsa.demo.gauss.example.com"));
    assert!(scope.cloudfront_enabled());
  }

  #[tokio::test]
  async fn annotations_and_labels_become_flags() {
    let resolver = resolver(MemoryRoleLookup::new().with_identity("default", ARN));
    let meta = meta(
      &[(KEEP_OIDC_PROVIDER_ANNOTATION, "true"), (MIGRATION_ANNOTATION, "false")],
      &[("release.controlant.com/version", "v20.1.0"), (ORGANIZATION_LABEL, "acme-corp")],
    );
    let scope = resolver
      .resolve(&capa_cluster(meta, None), CancellationToken::new())
      .await
      .unwrap();

    assert!(scope.keep_oidc_provider_on_delete());
    assert!(!scope.migration_needed());
    assert_eq!(scope.release_version().map(|v| v.major), Some(20));
    assert_eq!(scope.internal_tags().get("controlant.com/organization"), Some("acme-corp"));
  }

  #[tokio::test]
  async fn malformed_flag_is_fatal() {
    let resolver = resolver(MemoryRoleLookup::new().with_identity("default", ARN));
    let err = resolver
      .resolve(
        &capa_cluster(meta(&[(KEEP_OIDC_PROVIDER_ANNOTATION, "yes")], &[]), None),
        CancellationToken::new(),
      )
      .await
      .unwrap_err();
    assert_eq!(err.kind(), Kind::Fatal);
  }

  #[tokio::test]
  async fn unsupported_identity_kind_is_rejected() {
    let resolver = resolver(MemoryRoleLookup::new());
    let identity = capa::IdentityRef {
      kind: "AWSClusterStaticIdentity".into(),
      name: "static".into(),
    };
    let err = resolver
      .resolve(&capa_cluster(meta(&[], &[]), Some(identity)), CancellationToken::new())
      .await
      .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
  }

  #[tokio::test]
  async fn missing_identity_is_not_ready() {
    let resolver = resolver(MemoryRoleLookup::new());
    let err = resolver
      .resolve(&capa_cluster(meta(&[], &[]), None), CancellationToken::new())
      .await
      .unwrap_err();
    assert_eq!(err.kind(), Kind::NotYetReady);
  }

  #[tokio::test]
  async fn legacy_reads_credential_secret_and_cluster_domain() {
    let resolver = resolver(MemoryRoleLookup::new().with_secret(
      "giantswarm",
      "credential-default",
      "arn:aws:iam::000111222333:role/legacy",
    ));
    let mut cluster = legacy::AwsCluster::new(
      "a1b2c",
      legacy::AwsClusterSpec {
        cluster: legacy::ClusterSection {
          description: None,
          dns: legacy::DnsSection {
            domain: "a1b2c.k8s.example.org".into(),
          },
        },
        provider: legacy::ProviderSection {
          region: "eu-central-1".into(),
          credential_secret: Some(legacy::CredentialSecret {
            name: "credential-default".into(),
            namespace: "giantswarm".into(),
          }),
        },
      },
    );
    cluster.metadata.namespace = Some("org-acme".into());
    cluster.metadata.labels = Some(BTreeMap::from([(
      "release.controlant.com/version".to_string(),
      "19.0.0".to_string(),
    )]));

    let scope = resolver.resolve(&cluster, CancellationToken::new()).await.unwrap();
    assert_eq!(scope.account_id(), "000111222333");
    assert_eq!(scope.region(), "eu-central-1");
    assert_eq!(scope.alias_domain(), Some("irsa.a1b2c.a1b2c.k8s.example.org"));
  }

  #[tokio::test]
  async fn eks_defaults_cluster_name() {
    let resolver = resolver(MemoryRoleLookup::new().with_identity("default", ARN));
    let mut cp = eks::AwsManagedControlPlane::new(
      "demo",
      eks::AwsManagedControlPlaneSpec {
        region: "us-west-2".into(),
        ..Default::default()
      },
    );
    cp.metadata.namespace = Some("org-acme".into());

    let scope = resolver.resolve(&cp, CancellationToken::new()).await.unwrap();
    assert_eq!(scope.eks_cluster_name(), Some("org-acme_demo"));
    assert!(!scope.cloudfront_enabled());
  }
}
