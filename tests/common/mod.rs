#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::runtime::controller::Action;
use semver::Version;

use irsa::cloud::memory::MemoryCloud;
use irsa::config::Requeue;
use irsa::controller::converge;
use irsa::finalizer::MemoryFinalizers;
use irsa::metrics::CountingMetrics;
use irsa::orchestrator::{Orchestrator, OrchestratorSettings};
use irsa::scope::{Cache, ClusterScope, ClusterScopeBuilder, Flavor};
use irsa::state::MemoryStateStore;
use irsa::tags::TagSet;
use irsa::thumbprint::FixedThumbprints;
use irsa::Result;

pub const ACCOUNT: &str = "123456789012";
pub const ROLE_ARN: &str = "arn:aws:iam::123456789012:role/irsa-operator";
pub const NAMESPACE: &str = "org-acme";

/// One fake account, state store and orchestrator wired together.
pub struct Harness {
  pub cloud: MemoryCloud,
  pub state: Arc<MemoryStateStore>,
  pub thumbprints: Arc<FixedThumbprints>,
  pub metrics: Arc<CountingMetrics>,
  pub finalizers: MemoryFinalizers,
  pub cache: Cache,
  pub orchestrator: Orchestrator,
  pub requeue: Requeue,
}

impl Harness {
  pub fn new() -> Self {
    Self::with_cloud(MemoryCloud::new(ACCOUNT))
  }

  pub fn with_cloud(cloud: MemoryCloud) -> Self {
    Self::with_cloud_and_cache(cloud, Cache::new())
  }

  /// A second account can share the process cache with the first.
  pub fn with_cloud_and_cache(cloud: MemoryCloud, cache: Cache) -> Self {
    let state = Arc::new(MemoryStateStore::new());
    let thumbprints = Arc::new(FixedThumbprints::new());
    let metrics = Arc::new(CountingMetrics::new());
    let orchestrator = Orchestrator::new(
      Arc::new(cloud.clone()),
      state.clone(),
      thumbprints.clone(),
      metrics.clone(),
      cache.clone(),
      OrchestratorSettings::immediate(),
    );
    Self {
      cloud,
      state,
      thumbprints,
      metrics,
      finalizers: MemoryFinalizers::new(),
      cache,
      orchestrator,
      requeue: Requeue::default(),
    }
  }

  pub fn build(&self, builder: ClusterScopeBuilder) -> ClusterScope {
    builder.build(&self.cache).unwrap()
  }

  /// One controller pass over `meta`, as the watch loop would run it.
  pub async fn converge(&self, meta: &ObjectMeta, scope: &ClusterScope) -> Result<Action> {
    let scope = scope.clone();
    converge(
      meta,
      async move { Ok(scope) },
      &self.orchestrator,
      &self.finalizers,
      &self.requeue,
    )
    .await
  }

  /// `meta` as the API server would return it after our finalizer writes.
  pub fn refreshed(&self, meta: &ObjectMeta) -> ObjectMeta {
    self.finalizers.apply_to(meta)
  }
}

pub fn legacy(name: &str, release: &str) -> ClusterScopeBuilder {
  ClusterScope::builder(Flavor::Legacy, name, NAMESPACE)
    .role_arn(ROLE_ARN)
    .region("eu-west-1")
    .installation_name("gauss")
    .release_version(Some(Version::parse(release).unwrap()))
}

pub fn capa(name: &str) -> ClusterScopeBuilder {
  ClusterScope::builder(Flavor::Capa, name, NAMESPACE)
    .role_arn(ROLE_ARN)
    .region("eu-west-1")
    .installation_name("gauss")
}

pub fn eks(name: &str) -> ClusterScopeBuilder {
  ClusterScope::builder(Flavor::Eks, name, NAMESPACE)
    .role_arn(ROLE_ARN)
    .region("us-west-2")
    .installation_name("gauss")
}

pub fn tags(pairs: &[(&str, &str)]) -> TagSet {
  pairs.iter().copied().collect()
}

pub fn meta(name: &str) -> ObjectMeta {
  ObjectMeta {
    name: Some(name.to_string()),
    namespace: Some(NAMESPACE.to_string()),
    resource_version: Some("1".to_string()),
    annotations: Some(BTreeMap::new()),
    ..ObjectMeta::default()
  }
}

/// `meta` marked for deletion.
pub fn deleting(meta: &ObjectMeta) -> ObjectMeta {
  ObjectMeta {
    deletion_timestamp: Some(Time(k8s_openapi::chrono::Utc::now())),
    ..meta.clone()
  }
}
