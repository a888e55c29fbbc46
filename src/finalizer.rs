//! Finalizer bookkeeping on watched cluster objects.
//!
//! The finalizer is added before the first AWS write and removed as the last
//! Kubernetes write of a teardown. Objects created by older releases may
//! carry [`DEPRECATED_FINALIZER`]; it counts as ours and is removed together
//! with the current one. `kube::runtime::finalizer` only knows a single
//! name, so both are handled here with the same guarded patches it uses.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Mutex;

use async_trait::async_trait;
use json_patch::{PatchOperation, ReplaceOperation, TestOperation};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, Patch, PatchParams};
use kube::Resource;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::Result;

pub const FINALIZER: &str = "irsa-operator.controlant.com";
pub const DEPRECATED_FINALIZER: &str = "irsa-operator.controlant.com/finalizer";

const FINALIZERS_PATH: &str = "/metadata/finalizers";

fn is_ours(finalizer: &str) -> bool {
  finalizer == FINALIZER || finalizer == DEPRECATED_FINALIZER
}

/// Carries the current finalizer.
pub fn has_finalizer(meta: &ObjectMeta) -> bool {
  meta.finalizers.iter().flatten().any(|f| f == FINALIZER)
}

/// Carries the current or the deprecated finalizer.
pub fn has_any_finalizer(meta: &ObjectMeta) -> bool {
  meta.finalizers.iter().flatten().any(|f| is_ours(f))
}

/// `current` plus our finalizer, `None` when already present.
pub fn with_finalizer(current: &[String]) -> Option<Vec<String>> {
  if current.iter().any(|f| f == FINALIZER) {
    return None;
  }
  let mut list = current.to_vec();
  list.push(FINALIZER.to_string());
  Some(list)
}

/// `current` without any of ours, `None` when there is nothing to remove.
pub fn without_finalizers(current: &[String]) -> Option<Vec<String>> {
  let remaining: Vec<String> = current.iter().filter(|f| !is_ours(f)).cloned().collect();
  (remaining.len() != current.len()).then_some(remaining)
}

#[async_trait]
pub trait Finalizers: Send + Sync {
  /// Add the current finalizer, keeping every other one.
  async fn add(&self, meta: &ObjectMeta) -> Result<()>;

  /// Remove the current and the deprecated finalizer in one write.
  async fn remove(&self, meta: &ObjectMeta) -> Result<()>;
}

/// Patches finalizers on objects served by `api`.
pub struct KubeFinalizers<K> {
  api: Api<K>,
}

impl<K> KubeFinalizers<K> {
  pub fn new(api: Api<K>) -> Self {
    Self { api }
  }
}

#[async_trait]
impl<K> Finalizers for KubeFinalizers<K>
where
  K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
  async fn add(&self, meta: &ObjectMeta) -> Result<()> {
    let current = meta.finalizers.clone().unwrap_or_default();
    let Some(list) = with_finalizer(&current) else {
      return Ok(());
    };
    let name = meta.name.as_deref().unwrap_or_default();
    // resourceVersion makes the merge fail instead of clobbering a concurrent edit
    let patch = json!({
      "metadata": {
        "finalizers": list,
        "resourceVersion": meta.resource_version,
      }
    });
    self
      .api
      .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
      .await?;
    Ok(())
  }

  async fn remove(&self, meta: &ObjectMeta) -> Result<()> {
    let current = meta.finalizers.clone().unwrap_or_default();
    let Some(remaining) = without_finalizers(&current) else {
      return Ok(());
    };
    let name = meta.name.as_deref().unwrap_or_default();
    self
      .api
      .patch(
        name,
        &PatchParams::default(),
        &Patch::<()>::Json(json_patch::Patch(vec![
          PatchOperation::Test(TestOperation {
            path: FINALIZERS_PATH.to_string(),
            value: json!(current),
          }),
          PatchOperation::Replace(ReplaceOperation {
            path: FINALIZERS_PATH.to_string(),
            value: json!(remaining),
          }),
        ])),
      )
      .await?;
    Ok(())
  }
}

/// Finalizer lists per `namespace/name`, for tests.
#[derive(Debug, Default)]
pub struct MemoryFinalizers {
  lists: Mutex<BTreeMap<String, Vec<String>>>,
}

impl MemoryFinalizers {
  pub fn new() -> Self {
    Self::default()
  }

  fn key(meta: &ObjectMeta) -> String {
    format!(
      "{}/{}",
      meta.namespace.as_deref().unwrap_or_default(),
      meta.name.as_deref().unwrap_or_default()
    )
  }

  /// Last list written for the object, `None` if never patched.
  pub fn written(&self, meta: &ObjectMeta) -> Option<Vec<String>> {
    self.lists.lock().unwrap_or_else(|p| p.into_inner()).get(&Self::key(meta)).cloned()
  }

  /// `meta` with the last written list applied.
  pub fn apply_to(&self, meta: &ObjectMeta) -> ObjectMeta {
    let mut out = meta.clone();
    if let Some(list) = self.written(meta) {
      out.finalizers = Some(list);
    }
    out
  }

  fn write(&self, meta: &ObjectMeta, list: Vec<String>) {
    self
      .lists
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .insert(Self::key(meta), list);
  }
}

#[async_trait]
impl Finalizers for MemoryFinalizers {
  async fn add(&self, meta: &ObjectMeta) -> Result<()> {
    if let Some(list) = with_finalizer(meta.finalizers.as_deref().unwrap_or_default()) {
      self.write(meta, list);
    }
    Ok(())
  }

  async fn remove(&self, meta: &ObjectMeta) -> Result<()> {
    if let Some(list) = without_finalizers(meta.finalizers.as_deref().unwrap_or_default()) {
      self.write(meta, list);
    }
    Ok(())
  }
}
