//! Tag sets applied to every AWS resource the operator owns.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const ORGANIZATION_TAG: &str = "controlant.com/organization";
pub const CLUSTER_TAG: &str = "controlant.com/cluster";
pub const INSTALLATION_TAG: &str = "controlant.com/installation";

/// Key → value tags. Ordering carries no meaning, keys are case sensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
    self.0.insert(key.into(), value.into())
  }

  pub fn remove(&mut self, key: &str) -> Option<String> {
    self.0.remove(key)
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  pub fn contains_key(&self, key: &str) -> bool {
    self.0.contains_key(key)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
  }

  pub fn keys(&self) -> impl Iterator<Item = &str> {
    self.0.keys().map(String::as_str)
  }

  /// `other` layered over `self`; on key clash `other` wins.
  pub fn merged(&self, other: &TagSet) -> TagSet {
    let mut out = self.clone();
    for (k, v) in other.iter() {
      out.insert(k, v);
    }
    out
  }
}

impl From<BTreeMap<String, String>> for TagSet {
  fn from(map: BTreeMap<String, String>) -> Self {
    Self(map)
  }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for TagSet {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
  }
}

impl IntoIterator for TagSet {
  type Item = (String, String);
  type IntoIter = std::collections::btree_map::IntoIter<String, String>;

  fn into_iter(self) -> Self::IntoIter {
    self.0.into_iter()
  }
}

/// Who provisioned the cluster, which decides the ownership tag key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
  Legacy,
  ClusterApi,
}

impl Ownership {
  pub fn tag_key(self, cluster: &str) -> String {
    match self {
      Self::Legacy => format!("kubernetes.io/cluster/{cluster}"),
      Self::ClusterApi => format!("sigs.k8s.io/cluster-api-provider-aws/cluster/{cluster}"),
    }
  }
}

/// Tags the operator itself guarantees on every resource.
pub fn internal_tags(
  cluster: &str,
  installation: &str,
  organization: Option<&str>,
  ownership: Ownership,
) -> TagSet {
  let mut tags = TagSet::new();
  tags.insert(CLUSTER_TAG, cluster);
  tags.insert(INSTALLATION_TAG, installation);
  if let Some(org) = organization {
    tags.insert(ORGANIZATION_TAG, org);
  }
  tags.insert(ownership.tag_key(cluster), "owned");
  tags
}

/// Organization name from an `org-<name>` namespace.
pub fn organization_from_namespace(namespace: &str) -> Option<&str> {
  namespace.strip_prefix("org-").filter(|org| !org.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn internal_tags_win_over_customer_tags() {
    let customer: TagSet = [(CLUSTER_TAG, "spoofed"), ("team", "payments")].into_iter().collect();
    let internal = internal_tags("demo", "gauss", Some("acme"), Ownership::ClusterApi);

    let all = customer.merged(&internal);

    assert_eq!(all.get(CLUSTER_TAG), Some("demo"));
    assert_eq!(all.get("team"), Some("payments"));
    assert_eq!(all.get("sigs.k8s.io/cluster-api-provider-aws/cluster/demo"), Some("owned"));
    assert_eq!(all.get(ORGANIZATION_TAG), Some("acme"));
  }

  #[test]
  fn legacy_ownership_key() {
    let tags = internal_tags("a1b2c", "gauss", None, Ownership::Legacy);
    assert_eq!(tags.get("kubernetes.io/cluster/a1b2c"), Some("owned"));
    assert!(!tags.contains_key(ORGANIZATION_TAG));
  }

  #[test]
  fn organization_namespace() {
    assert_eq!(organization_from_namespace("org-acme"), Some("acme"));
    assert_eq!(organization_from_namespace("org-"), None);
    assert_eq!(organization_from_namespace("default"), None);
  }
}
