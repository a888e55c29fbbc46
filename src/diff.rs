//! Pure comparisons between live AWS state and desired state.

use crate::tags::TagSet;

/// Minimal change that takes a live tag set to a desired one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
  /// Desired tags missing from live or carrying a different value.
  pub to_add: TagSet,
  /// Live keys absent from desired.
  pub to_remove: Vec<String>,
}

impl TagDiff {
  pub fn is_empty(&self) -> bool {
    self.to_add.is_empty() && self.to_remove.is_empty()
  }

  /// Result of applying this diff to `live`.
  pub fn apply(&self, live: &TagSet) -> TagSet {
    let mut out = live.merged(&self.to_add);
    for key in &self.to_remove {
      out.remove(key);
    }
    out
  }
}

pub fn tag_diff(live: &TagSet, desired: &TagSet) -> TagDiff {
  let to_add = desired
    .iter()
    .filter(|(k, v)| live.get(k) != Some(*v))
    .collect();
  let to_remove = live
    .keys()
    .filter(|k| !desired.contains_key(k))
    .map(str::to_string)
    .collect();
  TagDiff { to_add, to_remove }
}

/// The part of a distribution configuration the operator manages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewerConfig {
  pub aliases: Vec<String>,
  pub certificate_arn: Option<String>,
}

impl ViewerConfig {
  pub fn new(aliases: Vec<String>, certificate_arn: Option<String>) -> Self {
    Self {
      aliases,
      certificate_arn: certificate_arn.filter(|arn| !arn.is_empty()),
    }
  }
}

/// Whether an update call is warranted to move `live` to `desired`.
pub fn distribution_needs_update(live: &ViewerConfig, desired: &ViewerConfig) -> bool {
  let live_cert = live.certificate_arn.as_deref().filter(|a| !a.is_empty());
  let desired_cert = desired.certificate_arn.as_deref().filter(|a| !a.is_empty());
  live.aliases != desired.aliases || live_cert != desired_cert
}
