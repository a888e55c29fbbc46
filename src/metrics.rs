//! Metrics sink handed to the orchestrator.
//!
//! Registration with an exporter is left to the host process; the operator
//! only reports outcomes through [`Metrics`].

use dashmap::DashMap;

use crate::error::Kind;
use crate::scope::Flavor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
  Converged,
  NotYetReady,
  Failed,
}

impl Outcome {
  pub fn from_kind(kind: Kind) -> Self {
    match kind {
      Kind::NotYetReady => Self::NotYetReady,
      Kind::Retryable | Kind::Fatal => Self::Failed,
    }
  }
}

pub trait Metrics: Send + Sync {
  fn reconcile_finished(&self, flavor: Flavor, outcome: Outcome);
  fn teardown_finished(&self, flavor: Flavor, outcome: Outcome);
  /// An AWS call failed, whether or not it was retried.
  fn aws_error(&self, operation: &str);
}

#[derive(Debug, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
  fn reconcile_finished(&self, _: Flavor, _: Outcome) {}
  fn teardown_finished(&self, _: Flavor, _: Outcome) {}
  fn aws_error(&self, _: &str) {}
}

/// In-process counters keyed by label string.
#[derive(Debug, Default)]
pub struct CountingMetrics {
  counters: DashMap<String, u64>,
}

impl CountingMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, key: &str) -> u64 {
    self.counters.get(key).map(|v| *v).unwrap_or(0)
  }

  fn bump(&self, key: String) {
    *self.counters.entry(key).or_insert(0) += 1;
  }
}

impl Metrics for CountingMetrics {
  fn reconcile_finished(&self, flavor: Flavor, outcome: Outcome) {
    self.bump(format!("reconcile/{flavor}/{outcome:?}"));
  }

  fn teardown_finished(&self, flavor: Flavor, outcome: Outcome) {
    self.bump(format!("teardown/{flavor}/{outcome:?}"));
  }

  fn aws_error(&self, operation: &str) {
    self.bump(format!("aws_error/{operation}"));
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn counts_by_label() {
    let m = CountingMetrics::new();
    m.reconcile_finished(Flavor::Capa, Outcome::Converged);
    m.reconcile_finished(Flavor::Capa, Outcome::Converged);
    m.teardown_finished(Flavor::Legacy, Outcome::from_kind(Kind::NotYetReady));

    assert_eq!(m.get("reconcile/capa/Converged"), 2);
    assert_eq!(m.get("teardown/legacy/NotYetReady"), 1);
    assert_eq!(m.get("aws_error/s3:PutObject"), 0);
  }
}
