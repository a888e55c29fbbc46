//! Error type shared by every part of the operator.
//!
//! Errors are classified by [`Kind`], which the controller inspects to decide
//! between a quick requeue, a slow requeue, or a silent wait.

use thiserror::Error;

/// AWS error codes that will not go away by retrying.
const FATAL_AWS_CODES: &[&str] = &[
  "AccessDenied",
  "AccessDeniedException",
  "InvalidArgument",
  "InvalidBucketName",
  "InvalidClientTokenId",
  "InvalidInput",
  "MalformedPolicy",
  "UnauthorizedOperation",
  "ValidationError",
];

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// How the caller should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
  /// Transient, reschedule soon.
  Retryable,
  /// Needs a spec change or a human.
  Fatal,
  /// Expected propagation delay, reschedule quietly.
  NotYetReady,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
  /// Cluster input that cannot be turned into a scope
  #[error("invalid cluster input: {0}")]
  Validation(String),

  /// Persisted state exists but cannot be used as is
  #[error("inconsistent state in {resource}: {reason}")]
  PartialState { resource: String, reason: String },

  /// Normalised AWS SDK failure
  #[error("{operation} failed ({}): {message}", .code.as_deref().unwrap_or("unknown"))]
  Aws {
    operation: &'static str,
    code: Option<String>,
    message: String,
    retryable: bool,
  },

  #[error("kube error: {0}")]
  Kube(#[from] kube::Error),

  /// A resource is converging on the AWS side
  #[error("{resource} is not ready yet: {reason}")]
  NotYetReady { resource: String, reason: String },

  #[error("{operation} still failing after {attempts} attempts: {source}")]
  RetriesExhausted {
    operation: String,
    attempts: u32,
    #[source]
    source: Box<Error>,
  },

  #[error("signing key error: {0}")]
  Key(String),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("thumbprint for {host} failed: {reason}")]
  Thumbprint { host: String, reason: String },

  #[error("reconcile cancelled")]
  Cancelled,

  #[error("{context}: {source}")]
  Context {
    context: String,
    #[source]
    source: Box<Error>,
  },
}

impl Error {
  pub fn validation(msg: impl Into<String>) -> Self {
    Self::Validation(msg.into())
  }

  pub fn partial_state(resource: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::PartialState {
      resource: resource.into(),
      reason: reason.into(),
    }
  }

  pub fn not_ready(resource: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::NotYetReady {
      resource: resource.into(),
      reason: reason.into(),
    }
  }

  pub fn key(msg: impl Into<String>) -> Self {
    Self::Key(msg.into())
  }

  /// Build an AWS error, classifying it from its service error code.
  pub fn aws(operation: &'static str, code: Option<&str>, message: impl Into<String>) -> Self {
    let retryable = !code.is_some_and(|c| FATAL_AWS_CODES.contains(&c));
    Self::Aws {
      operation,
      code: code.map(str::to_string),
      message: message.into(),
      retryable,
    }
  }

  /// Wrap with operation and cluster context, keeping the kind.
  pub fn context(self, context: impl Into<String>) -> Self {
    Self::Context {
      context: context.into(),
      source: Box::new(self),
    }
  }

  pub fn kind(&self) -> Kind {
    match self {
      Self::Validation(_) | Self::PartialState { .. } | Self::Key(_) | Self::Serialization(_) => Kind::Fatal,
      Self::Aws { retryable, .. } => {
        if *retryable {
          Kind::Retryable
        } else {
          Kind::Fatal
        }
      }
      Self::Kube(kube::Error::Api(ae)) if matches!(ae.code, 400 | 403 | 422) => Kind::Fatal,
      Self::Kube(_) => Kind::Retryable,
      Self::NotYetReady { .. } => Kind::NotYetReady,
      Self::RetriesExhausted { source, .. } => match source.kind() {
        Kind::NotYetReady => Kind::NotYetReady,
        _ => Kind::Retryable,
      },
      Self::Thumbprint { .. } | Self::Cancelled => Kind::Retryable,
      Self::Context { source, .. } => source.kind(),
    }
  }

  pub fn is_retryable(&self) -> bool {
    self.kind() == Kind::Retryable
  }

  /// Operation of the underlying AWS error, if any.
  pub fn aws_operation(&self) -> Option<&'static str> {
    match self {
      Self::Aws { operation, .. } => Some(*operation),
      Self::Context { source, .. } | Self::RetriesExhausted { source, .. } => source.aws_operation(),
      _ => None,
    }
  }

  /// AWS service error code, looking through context wrappers.
  pub fn aws_code(&self) -> Option<&str> {
    match self {
      Self::Aws { code, .. } => code.as_deref(),
      Self::Context { source, .. } | Self::RetriesExhausted { source, .. } => source.aws_code(),
      _ => None,
    }
  }
}

/// Attach context to the error side of a result.
pub trait ResultExt<T> {
  fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
  fn context(self, context: impl Into<String>) -> Result<T> {
    self.map_err(|e| e.context(context))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn access_denied_is_fatal() {
    let err = Error::aws("CreateBucket", Some("AccessDenied"), "no");
    assert_eq!(err.kind(), Kind::Fatal);
  }

  #[test]
  fn unknown_aws_code_is_retryable() {
    assert!(Error::aws("PutObject", Some("NoSuchBucket"), "later").is_retryable());
    assert!(Error::aws("PutObject", None, "dispatch failure").is_retryable());
  }

  #[test]
  fn context_keeps_kind_and_code() {
    let err = Error::not_ready("distribution E123", "still enabled").context("org-acme/demo: delete distribution");
    assert_eq!(err.kind(), Kind::NotYetReady);

    let err = Error::aws("DeleteBucket", Some("BucketNotEmpty"), "x").context("demo");
    assert_eq!(err.aws_code(), Some("BucketNotEmpty"));
    assert!(err.to_string().starts_with("demo: DeleteBucket failed (BucketNotEmpty)"));
  }

  #[test]
  fn exhausted_not_ready_stays_not_ready() {
    let err = Error::RetriesExhausted {
      operation: "delete distribution".into(),
      attempts: 3,
      source: Box::new(Error::not_ready("distribution", "enabled")),
    };
    assert_eq!(err.kind(), Kind::NotYetReady);

    let err = Error::RetriesExhausted {
      operation: "upload".into(),
      attempts: 3,
      source: Box::new(Error::aws("PutObject", Some("NoSuchBucket"), "x")),
    };
    assert_eq!(err.kind(), Kind::Retryable);
  }

  #[test]
  fn partial_state_is_fatal() {
    assert_eq!(Error::partial_state("secret demo", "bad pem").kind(), Kind::Fatal);
  }
}
