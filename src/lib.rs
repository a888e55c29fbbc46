//! Publishes OIDC trust for the service accounts of Kubernetes clusters
//! running on AWS, so pods can assume IAM roles (IRSA).
//!
//! For every watched cluster the operator keeps an S3 hosted discovery
//! document and JWKS, optionally fronted by CloudFront with a custom domain,
//! and an IAM OIDC provider trusting the issuer. EKS clusters only get the
//! provider. Deleting the cluster object removes the footprint again.

pub mod cloud;
pub mod config;
pub mod controller;
pub mod crd;
pub mod diff;
pub mod discovery;
pub mod error;
pub mod finalizer;
pub mod keys;
pub mod metrics;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod scope;
pub mod state;
pub mod tags;
pub mod thumbprint;

pub use error::{Error, Kind, Result};
