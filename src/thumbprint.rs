//! Certificate thumbprint of the discovery endpoint, as registered with IAM.
//!
//! The thumbprint is recomputed on every reconcile since the endpoint's
//! certificate rotates independently of the cluster.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use sha1::{Digest, Sha1};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use crate::error::{Error, Result};

const HTTPS_PORT: u16 = 443;

#[async_trait]
pub trait Thumbprinter: Send + Sync {
  /// Lowercase hex SHA-1 of the certificate served by `host`.
  async fn thumbprint(&self, host: &str) -> Result<String>;
}

/// SHA-1 fingerprint of a DER certificate, lowercase hex.
pub fn fingerprint(der: &[u8]) -> String {
  hex::encode(Sha1::digest(der))
}

/// Fetches the thumbprint with a real TLS handshake.
pub struct TlsThumbprinter {
  connector: TlsConnector,
  timeout: Duration,
}

impl TlsThumbprinter {
  pub fn new(timeout: Duration) -> Result<Self> {
    let mut roots = rustls::RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().certs {
      let _ = roots.add(cert);
    }
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
      rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| Error::Thumbprint {
      host: String::new(),
      reason: format!("tls config: {e}"),
    })?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Self {
      connector: TlsConnector::from(Arc::new(config)),
      timeout,
    })
  }
}

#[async_trait]
impl Thumbprinter for TlsThumbprinter {
  async fn thumbprint(&self, host: &str) -> Result<String> {
    let fail = |reason: String| Error::Thumbprint {
      host: host.to_string(),
      reason,
    };

    let tcp = tokio::time::timeout(self.timeout, TcpStream::connect((host, HTTPS_PORT)))
      .await
      .map_err(|_| fail("connect timed out".to_string()))?
      .map_err(|e| fail(format!("connect: {e}")))?;
    let name = ServerName::try_from(host.to_string()).map_err(|e| fail(format!("server name: {e}")))?;
    let tls = tokio::time::timeout(self.timeout, self.connector.connect(name, tcp))
      .await
      .map_err(|_| fail("handshake timed out".to_string()))?
      .map_err(|e| fail(format!("handshake: {e}")))?;

    let (_, session) = tls.get_ref();
    let leaf = session
      .peer_certificates()
      .and_then(|certs| certs.first())
      .ok_or_else(|| fail("no certificate presented".to_string()))?;
    Ok(fingerprint(leaf.as_ref()))
  }
}

/// Canned thumbprints per host, recording every lookup.
#[derive(Debug, Default)]
pub struct FixedThumbprints {
  by_host: Mutex<BTreeMap<String, String>>,
  lookups: Mutex<Vec<String>>,
}

impl FixedThumbprints {
  pub const DEFAULT: &'static str = "9e99a48a9960b14926bb7f3b02e22da2b0ab7280";

  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, host: &str, thumbprint: &str) {
    self
      .by_host
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .insert(host.to_string(), thumbprint.to_string());
  }

  pub fn lookups(&self) -> Vec<String> {
    self.lookups.lock().unwrap_or_else(|p| p.into_inner()).clone()
  }
}

#[async_trait]
impl Thumbprinter for FixedThumbprints {
  async fn thumbprint(&self, host: &str) -> Result<String> {
    self
      .lookups
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .push(host.to_string());
    Ok(
      self
        .by_host
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .get(host)
        .cloned()
        .unwrap_or_else(|| Self::DEFAULT.to_string()),
    )
  }
}
