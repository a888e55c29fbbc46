//! State the operator keeps in Kubernetes next to the cluster object.
//!
//! - the signing key secret, the single source of truth for key identity
//! - the distribution record, which says whether this cluster already has a
//!   CloudFront distribution

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;

use crate::cloud::memory::Faults;
use crate::error::{Error, Result};
use crate::keys::SigningKey;

pub const PRIVATE_KEY_FIELD: &str = "key";
pub const PUBLIC_KEY_FIELD: &str = "pub";

const MANAGER: &str = "irsa-operator";

/// Identifiers of a cluster's CloudFront distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionRecord {
  pub arn: String,
  pub domain: String,
  pub distribution_id: String,
  pub origin_access_identity_id: String,
}

impl DistributionRecord {
  const ARN: &'static str = "arn";
  const DOMAIN: &'static str = "domain";
  const DISTRIBUTION_ID: &'static str = "distributionId";
  const ORIGIN_ACCESS_IDENTITY_ID: &'static str = "originAccessIdentityId";

  /// Every field must be present and non-empty.
  pub fn from_data(name: &str, data: &BTreeMap<String, String>) -> Result<Self> {
    let field = |key: &str| -> Result<String> {
      data
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| Error::partial_state(format!("configmap {name}"), format!("field {key} is empty")))
    };
    Ok(Self {
      arn: field(Self::ARN)?,
      domain: field(Self::DOMAIN)?,
      distribution_id: field(Self::DISTRIBUTION_ID)?,
      origin_access_identity_id: field(Self::ORIGIN_ACCESS_IDENTITY_ID)?,
    })
  }

  pub fn to_data(&self) -> BTreeMap<String, String> {
    BTreeMap::from([
      (Self::ARN.to_string(), self.arn.clone()),
      (Self::DOMAIN.to_string(), self.domain.clone()),
      (Self::DISTRIBUTION_ID.to_string(), self.distribution_id.clone()),
      (Self::ORIGIN_ACCESS_IDENTITY_ID.to_string(), self.origin_access_identity_id.clone()),
    ])
  }
}

/// Parse the signing key out of secret data.
pub fn signing_key_from_data(name: &str, data: &BTreeMap<String, Vec<u8>>) -> Result<SigningKey> {
  let pem = data
    .get(PRIVATE_KEY_FIELD)
    .ok_or_else(|| Error::partial_state(format!("secret {name}"), format!("field {PRIVATE_KEY_FIELD} is missing")))?;
  let pem = std::str::from_utf8(pem)
    .map_err(|_| Error::partial_state(format!("secret {name}"), "private key is not utf-8"))?;
  SigningKey::from_pem(pem).map_err(|e| Error::partial_state(format!("secret {name}"), e.to_string()))
}

pub fn signing_key_to_data(key: &SigningKey) -> Result<BTreeMap<String, Vec<u8>>> {
  Ok(BTreeMap::from([
    (PRIVATE_KEY_FIELD.to_string(), key.private_pem()?.into_bytes()),
    (PUBLIC_KEY_FIELD.to_string(), key.public_pem()?.into_bytes()),
  ]))
}

#[async_trait]
pub trait StateStore: Send + Sync {
  /// Stored key, `None` when the secret does not exist. A secret that exists
  /// but holds no usable key is a partial-state error.
  async fn load_signing_key(&self, namespace: &str, name: &str) -> Result<Option<SigningKey>>;

  /// Create the key secret. Never overwrites an existing secret.
  async fn store_signing_key(&self, namespace: &str, name: &str, key: &SigningKey) -> Result<()>;

  async fn load_distribution(&self, namespace: &str, name: &str) -> Result<Option<DistributionRecord>>;

  async fn store_distribution(&self, namespace: &str, name: &str, record: &DistributionRecord) -> Result<()>;

  /// Missing record counts as deleted.
  async fn delete_distribution(&self, namespace: &str, name: &str) -> Result<()>;
}

pub struct KubeStateStore {
  client: Client,
}

impl KubeStateStore {
  pub fn new(client: Client) -> Self {
    Self { client }
  }

  fn labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app.kubernetes.io/managed-by".to_string(), MANAGER.to_string())])
  }
}

#[async_trait]
impl StateStore for KubeStateStore {
  async fn load_signing_key(&self, namespace: &str, name: &str) -> Result<Option<SigningKey>> {
    let api = Api::<Secret>::namespaced(self.client.clone(), namespace);
    let Some(secret) = api.get_opt(name).await? else {
      return Ok(None);
    };
    let data: BTreeMap<String, Vec<u8>> = secret
      .data
      .unwrap_or_default()
      .into_iter()
      .map(|(k, v)| (k, v.0))
      .collect();
    signing_key_from_data(name, &data).map(Some)
  }

  async fn store_signing_key(&self, namespace: &str, name: &str, key: &SigningKey) -> Result<()> {
    let api = Api::<Secret>::namespaced(self.client.clone(), namespace);
    let secret = Secret {
      metadata: ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(Self::labels()),
        ..ObjectMeta::default()
      },
      type_: Some("Opaque".to_string()),
      data: Some(
        signing_key_to_data(key)?
          .into_iter()
          .map(|(k, v)| (k, ByteString(v)))
          .collect(),
      ),
      ..Secret::default()
    };
    api.create(&PostParams::default(), &secret).await?;
    Ok(())
  }

  async fn load_distribution(&self, namespace: &str, name: &str) -> Result<Option<DistributionRecord>> {
    let api = Api::<ConfigMap>::namespaced(self.client.clone(), namespace);
    match api.get_opt(name).await? {
      None => Ok(None),
      Some(cm) => DistributionRecord::from_data(name, &cm.data.unwrap_or_default()).map(Some),
    }
  }

  async fn store_distribution(&self, namespace: &str, name: &str, record: &DistributionRecord) -> Result<()> {
    let api = Api::<ConfigMap>::namespaced(self.client.clone(), namespace);
    let cm = ConfigMap {
      metadata: ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(Self::labels()),
        ..ObjectMeta::default()
      },
      data: Some(record.to_data()),
      ..ConfigMap::default()
    };
    api
      .patch(name, &PatchParams::apply(MANAGER).force(), &Patch::Apply(&cm))
      .await?;
    Ok(())
  }

  async fn delete_distribution(&self, namespace: &str, name: &str) -> Result<()> {
    let api = Api::<ConfigMap>::namespaced(self.client.clone(), namespace);
    match api.delete(name, &DeleteParams::default()).await {
      Ok(_) => Ok(()),
      Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

/// Secrets and configmaps held in memory, keyed by `namespace/name`.
/// Writes fail on demand through `faults` (`kube:CreateSecret`,
/// `kube:ApplyConfigMap`, `kube:DeleteConfigMap`).
#[derive(Debug, Default)]
pub struct MemoryStateStore {
  pub faults: Faults,
  secrets: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
  configmaps: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
  }

  pub fn secret_data(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, Vec<u8>>> {
    self.secrets.lock().unwrap_or_else(|p| p.into_inner()).get(&Self::key(namespace, name)).cloned()
  }

  pub fn put_secret_data(&self, namespace: &str, name: &str, data: BTreeMap<String, Vec<u8>>) {
    self
      .secrets
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .insert(Self::key(namespace, name), data);
  }

  pub fn configmap_data(&self, namespace: &str, name: &str) -> Option<BTreeMap<String, String>> {
    self.configmaps.lock().unwrap_or_else(|p| p.into_inner()).get(&Self::key(namespace, name)).cloned()
  }

  pub fn put_configmap_data(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
    self
      .configmaps
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .insert(Self::key(namespace, name), data);
  }
}

#[async_trait]
impl StateStore for MemoryStateStore {
  async fn load_signing_key(&self, namespace: &str, name: &str) -> Result<Option<SigningKey>> {
    self
      .secret_data(namespace, name)
      .map(|data| signing_key_from_data(name, &data))
      .transpose()
  }

  async fn store_signing_key(&self, namespace: &str, name: &str, key: &SigningKey) -> Result<()> {
    self.faults.check("kube:CreateSecret")?;
    let data = signing_key_to_data(key)?;
    let mut secrets = self.secrets.lock().unwrap_or_else(|p| p.into_inner());
    let key = Self::key(namespace, name);
    if secrets.contains_key(&key) {
      return Err(Error::aws("kube:CreateSecret", Some("AlreadyExists"), format!("secret {key} already exists")));
    }
    secrets.insert(key, data);
    Ok(())
  }

  async fn load_distribution(&self, namespace: &str, name: &str) -> Result<Option<DistributionRecord>> {
    self
      .configmap_data(namespace, name)
      .map(|data| DistributionRecord::from_data(name, &data))
      .transpose()
  }

  async fn store_distribution(&self, namespace: &str, name: &str, record: &DistributionRecord) -> Result<()> {
    self.faults.check("kube:ApplyConfigMap")?;
    self.put_configmap_data(namespace, name, record.to_data());
    Ok(())
  }

  async fn delete_distribution(&self, namespace: &str, name: &str) -> Result<()> {
    self.faults.check("kube:DeleteConfigMap")?;
    self
      .configmaps
      .lock()
      .unwrap_or_else(|p| p.into_inner())
      .remove(&Self::key(namespace, name));
    Ok(())
  }
}
