//! Cluster objects the operator watches. They are owned by other
//! controllers; only the fields needed to resolve a cluster are modelled.

pub mod legacy {
  use kube::CustomResource;
  use schemars::JsonSchema;
  use serde::{Deserialize, Serialize};

  /// Cluster managed by the pre Cluster API AWS operator
  #[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
  #[kube(
    group = "infrastructure.controlant.com",
    version = "v1alpha3",
    kind = "AWSCluster",
    root = "AwsCluster",
    namespaced
  )]
  pub struct AwsClusterSpec {
    #[serde(default)]
    pub cluster: ClusterSection,
    #[serde(default)]
    pub provider: ProviderSection,
  }

  #[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
  pub struct ClusterSection {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub dns: DnsSection,
  }

  #[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
  pub struct DnsSection {
    /// Base domain of the cluster
    #[serde(default)]
    pub domain: String,
  }

  #[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
  #[serde(rename_all = "camelCase")]
  pub struct ProviderSection {
    #[serde(default)]
    pub region: String,
    /// Secret holding the ARN of the role to assume
    #[serde(default)]
    pub credential_secret: Option<CredentialSecret>,
  }

  #[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
  pub struct CredentialSecret {
    pub name: String,
    pub namespace: String,
  }
}

pub mod capa {
  use std::collections::BTreeMap;

  use kube::CustomResource;
  use schemars::JsonSchema;
  use serde::{Deserialize, Serialize};

  pub const ROLE_IDENTITY_KIND: &str = "AWSClusterRoleIdentity";
  pub const DEFAULT_IDENTITY_NAME: &str = "default";

  /// Cluster API AWS infrastructure cluster
  #[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
  #[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSCluster",
    root = "AwsCluster",
    namespaced
  )]
  #[serde(rename_all = "camelCase")]
  pub struct AwsClusterSpec {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub identity_ref: Option<IdentityRef>,
    /// Tags added to every resource created for the cluster
    #[serde(default)]
    pub additional_tags: Option<BTreeMap<String, String>>,
  }

  #[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
  pub struct IdentityRef {
    pub kind: String,
    pub name: String,
  }

  /// Role assumed on behalf of the clusters referencing it
  #[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
  #[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSClusterRoleIdentity",
    root = "AwsClusterRoleIdentity"
  )]
  pub struct AwsClusterRoleIdentitySpec {
    #[serde(rename = "roleARN", default)]
    pub role_arn: String,
  }
}

pub mod eks {
  use std::collections::BTreeMap;

  use kube::CustomResource;
  use schemars::JsonSchema;
  use serde::{Deserialize, Serialize};

  pub use super::capa::IdentityRef;

  /// Cluster API managed EKS control plane
  #[derive(CustomResource, Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
  #[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "AWSManagedControlPlane",
    root = "AwsManagedControlPlane",
    namespaced
  )]
  #[serde(rename_all = "camelCase")]
  pub struct AwsManagedControlPlaneSpec {
    /// Name in EKS, `<namespace>_<name>` when unset
    #[serde(default)]
    pub eks_cluster_name: Option<String>,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub identity_ref: Option<IdentityRef>,
    #[serde(default)]
    pub additional_tags: Option<BTreeMap<String, String>>,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use kube::Resource;

  #[test]
  fn capa_cluster_decodes_from_manifest() {
    let cluster: capa::AwsCluster = serde_json::from_value(serde_json::json!({
      "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta2",
      "kind": "AWSCluster",
      "metadata": { "name": "demo", "namespace": "org-acme" },
      "spec": {
        "region": "eu-west-1",
        "identityRef": { "kind": "AWSClusterRoleIdentity", "name": "acme" },
        "additionalTags": { "team": "platform" },
        "network": { "vpc": { "cidrBlock": "10.0.0.0/16" } }
      }
    }))
    .unwrap();
    assert_eq!(cluster.spec.region, "eu-west-1");
    assert_eq!(cluster.spec.identity_ref.unwrap().name, "acme");
    assert_eq!(cluster.spec.additional_tags.unwrap()["team"], "platform");
  }

  #[test]
  fn role_identity_reads_role_arn() {
    let identity: capa::AwsClusterRoleIdentity = serde_json::from_value(serde_json::json!({
      "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta2",
      "kind": "AWSClusterRoleIdentity",
      "metadata": { "name": "default" },
      "spec": { "roleARN": "arn:aws:iam::123456789012:role/capa" }
    }))
    .unwrap();
    assert_eq!(identity.spec.role_arn, "arn:aws:iam::123456789012:role/capa");
  }

  #[test]
  fn kinds_and_groups() {
    assert_eq!(legacy::AwsCluster::kind(&()), "AWSCluster");
    assert_eq!(legacy::AwsCluster::group(&()), "infrastructure.controlant.com");
    assert_eq!(eks::AwsManagedControlPlane::version(&()), "v1beta2");
  }
}
