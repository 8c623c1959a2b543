//! The kubeconfig document model.
//!
//! A faithful serde mapping of the kubeconfig file format: named clusters,
//! contexts and users, with both the file-path fields
//! (`certificate-authority`, `client-certificate`, ...) and their inline
//! base64 `*-data` twins. Unknown fields in real-world files are ignored on
//! load; serialization only emits the fields that are set, so a synthesized
//! document stays stable byte-for-byte.

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use serde_yaml::Mapping;

/// A kubeconfig document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kubeconfig {
    /// Always `v1`.
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    /// Always `Config`.
    pub kind: String,
    /// Named cluster entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<NamedCluster>,
    /// Named context entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contexts: Vec<NamedContext>,
    /// The context selected when none is requested explicitly.
    #[serde(rename = "current-context", default, skip_serializing_if = "String::is_empty")]
    pub current_context: String,
    /// Client preferences, carried as an opaque mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Mapping>,
    /// Named user entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<NamedAuthInfo>,
}

impl Default for Kubeconfig {
    fn default() -> Self {
        Self {
            api_version: "v1".to_string(),
            kind: "Config".to_string(),
            clusters: Vec::new(),
            contexts: Vec::new(),
            current_context: String::new(),
            preferences: None,
            users: Vec::new(),
        }
    }
}

/// A cluster entry with its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedCluster {
    /// The entry name referenced by contexts.
    pub name: String,
    /// The cluster definition.
    pub cluster: Cluster,
}

/// Connection parameters for one API server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    /// API server URL.
    pub server: String,
    /// Path to the CA bundle file.
    #[serde(
        rename = "certificate-authority",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_authority: Option<String>,
    /// Inline base64-encoded CA bundle.
    #[serde(
        rename = "certificate-authority-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_authority_data: Option<String>,
}

/// A context entry with its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedContext {
    /// The entry name.
    pub name: String,
    /// The context definition.
    pub context: Context,
}

/// A (cluster, user) pairing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Name of the cluster entry.
    pub cluster: String,
    /// Name of the user entry.
    pub user: String,
    /// Default namespace for this context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A user entry with its name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedAuthInfo {
    /// The entry name referenced by contexts.
    pub name: String,
    /// The identity material.
    pub user: AuthInfo,
}

/// Identity material for one user entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthInfo {
    /// Path to the client certificate file.
    #[serde(
        rename = "client-certificate",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_certificate: Option<String>,
    /// Inline base64-encoded client certificate.
    #[serde(
        rename = "client-certificate-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_certificate_data: Option<String>,
    /// Path to the client key file.
    #[serde(rename = "client-key", default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
    /// Inline base64-encoded client key.
    #[serde(
        rename = "client-key-data",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_key_data: Option<String>,
    /// Inline bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Path to a file holding the bearer token.
    #[serde(rename = "tokenFile", default, skip_serializing_if = "Option::is_none")]
    pub token_file: Option<String>,
}

impl Kubeconfig {
    /// Parses a kubeconfig document from YAML.
    ///
    /// # Errors
    ///
    /// Returns the deserialization error for malformed YAML.
    pub fn from_yaml(s: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(s)
    }

    /// Serializes the document to YAML.
    ///
    /// Serialization is deterministic: the same document always produces the
    /// same bytes.
    ///
    /// # Errors
    ///
    /// Returns the serialization error (not expected for well-formed
    /// documents).
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Looks up a context entry by name.
    #[must_use]
    pub fn context(&self, name: &str) -> Option<&Context> {
        self.contexts
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.context)
    }

    /// Looks up a cluster entry by name.
    #[must_use]
    pub fn cluster(&self, name: &str) -> Option<&Cluster> {
        self.clusters
            .iter()
            .find(|c| c.name == name)
            .map(|c| &c.cluster)
    }

    /// Looks up a user entry by name.
    #[must_use]
    pub fn user(&self, name: &str) -> Option<&AuthInfo> {
        self.users.iter().find(|u| u.name == name).map(|u| &u.user)
    }
}

/// Encodes bytes for a `*-data` field.
#[must_use]
pub fn encode_data(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decodes a `*-data` field.
///
/// # Errors
///
/// Returns the decode error for invalid base64.
pub fn decode_data(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_STANDARD.decode(s)
}
