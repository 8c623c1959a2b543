//! Credential records and identity material.
//!
//! The types here form the normalized credential record produced by
//! resolution and consumed by the exporter. Identity material frequently
//! exists in two shapes at once, inline bytes or a path to a mounted file,
//! so most fields are [`Material`] pairs where the inline bytes win.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A piece of PEM (or token) material that may be held inline or referenced
/// by file path.
///
/// Inline bytes take precedence over the file reference. Both may be absent,
/// in which case the material is simply not available.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Material {
    /// Inline bytes, authoritative when present.
    pub data: Option<Vec<u8>>,
    /// Path to a file holding the bytes, used when no inline data is set.
    pub file: Option<PathBuf>,
}

impl Material {
    /// Material held inline.
    #[must_use]
    pub fn inline(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Some(data.into()),
            file: None,
        }
    }

    /// Material referenced by file path.
    #[must_use]
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        Self {
            data: None,
            file: Some(path.into()),
        }
    }

    /// Whether neither representation is present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_none() && self.file.is_none()
    }

    /// Resolves the material to bytes, reading the file reference when no
    /// inline data is set.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error when the file reference cannot be
    /// read.
    pub fn resolve(&self) -> std::io::Result<Option<Vec<u8>>> {
        if let Some(data) = &self.data {
            return Ok(Some(data.clone()));
        }
        match &self.file {
            Some(path) => std::fs::read(path).map(Some),
            None => Ok(None),
        }
    }
}

/// The certificate authority material used to validate the API server.
///
/// Same inline-over-file precedence as [`Material`]; a fully absent trust
/// anchor is legal (resolution treats a missing CA as a soft failure).
pub type TrustAnchor = Material;

/// The client identity used to authenticate against the API server.
///
/// The two variants are mutually exclusive: replacing a certificate identity
/// with a token identity (or vice versa) structurally discards the other
/// one, so the final artifact can never carry both.
#[derive(Debug, Clone)]
pub enum Identity {
    /// Bearer token authentication.
    Token {
        /// The token value, authoritative when present.
        token: Option<SecretString>,
        /// Path to a file holding the token.
        file: Option<PathBuf>,
    },
    /// TLS client certificate authentication.
    ClientCertificate {
        /// The client certificate chain, PEM.
        cert: Material,
        /// The client private key, PEM.
        key: Material,
    },
}

impl Identity {
    /// A token identity held inline.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Token {
            token: Some(SecretString::new(token.into().into())),
            file: None,
        }
    }

    /// A token identity read from a mounted file, with the value also held
    /// inline when already known.
    #[must_use]
    pub fn bearer_from_file(token: Option<String>, file: impl Into<PathBuf>) -> Self {
        Self::Token {
            token: token.map(|t| SecretString::new(t.into())),
            file: Some(file.into()),
        }
    }

    /// A client certificate identity.
    #[must_use]
    pub const fn client_certificate(cert: Material, key: Material) -> Self {
        Self::ClientCertificate { cert, key }
    }

    /// An empty certificate identity (no material at all).
    #[must_use]
    pub const fn none() -> Self {
        Self::ClientCertificate {
            cert: Material {
                data: None,
                file: None,
            },
            key: Material {
                data: None,
                file: None,
            },
        }
    }

    /// Whether this is a token identity.
    #[must_use]
    pub const fn is_token(&self) -> bool {
        matches!(self, Self::Token { .. })
    }

    /// The inline token value, when this is a token identity.
    #[must_use]
    pub fn token_value(&self) -> Option<&str> {
        match self {
            Self::Token {
                token: Some(token), ..
            } => Some(token.expose_secret()),
            _ => None,
        }
    }

    /// Whether any material is present at all.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        match self {
            Self::Token { token, file } => token.is_none() && file.is_none(),
            Self::ClientCertificate { cert, key } => cert.is_empty() && key.is_empty(),
        }
    }
}

impl Default for Identity {
    fn default() -> Self {
        Self::none()
    }
}

/// The normalized credential record.
///
/// Produced by the resolution pipeline, mutated at most once by the loopback
/// alias rewrite, and finally moved into the exporter. The server URL scheme
/// is always `https`.
#[derive(Debug, Clone, Default)]
pub struct ClusterCredentials {
    /// API server URL (`https://host:port`).
    pub server: String,
    /// Certificate authority material for validating the server.
    pub trust_anchor: TrustAnchor,
    /// Client identity material.
    pub identity: Identity,
    /// User agent stamped on API requests made with this credential.
    pub user_agent: String,
}

impl ClusterCredentials {
    /// Creates a credential record for the given API server URL.
    #[must_use]
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            ..Self::default()
        }
    }

    /// Sets the trust anchor.
    #[must_use]
    pub fn with_trust_anchor(mut self, trust_anchor: TrustAnchor) -> Self {
        self.trust_anchor = trust_anchor;
        self
    }

    /// Sets the identity, discarding any previously selected one.
    #[must_use]
    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    /// Sets the user agent.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Replaces the identity with a bearer token, clearing certificate
    /// material.
    pub fn set_bearer_token(&mut self, token: impl Into<String>) {
        self.identity = Identity::bearer(token);
    }

    /// Whether the server host is a loopback address or the conventional
    /// `localhost` name.
    #[must_use]
    pub fn is_loopback_server(&self) -> bool {
        self.server.contains("localhost") || self.server.contains("127.0.0.1")
    }
}

/// Error returned when a service account specifier is malformed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("expected a specifier of the form 'namespace/serviceaccount', got: {0:?}")]
pub struct ParseServiceAccountRefError(pub String);

/// A `namespace/name` service account specifier.
///
/// Parsing enforces exactly two non-empty segments separated by a single
/// `/`; malformed input never reaches the network.
///
/// # Examples
///
/// ```
/// use kubelift_common::ServiceAccountRef;
///
/// let sa: ServiceAccountRef = "default/builder".parse().unwrap();
/// assert_eq!(sa.to_string(), "default/builder");
/// assert!("no-slash".parse::<ServiceAccountRef>().is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountRef {
    /// The namespace holding the service account.
    pub namespace: String,
    /// The service account name.
    pub name: String,
}

impl FromStr for ServiceAccountRef {
    type Err = ParseServiceAccountRefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut segments = s.split('/');
        match (segments.next(), segments.next(), segments.next()) {
            (Some(namespace), Some(name), None) if !namespace.is_empty() && !name.is_empty() => {
                Ok(Self {
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                })
            }
            _ => Err(ParseServiceAccountRefError(s.to_string())),
        }
    }
}

impl fmt::Display for ServiceAccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl ServiceAccountRef {
    /// Creates a specifier from already-validated parts.
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// Joins a host and port into an authority, bracketing IPv6 literals.
#[must_use]
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Resolves a file path under an optional root prefix.
///
/// The prefix is prepended verbatim, matching how a remounted container
/// filesystem exposes `/var/run/...` under another root.
#[must_use]
pub fn under_root(root: &str, path: &str) -> PathBuf {
    if root.is_empty() {
        PathBuf::from(path)
    } else {
        Path::new(root).join(path.trim_start_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;

    #[test]
    fn test_parse_service_account_ref() {
        let sa: ServiceAccountRef = "kube-system/default".parse().unwrap();
        assert_eq!(sa.namespace, "kube-system");
        assert_eq!(sa.name, "default");
    }

    #[test]
    fn test_parse_service_account_ref_rejects_malformed() {
        for input in ["", "noslash", "a/b/c", "/name", "ns/", "/"] {
            let err = input.parse::<ServiceAccountRef>().unwrap_err();
            assert_eq!(err, ParseServiceAccountRefError(input.to_string()));
        }
    }

    #[test]
    fn test_material_inline_wins_over_file() {
        let material = Material {
            data: Some(b"inline".to_vec()),
            file: Some(PathBuf::from("/nonexistent/by/design")),
        };
        // The file reference is never touched when inline data is present.
        assert_eq!(material.resolve().unwrap(), Some(b"inline".to_vec()));
    }

    #[test]
    fn test_material_empty_resolves_to_none() {
        assert_eq!(Material::default().resolve().unwrap(), None);
    }

    #[test]
    fn test_identity_replacement_clears_certificates() {
        let mut creds = ClusterCredentials::new("https://example:6443").with_identity(
            Identity::client_certificate(Material::inline("CERT"), Material::inline("KEY")),
        );
        creds.set_bearer_token("tok");
        assert!(creds.identity.is_token());
        assert_eq!(creds.identity.token_value(), Some("tok"));
    }

    #[test]
    fn test_loopback_server_detection() {
        assert!(ClusterCredentials::new("https://127.0.0.1:6443").is_loopback_server());
        assert!(ClusterCredentials::new("https://localhost:6443").is_loopback_server());
        assert!(!ClusterCredentials::new("https://10.1.2.3:6443").is_loopback_server());
    }

    #[test]
    fn test_join_host_port_brackets_ipv6() {
        assert_eq!(join_host_port("10.0.0.1", "443"), "10.0.0.1:443");
        assert_eq!(join_host_port("::1", "6443"), "[::1]:6443");
    }

    #[test]
    fn test_under_root() {
        assert_eq!(
            under_root("", "/var/run/secrets/token"),
            PathBuf::from("/var/run/secrets/token")
        );
        assert_eq!(
            under_root("/tmp/tel-root", "/var/run/secrets/token"),
            PathBuf::from("/tmp/tel-root/var/run/secrets/token")
        );
    }
}
