//! Error types for credential resolution and export.

use std::path::PathBuf;

use thiserror::Error;

use kubelift_common::ParseServiceAccountRefError;

/// Errors that can occur while resolving, exchanging, or exporting a
/// credential.
///
/// Every variant carries the context of the operation that produced it;
/// errors surface unchanged to the top level, where the invocation fails
/// with a single descriptive message. The only recoveries are the two
/// documented soft paths (in-cluster CA read, missing loopback alias),
/// which are handled before an error is ever constructed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    /// Malformed `namespace/name` service account specifier.
    ///
    /// Rejected by validation before any network call is attempted.
    #[error(transparent)]
    InvalidServiceAccountRef(#[from] ParseServiceAccountRefError),

    /// Neither the ambient in-cluster identity nor a kubeconfig could be
    /// loaded.
    #[error("no credential source found: not running in a cluster and no kubeconfig available")]
    NoCredentialSource,

    /// The kubeconfig has no current context and none was requested.
    #[error("no context was provided and no current context was found in the kubeconfig")]
    NoCurrentContext,

    /// The requested context does not exist in the kubeconfig.
    #[error("context {0:?} not found in the kubeconfig")]
    ContextNotFound(String),

    /// A context references a cluster entry that does not exist.
    #[error("context {context:?} references unknown cluster {cluster:?}")]
    ClusterNotFound {
        /// The context doing the referencing.
        context: String,
        /// The missing cluster entry name.
        cluster: String,
    },

    /// A context references a user entry that does not exist.
    #[error("context {context:?} references unknown user {user:?}")]
    UserNotFound {
        /// The context doing the referencing.
        context: String,
        /// The missing user entry name.
        user: String,
    },

    /// The service account has no secret of the token type.
    #[error(
        "service account {0} has no secret of type kubernetes.io/service-account-token"
    )]
    NoTokenSecret(String),

    /// A fetched record is missing a key it is required to carry.
    #[error("key {key:?} not found in secret {secret:?}")]
    MissingSecretKey {
        /// The secret that was fetched.
        secret: String,
        /// The absent key.
        key: String,
    },

    /// A `*-data` field holds bytes that are not valid base64.
    #[error("invalid base64 in {field}: {source}")]
    InvalidDataField {
        /// The kubeconfig field being decoded.
        field: &'static str,
        /// The decode failure.
        source: base64::DecodeError,
    },

    /// An API call failed; carries the operation and the object reference.
    #[error("{operation} {reference}: {message}")]
    Api {
        /// What was being attempted (e.g. `getting serviceaccount`).
        operation: &'static str,
        /// The `namespace/name` the operation targeted.
        reference: String,
        /// HTTP status, when the server answered at all.
        status: Option<u16>,
        /// The underlying failure.
        message: String,
    },

    /// Network or HTTP failure outside of a named API operation.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Certificate-format export requested for a token identity.
    #[error("cannot produce a PEM client certificate bundle when the credential uses a token")]
    CertificateExportWithToken,

    /// CA-bundle export requested but no trust anchor is available.
    #[error("no certificate-authority data nor certificate-authority file")]
    NoTrustAnchor,

    /// A referenced file could not be read.
    #[error("reading {}: {source}", path.display())]
    Read {
        /// The file that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Other I/O failure (socket setup, output sink).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (kubeconfig) serialization or deserialization failure.
    #[error("kubeconfig YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl ClientError {
    /// Convenience constructor for file-read failures with path context.
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    /// Whether this error was raised by input validation, before any file or
    /// network access.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidServiceAccountRef(_))
    }

    /// Whether this error reports a missing object rather than a failure to
    /// reach one.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NoCredentialSource
                | Self::ContextNotFound(_)
                | Self::ClusterNotFound { .. }
                | Self::UserNotFound { .. }
                | Self::NoTokenSecret(_)
                | Self::NoTrustAnchor
                | Self::Api {
                    status: Some(404),
                    ..
                }
        )
    }
}

/// Result type alias using [`ClientError`].
pub type Result<T> = std::result::Result<T, ClientError>;
