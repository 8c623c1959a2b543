//! Credential resolution.
//!
//! Resolution decides, in priority order, which identity source backs the
//! credential record: the ambient in-cluster service account (token and CA
//! bundle mounted under `/var/run/secrets/kubernetes.io/serviceaccount`),
//! or a kubeconfig file (explicit path, `$KUBECONFIG`, or
//! `~/.kube/config`).
//!
//! The chain is a pure function over a [`ResolveEnv`] snapshot: the
//! environment markers are captured once by the caller and passed in, and
//! the outcome is an explicit [`ResolvedCredentials`] sum rather than a
//! config object mutated across branches.

use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use tracing::{debug, warn};

use kubelift_common::{
    ClusterCredentials, Identity, Kubeconfig, Material, decode_data, join_host_port, under_root,
};

use crate::error::{ClientError, Result};

/// Well-known path of the mounted service account token, relative to the
/// container root.
pub const SERVICE_ACCOUNT_TOKEN_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";

/// Well-known path of the mounted service account CA bundle, relative to the
/// container root.
pub const SERVICE_ACCOUNT_CA_PATH: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Snapshot of the environment inputs resolution depends on.
///
/// Captured once at startup so the resolution chain itself never reads
/// ambient process state.
#[derive(Debug, Clone, Default)]
pub struct ResolveEnv {
    /// `KUBERNETES_SERVICE_HOST`, when set and non-empty.
    pub service_host: Option<String>,
    /// `KUBERNETES_SERVICE_PORT`, when set and non-empty.
    pub service_port: Option<String>,
    /// Container root prefix prepended to the well-known secret paths.
    pub root: String,
    /// `$KUBECONFIG`, when set and non-empty.
    pub kubeconfig_env: Option<String>,
}

impl ResolveEnv {
    /// Captures the current process environment, with the given container
    /// root prefix.
    #[must_use]
    pub fn from_env(root: impl Into<String>) -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            service_host: non_empty("KUBERNETES_SERVICE_HOST"),
            service_port: non_empty("KUBERNETES_SERVICE_PORT"),
            root: root.into(),
            kubeconfig_env: non_empty("KUBECONFIG"),
        }
    }
}

/// Which identity source a resolution selected.
#[derive(Debug, Clone)]
pub enum ResolvedCredentials {
    /// The ambient in-cluster service account identity.
    InCluster(ClusterCredentials),
    /// An identity loaded from a kubeconfig file.
    OutOfCluster(ClusterCredentials),
}

impl ResolvedCredentials {
    /// Consumes the resolution, yielding the credential record.
    #[must_use]
    pub fn into_credentials(self) -> ClusterCredentials {
        match self {
            Self::InCluster(creds) | Self::OutOfCluster(creds) => creds,
        }
    }

    /// Borrows the credential record.
    #[must_use]
    pub const fn credentials(&self) -> &ClusterCredentials {
        match self {
            Self::InCluster(creds) | Self::OutOfCluster(creds) => creds,
        }
    }

    /// Whether the in-cluster identity was selected.
    #[must_use]
    pub const fn is_in_cluster(&self) -> bool {
        matches!(self, Self::InCluster(_))
    }

    fn with_user_agent(self, user_agent: &str) -> Self {
        match self {
            Self::InCluster(creds) => Self::InCluster(creds.with_user_agent(user_agent)),
            Self::OutOfCluster(creds) => Self::OutOfCluster(creds.with_user_agent(user_agent)),
        }
    }
}

/// Inputs for one resolution.
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    /// Explicit kubeconfig path; tried before the ambient identity.
    pub kubeconfig: Option<PathBuf>,
    /// Kubeconfig context to select; the file's current context otherwise.
    pub context: Option<String>,
    /// User agent stamped on the resolved credential.
    pub user_agent: String,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            context: None,
            user_agent: "kubelift".to_string(),
        }
    }
}

/// Resolves a credential record from the highest-priority available source.
///
/// Without an explicit kubeconfig path the ambient in-cluster identity is
/// tried first, then the conventional kubeconfig location. With an explicit
/// path, the file is tried first, and on failure the ambient identity is
/// still attempted before giving up.
///
/// # Errors
///
/// Returns [`ClientError::NoCredentialSource`] when no source yields a
/// credential. A default-location kubeconfig that exists but cannot be
/// loaded surfaces its own error instead, since that is actionable.
pub fn resolve(options: &ResolveOptions, env: &ResolveEnv) -> Result<ResolvedCredentials> {
    let resolved = if let Some(path) = &options.kubeconfig {
        debug!(path = %path.display(), "using the explicit kubeconfig path");
        match kubeconfig_credentials(path, options.context.as_deref()) {
            Ok(creds) => ResolvedCredentials::OutOfCluster(creds),
            Err(err) => {
                warn!(
                    "loading kubeconfig {}: {err}; trying the in-cluster identity",
                    path.display()
                );
                let creds = try_in_cluster(env).ok_or(ClientError::NoCredentialSource)?;
                ResolvedCredentials::InCluster(creds)
            }
        }
    } else if let Some(creds) = try_in_cluster(env) {
        debug!("in-cluster identity found");
        ResolvedCredentials::InCluster(creds)
    } else {
        debug!("in-cluster identity not found, trying the local kubeconfig");
        let path = default_kubeconfig_path(env).ok_or(ClientError::NoCredentialSource)?;
        if !path.exists() {
            return Err(ClientError::NoCredentialSource);
        }
        ResolvedCredentials::OutOfCluster(kubeconfig_credentials(
            &path,
            options.context.as_deref(),
        )?)
    };

    Ok(resolved.with_user_agent(&options.user_agent))
}

fn try_in_cluster(env: &ResolveEnv) -> Option<ClusterCredentials> {
    match in_cluster_credentials(env) {
        Ok(found) => found,
        Err(err) => {
            debug!("in-cluster identity unavailable: {err}");
            None
        }
    }
}

/// Builds the ambient in-cluster credential, when present.
///
/// Returns `Ok(None)` when the `KUBERNETES_SERVICE_HOST`/`_PORT` markers are
/// absent. A missing or unreadable token file fails this branch; a missing
/// or malformed CA bundle only logs a warning and leaves the trust anchor
/// absent.
///
/// # Errors
///
/// Returns a [`ClientError::Read`] for the token file when the markers are
/// present but the token cannot be read.
pub fn in_cluster_credentials(env: &ResolveEnv) -> Result<Option<ClusterCredentials>> {
    let (Some(host), Some(port)) = (&env.service_host, &env.service_port) else {
        return Ok(None);
    };

    let token_path = under_root(&env.root, SERVICE_ACCOUNT_TOKEN_PATH);
    let token = fs::read_to_string(&token_path)
        .map_err(|err| ClientError::read(token_path.clone(), err))?;

    let ca_path = under_root(&env.root, SERVICE_ACCOUNT_CA_PATH);
    let trust_anchor = match fs::read(&ca_path) {
        Ok(bytes) if contains_certificate(&bytes) => Material::from_file(&ca_path),
        Ok(_) => {
            warn!(
                "expected to load root CA config from {}, but no certificates were found",
                ca_path.display()
            );
            Material::default()
        }
        Err(err) => {
            warn!(
                "expected to load root CA config from {}, but got err: {err}",
                ca_path.display()
            );
            Material::default()
        }
    };

    Ok(Some(ClusterCredentials {
        server: format!("https://{}", join_host_port(host, port)),
        trust_anchor,
        identity: Identity::bearer_from_file(Some(token), token_path),
        user_agent: String::new(),
    }))
}

/// The conventional kubeconfig location: the first `$KUBECONFIG` entry, or
/// `~/.kube/config`.
#[must_use]
pub fn default_kubeconfig_path(env: &ResolveEnv) -> Option<PathBuf> {
    if let Some(list) = &env.kubeconfig_env {
        // $KUBECONFIG may hold a merge list; only the first entry is used.
        if let Some(first) = list.split(':').find(|p| !p.is_empty()) {
            return Some(PathBuf::from(first));
        }
    }
    dirs::home_dir().map(|home| home.join(".kube").join("config"))
}

/// Loads a kubeconfig file and extracts the credential for the selected
/// context.
///
/// # Errors
///
/// Returns a read, parse, or lookup error with the offending name attached.
pub fn kubeconfig_credentials(path: &Path, context: Option<&str>) -> Result<ClusterCredentials> {
    let raw = fs::read_to_string(path).map_err(|err| ClientError::read(path, err))?;
    let config = Kubeconfig::from_yaml(&raw)?;
    credentials_from_kubeconfig(&config, context)
}

/// Extracts the credential for the selected context from a parsed
/// kubeconfig.
///
/// # Errors
///
/// Returns [`ClientError::NoCurrentContext`] when neither an explicit
/// context nor a `current-context` is available, and the specific
/// `*NotFound` error when a referenced entry is missing.
pub fn credentials_from_kubeconfig(
    config: &Kubeconfig,
    context: Option<&str>,
) -> Result<ClusterCredentials> {
    let context_name = match context {
        Some(name) => name,
        None if !config.current_context.is_empty() => &config.current_context,
        None => return Err(ClientError::NoCurrentContext),
    };

    let ctx = config
        .context(context_name)
        .ok_or_else(|| ClientError::ContextNotFound(context_name.to_string()))?;
    let cluster = config
        .cluster(&ctx.cluster)
        .ok_or_else(|| ClientError::ClusterNotFound {
            context: context_name.to_string(),
            cluster: ctx.cluster.clone(),
        })?;
    let user = config
        .user(&ctx.user)
        .ok_or_else(|| ClientError::UserNotFound {
            context: context_name.to_string(),
            user: ctx.user.clone(),
        })?;

    let trust_anchor = Material {
        data: decode_field(
            cluster.certificate_authority_data.as_deref(),
            "certificate-authority-data",
        )?,
        file: cluster.certificate_authority.clone().map(PathBuf::from),
    };

    let identity = if user.token.is_some() || user.token_file.is_some() {
        Identity::Token {
            token: user
                .token
                .clone()
                .map(|token| SecretString::new(token.into())),
            file: user.token_file.clone().map(PathBuf::from),
        }
    } else {
        Identity::ClientCertificate {
            cert: Material {
                data: decode_field(
                    user.client_certificate_data.as_deref(),
                    "client-certificate-data",
                )?,
                file: user.client_certificate.clone().map(PathBuf::from),
            },
            key: Material {
                data: decode_field(user.client_key_data.as_deref(), "client-key-data")?,
                file: user.client_key.clone().map(PathBuf::from),
            },
        }
    };

    Ok(ClusterCredentials {
        server: cluster.server.clone(),
        trust_anchor,
        identity,
        user_agent: String::new(),
    })
}

fn decode_field(value: Option<&str>, field: &'static str) -> Result<Option<Vec<u8>>> {
    value
        .map(|v| decode_data(v).map_err(|source| ClientError::InvalidDataField { field, source }))
        .transpose()
}

/// Whether the bytes contain at least one PEM certificate block.
#[must_use]
pub fn contains_certificate(bytes: &[u8]) -> bool {
    // A usable CA bundle must carry at least one certificate block; anything
    // else (empty file, key material, garbage) is treated as absent.
    std::str::from_utf8(bytes)
        .map(|s| s.contains("-----BEGIN CERTIFICATE-----"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    const CA_PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";

    fn write_service_account(root: &Path, token: Option<&str>, ca: Option<&str>) {
        let dir = root.join("var/run/secrets/kubernetes.io/serviceaccount");
        fs::create_dir_all(&dir).unwrap();
        if let Some(token) = token {
            fs::write(dir.join("token"), token).unwrap();
        }
        if let Some(ca) = ca {
            fs::write(dir.join("ca.crt"), ca).unwrap();
        }
    }

    fn in_cluster_env(root: &Path) -> ResolveEnv {
        ResolveEnv {
            service_host: Some("10.96.0.1".to_string()),
            service_port: Some("443".to_string()),
            root: root.display().to_string(),
            kubeconfig_env: None,
        }
    }

    fn sample_kubeconfig(dir: &Path) -> PathBuf {
        let path = dir.join("config");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"
apiVersion: v1
kind: Config
clusters:
- name: kind-kind
  cluster:
    server: https://127.0.0.1:6443
    certificate-authority-data: Q0EgUEVN
contexts:
- name: kind-kind
  context:
    cluster: kind-kind
    user: kind-kind
current-context: kind-kind
users:
- name: kind-kind
  user:
    client-certificate-data: Q0VSVCBQRU0=
    client-key-data: S0VZIFBFTQ==
"#
        )
        .unwrap();
        path
    }

    #[test]
    fn test_in_cluster_resolution() {
        let root = TempDir::new().unwrap();
        write_service_account(root.path(), Some("the-token"), Some(CA_PEM));

        let resolved = resolve(&ResolveOptions::default(), &in_cluster_env(root.path())).unwrap();
        assert!(resolved.is_in_cluster());

        let creds = resolved.into_credentials();
        assert_eq!(creds.server, "https://10.96.0.1:443");
        assert_eq!(creds.user_agent, "kubelift");
        assert_eq!(creds.identity.token_value(), Some("the-token"));
        assert!(creds.trust_anchor.file.is_some());
    }

    #[test]
    fn test_in_cluster_missing_markers() {
        let env = ResolveEnv::default();
        assert!(in_cluster_credentials(&env).unwrap().is_none());
    }

    #[test]
    fn test_in_cluster_missing_token_fails_branch() {
        let root = TempDir::new().unwrap();
        write_service_account(root.path(), None, Some(CA_PEM));

        let err = in_cluster_credentials(&in_cluster_env(root.path())).unwrap_err();
        assert!(matches!(err, ClientError::Read { .. }));
    }

    #[test]
    fn test_in_cluster_missing_ca_is_soft() {
        let root = TempDir::new().unwrap();
        write_service_account(root.path(), Some("the-token"), None);

        let creds = in_cluster_credentials(&in_cluster_env(root.path()))
            .unwrap()
            .unwrap();
        assert!(creds.trust_anchor.is_empty());
        assert_eq!(creds.identity.token_value(), Some("the-token"));
    }

    #[test]
    fn test_in_cluster_garbage_ca_is_soft() {
        let root = TempDir::new().unwrap();
        write_service_account(root.path(), Some("the-token"), Some("not a pem"));

        let creds = in_cluster_credentials(&in_cluster_env(root.path()))
            .unwrap()
            .unwrap();
        assert!(creds.trust_anchor.is_empty());
    }

    #[test]
    fn test_ipv6_service_host() {
        let root = TempDir::new().unwrap();
        write_service_account(root.path(), Some("tok"), Some(CA_PEM));
        let mut env = in_cluster_env(root.path());
        env.service_host = Some("fd00::1".to_string());

        let creds = in_cluster_credentials(&env).unwrap().unwrap();
        assert_eq!(creds.server, "https://[fd00::1]:443");
    }

    #[test]
    fn test_kubeconfig_resolution() {
        let dir = TempDir::new().unwrap();
        let path = sample_kubeconfig(dir.path());

        let options = ResolveOptions {
            kubeconfig: Some(path),
            ..ResolveOptions::default()
        };
        let resolved = resolve(&options, &ResolveEnv::default()).unwrap();
        assert!(!resolved.is_in_cluster());

        let creds = resolved.into_credentials();
        assert_eq!(creds.server, "https://127.0.0.1:6443");
        assert_eq!(creds.trust_anchor.data.as_deref(), Some(b"CA PEM".as_ref()));
        assert!(!creds.identity.is_token());
    }

    #[test]
    fn test_explicit_path_failure_still_tries_in_cluster() {
        let root = TempDir::new().unwrap();
        write_service_account(root.path(), Some("the-token"), Some(CA_PEM));

        let options = ResolveOptions {
            kubeconfig: Some(root.path().join("does-not-exist")),
            ..ResolveOptions::default()
        };
        let resolved = resolve(&options, &in_cluster_env(root.path())).unwrap();
        assert!(resolved.is_in_cluster());
    }

    #[test]
    fn test_no_credential_source() {
        let dir = TempDir::new().unwrap();
        let options = ResolveOptions {
            kubeconfig: Some(dir.path().join("missing")),
            ..ResolveOptions::default()
        };
        let err = resolve(&options, &ResolveEnv::default()).unwrap_err();
        assert!(matches!(err, ClientError::NoCredentialSource));
    }

    #[test]
    fn test_kubeconfig_env_fallback() {
        let dir = TempDir::new().unwrap();
        let path = sample_kubeconfig(dir.path());
        let env = ResolveEnv {
            kubeconfig_env: Some(path.display().to_string()),
            ..ResolveEnv::default()
        };

        let resolved = resolve(&ResolveOptions::default(), &env).unwrap();
        assert_eq!(
            resolved.credentials().server,
            "https://127.0.0.1:6443"
        );
    }

    #[test]
    fn test_context_selection_errors() {
        let config = Kubeconfig::from_yaml(
            r#"
apiVersion: v1
kind: Config
contexts:
- name: c
  context:
    cluster: missing-cluster
    user: u
current-context: c
"#,
        )
        .unwrap();

        let err = credentials_from_kubeconfig(&config, Some("nope")).unwrap_err();
        assert!(matches!(err, ClientError::ContextNotFound(_)));

        let err = credentials_from_kubeconfig(&config, None).unwrap_err();
        assert!(matches!(err, ClientError::ClusterNotFound { .. }));

        let empty = Kubeconfig::default();
        let err = credentials_from_kubeconfig(&empty, None).unwrap_err();
        assert!(matches!(err, ClientError::NoCurrentContext));
    }

    #[test]
    fn test_token_user_yields_token_identity() {
        let config = Kubeconfig::from_yaml(
            r#"
apiVersion: v1
kind: Config
clusters:
- name: c
  cluster:
    server: https://10.0.0.9:6443
contexts:
- name: c
  context:
    cluster: c
    user: u
current-context: c
users:
- name: u
  user:
    token: sekret
"#,
        )
        .unwrap();

        let creds = credentials_from_kubeconfig(&config, None).unwrap();
        assert_eq!(creds.identity.token_value(), Some("sekret"));
    }
}
