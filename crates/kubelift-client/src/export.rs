//! Credential artifact synthesis.
//!
//! Turns a resolved [`ClusterCredentials`] into the portable kubeconfig
//! artifact: one cluster, one context, one user, all named
//! [`EXPORT_NAME`]. Every piece of identity material is embedded inline at
//! serialization time, so the artifact never references files on the
//! machine that produced it.
//!
//! Two extraction-only modes exist besides the full document: the client
//! key+certificate PEM bundle and the CA bundle.

use std::fs;
use std::path::PathBuf;

use serde_yaml::Mapping;

use kubelift_common::{
    AuthInfo, Cluster, ClusterCredentials, Context, Identity, Kubeconfig, Material,
    NamedAuthInfo, NamedCluster, NamedContext, encode_data,
};

use crate::error::{ClientError, Result};

/// The fixed name used for the cluster, context, and user entries.
pub const EXPORT_NAME: &str = "kubelift";

/// Trust-anchor overrides applied at synthesis time.
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    /// Replacement CA bundle file; wins unconditionally when set.
    pub replace_ca: Option<PathBuf>,
    /// CA bundle fetched from the proxy; applies when no replacement file
    /// is given.
    pub proxy_ca: Option<String>,
}

/// Computes the trust-anchor bytes the artifact will carry.
///
/// Precedence: the explicit replacement file, then the proxy-supplied CA,
/// then the credential's own trust anchor (inline bytes over file
/// reference).
///
/// # Errors
///
/// Returns a read error with path context when a referenced file cannot be
/// read.
pub fn effective_trust_anchor(
    credentials: &ClusterCredentials,
    options: &ExportOptions,
) -> Result<Option<Vec<u8>>> {
    if let Some(path) = &options.replace_ca {
        return fs::read(path)
            .map(Some)
            .map_err(|err| ClientError::read(path, err));
    }
    if let Some(pem) = &options.proxy_ca {
        return Ok(Some(pem.clone().into_bytes()));
    }
    resolve_material(&credentials.trust_anchor)
}

/// Synthesizes the kubeconfig artifact.
///
/// The output is a pure function of the credential and options (modulo the
/// file reads for referenced material): synthesizing twice produces
/// byte-identical YAML.
///
/// # Errors
///
/// Returns a read error when referenced material cannot be loaded.
pub fn kubeconfig_from_credentials(
    credentials: &ClusterCredentials,
    options: &ExportOptions,
) -> Result<Kubeconfig> {
    let cluster = Cluster {
        server: credentials.server.clone(),
        certificate_authority: None,
        certificate_authority_data: effective_trust_anchor(credentials, options)?
            .map(|bytes| encode_data(&bytes)),
    };

    let user = match &credentials.identity {
        Identity::Token { token, file } => {
            let value = match token {
                Some(token) => Some(secrecy::ExposeSecret::expose_secret(token).to_string()),
                None => file
                    .as_ref()
                    .map(|path| {
                        fs::read_to_string(path).map_err(|err| ClientError::read(path, err))
                    })
                    .transpose()?,
            };
            AuthInfo {
                token: value,
                ..AuthInfo::default()
            }
        }
        Identity::ClientCertificate { cert, key } => AuthInfo {
            client_certificate_data: resolve_material(cert)?.map(|bytes| encode_data(&bytes)),
            client_key_data: resolve_material(key)?.map(|bytes| encode_data(&bytes)),
            ..AuthInfo::default()
        },
    };

    Ok(Kubeconfig {
        clusters: vec![NamedCluster {
            name: EXPORT_NAME.to_string(),
            cluster,
        }],
        contexts: vec![NamedContext {
            name: EXPORT_NAME.to_string(),
            context: Context {
                cluster: EXPORT_NAME.to_string(),
                user: EXPORT_NAME.to_string(),
                namespace: None,
            },
        }],
        current_context: EXPORT_NAME.to_string(),
        preferences: Some(Mapping::new()),
        users: vec![NamedAuthInfo {
            name: EXPORT_NAME.to_string(),
            user,
        }],
        ..Kubeconfig::default()
    })
}

/// Produces the client key + certificate PEM bundle, key first.
///
/// # Errors
///
/// Fails with [`ClientError::CertificateExportWithToken`] for token
/// identities, and with a read error when referenced material cannot be
/// loaded.
pub fn client_cert_bundle(credentials: &ClusterCredentials) -> Result<Vec<u8>> {
    match &credentials.identity {
        Identity::Token { .. } => Err(ClientError::CertificateExportWithToken),
        Identity::ClientCertificate { cert, key } => {
            let mut bundle = Vec::new();
            if let Some(bytes) = resolve_material(key)? {
                bundle.extend_from_slice(&bytes);
            }
            if let Some(bytes) = resolve_material(cert)? {
                bundle.extend_from_slice(&bytes);
            }
            Ok(bundle)
        }
    }
}

/// Produces the CA PEM bundle.
///
/// # Errors
///
/// Fails with [`ClientError::NoTrustAnchor`] when no trust anchor is
/// available from any source.
pub fn ca_bundle(credentials: &ClusterCredentials, options: &ExportOptions) -> Result<Vec<u8>> {
    effective_trust_anchor(credentials, options)?.ok_or(ClientError::NoTrustAnchor)
}

fn resolve_material(material: &Material) -> Result<Option<Vec<u8>>> {
    material.resolve().map_err(|err| match &material.file {
        Some(path) => ClientError::read(path, err),
        None => ClientError::Io(err),
    })
}
