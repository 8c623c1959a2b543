//! Kubernetes API access for the service account exchange.
//!
//! The exchange only needs three operations, expressed by the
//! [`ServiceAccountApi`] trait: fetch a service account, fetch a secret, and
//! issue a short-lived token. [`KubeApiClient`] is the reqwest
//! implementation against the cluster's REST API.
//!
//! The client is always built with the forward proxy disabled: the whole
//! point of the tool is to produce a proxy-ready kubeconfig, so the exchange
//! must reach the API server directly rather than through the proxy it is
//! about to configure.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use kubelift_common::{ClusterCredentials, Identity};

use crate::error::{ClientError, Result};

/// Connection timeout for API calls.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Total request timeout for API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// The secret type marking a service account token secret.
pub const SECRET_TYPE_SERVICE_ACCOUNT_TOKEN: &str = "kubernetes.io/service-account-token";

/// Object metadata, reduced to the fields the exchange reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectMeta {
    /// Object name.
    #[serde(default)]
    pub name: String,
    /// Object namespace.
    #[serde(default)]
    pub namespace: Option<String>,
}

/// A reference to another object by name.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectReference {
    /// The referenced object's name.
    #[serde(default)]
    pub name: String,
}

/// A service account record.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccount {
    /// Object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Static token secrets associated with this account, in listed order.
    /// Empty on recent platform versions, where tokens are issued on demand.
    #[serde(default)]
    pub secrets: Vec<ObjectReference>,
}

/// A secret record. Data values arrive base64-encoded on the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct Secret {
    /// Object metadata.
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// The secret type (e.g. `kubernetes.io/service-account-token`).
    #[serde(rename = "type", default)]
    pub secret_type: Option<String>,
    /// Base64-encoded payload keyed by field name.
    #[serde(default)]
    pub data: HashMap<String, String>,
}

impl Secret {
    /// Whether this secret holds a service account token.
    #[must_use]
    pub fn is_service_account_token(&self) -> bool {
        self.secret_type.as_deref() == Some(SECRET_TYPE_SERVICE_ACCOUNT_TOKEN)
    }

    /// Decodes one data field.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::MissingSecretKey`] when the key is absent, and
    /// a decode error when the value is not valid base64.
    pub fn decoded(&self, key: &'static str) -> Result<Vec<u8>> {
        let value = self
            .data
            .get(key)
            .ok_or_else(|| ClientError::MissingSecretKey {
                secret: self.metadata.name.clone(),
                key: key.to_string(),
            })?;
        BASE64_STANDARD
            .decode(value)
            .map_err(|source| ClientError::InvalidDataField { field: key, source })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenRequest {
    api_version: &'static str,
    kind: &'static str,
    spec: TokenRequestSpec,
}

#[derive(Serialize)]
struct TokenRequestSpec {}

#[derive(Deserialize)]
struct TokenRequestResponse {
    #[serde(default)]
    status: TokenRequestStatus,
}

#[derive(Default, Deserialize)]
struct TokenRequestStatus {
    #[serde(default)]
    token: String,
}

/// The three directory operations the service account exchange consumes.
///
/// Implementations must be thread-safe; the exchange itself never retries a
/// failed call.
#[async_trait]
pub trait ServiceAccountApi: Send + Sync {
    /// Fetches a service account by namespace and name.
    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount>;

    /// Fetches a secret by namespace and name.
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret>;

    /// Issues a short-lived token for the service account.
    async fn create_token(&self, namespace: &str, name: &str) -> Result<String>;
}

/// Reqwest-backed [`ServiceAccountApi`] implementation.
///
/// Built from the unmodified base credential: the trust anchor becomes the
/// client's root certificate set, a certificate identity becomes the TLS
/// client identity, and a token identity becomes a bearer header.
pub struct KubeApiClient {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
}

impl std::fmt::Debug for KubeApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeApiClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl KubeApiClient {
    /// Creates a client for the given credential.
    ///
    /// # Errors
    ///
    /// Returns an error when the trust anchor or client identity material
    /// cannot be read or parsed, or when the underlying HTTP client fails to
    /// build.
    pub fn new(credentials: &ClusterCredentials) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .user_agent(if credentials.user_agent.is_empty() {
                "kubelift".to_string()
            } else {
                credentials.user_agent.clone()
            })
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .timeout(DEFAULT_TIMEOUT)
            // PEM client identities require the rustls backend.
            .use_rustls_tls()
            // The proxy being configured is not usable yet; the exchange
            // must bypass HTTPS_PROXY entirely.
            .no_proxy();

        if let Some(ca) = resolve_material_bytes(&credentials.trust_anchor)? {
            for certificate in reqwest::Certificate::from_pem_bundle(&ca)? {
                builder = builder.add_root_certificate(certificate);
            }
        }

        let mut token = None;
        match &credentials.identity {
            Identity::ClientCertificate { cert, key } => {
                let cert_pem = resolve_material_bytes(cert)?;
                let key_pem = resolve_material_bytes(key)?;
                if let (Some(cert_pem), Some(key_pem)) = (cert_pem, key_pem) {
                    let mut bundle = key_pem;
                    bundle.extend_from_slice(&cert_pem);
                    builder = builder.identity(reqwest::Identity::from_pem(&bundle)?);
                }
            }
            Identity::Token { token: inline, file } => {
                token = match inline {
                    Some(value) => Some(value.clone()),
                    None => file
                        .as_ref()
                        .map(|path| {
                            std::fs::read_to_string(path)
                                .map(|contents| SecretString::new(contents.into()))
                                .map_err(|err| ClientError::read(path, err))
                        })
                        .transpose()?,
                };
            }
        }

        Ok(Self {
            client: builder.build()?,
            base_url: credentials.server.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.client.request(method, format!("{}{path}", self.base_url));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }
        request
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        operation: &'static str,
        reference: &str,
    ) -> Result<T> {
        let api_error = |status: Option<u16>, message: String| ClientError::Api {
            operation,
            reference: reference.to_string(),
            status,
            message,
        };

        let response = request
            .send()
            .await
            .map_err(|err| api_error(None, err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = match response.text().await {
                Ok(body) => status_message(status, &body),
                Err(_) => format!("unexpected status {}", status.as_u16()),
            };
            return Err(api_error(Some(status.as_u16()), message));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| api_error(Some(status.as_u16()), format!("decoding response: {err}")))
    }
}

/// Extracts a short status message from an API error body.
fn status_message(status: StatusCode, body: &str) -> String {
    #[derive(Deserialize)]
    struct StatusBody {
        #[serde(default)]
        message: String,
    }

    match serde_json::from_str::<StatusBody>(body) {
        Ok(parsed) if !parsed.message.is_empty() => parsed.message,
        _ => format!("unexpected status {}", status.as_u16()),
    }
}

fn resolve_material_bytes(material: &kubelift_common::Material) -> Result<Option<Vec<u8>>> {
    material.resolve().map_err(|err| match &material.file {
        Some(path) => ClientError::read(path, err),
        None => ClientError::Io(err),
    })
}

#[async_trait]
impl ServiceAccountApi for KubeApiClient {
    async fn get_service_account(&self, namespace: &str, name: &str) -> Result<ServiceAccount> {
        debug!(namespace, name, "fetching service account");
        let path = format!("/api/v1/namespaces/{namespace}/serviceaccounts/{name}");
        self.execute(
            self.request(reqwest::Method::GET, &path),
            "getting serviceaccount",
            &format!("{namespace}/{name}"),
        )
        .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        debug!(namespace, name, "fetching secret");
        let path = format!("/api/v1/namespaces/{namespace}/secrets/{name}");
        self.execute(
            self.request(reqwest::Method::GET, &path),
            "getting secret",
            &format!("{namespace}/{name}"),
        )
        .await
    }

    async fn create_token(&self, namespace: &str, name: &str) -> Result<String> {
        debug!(namespace, name, "issuing service account token");
        let path = format!("/api/v1/namespaces/{namespace}/serviceaccounts/{name}/token");
        let body = TokenRequest {
            api_version: "authentication.k8s.io/v1",
            kind: "TokenRequest",
            spec: TokenRequestSpec {},
        };
        let response: TokenRequestResponse = self
            .execute(
                self.request(reqwest::Method::POST, &path).json(&body),
                "issuing a token for serviceaccount",
                &format!("{namespace}/{name}"),
            )
            .await?;
        Ok(response.status.token)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use wiremock::matchers::{bearer_token, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn token_credentials(server: &str) -> ClusterCredentials {
        ClusterCredentials::new(server).with_identity(Identity::bearer("base-token"))
    }

    #[tokio::test]
    async fn test_get_service_account() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/tools/serviceaccounts/builder"))
            .and(bearer_token("base-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "metadata": {"name": "builder", "namespace": "tools"},
                "secrets": [{"name": "builder-token-abcde"}]
            })))
            .mount(&server)
            .await;

        let client = KubeApiClient::new(&token_credentials(&server.uri())).unwrap();
        let account = client.get_service_account("tools", "builder").await.unwrap();
        assert_eq!(account.metadata.name, "builder");
        assert_eq!(account.secrets.len(), 1);
        assert_eq!(account.secrets[0].name, "builder-token-abcde");
    }

    #[tokio::test]
    async fn test_get_secret_decodes_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/tools/secrets/builder-token-abcde"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "metadata": {"name": "builder-token-abcde"},
                "type": "kubernetes.io/service-account-token",
                "data": {"token": "c2VrcmV0", "ca.crt": "Q0EgUEVN"}
            })))
            .mount(&server)
            .await;

        let client = KubeApiClient::new(&token_credentials(&server.uri())).unwrap();
        let secret = client
            .get_secret("tools", "builder-token-abcde")
            .await
            .unwrap();
        assert!(secret.is_service_account_token());
        assert_eq!(secret.decoded("token").unwrap(), b"sekret");
        assert_eq!(secret.decoded("ca.crt").unwrap(), b"CA PEM");
    }

    #[tokio::test]
    async fn test_create_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/namespaces/tools/serviceaccounts/builder/token"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "status": {"token": "fresh-token"}
            })))
            .mount(&server)
            .await;

        let client = KubeApiClient::new(&token_credentials(&server.uri())).unwrap();
        let token = client.create_token("tools", "builder").await.unwrap();
        assert_eq!(token, "fresh-token");
    }

    #[tokio::test]
    async fn test_not_found_carries_operation_context() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/tools/serviceaccounts/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "kind": "Status",
                "message": "serviceaccounts \"missing\" not found"
            })))
            .mount(&server)
            .await;

        let client = KubeApiClient::new(&token_credentials(&server.uri())).unwrap();
        let err = client
            .get_service_account("tools", "missing")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        let rendered = err.to_string();
        assert!(rendered.contains("getting serviceaccount"));
        assert!(rendered.contains("tools/missing"));
    }

    #[test]
    fn test_secret_missing_key() {
        let secret = Secret {
            metadata: ObjectMeta {
                name: "s".to_string(),
                namespace: None,
            },
            secret_type: Some(SECRET_TYPE_SERVICE_ACCOUNT_TOKEN.to_string()),
            data: HashMap::new(),
        };
        let err = secret.decoded("token").unwrap_err();
        assert!(matches!(err, ClientError::MissingSecretKey { .. }));
    }
}
