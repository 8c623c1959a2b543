//! Service account token exchange.
//!
//! Given a validated `namespace/name` specifier and an API handle built from
//! the unmodified base credential, obtain a bearer token for that service
//! account: prefer the account's static token secret (first secret reference
//! of the token type, in listed order), and fall back to issuing a
//! short-lived token when the account has no secret references at all, which
//! is the default on recent platform versions.

use secrecy::SecretString;
use tracing::debug;

use kubelift_common::ServiceAccountRef;

use crate::api::ServiceAccountApi;
use crate::error::{ClientError, Result};

/// Whether the token secret must also carry a `ca.crt` field.
///
/// Historical behavior differs here, so it is a policy choice rather than a
/// fixed rule: `TokenOnly` ignores the field entirely, `RequireCa` demands
/// it and returns its bytes alongside the token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SecretCaPolicy {
    /// Only the `token` field is required; `ca.crt` is left untouched.
    #[default]
    TokenOnly,
    /// The secret must also hold `ca.crt`, which is extracted and applied.
    RequireCa,
}

/// The material obtained from an exchange.
#[derive(Debug, Clone)]
pub struct ServiceAccountCredentials {
    /// The bearer token.
    pub token: SecretString,
    /// CA bundle from the token secret, only under
    /// [`SecretCaPolicy::RequireCa`].
    pub ca: Option<Vec<u8>>,
}

/// Validates a raw specifier and runs the exchange.
///
/// Validation happens before the API is touched: a malformed specifier
/// never causes a network call.
///
/// # Errors
///
/// Returns [`ClientError::InvalidServiceAccountRef`] for malformed
/// specifiers, and the underlying exchange errors otherwise.
pub async fn exchange_service_account_spec(
    api: &dyn ServiceAccountApi,
    spec: &str,
    policy: SecretCaPolicy,
) -> Result<ServiceAccountCredentials> {
    let reference: ServiceAccountRef = spec.parse()?;
    exchange_service_account(api, &reference, policy).await
}

/// Obtains a bearer token for the given service account.
///
/// # Errors
///
/// Any API failure aborts the exchange with its operation context attached;
/// a token secret without a `token` field (or, under
/// [`SecretCaPolicy::RequireCa`], without `ca.crt`) is a data corruption
/// error; an account whose secret references exist but contain no token
/// secret fails with [`ClientError::NoTokenSecret`].
pub async fn exchange_service_account(
    api: &dyn ServiceAccountApi,
    reference: &ServiceAccountRef,
    policy: SecretCaPolicy,
) -> Result<ServiceAccountCredentials> {
    let account = api
        .get_service_account(&reference.namespace, &reference.name)
        .await?;

    if account.secrets.is_empty() {
        debug!(
            "service account {reference} has no static token secret, issuing a short-lived token"
        );
        let token = api
            .create_token(&reference.namespace, &reference.name)
            .await?;
        return Ok(ServiceAccountCredentials {
            token: SecretString::new(token.into()),
            ca: None,
        });
    }

    for secret_ref in &account.secrets {
        let secret = api
            .get_secret(&reference.namespace, &secret_ref.name)
            .await?;
        if !secret.is_service_account_token() {
            continue;
        }

        let token = String::from_utf8_lossy(&secret.decoded("token")?).into_owned();
        let ca = match policy {
            SecretCaPolicy::RequireCa => Some(secret.decoded("ca.crt")?),
            SecretCaPolicy::TokenOnly => None,
        };

        debug!(secret = %secret_ref.name, "using the static service account token secret");
        return Ok(ServiceAccountCredentials {
            token: SecretString::new(token.into()),
            ca,
        });
    }

    Err(ClientError::NoTokenSecret(reference.to_string()))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use base64::prelude::*;
    use secrecy::ExposeSecret;

    use crate::api::{ObjectMeta, ObjectReference, Secret, ServiceAccount};

    use super::*;

    /// Scripted [`ServiceAccountApi`] that records every call.
    #[derive(Default)]
    struct MockApi {
        secrets_listed: Vec<&'static str>,
        secret_bodies: HashMap<&'static str, Secret>,
        issued_token: Option<&'static str>,
        calls: Mutex<Vec<String>>,
    }

    impl MockApi {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn token_secret(name: &str, with_ca: bool) -> Secret {
            let mut data = HashMap::new();
            data.insert("token".to_string(), BASE64_STANDARD.encode("sekret"));
            if with_ca {
                data.insert("ca.crt".to_string(), BASE64_STANDARD.encode("CA PEM"));
            }
            Secret {
                metadata: ObjectMeta {
                    name: name.to_string(),
                    namespace: None,
                },
                secret_type: Some(
                    crate::api::SECRET_TYPE_SERVICE_ACCOUNT_TOKEN.to_string(),
                ),
                data,
            }
        }
    }

    #[async_trait]
    impl ServiceAccountApi for MockApi {
        async fn get_service_account(
            &self,
            namespace: &str,
            name: &str,
        ) -> crate::error::Result<ServiceAccount> {
            self.record(format!("get_service_account {namespace}/{name}"));
            Ok(ServiceAccount {
                metadata: ObjectMeta {
                    name: name.to_string(),
                    namespace: Some(namespace.to_string()),
                },
                secrets: self
                    .secrets_listed
                    .iter()
                    .map(|n| ObjectReference {
                        name: (*n).to_string(),
                    })
                    .collect(),
            })
        }

        async fn get_secret(
            &self,
            namespace: &str,
            name: &str,
        ) -> crate::error::Result<Secret> {
            self.record(format!("get_secret {namespace}/{name}"));
            Ok(self.secret_bodies[name].clone())
        }

        async fn create_token(
            &self,
            namespace: &str,
            name: &str,
        ) -> crate::error::Result<String> {
            self.record(format!("create_token {namespace}/{name}"));
            Ok(self.issued_token.unwrap().to_string())
        }
    }

    fn sa() -> ServiceAccountRef {
        ServiceAccountRef::new("tools", "builder")
    }

    #[tokio::test]
    async fn test_static_secret_wins_without_issuance() {
        let mut api = MockApi::default();
        api.secrets_listed = vec!["builder-token"];
        api.secret_bodies
            .insert("builder-token", MockApi::token_secret("builder-token", true));

        let creds = exchange_service_account(&api, &sa(), SecretCaPolicy::TokenOnly)
            .await
            .unwrap();
        assert_eq!(creds.token.expose_secret(), "sekret");
        assert!(creds.ca.is_none());
        assert!(!api.calls().iter().any(|c| c.starts_with("create_token")));
    }

    #[tokio::test]
    async fn test_first_token_secret_in_listed_order() {
        let mut api = MockApi::default();
        api.secrets_listed = vec!["dockercfg", "token-a", "token-b"];
        api.secret_bodies.insert(
            "dockercfg",
            Secret {
                metadata: ObjectMeta {
                    name: "dockercfg".to_string(),
                    namespace: None,
                },
                secret_type: Some("kubernetes.io/dockercfg".to_string()),
                data: HashMap::new(),
            },
        );
        api.secret_bodies
            .insert("token-a", MockApi::token_secret("token-a", false));
        api.secret_bodies
            .insert("token-b", MockApi::token_secret("token-b", false));

        let creds = exchange_service_account(&api, &sa(), SecretCaPolicy::TokenOnly)
            .await
            .unwrap();
        assert_eq!(creds.token.expose_secret(), "sekret");
        // token-b is never fetched once token-a matched.
        assert_eq!(
            api.calls(),
            vec![
                "get_service_account tools/builder",
                "get_secret tools/dockercfg",
                "get_secret tools/token-a",
            ]
        );
    }

    #[tokio::test]
    async fn test_zero_secrets_issues_exactly_once() {
        let mut api = MockApi::default();
        api.issued_token = Some("fresh");

        let creds = exchange_service_account(&api, &sa(), SecretCaPolicy::TokenOnly)
            .await
            .unwrap();
        assert_eq!(creds.token.expose_secret(), "fresh");
        assert_eq!(
            api.calls()
                .iter()
                .filter(|c| c.starts_with("create_token"))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_malformed_spec_never_reaches_the_network() {
        let api = MockApi::default();
        let err = exchange_service_account_spec(&api, "not-a-specifier", SecretCaPolicy::TokenOnly)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_token_key_is_data_corruption() {
        let mut api = MockApi::default();
        api.secrets_listed = vec!["broken"];
        api.secret_bodies.insert(
            "broken",
            Secret {
                metadata: ObjectMeta {
                    name: "broken".to_string(),
                    namespace: None,
                },
                secret_type: Some(
                    crate::api::SECRET_TYPE_SERVICE_ACCOUNT_TOKEN.to_string(),
                ),
                data: HashMap::new(),
            },
        );

        let err = exchange_service_account(&api, &sa(), SecretCaPolicy::TokenOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::MissingSecretKey { .. }));
    }

    #[tokio::test]
    async fn test_require_ca_policy_extracts_ca() {
        let mut api = MockApi::default();
        api.secrets_listed = vec!["builder-token"];
        api.secret_bodies
            .insert("builder-token", MockApi::token_secret("builder-token", true));

        let creds = exchange_service_account(&api, &sa(), SecretCaPolicy::RequireCa)
            .await
            .unwrap();
        assert_eq!(creds.ca.as_deref(), Some(b"CA PEM".as_ref()));
    }

    #[tokio::test]
    async fn test_require_ca_policy_rejects_missing_ca() {
        let mut api = MockApi::default();
        api.secrets_listed = vec!["builder-token"];
        api.secret_bodies.insert(
            "builder-token",
            MockApi::token_secret("builder-token", false),
        );

        let err = exchange_service_account(&api, &sa(), SecretCaPolicy::RequireCa)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ClientError::MissingSecretKey { ref key, .. } if key == "ca.crt"
        ));
    }

    #[tokio::test]
    async fn test_no_matching_secret_type() {
        let mut api = MockApi::default();
        api.secrets_listed = vec!["dockercfg"];
        api.secret_bodies.insert(
            "dockercfg",
            Secret {
                metadata: ObjectMeta {
                    name: "dockercfg".to_string(),
                    namespace: None,
                },
                secret_type: Some("kubernetes.io/dockercfg".to_string()),
                data: HashMap::new(),
            },
        );

        let err = exchange_service_account(&api, &sa(), SecretCaPolicy::TokenOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::NoTokenSecret(_)));
    }
}
