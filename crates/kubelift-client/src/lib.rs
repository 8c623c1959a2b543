//! # kubelift-client
//!
//! Credential resolution, service account exchange, proxy probing, and
//! kubeconfig export.
//!
//! The pieces compose in data-flow order:
//! 1. [`resolver::resolve`] picks the credential source (ambient in-cluster
//!    identity or a kubeconfig file) and yields a normalized
//!    [`kubelift_common::ClusterCredentials`].
//! 2. [`exchange::exchange_service_account`] optionally swaps that identity
//!    for a named service account's bearer token, through a
//!    [`ServiceAccountApi`] built from the *unmodified* credential with the
//!    forward proxy disabled.
//! 3. [`hosts::loopback_alias`] works around the loopback proxy-bypass
//!    quirk by rewriting the server host to an `/etc/hosts` alias.
//! 4. [`probe::probe_streaming`] verifies the configured proxy relays
//!    partial responses before the credential is handed to watch-hungry
//!    tools.
//! 5. [`export::kubeconfig_from_credentials`] emits the portable artifact.
//!
//! ## Example
//!
//! ```no_run
//! use kubelift_client::export::{kubeconfig_from_credentials, ExportOptions};
//! use kubelift_client::resolver::{resolve, ResolveEnv, ResolveOptions};
//!
//! # fn example() -> kubelift_client::Result<()> {
//! let env = ResolveEnv::from_env("");
//! let resolved = resolve(&ResolveOptions::default(), &env)?;
//! let config = kubeconfig_from_credentials(
//!     &resolved.into_credentials(),
//!     &ExportOptions::default(),
//! )?;
//! println!("{}", config.to_yaml()?);
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod error;
pub mod exchange;
pub mod export;
pub mod hosts;
pub mod probe;
pub mod resolver;

pub use api::{KubeApiClient, Secret, ServiceAccount, ServiceAccountApi};
pub use error::{ClientError, Result};
pub use exchange::{
    SecretCaPolicy, ServiceAccountCredentials, exchange_service_account,
    exchange_service_account_spec,
};
pub use export::{
    EXPORT_NAME, ExportOptions, ca_bundle, client_cert_bundle, kubeconfig_from_credentials,
};
pub use hosts::{DEFAULT_HOSTS_PATH, loopback_alias, rewrite_loopback};
pub use probe::{ProbeConfig, ProbeOutcome, fetch_proxy_ca, probe_streaming};
pub use resolver::{ResolveEnv, ResolveOptions, ResolvedCredentials, resolve};
