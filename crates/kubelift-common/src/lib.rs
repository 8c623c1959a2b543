//! # kubelift-common
//!
//! Common types for resolving and exporting Kubernetes client credentials.
//!
//! This crate provides the foundational types shared across kubelift:
//! - The normalized credential record ([`ClusterCredentials`]) and its parts
//! - The kubeconfig document model, round-trippable through YAML
//!
//! ## Example
//!
//! ```
//! use kubelift_common::{ClusterCredentials, Identity, ServiceAccountRef};
//!
//! // A token-based credential for an API server.
//! let creds = ClusterCredentials::new("https://10.0.0.1:6443")
//!     .with_identity(Identity::bearer("eyJhbGciOi..."));
//! assert!(creds.identity.is_token());
//!
//! // Service account specifiers are validated at parse time.
//! let sa: ServiceAccountRef = "kube-system/default".parse().unwrap();
//! assert_eq!(sa.namespace, "kube-system");
//! ```

/// Credential records, identity material, and service account specifiers.
pub mod credentials;
/// The kubeconfig file format (clusters, contexts, users).
pub mod kubeconfig;

pub use credentials::{
    ClusterCredentials, Identity, Material, ParseServiceAccountRefError, ServiceAccountRef,
    TrustAnchor, join_host_port, under_root,
};
pub use kubeconfig::{
    AuthInfo, Cluster, Context, Kubeconfig, NamedAuthInfo, NamedCluster, NamedContext,
    decode_data, encode_data,
};
