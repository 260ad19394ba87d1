//! Webhook Certificator - TLS secrets for admission webhooks from the cluster CA
//!
//! Admission webhooks must serve TLS with a certificate the API server trusts.
//! This crate obtains one from the cluster itself: it generates a key pair,
//! submits a `certificates.k8s.io/v1` CertificateSigningRequest for the
//! webhook service's DNS names, approves it, waits for the signer to issue
//! and stores the result as a `kubernetes.io/tls` secret.
//!
//! # Flow
//!
//! ```text
//! KeyMaterial::generate ─► submit_signing_request ─► wait_for_certificate
//!                                                          │
//!                          publish_tls_secret ◄── ensure_certificate_matches
//! ```
//!
//! # Modules
//!
//! - [`certify`] - Orchestrates one run of the full flow
//! - [`config`] - Validated run configuration
//! - [`csr`] - Signing request submission, approval and the issuance wait
//! - [`identity`] - Service identity and derived DNS names
//! - [`pki`] - Key generation and certificate checks
//! - [`secret`] - TLS secret publication
//! - [`retry`] - Backoff for transient API errors
//! - [`kube_utils`] - Kubernetes client bootstrap
//! - [`telemetry`] - Logging initialization
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod certify;
pub mod config;
pub mod csr;
pub mod error;
pub mod identity;
pub mod kube_utils;
pub mod pki;
pub mod retry;
pub mod secret;
pub mod telemetry;

pub use error::{Error, Stage};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Namespace used when none is given
pub const DEFAULT_NAMESPACE: &str = "webhook";

/// Secret name used when none is given
pub const DEFAULT_SECRET_NAME: &str = "webhook-certs";

/// Label marking objects written by this tool
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] and the name reported in approvals
pub const MANAGER_NAME: &str = "webhook-certificator";
