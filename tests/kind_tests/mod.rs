//! Stories about issuing webhook certificates on a kind cluster
//!
//! - `certify_e2e`: a full run against the real CertificateSigningRequest
//!   and Secret APIs, with a test signer standing in for the cluster signer
//!
//! ```bash
//! cargo test --test kind -- --ignored --nocapture
//! ```

mod certify_e2e;
