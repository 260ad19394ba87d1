//! Error types for the certificate issuance flow
//!
//! Every stage returns a typed failure. The orchestrator never recovers from
//! any of them; it annotates the first failure with the stage that produced
//! it and hands it to the caller.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Stage of the issuance pipeline that produced an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Generating the key pair and CSR
    KeyGeneration,
    /// Submitting and approving the signing request
    Submission,
    /// Waiting for the signing authority to issue the certificate
    Issuance,
    /// Writing the TLS secret
    Publication,
}

impl Stage {
    /// Stable name used in error messages and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::KeyGeneration => "key-generation",
            Stage::Submission => "submission",
            Stage::Issuance => "issuance",
            Stage::Publication => "publication",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for certificate issuance
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Service or namespace is not a valid DNS label
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    /// Configuration value out of range or malformed
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Key pair could not be generated
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// CSR could not be built or serialized
    #[error("request encoding failed: {0}")]
    RequestEncoding(String),

    /// Signing request could not be submitted (network/auth)
    #[error("failed to submit signing request {name}: {message}")]
    Submission {
        /// Name of the signing request
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Signing authority refused or denied approval
    #[error("signing request {name} was denied: {reason}")]
    ApprovalDenied {
        /// Name of the signing request
        name: String,
        /// Reason reported by the authority or policy
        reason: String,
    },

    /// Transient failure reading the signing request
    #[error("failed to query signing request {name}: {message}")]
    SigningRequestQuery {
        /// Name of the signing request
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Signing request disappeared while waiting for it
    #[error("signing request {name} no longer exists")]
    SigningRequestGone {
        /// Name of the signing request
        name: String,
    },

    /// Signer accepted the request but failed to issue a certificate
    #[error("signing request {name} failed: {reason}")]
    IssuanceFailed {
        /// Name of the signing request
        name: String,
        /// Reason reported by the signer
        reason: String,
    },

    /// No terminal state observed before the deadline
    #[error("timed out after {}s waiting for signing request {name}{}", .waited.as_secs(), last_error_suffix(.last_error))]
    IssuanceTimeout {
        /// Name of the signing request
        name: String,
        /// Configured overall deadline
        waited: Duration,
        /// Last transient query error, if the wait ended while retrying
        last_error: Option<String>,
    },

    /// Caller cancelled the wait
    #[error("wait for signing request {name} was cancelled")]
    Cancelled {
        /// Name of the signing request
        name: String,
    },

    /// Issued certificate does not carry the public key of the CSR
    #[error("issued certificate does not match private key: {0}")]
    CertificateMismatch(String),

    /// Secret read failed for a reason other than not-found
    #[error("failed to read secret {namespace}/{name}: {message}")]
    SecretRead {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Secret create or update failed
    #[error("failed to write secret {namespace}/{name}: {message}")]
    SecretWrite {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Description of what failed
        message: String,
        /// Storage reported a conflict or already-exists
        conflict: bool,
    },

    /// Kubernetes client could not be created
    #[error("client error: {0}")]
    Client(String),

    /// Error annotated with the pipeline stage that produced it
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// Stage that failed
        stage: Stage,
        /// Underlying error
        #[source]
        source: Box<Error>,
    },
}

fn last_error_suffix(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

impl Error {
    /// Create an invalid identity error
    pub fn invalid_identity(msg: impl Into<String>) -> Self {
        Self::InvalidIdentity(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a key generation error
    pub fn key_generation(msg: impl Into<String>) -> Self {
        Self::KeyGeneration(msg.into())
    }

    /// Create a request encoding error
    pub fn request_encoding(msg: impl Into<String>) -> Self {
        Self::RequestEncoding(msg.into())
    }

    /// Create a submission error for the named signing request
    pub fn submission(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Submission {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create an approval denied error for the named signing request
    pub fn approval_denied(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ApprovalDenied {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a transient query error for the named signing request
    pub fn query(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SigningRequestQuery {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create an error for a signing request deleted while being watched
    pub fn signing_request_gone(name: impl Into<String>) -> Self {
        Self::SigningRequestGone { name: name.into() }
    }

    /// Create an issuance failed error for the named signing request
    pub fn issuance_failed(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IssuanceFailed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a timeout error, keeping the last transient error if any
    pub fn issuance_timeout(
        name: impl Into<String>,
        waited: Duration,
        last_error: Option<String>,
    ) -> Self {
        Self::IssuanceTimeout {
            name: name.into(),
            waited,
            last_error,
        }
    }

    /// Create a cancellation error for the named signing request
    pub fn cancelled(name: impl Into<String>) -> Self {
        Self::Cancelled { name: name.into() }
    }

    /// Create a certificate mismatch error
    pub fn certificate_mismatch(msg: impl Into<String>) -> Self {
        Self::CertificateMismatch(msg.into())
    }

    /// Create a secret read error
    pub fn secret_read(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::SecretRead {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a secret write error
    pub fn secret_write(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
        conflict: bool,
    ) -> Self {
        Self::SecretWrite {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
            conflict,
        }
    }

    /// Create a client bootstrap error
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Annotate this error with the stage that produced it
    pub fn at_stage(self, stage: Stage) -> Self {
        Self::Stage {
            stage,
            source: Box::new(self),
        }
    }

    /// Stage annotation, if present
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Innermost error with all stage annotations removed
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether rerunning the failed operation may succeed
    ///
    /// Local environment problems and policy decisions are never retryable.
    /// Timeouts are retryable because a fresh run supersedes the stale request.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Stage { source, .. } => source.is_retryable(),
            Error::Submission { .. }
            | Error::SigningRequestQuery { .. }
            | Error::SigningRequestGone { .. }
            | Error::IssuanceTimeout { .. }
            | Error::SecretRead { .. }
            | Error::SecretWrite { .. }
            | Error::Client(_) => true,
            Error::InvalidIdentity(_)
            | Error::InvalidConfig(_)
            | Error::KeyGeneration(_)
            | Error::RequestEncoding(_)
            | Error::ApprovalDenied { .. }
            | Error::IssuanceFailed { .. }
            | Error::Cancelled { .. }
            | Error::CertificateMismatch(_) => false,
        }
    }

    /// Whether a failed status read should be retried within the same wait
    ///
    /// Only [`Error::SigningRequestQuery`] qualifies. Anything else returned
    /// by a read ends the wait at once.
    pub fn is_transient_query(&self) -> bool {
        matches!(self, Error::SigningRequestQuery { .. })
    }
}
