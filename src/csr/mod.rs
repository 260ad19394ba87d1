//! Cluster CertificateSigningRequest handling
//!
//! [`SigningAuthority`] is the seam between the issuance flow and the
//! `certificates.k8s.io/v1` API. The flow only ever submits, approves, reads
//! and deletes requests; status changes are made by the cluster signer.

pub mod submit;
pub mod watcher;

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::certificates::v1::{
    CertificateSigningRequest, CertificateSigningRequestCondition, CertificateSigningRequestSpec,
};
use k8s_openapi::ByteString;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::core::ObjectMeta;
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::pki::IssuedCertificate;
use crate::{Error, LABEL_MANAGED_BY, MANAGER_NAME};

pub use submit::submit_signing_request;
pub use watcher::{wait_for_certificate, IssuanceState, WatchConfig, MAX_TIMEOUT};

/// Condition type set when a request is approved
pub const CONDITION_APPROVED: &str = "Approved";
/// Condition type set when a request is denied
pub const CONDITION_DENIED: &str = "Denied";
/// Condition type set when the signer fails to issue
pub const CONDITION_FAILED: &str = "Failed";

/// Reason recorded on the approval condition
pub const APPROVAL_REASON: &str = "WebhookCertificatorApprove";

/// Default signer for webhook serving certificates
///
/// The built-in kube-controller-manager signer for this name only issues
/// for node identities and fails requests with `CN=<service>`. Clusters
/// without a custom approver/signer for it need another signer configured.
pub const DEFAULT_SIGNER_NAME: &str = "kubernetes.io/kubelet-serving";

/// Default requested validity (one year)
pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Shortest validity the API server accepts
pub const MIN_EXPIRATION: Duration = Duration::from_secs(600);

/// Key usage requested from the signer
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum KeyUsage {
    /// `digital signature`
    DigitalSignature,
    /// `key encipherment`
    KeyEncipherment,
    /// `server auth`
    ServerAuth,
    /// `client auth`
    ClientAuth,
}

impl KeyUsage {
    /// Name used by the Kubernetes API
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyUsage::DigitalSignature => "digital signature",
            KeyUsage::KeyEncipherment => "key encipherment",
            KeyUsage::ServerAuth => "server auth",
            KeyUsage::ClientAuth => "client auth",
        }
    }

    /// Usages requested for a webhook serving certificate
    pub fn webhook_defaults() -> Vec<KeyUsage> {
        vec![
            KeyUsage::DigitalSignature,
            KeyUsage::KeyEncipherment,
            KeyUsage::ServerAuth,
        ]
    }
}

/// Signing parameters that do not depend on the identity
#[derive(Clone, Debug, PartialEq)]
pub struct SigningConfig {
    /// Signer that should issue the certificate
    pub signer_name: String,
    /// Requested key usages; `server auth` is always added
    pub usages: Vec<KeyUsage>,
    /// Requested validity, if the signer honors one
    pub expiration: Option<Duration>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            signer_name: DEFAULT_SIGNER_NAME.to_string(),
            usages: KeyUsage::webhook_defaults(),
            expiration: Some(DEFAULT_EXPIRATION),
        }
    }
}

/// A signing request as submitted by this tool
#[derive(Clone, Debug, PartialEq)]
pub struct SigningRequest {
    /// Cluster object name
    pub name: String,
    /// PKCS#10 PEM
    pub csr_pem: String,
    /// Signer name
    pub signer_name: String,
    /// Requested usages, sorted and deduplicated
    pub usages: Vec<KeyUsage>,
    /// Requested validity
    pub expiration: Option<Duration>,
}

impl SigningRequest {
    /// Build a request, normalizing usages and clamping the validity
    pub fn new(name: impl Into<String>, csr_pem: impl Into<String>, config: &SigningConfig) -> Self {
        let mut usages = config.usages.clone();
        usages.push(KeyUsage::ServerAuth);
        usages.sort();
        usages.dedup();

        Self {
            name: name.into(),
            csr_pem: csr_pem.into(),
            signer_name: config.signer_name.clone(),
            usages,
            expiration: config.expiration.map(|d| d.max(MIN_EXPIRATION)),
        }
    }

    /// Render the cluster object
    pub fn to_resource(&self) -> CertificateSigningRequest {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGER_NAME.to_string());

        CertificateSigningRequest {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: CertificateSigningRequestSpec {
                request: ByteString(self.csr_pem.clone().into_bytes()),
                signer_name: self.signer_name.clone(),
                usages: Some(self.usages.iter().map(|u| u.as_str().to_string()).collect()),
                expiration_seconds: self
                    .expiration
                    .map(|d| i32::try_from(d.as_secs()).unwrap_or(i32::MAX)),
                ..Default::default()
            },
            status: None,
        }
    }
}

/// Lifecycle status of a submitted request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SigningRequestStatus {
    /// Neither approved nor denied yet
    Pending,
    /// Approved, certificate not populated yet
    Approved,
    /// Rejected by an approver
    Denied,
    /// Approved and certificate populated
    Issued,
    /// Signer could not issue
    Failed,
}

/// One observation of a request's status
#[derive(Clone, Debug, PartialEq)]
pub struct SigningRequestObservation {
    /// Derived status
    pub status: SigningRequestStatus,
    /// Certificate bytes, present only when issued
    pub certificate: Option<IssuedCertificate>,
    /// Reason or message from the deciding condition
    pub reason: Option<String>,
}

impl SigningRequestObservation {
    /// Observation of a request nobody has acted on yet
    pub fn pending() -> Self {
        Self {
            status: SigningRequestStatus::Pending,
            certificate: None,
            reason: None,
        }
    }

    /// Approved, but without certificate bytes
    pub fn approved() -> Self {
        Self {
            status: SigningRequestStatus::Approved,
            certificate: None,
            reason: None,
        }
    }

    /// Approved and issued
    pub fn issued(certificate: IssuedCertificate) -> Self {
        Self {
            status: SigningRequestStatus::Issued,
            certificate: Some(certificate),
            reason: None,
        }
    }

    /// Denied with a reason
    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            status: SigningRequestStatus::Denied,
            certificate: None,
            reason: Some(reason.into()),
        }
    }

    /// Failed with a reason
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: SigningRequestStatus::Failed,
            certificate: None,
            reason: Some(reason.into()),
        }
    }

    /// Derive an observation from a cluster object
    ///
    /// Denied wins over Failed, which wins over Approved. Approved only counts
    /// as issued once `status.certificate` is non-empty.
    pub fn from_resource(csr: &CertificateSigningRequest) -> Self {
        let status = csr.status.as_ref();
        let conditions: &[CertificateSigningRequestCondition] = status
            .and_then(|s| s.conditions.as_deref())
            .unwrap_or(&[]);

        if let Some(c) = find_true_condition(conditions, CONDITION_DENIED) {
            return Self::denied(condition_reason(c));
        }
        if let Some(c) = find_true_condition(conditions, CONDITION_FAILED) {
            return Self::failed(condition_reason(c));
        }
        if find_true_condition(conditions, CONDITION_APPROVED).is_some() {
            return match status.and_then(|s| s.certificate.as_ref()) {
                Some(cert) if !cert.0.is_empty() => {
                    Self::issued(IssuedCertificate::new(cert.0.clone()))
                }
                _ => Self::approved(),
            };
        }
        Self::pending()
    }
}

fn find_true_condition<'a>(
    conditions: &'a [CertificateSigningRequestCondition],
    type_: &str,
) -> Option<&'a CertificateSigningRequestCondition> {
    conditions
        .iter()
        .find(|c| c.type_ == type_ && c.status == "True")
}

fn condition_reason(condition: &CertificateSigningRequestCondition) -> String {
    match (condition.reason.as_deref(), condition.message.as_deref()) {
        (Some(reason), Some(message)) => format!("{}: {}", reason, message),
        (Some(reason), None) => reason.to_string(),
        (None, Some(message)) => message.to_string(),
        (None, None) => format!("{} condition set", condition.type_),
    }
}

/// Operations the issuance flow needs from the cluster signing authority
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SigningAuthority: Send + Sync {
    /// Create the request object
    async fn submit(&self, request: &SigningRequest) -> Result<(), Error>;

    /// Add an Approved condition to the named request
    ///
    /// Returns `Error::ApprovalDenied` when policy forbids self-approval.
    async fn approve(&self, name: &str) -> Result<(), Error>;

    /// Read the current status of the named request
    async fn get(&self, name: &str) -> Result<SigningRequestObservation, Error>;

    /// Delete the named request, returning whether it existed
    async fn delete(&self, name: &str) -> Result<bool, Error>;
}

/// [`SigningAuthority`] backed by the Kubernetes API
pub struct KubeSigningAuthority {
    api: Api<CertificateSigningRequest>,
}

impl KubeSigningAuthority {
    /// Create an authority using the given client
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl SigningAuthority for KubeSigningAuthority {
    async fn submit(&self, request: &SigningRequest) -> Result<(), Error> {
        self.api
            .create(&PostParams::default(), &request.to_resource())
            .await
            .map_err(|e| Error::submission(&request.name, e.to_string()))?;
        info!(signing_request = %request.name, signer = %request.signer_name, "signing request created");
        Ok(())
    }

    async fn approve(&self, name: &str) -> Result<(), Error> {
        let condition = CertificateSigningRequestCondition {
            type_: CONDITION_APPROVED.to_string(),
            status: "True".to_string(),
            reason: Some(APPROVAL_REASON.to_string()),
            message: Some(format!("approved by {}", MANAGER_NAME)),
            ..Default::default()
        };
        let patch = serde_json::json!({
            "status": {
                "conditions": [condition]
            }
        });

        match self
            .api
            .patch_approval(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                info!(signing_request = %name, "signing request approved");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 403 => {
                Err(Error::approval_denied(name, e.message))
            }
            Err(e) => Err(Error::submission(name, format!("approval failed: {}", e))),
        }
    }

    async fn get(&self, name: &str) -> Result<SigningRequestObservation, Error> {
        let csr = match self.api.get(name).await {
            Ok(csr) => csr,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                return Err(Error::signing_request_gone(name));
            }
            Err(e) => return Err(Error::query(name, e.to_string())),
        };
        let observation = SigningRequestObservation::from_resource(&csr);
        debug!(signing_request = %name, status = ?observation.status, "observed signing request");
        Ok(observation)
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(signing_request = %name, "deleted stale signing request");
                Ok(true)
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(Error::submission(
                name,
                format!("failed to delete existing request: {}", e),
            )),
        }
    }
}
