//! End-to-end issuance: key generation, signing request, wait, publication
//!
//! The stages run strictly in order, once. The first failure aborts the run
//! and is returned annotated with its [`Stage`]; nothing is retried at this
//! level and the secret is only written after a certificate has been issued
//! and checked against the generated key.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::CertifyConfig;
use crate::csr::{submit_signing_request, wait_for_certificate, SigningAuthority};
use crate::pki::{describe_certificate, ensure_certificate_matches, KeyMaterial};
use crate::secret::{publish_tls_secret, PublishOutcome, SecretStore};
use crate::{Error, Stage};

/// Result of a successful run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertifyOutcome {
    /// Namespace of the secret
    pub namespace: String,
    /// Name of the secret
    pub secret_name: String,
    /// Name of the signing request that produced the certificate
    pub signing_request: String,
    /// Whether the secret was created or replaced
    pub publish: PublishOutcome,
    /// Certificate expiry as a Unix timestamp, when it could be read
    pub not_after: Option<i64>,
}

/// Run the full issuance flow once
#[instrument(
    skip_all,
    fields(
        service = %config.identity.service(),
        namespace = %config.identity.namespace(),
        secret = %config.secret_name,
    )
)]
pub async fn certify<A, S>(
    config: &CertifyConfig,
    authority: &A,
    store: &S,
    cancel: &CancellationToken,
) -> Result<CertifyOutcome, Error>
where
    A: SigningAuthority + ?Sized,
    S: SecretStore + ?Sized,
{
    let identity = &config.identity;

    let material =
        KeyMaterial::generate(identity).map_err(|e| e.at_stage(Stage::KeyGeneration))?;

    let request = submit_signing_request(authority, identity, &material, &config.signing)
        .await
        .map_err(|e| e.at_stage(Stage::Submission))?;

    let certificate = wait_for_certificate(authority, &request.name, &config.watch, cancel)
        .await
        .map_err(|e| e.at_stage(Stage::Issuance))?;

    ensure_certificate_matches(material.csr_pem(), &certificate)
        .map_err(|e| e.at_stage(Stage::Issuance))?;

    let not_after = match describe_certificate(&certificate) {
        Ok(info) => {
            debug!(
                common_name = ?info.common_name,
                dns_names = ?info.dns_names,
                not_after = info.not_after,
                "issued certificate"
            );
            if info.dns_names.is_empty() {
                warn!("issued certificate carries no DNS names");
            }
            Some(info.not_after)
        }
        Err(e) => {
            warn!(error = %e, "could not describe issued certificate");
            None
        }
    };

    let publish = publish_tls_secret(
        store,
        identity.namespace(),
        &config.secret_name,
        material.private_key_pem(),
        &certificate,
    )
    .await
    .map_err(|e| e.at_stage(Stage::Publication))?;

    info!(
        signing_request = %request.name,
        outcome = publish.as_str(),
        "webhook certificate ready"
    );

    Ok(CertifyOutcome {
        namespace: identity.namespace().to_string(),
        secret_name: config.secret_name.clone(),
        signing_request: request.name,
        publish,
        not_after,
    })
}
