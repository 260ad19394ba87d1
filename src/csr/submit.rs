//! Submission and self-approval of a signing request

use tracing::{info, warn};

use super::{SigningAuthority, SigningConfig, SigningRequest};
use crate::identity::Identity;
use crate::pki::KeyMaterial;
use crate::Error;

/// Submit a signing request for freshly generated key material and approve it
///
/// Any request left under the same name by an earlier run is deleted first,
/// so at most one request exists per identity and it always embeds the
/// current key. Returns the submitted request.
pub async fn submit_signing_request<A: SigningAuthority + ?Sized>(
    authority: &A,
    identity: &Identity,
    material: &KeyMaterial,
    config: &SigningConfig,
) -> Result<SigningRequest, Error> {
    let request = SigningRequest::new(
        identity.signing_request_name(),
        material.csr_pem(),
        config,
    );

    if authority.delete(&request.name).await? {
        warn!(
            signing_request = %request.name,
            "superseded signing request left by a previous run"
        );
    }

    authority.submit(&request).await?;
    authority.approve(&request.name).await?;

    info!(
        signing_request = %request.name,
        signer = %request.signer_name,
        usages = ?request.usages,
        "signing request submitted and approved"
    );
    Ok(request)
}
