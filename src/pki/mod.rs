//! Key material generation and certificate checks
//!
//! A fresh key pair is generated for every issuance and never leaves process
//! memory except inside the final secret. Only the CSR (public half plus the
//! requested names) is sent to the signing authority.
//!
//! # Key strength
//!
//! Keys are always ECDSA P-256 with SHA-256 signatures. The algorithm is fixed
//! and not negotiated with the signer.

use std::fmt;

use rcgen::{CertificateParams, DistinguishedName, DnType, DnValue, KeyPair};
use tracing::debug;
use x509_parser::prelude::*;

use crate::identity::Identity;
use crate::Error;

const PEM_TAG_CERTIFICATE: &str = "CERTIFICATE";
const PEM_TAG_CSR: &str = "CERTIFICATE REQUEST";

/// Private key and the CSR embedding its public half
#[derive(Clone)]
pub struct KeyMaterial {
    /// PKCS#8 PEM private key
    key_pem: String,
    /// PKCS#10 PEM certificate signing request
    csr_pem: String,
}

impl KeyMaterial {
    /// Generate a new key pair and CSR for the identity
    ///
    /// The CSR carries `CN=<service>` and exactly the identity's three DNS
    /// names as Subject Alternative Names.
    pub fn generate(identity: &Identity) -> Result<Self, Error> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| Error::key_generation(format!("failed to generate key pair: {}", e)))?;

        let mut params = CertificateParams::new(identity.dns_names()).map_err(|e| {
            Error::request_encoding(format!("invalid subject alternative names: {}", e))
        })?;

        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String(identity.service().to_string()),
        );
        params.distinguished_name = dn;

        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| Error::request_encoding(format!("failed to create CSR: {}", e)))?;
        let csr_pem = csr
            .pem()
            .map_err(|e| Error::request_encoding(format!("failed to serialize CSR: {}", e)))?;

        debug!(identity = %identity, sans = ?identity.dns_names(), "generated key material");

        Ok(Self {
            key_pem: key_pair.serialize_pem(),
            csr_pem,
        })
    }

    /// CSR in PEM format (sent to the signing authority)
    pub fn csr_pem(&self) -> &str {
        &self.csr_pem
    }

    /// Private key in PEM format (written only into the TLS secret)
    pub fn private_key_pem(&self) -> &str {
        &self.key_pem
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_pem", &"<redacted>")
            .field("csr_pem", &self.csr_pem)
            .finish()
    }
}

/// Certificate bytes returned by the signing authority
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    cert_pem: Vec<u8>,
}

impl IssuedCertificate {
    /// Wrap PEM bytes as issued (leaf first, chain preserved)
    pub fn new(cert_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
        }
    }

    /// PEM bytes exactly as issued
    pub fn pem(&self) -> &[u8] {
        &self.cert_pem
    }
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("len", &self.cert_pem.len())
            .finish()
    }
}

/// Summary of the leaf certificate, for logging
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateInfo {
    /// Subject common name
    pub common_name: Option<String>,
    /// DNS Subject Alternative Names
    pub dns_names: Vec<String>,
    /// Expiry as a Unix timestamp
    pub not_after: i64,
}

/// Return the DER contents of the first PEM block with the given tag
pub fn first_pem_block(pem_data: &[u8], tag: &str) -> Result<Vec<u8>, Error> {
    let blocks = ::pem::parse_many(pem_data)
        .map_err(|e| Error::certificate_mismatch(format!("failed to parse PEM: {}", e)))?;
    blocks
        .into_iter()
        .find(|block| block.tag() == tag)
        .map(|block| block.contents().to_vec())
        .ok_or_else(|| Error::certificate_mismatch(format!("no {} PEM block found", tag)))
}

/// Check that the issued leaf certificate carries the CSR's public key
///
/// The CSR was built from the private key in [`KeyMaterial`], so equal
/// SubjectPublicKeyInfo means the key and certificate form a pair.
pub fn ensure_certificate_matches(csr_pem: &str, cert: &IssuedCertificate) -> Result<(), Error> {
    let csr_der = first_pem_block(csr_pem.as_bytes(), PEM_TAG_CSR)?;
    let (_, csr) = X509CertificationRequest::from_der(&csr_der)
        .map_err(|e| Error::certificate_mismatch(format!("failed to parse CSR: {}", e)))?;

    let cert_der = first_pem_block(cert.pem(), PEM_TAG_CERTIFICATE)?;
    let (_, leaf) = X509Certificate::from_der(&cert_der)
        .map_err(|e| Error::certificate_mismatch(format!("failed to parse certificate: {}", e)))?;

    if csr.certification_request_info.subject_pki.raw != leaf.public_key().raw {
        return Err(Error::certificate_mismatch(
            "certificate public key differs from the submitted CSR",
        ));
    }
    Ok(())
}

/// Describe the leaf certificate of an issued chain
pub fn describe_certificate(cert: &IssuedCertificate) -> Result<CertificateInfo, Error> {
    let der = first_pem_block(cert.pem(), PEM_TAG_CERTIFICATE)?;
    let (_, leaf) = X509Certificate::from_der(&der)
        .map_err(|e| Error::certificate_mismatch(format!("failed to parse certificate: {}", e)))?;

    let common_name = leaf
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);

    let dns_names = match leaf.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    Ok(CertificateInfo {
        common_name,
        dns_names,
        not_after: leaf.validity().not_after.timestamp(),
    })
}
