//! Validated configuration for one certify run

use crate::csr::{SigningConfig, WatchConfig, MAX_TIMEOUT};
use crate::identity::Identity;
use crate::{Error, DEFAULT_SECRET_NAME};

/// Maximum length of a Kubernetes object name (DNS subdomain)
const MAX_OBJECT_NAME_LEN: usize = 253;

/// Everything the issuance flow needs to run once
#[derive(Clone, Debug, PartialEq)]
pub struct CertifyConfig {
    /// Service and namespace to issue for
    pub identity: Identity,
    /// Name of the TLS secret, created in the identity's namespace
    pub secret_name: String,
    /// Signer, usages and validity
    pub signing: SigningConfig,
    /// Timing of the issuance wait
    pub watch: WatchConfig,
}

impl CertifyConfig {
    /// Configuration with default secret name, signing and timing
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            secret_name: DEFAULT_SECRET_NAME.to_string(),
            signing: SigningConfig::default(),
            watch: WatchConfig::default(),
        }
    }

    /// Override the secret name
    pub fn with_secret_name(mut self, secret_name: impl Into<String>) -> Self {
        self.secret_name = secret_name.into();
        self
    }

    /// Check values the identity type does not already guarantee
    pub fn validate(&self) -> Result<(), Error> {
        validate_object_name("secret name", &self.secret_name)?;

        let signer = &self.signing.signer_name;
        if signer.is_empty() || !signer.contains('/') {
            return Err(Error::invalid_config(format!(
                "signer name '{signer}' must be of the form '<domain>/<path>'"
            )));
        }
        if self.watch.timeout.is_zero() {
            return Err(Error::invalid_config("timeout must be greater than zero"));
        }
        if self.watch.timeout > MAX_TIMEOUT {
            return Err(Error::invalid_config(format!(
                "timeout must be at most {}s",
                MAX_TIMEOUT.as_secs()
            )));
        }
        if self.watch.poll_interval.is_zero() {
            return Err(Error::invalid_config(
                "poll interval must be greater than zero",
            ));
        }
        if self.watch.backoff.backoff_multiplier < 1.0 {
            return Err(Error::invalid_config(
                "backoff multiplier must be at least 1.0",
            ));
        }
        Ok(())
    }
}

fn validate_object_name(field: &str, value: &str) -> Result<(), Error> {
    if value.is_empty() || value.len() > MAX_OBJECT_NAME_LEN {
        return Err(Error::invalid_config(format!(
            "{field} must be between 1 and {MAX_OBJECT_NAME_LEN} characters"
        )));
    }
    let valid = value.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    });
    if !valid {
        return Err(Error::invalid_config(format!(
            "{field} '{value}' is not a valid DNS subdomain"
        )));
    }
    Ok(())
}
