//! Webhook service identity and the DNS names derived from it

use std::fmt;

use crate::Error;

/// Cluster DNS suffix appended to fully-qualified service names
pub const CLUSTER_DOMAIN: &str = "cluster.local";

/// Maximum length of an RFC 1123 DNS label
const MAX_LABEL_LEN: usize = 63;

/// Service name and namespace the certificate is issued for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    service: String,
    namespace: String,
}

impl Identity {
    /// Create an identity, validating both parts as DNS labels
    pub fn new(service: impl Into<String>, namespace: impl Into<String>) -> Result<Self, Error> {
        let service = service.into();
        let namespace = namespace.into();
        validate_label("service", &service)?;
        validate_label("namespace", &namespace)?;
        Ok(Self { service, namespace })
    }

    /// Service name, also used as the certificate Common Name
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Namespace of the service and the target secret
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Subject Alternative Names the certificate must cover
    ///
    /// Exactly three names: the bare service, `<svc>.<ns>.svc` and
    /// `<svc>.<ns>.svc.cluster.local`.
    pub fn dns_names(&self) -> Vec<String> {
        let svc = format!("{}.{}.svc", self.service, self.namespace);
        vec![
            self.service.clone(),
            svc.clone(),
            format!("{}.{}", svc, CLUSTER_DOMAIN),
        ]
    }

    /// Deterministic name of the cluster signing request
    pub fn signing_request_name(&self) -> String {
        format!("{}.{}", self.service, self.namespace)
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service)
    }
}

fn validate_label(field: &str, value: &str) -> Result<(), Error> {
    if value.is_empty() {
        return Err(Error::invalid_identity(format!("{field} must not be empty")));
    }
    if value.len() > MAX_LABEL_LEN {
        return Err(Error::invalid_identity(format!(
            "{field} '{value}' is longer than {MAX_LABEL_LEN} characters"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::invalid_identity(format!(
            "{field} '{value}' may only contain lowercase alphanumerics and '-'"
        )));
    }
    if value.starts_with('-') || value.ends_with('-') {
        return Err(Error::invalid_identity(format!(
            "{field} '{value}' must start and end with an alphanumeric character"
        )));
    }
    Ok(())
}
