//! Publishing the issued key pair as a `kubernetes.io/tls` secret
//!
//! The secret is written with a plain get-then-create-or-update. There is no
//! resource version check: the last writer wins.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use crate::pki::IssuedCertificate;
use crate::{Error, LABEL_MANAGED_BY, MANAGER_NAME};

/// Secret type for TLS key pairs
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
/// Data key holding the PEM private key
pub const TLS_KEY: &str = "tls.key";
/// Data key holding the PEM certificate chain
pub const TLS_CRT: &str = "tls.crt";

/// Whether publishing created a new secret or replaced an existing one
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// No secret existed
    Created,
    /// An existing secret was replaced
    Updated,
}

impl PublishOutcome {
    /// Lowercase name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishOutcome::Created => "created",
            PublishOutcome::Updated => "updated",
        }
    }
}

/// Secret storage used by the publisher
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Read a secret, returning `None` if it does not exist
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Create a secret that does not exist yet
    async fn create(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;

    /// Replace an existing secret
    async fn update(&self, namespace: &str, secret: &Secret) -> Result<(), Error>;
}

/// [`SecretStore`] backed by the Kubernetes API
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    /// Create a store using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn secret_name(secret: &Secret) -> &str {
    secret.metadata.name.as_deref().unwrap_or_default()
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| Error::secret_read(namespace, name, e.to_string()))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let name = secret_name(secret);
        match self
            .api(namespace)
            .create(&PostParams::default(), secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::secret_write(namespace, name, ae.message, true))
            }
            Err(e) => Err(Error::secret_write(namespace, name, e.to_string(), false)),
        }
    }

    async fn update(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let name = secret_name(secret);
        match self
            .api(namespace)
            .replace(name, &PostParams::default(), secret)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(Error::secret_write(namespace, name, ae.message, true))
            }
            Err(e) => Err(Error::secret_write(namespace, name, e.to_string(), false)),
        }
    }
}

/// Build the TLS secret holding the private key and issued certificate
pub fn build_tls_secret(
    namespace: &str,
    name: &str,
    private_key_pem: &str,
    certificate: &IssuedCertificate,
) -> Secret {
    let labels = BTreeMap::from([(LABEL_MANAGED_BY.to_string(), MANAGER_NAME.to_string())]);
    let data = BTreeMap::from([
        (
            TLS_KEY.to_string(),
            ByteString(private_key_pem.as_bytes().to_vec()),
        ),
        (
            TLS_CRT.to_string(),
            ByteString(certificate.pem().to_vec()),
        ),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE_TLS.to_string()),
        data: Some(data),
        ..Default::default()
    }
}

/// Create the TLS secret, or replace it if it already exists
///
/// A read failure other than not-found aborts without writing.
pub async fn publish_tls_secret<S: SecretStore + ?Sized>(
    store: &S,
    namespace: &str,
    name: &str,
    private_key_pem: &str,
    certificate: &IssuedCertificate,
) -> Result<PublishOutcome, Error> {
    let secret = build_tls_secret(namespace, name, private_key_pem, certificate);

    let outcome = match store.get(namespace, name).await? {
        None => {
            debug!(namespace = %namespace, secret = %name, "secret not found, creating");
            store.create(namespace, &secret).await?;
            PublishOutcome::Created
        }
        Some(_) => {
            debug!(namespace = %namespace, secret = %name, "secret exists, replacing");
            store.update(namespace, &secret).await?;
            PublishOutcome::Updated
        }
    };

    info!(
        namespace = %namespace,
        secret = %name,
        outcome = outcome.as_str(),
        "TLS secret published"
    );
    Ok(outcome)
}
