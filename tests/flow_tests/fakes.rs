//! In-memory stand-ins for the cluster signing API and secret storage

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
};

use webhook_certificator::csr::{SigningAuthority, SigningRequest, SigningRequestObservation};
use webhook_certificator::pki::IssuedCertificate;
use webhook_certificator::secret::SecretStore;
use webhook_certificator::Error;

/// How the fake signer treats submitted requests
#[derive(Clone, Debug)]
pub enum SignerBehavior {
    /// Issue once the request has been read this many times
    IssueAfterPolls(u32),
    /// Leave the request Pending forever, ignoring approval
    NeverSign,
    /// Deny the request with a reason
    Deny(String),
    /// Reject the approval call as forbidden
    ForbidApproval,
}

#[derive(Clone, Debug)]
struct StoredRequest {
    request: SigningRequest,
    approved: bool,
    polls: u32,
}

/// Cluster CA that signs CSRs
pub struct TestCa {
    key: KeyPair,
    cert_pem: String,
}

impl TestCa {
    pub fn new() -> Self {
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(
            DnType::CommonName,
            DnValue::Utf8String("flow-test-cluster-ca".to_string()),
        );
        params.distinguished_name = dn;
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign];

        let key = KeyPair::generate().expect("CA key");
        let cert_pem = params.self_signed(&key).expect("CA cert").pem();
        Self { key, cert_pem }
    }

    /// Issue a serving certificate for the CSR, chained with the CA
    pub fn sign(&self, csr_pem: &str) -> IssuedCertificate {
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &self.key).expect("issuer");
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem).expect("valid CSR");
        csr.params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        let leaf = csr.signed_by(&issuer).expect("signed leaf").pem();
        IssuedCertificate::new(format!("{}{}", leaf, self.cert_pem).into_bytes())
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }
}

/// Fake API server holding signing requests and secrets
pub struct FakeCluster {
    ca: TestCa,
    behavior: SignerBehavior,
    requests: Mutex<BTreeMap<String, StoredRequest>>,
    secrets: Mutex<BTreeMap<(String, String), Secret>>,
    fail_secret_reads: bool,
    writes: Mutex<u32>,
}

impl FakeCluster {
    pub fn new(behavior: SignerBehavior) -> Self {
        Self {
            ca: TestCa::new(),
            behavior,
            requests: Mutex::new(BTreeMap::new()),
            secrets: Mutex::new(BTreeMap::new()),
            fail_secret_reads: false,
            writes: Mutex::new(0),
        }
    }

    /// Make every secret read fail with a transport error
    pub fn with_failing_secret_reads(mut self) -> Self {
        self.fail_secret_reads = true;
        self
    }

    /// Seed a secret as if an earlier run or another tool had written it
    pub fn insert_secret(&self, namespace: &str, name: &str, secret: Secret) {
        self.secrets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), secret);
    }

    /// Seed a signing request left behind by an earlier run
    pub fn insert_request(&self, request: SigningRequest) {
        self.requests.lock().unwrap().insert(
            request.name.clone(),
            StoredRequest {
                request,
                approved: true,
                polls: 0,
            },
        );
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn secret_count(&self) -> usize {
        self.secrets.lock().unwrap().len()
    }

    pub fn secret_writes(&self) -> u32 {
        *self.writes.lock().unwrap()
    }

    pub fn request(&self, name: &str) -> Option<SigningRequest> {
        self.requests
            .lock()
            .unwrap()
            .get(name)
            .map(|stored| stored.request.clone())
    }

    pub fn polls(&self, name: &str) -> u32 {
        self.requests
            .lock()
            .unwrap()
            .get(name)
            .map(|stored| stored.polls)
            .unwrap_or(0)
    }

    /// Remove a signing request, as an administrator or garbage collector would
    pub fn remove_request(&self, name: &str) -> bool {
        self.requests.lock().unwrap().remove(name).is_some()
    }

    pub fn ca(&self) -> &TestCa {
        &self.ca
    }
}

#[async_trait]
impl SigningAuthority for FakeCluster {
    async fn submit(&self, request: &SigningRequest) -> Result<(), Error> {
        let mut requests = self.requests.lock().unwrap();
        if requests.contains_key(&request.name) {
            return Err(Error::submission(&request.name, "already exists"));
        }
        requests.insert(
            request.name.clone(),
            StoredRequest {
                request: request.clone(),
                approved: false,
                polls: 0,
            },
        );
        Ok(())
    }

    async fn approve(&self, name: &str) -> Result<(), Error> {
        if matches!(self.behavior, SignerBehavior::ForbidApproval) {
            return Err(Error::approval_denied(
                name,
                "cannot update resource certificatesigningrequests/approval",
            ));
        }
        let mut requests = self.requests.lock().unwrap();
        let stored = requests
            .get_mut(name)
            .ok_or_else(|| Error::submission(name, "not found"))?;
        stored.approved = true;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<SigningRequestObservation, Error> {
        let mut requests = self.requests.lock().unwrap();
        let stored = requests
            .get_mut(name)
            .ok_or_else(|| Error::signing_request_gone(name))?;
        stored.polls += 1;

        let observation = match &self.behavior {
            SignerBehavior::Deny(reason) => SignerObservation::Denied(reason.clone()),
            SignerBehavior::NeverSign => SignerObservation::Pending,
            SignerBehavior::IssueAfterPolls(n) if stored.approved && stored.polls >= *n => {
                SignerObservation::Issue(stored.request.csr_pem.clone())
            }
            _ if stored.approved => SignerObservation::Approved,
            _ => SignerObservation::Pending,
        };
        drop(requests);

        Ok(match observation {
            SignerObservation::Pending => SigningRequestObservation::pending(),
            SignerObservation::Approved => SigningRequestObservation::approved(),
            SignerObservation::Denied(reason) => SigningRequestObservation::denied(reason),
            SignerObservation::Issue(csr_pem) => {
                SigningRequestObservation::issued(self.ca.sign(&csr_pem))
            }
        })
    }

    async fn delete(&self, name: &str) -> Result<bool, Error> {
        Ok(self.requests.lock().unwrap().remove(name).is_some())
    }
}

enum SignerObservation {
    Pending,
    Approved,
    Denied(String),
    Issue(String),
}

#[async_trait]
impl SecretStore for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        if self.fail_secret_reads {
            return Err(Error::secret_read(namespace, name, "connection reset by peer"));
        }
        Ok(self.secret(namespace, name))
    }

    async fn create(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_string(), name.clone());
        if secrets.contains_key(&key) {
            return Err(Error::secret_write(namespace, name, "already exists", true));
        }
        secrets.insert(key, secret.clone());
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }

    async fn update(&self, namespace: &str, secret: &Secret) -> Result<(), Error> {
        let name = secret.metadata.name.clone().unwrap_or_default();
        let mut secrets = self.secrets.lock().unwrap();
        let key = (namespace.to_string(), name.clone());
        if !secrets.contains_key(&key) {
            return Err(Error::secret_write(namespace, name, "not found", false));
        }
        secrets.insert(key, secret.clone());
        *self.writes.lock().unwrap() += 1;
        Ok(())
    }
}
