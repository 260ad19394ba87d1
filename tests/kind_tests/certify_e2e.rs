//! Full issuance runs against a kind cluster
//!
//! The signing requests, approvals and secrets are real API objects. Only
//! the signer is provided by the test, because the built-in signers reject
//! serving certificates for anything but node identities.

use std::time::Duration;

use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use tokio_util::sync::CancellationToken;

use webhook_certificator::certify::certify;
use webhook_certificator::config::CertifyConfig;
use webhook_certificator::csr::{KubeSigningAuthority, SigningConfig, APPROVAL_REASON};
use webhook_certificator::identity::Identity;
use webhook_certificator::pki::{ensure_certificate_matches, IssuedCertificate};
use webhook_certificator::secret::{KubeSecretStore, PublishOutcome, SECRET_TYPE_TLS, TLS_CRT};
use webhook_certificator::{Error, Stage};

use super::helpers::{
    cleanup, ensure_test_cluster, fresh_namespace, spawn_test_signer, TEST_SIGNER_NAME,
};

fn config(namespace: &str) -> CertifyConfig {
    let mut config = CertifyConfig::new(Identity::new("webhook-svc", namespace).unwrap());
    config.signing = SigningConfig {
        signer_name: TEST_SIGNER_NAME.to_string(),
        ..SigningConfig::default()
    };
    config.watch.timeout = Duration::from_secs(60);
    config
}

/// Story: Operator runs certify twice in a fresh namespace
///
/// The first run creates `webhook-certs`, the second replaces it with a new
/// key pair. Both times the signing request is self-approved and the stored
/// certificate belongs to the stored key.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_operator_issues_and_rotates_webhook_certificate() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "certify-e2e";
    fresh_namespace(&client, namespace)
        .await
        .expect("failed to create namespace");

    let stop_signer = CancellationToken::new();
    let signer = spawn_test_signer(client.clone(), stop_signer.clone());

    let authority = KubeSigningAuthority::new(client.clone());
    let store = KubeSecretStore::new(client.clone());
    let config = config(namespace);

    let first = certify(&config, &authority, &store, &CancellationToken::new())
        .await
        .expect("first run succeeds");
    assert_eq!(first.publish, PublishOutcome::Created);

    let requests: Api<CertificateSigningRequest> = Api::all(client.clone());
    let request = requests.get(&first.signing_request).await.unwrap();
    let approval = request
        .status
        .and_then(|s| s.conditions)
        .and_then(|c| c.into_iter().find(|c| c.type_ == "Approved"))
        .expect("request was approved");
    assert_eq!(approval.reason.as_deref(), Some(APPROVAL_REASON));

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets.get("webhook-certs").await.unwrap();
    assert_eq!(secret.type_.as_deref(), Some(SECRET_TYPE_TLS));
    let first_cert = secret.data.as_ref().unwrap()[TLS_CRT].0.clone();
    ensure_certificate_matches(
        &String::from_utf8(request.spec.request.0.clone()).unwrap(),
        &IssuedCertificate::new(first_cert.clone()),
    )
    .expect("stored certificate matches submitted request");

    let second = certify(&config, &authority, &store, &CancellationToken::new())
        .await
        .expect("second run succeeds");
    assert_eq!(second.publish, PublishOutcome::Updated);

    let rotated = secrets.get("webhook-certs").await.unwrap();
    assert_ne!(rotated.data.as_ref().unwrap()[TLS_CRT].0, first_cert);

    stop_signer.cancel();
    let _ = signer.await;
    cleanup(&client, namespace, &first.signing_request).await;
}

/// Story: Nothing signs requests for an unknown signer
///
/// With no signer running, the approved request never gets a certificate.
/// The run must time out and leave the namespace without a secret.
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_unsigned_request_times_out_on_real_cluster() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = "certify-e2e-timeout";
    fresh_namespace(&client, namespace)
        .await
        .expect("failed to create namespace");

    let mut config = config(namespace);
    config.signing.signer_name = "webhook-certificator.test/nobody".to_string();
    config.watch.timeout = Duration::from_secs(10);

    let authority = KubeSigningAuthority::new(client.clone());
    let store = KubeSecretStore::new(client.clone());

    let err = certify(&config, &authority, &store, &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Issuance));
    assert!(matches!(err.root(), Error::IssuanceTimeout { .. }));

    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    assert!(secrets.get_opt("webhook-certs").await.unwrap().is_none());

    cleanup(&client, namespace, &config.identity.signing_request_name()).await;
}
