//! Webhook Certificator - issue a TLS secret for an admission webhook service

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use webhook_certificator::certify::certify;
use webhook_certificator::config::CertifyConfig;
use webhook_certificator::csr::{KubeSigningAuthority, SigningConfig, DEFAULT_SIGNER_NAME};
use webhook_certificator::identity::Identity;
use webhook_certificator::kube_utils::create_client;
use webhook_certificator::secret::KubeSecretStore;
use webhook_certificator::telemetry::{init_logging, LogFormat};
use webhook_certificator::{DEFAULT_NAMESPACE, DEFAULT_SECRET_NAME};

/// Webhook Certificator - TLS certificates for admission webhooks, signed by the cluster CA
#[derive(Parser, Debug)]
#[command(name = "webhook-certificator", version, about, long_about = None)]
struct Cli {
    /// Log output format (text or json)
    #[arg(long, global = true, env = "WEBHOOK_CERT_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a key, have the cluster sign it and store the pair as a TLS secret
    ///
    /// Creates a CertificateSigningRequest named `<service>.<namespace>`,
    /// approves it, waits for the certificate and writes `tls.key` and
    /// `tls.crt` into the target secret. An existing secret is replaced.
    Certify(CertifyArgs),
}

/// Certify mode arguments
#[derive(Args, Debug)]
struct CertifyArgs {
    /// Name of the webhook service
    #[arg(short = 's', long, env = "WEBHOOK_CERT_SERVICE")]
    service: String,

    /// Namespace of the service and the secret
    #[arg(short = 'n', long, env = "WEBHOOK_CERT_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
    namespace: String,

    /// Name of the TLS secret to create or replace
    #[arg(short = 't', long, env = "WEBHOOK_CERT_SECRET", default_value = DEFAULT_SECRET_NAME)]
    secret: String,

    /// Path to a single kubeconfig file
    ///
    /// When unset the client is inferred: in-cluster config first, then
    /// $KUBECONFIG (colon-separated lists are merged), then ~/.kube/config.
    #[arg(short = 'k', long, env = "WEBHOOK_CERT_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Signer that should issue the certificate
    ///
    /// The default only works where an approver and signer accept service
    /// identities for it; the built-in kube-controller-manager signer fails
    /// requests with CN=<service>. Pass a signer that issues for services.
    #[arg(long, env = "WEBHOOK_CERT_SIGNER_NAME", default_value = DEFAULT_SIGNER_NAME)]
    signer_name: String,

    /// Requested certificate validity in seconds (0 leaves it to the signer)
    #[arg(long, env = "WEBHOOK_CERT_EXPIRATION_SECONDS", default_value_t = 31_536_000)]
    expiration_seconds: u64,

    /// Overall wait for issuance in seconds
    #[arg(long, env = "WEBHOOK_CERT_TIMEOUT_SECS", default_value_t = 60)]
    timeout_secs: u64,

    /// Delay between status polls in milliseconds
    #[arg(long, env = "WEBHOOK_CERT_POLL_INTERVAL_MS", default_value_t = 1000)]
    poll_interval_ms: u64,
}

impl CertifyArgs {
    fn to_config(&self) -> anyhow::Result<CertifyConfig> {
        let identity = Identity::new(&self.service, &self.namespace)?;

        let mut config = CertifyConfig::new(identity).with_secret_name(&self.secret);
        config.signing = SigningConfig {
            signer_name: self.signer_name.clone(),
            expiration: (self.expiration_seconds > 0)
                .then(|| Duration::from_secs(self.expiration_seconds)),
            ..SigningConfig::default()
        };
        config.watch.timeout = Duration::from_secs(self.timeout_secs);
        config.watch.poll_interval = Duration::from_millis(self.poll_interval_ms);
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;

    match cli.command {
        Commands::Certify(args) => run_certify(args).await,
    }
}

/// Run one issuance against the configured cluster
async fn run_certify(args: CertifyArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    let client = create_client(args.kubeconfig.as_deref()).await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_signal.cancel();
        }
    });

    let authority = KubeSigningAuthority::new(client.clone());
    let store = KubeSecretStore::new(client);

    let outcome = certify(&config, &authority, &store, &cancel).await?;

    info!(
        namespace = %outcome.namespace,
        secret = %outcome.secret_name,
        signing_request = %outcome.signing_request,
        outcome = outcome.publish.as_str(),
        "done"
    );
    Ok(())
}
