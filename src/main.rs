//! Process entry point: load configuration from the environment, stand up
//! the persistence layer and every core service, start the background
//! scheduler, and serve the HTTP dispatch layer until a signal arrives.

use anyhow::{anyhow, Context, Result};
use chrono::Duration as ChronoDuration;
use licentia_api::AppState;
use licentia_auth::machine::MachineAuthenticator;
use licentia_auth::sso::SsoSessionManager;
use licentia_crypto::KEY_LEN;
use licentia_db::{Db, DbConfig};
use licentia_kms::{EnvelopeService, KmsClient, StubKmsClient};
use licentia_scheduler::Scheduler;
use licentia_seats::reaper::Reaper;
use licentia_seats::{SeatConfig, SeatManager};
use licentia_vault::{CredentialRefresher, CredentialView, RefreshError, RefreshedTokens, Vault};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

/// Aggregate process configuration, loaded once from the environment at
/// startup. Everything the server needs to boot lives here rather than
/// scattered `std::env::var` calls through the core crates (the core crates
/// only ever see typed values like `DbConfig` or a raw key byte slice).
struct Config {
    db: DbConfig,
    license_secret: Vec<u8>,
    jwt_secret: Vec<u8>,
    credentials_encryption_key: Option<[u8; KEY_LEN]>,
    gcp_project_id: Option<String>,
    port: u16,
    stale_connection_timeout: ChronoDuration,
    seat: SeatConfig,
    admin_key: String,
    cookie_secure: bool,
}

impl Config {
    fn from_env() -> Result<Self> {
        let license_secret = required_env("LICENSE_SECRET")?;
        let jwt_secret = required_env("JWT_SECRET")?;
        let admin_key = required_env("ADMIN_KEY")?;

        let gcp_project_id = std::env::var("GCP_PROJECT_ID")
            .or_else(|_| std::env::var("GOOGLE_CLOUD_PROJECT"))
            .ok();

        let credentials_encryption_key = std::env::var("CREDENTIALS_ENCRYPTION_KEY")
            .ok()
            .map(|raw| licentia_crypto::normalize_key_material(raw.as_bytes()));

        if credentials_encryption_key.is_none() && gcp_project_id.is_none() {
            return Err(anyhow!(
                "either CREDENTIALS_ENCRYPTION_KEY or a KMS project id (GCP_PROJECT_ID / GOOGLE_CLOUD_PROJECT) is required"
            ));
        }

        let port = std::env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080);
        let cookie_secure = std::env::var("ENVIRONMENT").map(|v| v == "production").unwrap_or(false);

        Ok(Self {
            db: DbConfig::from_env(),
            license_secret: license_secret.into_bytes(),
            jwt_secret: jwt_secret.into_bytes(),
            credentials_encryption_key,
            gcp_project_id,
            port,
            stale_connection_timeout: ChronoDuration::minutes(15),
            seat: SeatConfig::default(),
            admin_key,
            cookie_secure,
        })
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("{key} is required"))
}

/// Third-party OAuth2 refresh is an external collaborator the core only
/// defines a contract for; this stand-in always reports that the caller
/// must re-authenticate via the provider's own flow, which disables the
/// credential instead of looping against a token endpoint this server does
/// not implement.
struct NoopRefresher;

#[async_trait::async_trait]
impl CredentialRefresher for NoopRefresher {
    async fn refresh(&self, _view: &CredentialView, _refresh_token: &str) -> Result<RefreshedTokens, RefreshError> {
        Err(RefreshError::Unauthorized)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("licentia=info".parse()?))
        .json()
        .init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "fatal startup error: configuration");
            std::process::exit(1);
        }
    };

    let db = match Db::connect(&config.db).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!(error = %e, "fatal startup error: database unreachable");
            std::process::exit(1);
        }
    };

    if let Err(e) = db.initialize_schema().await {
        error!(error = %e, "fatal startup error: schema bootstrap");
        std::process::exit(1);
    }
    info!("schema ready");

    let local_key = config.credentials_encryption_key.unwrap_or([0u8; KEY_LEN]);
    let kms_candidate: Option<Arc<dyn KmsClient>> = config
        .gcp_project_id
        .as_deref()
        .map(|project| Arc::new(StubKmsClient::new(project, &config.jwt_secret)) as Arc<dyn KmsClient>);
    let envelope = Arc::new(EnvelopeService::probe(local_key, kms_candidate).await);
    info!(kms_enabled = envelope.kms_enabled(), "envelope encryption ready");

    let seats = Arc::new(SeatManager::new(db.clone(), config.seat.clone()));
    let vault = Arc::new(Vault::new(db.clone(), envelope.clone()));
    let machine_auth = Arc::new(MachineAuthenticator::new(db.clone(), config.license_secret.clone()));
    let sso = Arc::new(SsoSessionManager::new(db.clone(), &config.jwt_secret));

    let (fatal_tx, mut fatal_rx) = watch::channel(false);
    let fatal_tx = Arc::new(fatal_tx);

    let reaper = Arc::new(Reaper::new(db.clone(), config.stale_connection_timeout, fatal_tx.clone()));
    let mut scheduler = Scheduler::new(reaper, vault.clone(), Arc::new(NoopRefresher), sso.clone(), fatal_tx.clone());
    scheduler.start().await;

    let state = AppState {
        db: db.clone(),
        seats,
        vault,
        machine_auth,
        sso,
        saml_verifier: Arc::new(licentia_auth::sso::XmlAssertionVerifier),
        admin_key: Arc::new(config.admin_key.clone()),
        cookie_secure: config.cookie_secure,
    };
    let app = licentia_api::router(state);

    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port = config.port, "fatal startup error: listener bind");
            scheduler.stop().await;
            std::process::exit(1);
        }
    };
    info!(port = config.port, "listening");

    let server = axum::serve(listener, app);
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                error!(error = %e, "fatal runtime error: http server");
                scheduler.stop().await;
                std::process::exit(2);
            }
        }
        signal = signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
            }
        }
        result = fatal_rx.changed() => {
            if result.is_ok() && *fatal_rx.borrow() {
                error!("fatal runtime error: background scheduler exhausted its retry budget");
                scheduler.stop().await;
                std::process::exit(2);
            }
        }
    }

    scheduler.stop().await;
    info!("shutdown complete");
    Ok(())
}
