//! Single scheduler owning every periodic background task the server runs:
//! the stale-connection reaper, the SSO session sweep, and the expiring
//! OAuth2 token refresher. Per `SPEC_FULL.md` §9's "unify under one
//! scheduler" decision, none of these hold a pool connection between ticks,
//! and all three are joined with a bounded grace period on shutdown.

use chrono::Duration as ChronoDuration;
use licentia_auth::sso::SsoSessionManager;
use licentia_seats::reaper::Reaper;
use licentia_vault::{CredentialRefresher, Vault};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{error, info, warn};

const SESSION_SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);
const TOKEN_REFRESH_INTERVAL: StdDuration = StdDuration::from_secs(5 * 60);
const TOKEN_REFRESH_WINDOW: ChronoDuration = ChronoDuration::hours(1);
const SHUTDOWN_GRACE: StdDuration = StdDuration::from_secs(10);

/// Consecutive failures a background loop tolerates before it signals
/// `fatal` and exits instead of retrying forever (`SPEC_FULL.md` §6's
/// exit-code-2 contract — someone has to actually flip this bit).
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

pub struct Scheduler {
    reaper: Arc<Reaper>,
    vault: Arc<Vault>,
    refresher: Arc<dyn CredentialRefresher>,
    sso: Arc<SsoSessionManager>,
    running: Arc<RwLock<bool>>,
    fatal: Arc<watch::Sender<bool>>,
    handles: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        reaper: Arc<Reaper>,
        vault: Arc<Vault>,
        refresher: Arc<dyn CredentialRefresher>,
        sso: Arc<SsoSessionManager>,
        fatal: Arc<watch::Sender<bool>>,
    ) -> Self {
        Self { reaper, vault, refresher, sso, running: Arc::new(RwLock::new(false)), fatal, handles: Vec::new() }
    }

    pub async fn start(&mut self) {
        *self.running.write().await = true;
        info!("starting background scheduler");

        self.handles.push(self.reaper.start());
        self.handles.push(self.spawn_session_sweep());
        self.handles.push(self.spawn_token_refresh());
    }

    fn spawn_session_sweep(&self) -> JoinHandle<()> {
        let sso = self.sso.clone();
        let running = self.running.clone();
        let fatal = self.fatal.clone();

        tokio::spawn(async move {
            let mut ticker = interval(SESSION_SWEEP_INTERVAL);
            let mut consecutive_failures = 0u32;
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    break;
                }
                match sso.sweep_expired().await {
                    Ok(n) => {
                        consecutive_failures = 0;
                        if n > 0 {
                            info!(swept = n, "expired sso sessions swept");
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(error = %e, consecutive_failures, "sso session sweep failed");
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            error!(consecutive_failures, "sso session sweep exceeded failure threshold");
                            let _ = fatal.send(true);
                            break;
                        }
                    }
                }
            }
        })
    }

    fn spawn_token_refresh(&self) -> JoinHandle<()> {
        let vault = self.vault.clone();
        let refresher = self.refresher.clone();
        let running = self.running.clone();
        let fatal = self.fatal.clone();

        tokio::spawn(async move {
            let mut ticker = interval(TOKEN_REFRESH_INTERVAL);
            let mut consecutive_failures = 0u32;
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    break;
                }
                match vault.refresh_expiring(TOKEN_REFRESH_WINDOW, refresher.as_ref()).await {
                    Ok(n) => {
                        consecutive_failures = 0;
                        if n > 0 {
                            info!(refreshed = n, "expiring credentials refreshed");
                        }
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(error = %e, consecutive_failures, "expiring-token sweep failed");
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            error!(consecutive_failures, "expiring-token sweep exceeded failure threshold");
                            let _ = fatal.send(true);
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Flips the running flag so every loop exits at its next tick, then
    /// joins each task with a bounded grace period.
    pub async fn stop(&mut self) {
        info!("stopping background scheduler");
        *self.running.write().await = false;
        self.reaper.stop().await;

        for handle in self.handles.drain(..) {
            if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
                warn!("background task did not exit within shutdown grace period");
            }
        }
        info!("background scheduler stopped");
    }
}
