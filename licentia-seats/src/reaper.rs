//! Background sweep for connections whose heartbeat has gone silent.
//! Mirrors the `QuotaManager`/`TenantIsolationManager` start/stop shape:
//! a spawned `tokio::time::interval` loop gated by a shared running flag.

use crate::SeatError;
use chrono::{Duration, Utc};
use licentia_db::entities::ConnectionEventKind;
use licentia_db::repo_connection::append_event;
use licentia_db::Db;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration as StdDuration};
use tracing::{error, info, warn};

const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(60);

/// Consecutive sweep failures after which the reaper gives up on its own
/// loop and signals the process to exit rather than spin silently forever.
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

pub struct Reaper {
    db: Arc<Db>,
    stale_timeout: Duration,
    running: Arc<RwLock<bool>>,
    fatal: Arc<watch::Sender<bool>>,
}

impl Reaper {
    pub fn new(db: Arc<Db>, stale_timeout: Duration, fatal: Arc<watch::Sender<bool>>) -> Self {
        Self { db, stale_timeout, running: Arc::new(RwLock::new(false)), fatal }
    }

    /// Spawns the sweep loop and returns its handle; callers that want a
    /// clean shutdown should call `stop()` then await the handle. After
    /// `MAX_CONSECUTIVE_FAILURES` straight failures the loop signals
    /// `fatal` and exits rather than retrying forever against a database
    /// that is not coming back.
    pub fn start(&self) -> JoinHandle<()> {
        let db = self.db.clone();
        let stale_timeout = self.stale_timeout;
        let running = self.running.clone();
        let fatal = self.fatal.clone();

        tokio::spawn(async move {
            *running.write().await = true;
            let mut ticker = interval(SWEEP_INTERVAL);
            let mut consecutive_failures = 0u32;
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    break;
                }
                match sweep_once(&db, stale_timeout).await {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        warn!(error = %e, consecutive_failures, "stale connection sweep failed");
                        if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                            error!(consecutive_failures, "stale connection reaper exceeded failure threshold");
                            let _ = fatal.send(true);
                            break;
                        }
                    }
                }
            }
        })
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}

async fn sweep_once(db: &Arc<Db>, stale_timeout: Duration) -> Result<(), SeatError> {
    let stale_before = Utc::now() - stale_timeout;
    let reaped = db.delete_stale_connections(stale_before).await?;
    if reaped.is_empty() {
        return Ok(());
    }

    let mut touched = HashSet::new();
    for conn in &reaped {
        append_event(
            db.pool(),
            conn.customer_id,
            &conn.user_id,
            conn.role,
            ConnectionEventKind::Timeout,
            conn.ip.as_deref(),
            None,
            None,
            None,
        )
        .await?;
        touched.insert(conn.customer_id);
    }

    for customer_id in touched {
        db.recompute_and_write_seat_counts_standalone(customer_id).await?;
    }

    info!(count = reaped.len(), "reaped stale connections");
    Ok(())
}
