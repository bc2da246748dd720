//! Heartbeat and expiry sweeps.
//!
//! The scheduler never touches sessions directly: it works through the
//! [`SweepTarget`] operations, so a fake target and a paused clock are
//! enough to test it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use skein_core::{SessionId, TransportError};
use skein_settings::TransportSettings;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// Operations the scheduler needs from a session store.
#[async_trait]
pub trait SweepTarget: Send + Sync {
    /// Queue a heartbeat on every OPEN session silent for at least
    /// `interval`. Returns how many were queued.
    fn heartbeat_idle(&self, interval: Duration) -> usize;

    /// Ids of sessions unreachable for longer than `delay`.
    fn expired(&self, delay: Duration) -> Vec<SessionId>;

    /// Remove and close one session if it is still expired.
    ///
    /// Returns whether the session was evicted. An error means it was
    /// removed but closing it failed.
    async fn evict(&self, id: &SessionId, delay: Duration) -> Result<bool, TransportError>;
}

/// Timing for the sweep loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepSchedule {
    /// Period between sweeps.
    pub period: Duration,
    /// Silence after which an OPEN session gets a heartbeat.
    pub heartbeat_interval: Duration,
    /// Inactivity after which a session is evicted.
    pub disconnect_delay: Duration,
}

impl From<&TransportSettings> for SweepSchedule {
    fn from(settings: &TransportSettings) -> Self {
        Self {
            period: settings.sweep_interval(),
            heartbeat_interval: settings.heartbeat_interval(),
            disconnect_delay: settings.disconnect_delay(),
        }
    }
}

/// Outcome of one sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Heartbeats queued.
    pub heartbeats: usize,
    /// Sessions evicted.
    pub evicted: usize,
    /// Evictions whose close failed.
    pub failed: usize,
}

/// Run one sweep: evict expired sessions, then queue heartbeats.
///
/// A failure closing one session is logged and does not stop the rest.
#[instrument(skip_all)]
pub async fn sweep(target: &dyn SweepTarget, schedule: &SweepSchedule) -> SweepReport {
    let mut report = SweepReport::default();

    for id in target.expired(schedule.disconnect_delay) {
        match target.evict(&id, schedule.disconnect_delay).await {
            Ok(true) => report.evicted += 1,
            Ok(false) => {}
            Err(e) => {
                report.evicted += 1;
                report.failed += 1;
                warn!(session_id = %id, error = %e, "failed to close evicted session");
            }
        }
    }

    report.heartbeats = target.heartbeat_idle(schedule.heartbeat_interval);

    if report != SweepReport::default() {
        debug!(
            heartbeats = report.heartbeats,
            evicted = report.evicted,
            failed = report.failed,
            "sweep finished"
        );
    }
    report
}

/// Sweep every `schedule.period` until `cancel` fires.
pub async fn run_scheduler(
    target: Arc<dyn SweepTarget>,
    schedule: SweepSchedule,
    cancel: CancellationToken,
) {
    let mut ticker = time::interval(schedule.period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    let _ = ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let _ = sweep(target.as_ref(), &schedule).await;
            }
            () = cancel.cancelled() => {
                debug!("scheduler stopped");
                return;
            }
        }
    }
}
