//! Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::SessionManager;

/// Handle to the running sweep task.
pub struct Sweeper {
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Sweep expired sessions every `period`, starting immediately.
    pub fn spawn(manager: Arc<SessionManager>, period: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match manager.cleanup_expired_sessions().await {
                    Ok(report) if report.expired > 0 => info!(
                        expired = report.expired,
                        destroyed = report.destroyed,
                        failed = report.destroy_failures,
                        "Expiry sweep finished"
                    ),
                    Ok(_) => debug!("Expiry sweep found nothing"),
                    Err(e) => error!(error = %e, "Expiry sweep failed"),
                }
            }
        });

        info!(period_secs = period.as_secs(), "Expiry sweeper started");
        Self { task }
    }

    /// Stop the task.
    pub fn stop(self) {
        self.task.abort();
        info!("Expiry sweeper stopped");
    }
}
