//! Scheduled self-restart.
//!
//! The bot exits with a non-zero status 10 minutes after it becomes ready;
//! the deployment pipeline relaunches it with a fresh connection.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, info};

/// How long the bot runs after the timer is armed.
pub const RESTART_AFTER: Duration = Duration::from_secs(10 * 60);

/// One-shot countdown to self-termination.
///
/// The armed flag covers both "running" and "fired", so repeat `ready`
/// events after a reconnect never schedule a second countdown.
#[derive(Debug, Default)]
pub struct RestartTimer {
    armed: AtomicBool,
}

impl RestartTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules `on_fire` to run once, [RESTART_AFTER] from now.
    /// Later calls are no-ops. The caller supplies the shutdown-and-exit
    /// action so this stays runnable under test.
    pub fn arm<F>(&self, on_fire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.armed.swap(true, Ordering::SeqCst) {
            debug!("Restart timer is already armed.");
            return;
        }

        let minutes = RESTART_AFTER.as_secs() / 60;
        info!("Restart scheduled in {minutes} minutes.");
        tokio::spawn(async move {
            tokio::time::sleep(RESTART_AFTER).await;
            on_fire.await;
        });
    }
}
