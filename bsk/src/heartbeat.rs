//! Exponential-backoff heartbeat task shared by every carrier.
//!
//! The tick callback runs first, then the task waits. A successful tick grows
//! the wait by the configured multiplier up to the maximum; a failed tick or
//! an explicit [`Heartbeat::reset`] returns the wait to the minimum and fires
//! the next tick immediately. Cancellation is cooperative: a tick that is
//! already running completes before the task exits.

use crate::config::HeartbeatConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::debug;

pub struct Heartbeat {
    reset: Arc<Notify>,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Heartbeat {
    pub fn spawn<F, Fut, E>(config: HeartbeatConfig, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send,
        E: std::fmt::Display,
    {
        let reset = Arc::new(Notify::new());
        let notified = reset.clone();
        let (stop, mut stop_rx) = watch::channel(false);
        let task = tokio::spawn(async move {
            let minimum = config.interval_min();
            let maximum = config.interval_max();
            let multiplier = config.multiplier;
            let mut wait = minimum;
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                let ok = match tick().await {
                    Ok(()) => true,
                    Err(error) => {
                        debug!(error = %error, "heartbeat tick failed, retrying eagerly");
                        false
                    }
                };
                if !ok {
                    wait = minimum;
                }
                tokio::select! {
                    _ = stop_rx.changed() => {}
                    _ = notified.notified() => {
                        wait = minimum;
                    }
                    _ = tokio::time::sleep(wait) => {
                        if ok {
                            wait = grow(wait, multiplier, maximum);
                        }
                    }
                }
            }
        });
        Heartbeat { reset, stop, task }
    }

    /// Cancels the pending wait: the next tick fires immediately and the
    /// interval returns to the minimum.
    pub fn reset(&self) {
        self.reset.notify_one();
    }

    /// Marks the scheduler terminal. A tick in flight completes first.
    pub fn destroy(&self) {
        let _ = self.stop.send(true);
    }

    pub fn is_terminated(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
    }
}

fn grow(wait: Duration, multiplier: f64, maximum: Duration) -> Duration {
    wait.mul_f64(multiplier).min(maximum)
}
