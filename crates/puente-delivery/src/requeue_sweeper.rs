//! Periodic redelivery of spilled payloads.
//!
//! A sweep lists the spillover directory once and runs the full retry chain
//! for each event in turn. Delivered events are removed; events that fail
//! again stay on disk for the next sweep. One bad event never stops the rest.
//!
//! The scheduler task sweeps every `interval` and whenever a
//! [`RequeueTrigger`] fires (the session layer fires it on reconnect).

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::backoff_sender::{BackoffSender, ChainOutcome};

pub const DEFAULT_REQUEUE_INTERVAL_SECONDS: u64 = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
/// Counters reported by one sweep.
pub struct SweepReport {
    pub pending: usize,
    pub delivered: usize,
    pub retained: usize,
    pub failed: usize,
    /// Another sweep was already running, so this one did nothing.
    pub overlapped: bool,
}

/// Public struct `RequeueSweeper` draining the spillover store.
pub struct RequeueSweeper {
    sender: BackoffSender,
    sweep_lock: Mutex<()>,
}

impl RequeueSweeper {
    pub fn new(sender: BackoffSender) -> Self {
        Self {
            sender,
            sweep_lock: Mutex::new(()),
        }
    }

    /// Runs one sweep over every pending event.
    pub async fn sweep(&self) -> SweepReport {
        let Ok(_guard) = self.sweep_lock.try_lock() else {
            tracing::debug!("requeue sweep already running; skipping trigger");
            return SweepReport {
                overlapped: true,
                ..SweepReport::default()
            };
        };

        let store = self.sender.store();
        let listing = match store.list_pending() {
            Ok(listing) => listing,
            Err(error) => {
                tracing::error!(error = %error, "failed to list local queue");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport {
            pending: listing.events.len() + listing.unreadable.len(),
            failed: listing.unreadable.len(),
            ..SweepReport::default()
        };
        if report.pending == 0 {
            return report;
        }
        tracing::info!(pending = report.pending, "processing queued messages");

        for unreadable in &listing.unreadable {
            tracing::error!(
                file = %unreadable.path.display(),
                detail = %unreadable.detail,
                "failed to process queued message"
            );
        }

        for event in &listing.events {
            match self.sender.run_chain(&event.payload).await {
                ChainOutcome::Delivered { .. } => match store.remove(event) {
                    Ok(()) => {
                        report.delivered += 1;
                        tracing::info!(file = %event.id.file_name(), "queued message delivered");
                    }
                    Err(error) => {
                        report.failed += 1;
                        tracing::error!(
                            file = %event.id.file_name(),
                            error = %error,
                            "queued message delivered but could not be removed"
                        );
                    }
                },
                ChainOutcome::Exhausted { attempts, .. } => {
                    report.retained += 1;
                    tracing::warn!(
                        file = %event.id.file_name(),
                        attempts,
                        "queued message still undeliverable; keeping for next sweep"
                    );
                }
            }
        }

        tracing::info!(
            pending = report.pending,
            delivered = report.delivered,
            retained = report.retained,
            failed = report.failed,
            "requeue sweep finished"
        );
        report
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequeueSchedulerConfig {
    pub interval: Duration,
}

impl Default for RequeueSchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_REQUEUE_INTERVAL_SECONDS),
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Cloneable handle that asks the scheduler for an immediate sweep.
///
/// Triggers that arrive while a sweep runs collapse into one follow-up sweep.
pub struct RequeueTrigger {
    notify: Arc<Notify>,
}

impl RequeueTrigger {
    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

#[derive(Debug)]
/// Public struct `RequeueSchedulerHandle` owning the background sweep task.
pub struct RequeueSchedulerHandle {
    trigger: RequeueTrigger,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RequeueSchedulerHandle {
    pub fn trigger(&self) -> RequeueTrigger {
        self.trigger.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stops the scheduler; a sweep in progress finishes first.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub fn start_requeue_scheduler(
    sweeper: Arc<RequeueSweeper>,
    config: RequeueSchedulerConfig,
) -> Result<RequeueSchedulerHandle> {
    if config.interval.is_zero() {
        anyhow::bail!("requeue interval must be greater than zero");
    }
    let handle = tokio::runtime::Handle::try_current()
        .context("requeue scheduler requires an active Tokio runtime")?;

    let trigger = RequeueTrigger::default();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let notify = Arc::clone(&trigger.notify);
    let task = handle.spawn(async move {
        run_requeue_loop(sweeper, config.interval, notify, shutdown_rx).await;
    });
    Ok(RequeueSchedulerHandle {
        trigger,
        shutdown_tx: Some(shutdown_tx),
        task: Some(task),
    })
}

async fn run_requeue_loop(
    sweeper: Arc<RequeueSweeper>,
    interval: Duration,
    notify: Arc<Notify>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tracing::info!(
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "requeue scheduler started"
    );

    loop {
        let reason = tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = ticker.tick() => "interval",
            _ = notify.notified() => "trigger",
        };
        tracing::debug!(reason, "requeue sweep starting");
        sweeper.sweep().await;
    }
    tracing::info!("requeue scheduler stopped");
}
