//! Fixed-interval scan scheduling.
//!
//! The loop owns the monitoring flag and the re-trigger interval. A fresh
//! one-shot delay is armed only after the previous scan completes; a tick
//! that fires while one is already in flight is dropped, not queued.
//! Interval zero disables the timer while leaving the flag observable, a
//! manual wake runs a scan even when monitoring is disabled, and enabling
//! the flag arms the timer immediately.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tracing::{debug, info};

/// Control handle for the monitor loop.
pub struct MonitorHandle {
    wake: Arc<Notify>,
    rearm: Arc<Notify>,
    shutdown_tx: watch::Sender<bool>,
    enabled: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Flip periodic scanning on or off. Manual triggers keep working
    /// either way. Enabling arms the interval timer right away; it does
    /// not wait for some other wakeup to come along.
    pub fn set_enabled(&self, enabled: bool) {
        let was_enabled = self.enabled.swap(enabled, Ordering::Relaxed);
        info!(enabled, "monitoring toggled");
        if enabled && !was_enabled {
            self.rearm.notify_one();
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Request a scan now, regardless of the monitoring flag.
    pub fn trigger_now(&self) {
        self.wake.notify_one();
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Spawn the monitor loop. `run_scan` is awaited to completion before the
/// next delay is armed; `scan_in_flight` lets externally started scans
/// suppress ticks too.
pub fn spawn_monitor_loop<F, Fut>(
    interval_seconds: u64,
    enabled: bool,
    scan_in_flight: Arc<AtomicBool>,
    run_scan: F,
) -> (tokio::task::JoinHandle<()>, MonitorHandle)
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send,
{
    let wake = Arc::new(Notify::new());
    let rearm = Arc::new(Notify::new());
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let enabled = Arc::new(AtomicBool::new(enabled));

    let handle = MonitorHandle {
        wake: wake.clone(),
        rearm: rearm.clone(),
        shutdown_tx,
        enabled: enabled.clone(),
    };

    let join = tokio::spawn(async move {
        info!(interval_seconds, "monitor loop started");
        loop {
            let timer_armed =
                interval_seconds > 0 && enabled.load(Ordering::Relaxed);

            let manual = tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval_seconds)), if timer_armed => false,
                _ = wake.notified() => true,
                // The monitoring flag flipped; recompute the timer state
                // without running a scan.
                _ = rearm.notified() => continue,
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("monitor loop shutting down");
                        return;
                    }
                    continue;
                }
            };

            if !manual && !enabled.load(Ordering::Relaxed) {
                continue;
            }
            if scan_in_flight.load(Ordering::Relaxed) {
                debug!("scan already in flight, tick skipped");
                continue;
            }

            run_scan().await;
        }
    });

    (join, handle)
}
