use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time;

use crate::engine::{Engine, TickReport};

/// Scheduling loop that periodically ticks the engine: due checks,
/// business-rule checks, freshness, acknowledgement expiry, notifications
pub struct TickWorker {
    engine: Arc<Mutex<Engine>>,
    interval: Duration,
    running: Arc<AtomicBool>,
}

impl TickWorker {
    pub fn new(engine: Arc<Mutex<Engine>>, interval: Duration) -> Self {
        Self {
            engine,
            interval,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the background worker
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.running.store(true, Ordering::SeqCst);

        tokio::spawn(async move {
            tracing::info!("Tick worker started with interval {:?}", self.interval);

            let mut interval = time::interval(self.interval);

            while self.running.load(Ordering::SeqCst) {
                interval.tick().await;

                let report = run_tick(&self.engine);
                if report.checks_launched > 0 || report.notifications > 0 || report.stale > 0 {
                    tracing::debug!(
                        checks = report.checks_launched,
                        notifications = report.notifications,
                        stale = report.stale,
                        expired_acknowledgements = report.expired_acknowledgements,
                        "Tick"
                    );
                }
            }

            tracing::info!("Tick worker stopped");
        })
    }

    /// Stop the worker
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if worker is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Tick once at the current wall-clock time
pub fn run_tick(engine: &Mutex<Engine>) -> TickReport {
    let now = chrono::Utc::now().timestamp();
    engine.lock().tick(now)
}
