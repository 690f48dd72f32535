//! Periodic sweep driver.
//!
//! Each sweep gets its own thread with a current-thread tokio runtime that
//! ticks on an interval and also wakes on manual triggers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::WorkerError;
use crate::scheduler::sweep::Sweep;

/// Runs one [`Sweep`] periodically in a background thread.
pub struct SweepScheduler {
    sweep: Arc<dyn Sweep>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl SweepScheduler {
    pub fn new(sweep: Arc<dyn Sweep>, interval: Duration) -> Self {
        Self {
            sweep,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start the sweep loop in a background thread.
    /// Accepts a trigger receiver for manual sweep requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> Result<JoinHandle<()>, WorkerError> {
        let sweep = Arc::clone(&self.sweep);
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        std::thread::Builder::new()
            .name(format!("{}-sweep", sweep.name()))
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        log::error!("Failed to build {} sweep runtime: {}", sweep.name(), e);
                        return;
                    }
                };

                rt.block_on(async {
                    let mut interval_timer = tokio::time::interval(interval);
                    interval_timer.tick().await; // skip immediate first tick

                    loop {
                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        tokio::select! {
                            _ = interval_timer.tick() => {},
                            Ok(()) = trigger_rx.recv() => {
                                log::info!("Manual {} sweep triggered", sweep.name());
                            },
                        }

                        if shutdown.load(Ordering::Acquire) {
                            break;
                        }

                        if let Err(e) = sweep.run_once() {
                            log::error!("{} sweep failed: {}", sweep.name(), e);
                        }
                    }
                });
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))
    }

    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseError;
    use crate::scheduler::sweep::SweepReport;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingSweep {
        runs: AtomicUsize,
    }

    impl Sweep for CountingSweep {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn run_once(&self) -> Result<SweepReport, DatabaseError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            Ok(SweepReport::default())
        }
    }

    #[test]
    fn test_manual_trigger_runs_sweep() {
        let sweep = Arc::new(CountingSweep::default());
        let scheduler = SweepScheduler::new(sweep.clone(), Duration::from_secs(3600));

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx).unwrap();

        // Give the loop time to subscribe past the first tick
        std::thread::sleep(Duration::from_millis(50));
        trigger_tx.send(()).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sweep.runs.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(sweep.runs.load(Ordering::SeqCst), 1);

        scheduler.stop();
        let _ = trigger_tx.send(());
        handle.join().expect("scheduler thread panicked");
    }

    #[test]
    fn test_scheduler_shutdown() {
        let sweep = Arc::new(CountingSweep::default());
        let scheduler = SweepScheduler::new(sweep.clone(), Duration::from_millis(50));

        let (trigger_tx, trigger_rx) = broadcast::channel(16);
        let handle = scheduler.start(trigger_rx).unwrap();

        // Let it run briefly then stop
        std::thread::sleep(Duration::from_millis(200));
        scheduler.stop();
        assert!(scheduler.is_stopped());

        // Send a trigger to wake up the select loop so it sees the shutdown
        let _ = trigger_tx.send(());

        handle.join().expect("scheduler thread panicked");
        assert!(sweep.runs.load(Ordering::SeqCst) >= 1);
    }
}
