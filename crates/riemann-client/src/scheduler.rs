//! Periodic background work.
//!
//! A [`Scheduler`] owns one timer thread. Each task registered with
//! [`Scheduler::every`] runs on tokio's blocking pool, so a slow task never
//! delays the timer of another, and a task never overlaps with itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Runs recurring tasks in the background.
pub struct Scheduler {
    runtime: Option<Runtime>,
}

impl Scheduler {
    /// Starts the timer thread.
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(4)
            .thread_name("riemann-scheduler")
            .enable_time()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Runs `task` every `interval`, starting one interval from now, until the
    /// returned handle is cancelled or dropped. A run that overruns the
    /// interval delays the next one instead of piling up.
    pub fn every<F>(&self, interval: Duration, task: F) -> Result<ScheduledTask>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if interval.is_zero() {
            return Err(Error::Config("schedule interval must be non-zero".into()));
        }
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Error::Config("scheduler is shut down".into()))?;
        let task = Arc::new(task);
        let handle = runtime.spawn(async move {
            let mut ticks = interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let run = Arc::clone(&task);
                if let Err(e) = tokio::task::spawn_blocking(move || run()).await {
                    if e.is_panic() {
                        warn!(error = %e, "scheduled task panicked");
                    }
                }
            }
        });
        debug!(interval_ms = interval.as_millis() as u64, "task scheduled");
        Ok(ScheduledTask { handle })
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.runtime.is_some())
            .finish()
    }
}

/// Handle to a recurring task. Dropping it cancels the task.
#[derive(Debug)]
pub struct ScheduledTask {
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Stops future runs. A run already in progress finishes.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    /// True once the task will not run again.
    pub fn is_cancelled(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_task_runs_repeatedly_until_cancelled() {
        let scheduler = Scheduler::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let task = scheduler
            .every(Duration::from_millis(10), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while runs.load(Ordering::SeqCst) < 3 {
            assert!(std::time::Instant::now() < deadline, "task did not run");
            std::thread::sleep(Duration::from_millis(5));
        }

        task.cancel();
        std::thread::sleep(Duration::from_millis(50));
        assert!(task.is_cancelled());
        let after_cancel = runs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn test_panicking_task_keeps_running() {
        let scheduler = Scheduler::new().unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let _task = scheduler
            .every(Duration::from_millis(10), move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first run fails");
                }
            })
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while runs.load(Ordering::SeqCst) < 2 {
            assert!(std::time::Instant::now() < deadline, "task stopped after panic");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_zero_interval_rejected() {
        let scheduler = Scheduler::new().unwrap();
        assert!(matches!(
            scheduler.every(Duration::ZERO, || {}),
            Err(Error::Config(_))
        ));
    }
}
