// SPDX-License-Identifier: MIT OR Apache-2.0

//! C8: the background job scheduler. Jobs register declaratively and run
//! on their own `tokio::spawn` loop; a coalescing guard keeps two ticks of
//! the same job from overlapping, and shutdown drains in-flight runs before
//! forcing them to stop.

mod jobs;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::errors::AppResult;

pub use jobs::{
    CalendarTimezoneClient, ChatArchiverJob, ContactSyncJob, ContactsPage, ContactsProviderClient, HealthCheckJob,
    TimezoneSyncJob, TokenRefreshJob,
};

/// One scheduled unit of work.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Stable identifier, also the coalescing key.
    fn id(&self) -> &'static str;

    /// How often the job ticks.
    fn interval(&self) -> Duration;

    /// Per-run execution budget. Defaults to 20 minutes, matching the
    /// scheduler's configured default (spec §4.8).
    fn timeout(&self) -> Duration {
        Duration::from_secs(1200)
    }

    /// Do the work for one tick. Must check `cancel` at any natural
    /// suspension point and return promptly once it fires.
    async fn run(&self, cancel: CancellationToken) -> AppResult<()>;
}

/// Runs a fixed set of [`Job`]s on independent interval loops.
pub struct Scheduler {
    jobs: Vec<Arc<dyn Job>>,
    running: DashSet<&'static str>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            jobs: Vec::new(),
            running: DashSet::new(),
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Register a job. Builder-style, intended to be chained before
    /// [`Self::start`].
    #[must_use]
    pub fn register(mut self, job: Arc<dyn Job>) -> Self {
        self.jobs.push(job);
        self
    }

    /// Spawn one loop per registered job. Returns immediately; the loops
    /// run until [`Self::shutdown`] is called.
    pub fn start(self: Arc<Self>) {
        for job in self.jobs.clone() {
            let scheduler = Arc::clone(&self);
            let handle = tokio::spawn(async move { scheduler.run_job_loop(job).await });
            self.handles.lock().expect("scheduler handle lock poisoned").push(handle);
        }
    }

    async fn run_job_loop(&self, job: Arc<dyn Job>) {
        let mut ticker = tokio::time::interval(job.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return,
                _ = ticker.tick() => self.run_once(&job).await,
            }
        }
    }

    async fn run_once(&self, job: &Arc<dyn Job>) {
        if !self.running.insert(job.id()) {
            tracing::debug!(job = job.id(), "skipping tick, previous run still in flight");
            return;
        }

        let run_cancel = self.shutdown.child_token();
        let result = tokio::time::timeout(job.timeout(), job.run(run_cancel.clone())).await;
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(job = job.id(), error = %e, "job run failed"),
            Err(_) => {
                run_cancel.cancel();
                tracing::error!(job = job.id(), timeout_secs = job.timeout().as_secs(), "job run timed out");
            }
        }

        self.running.remove(job.id());
    }

    /// Cancel every running and future tick, then wait up to `drain` for
    /// in-flight runs to finish before force-aborting the stragglers.
    pub async fn shutdown(&self, drain: Duration) {
        self.shutdown.cancel();

        let handles = std::mem::take(&mut *self.handles.lock().expect("scheduler handle lock poisoned"));
        let waits = handles.into_iter().map(|handle| async move {
            let abort_handle = handle.abort_handle();
            tokio::select! {
                result = handle => {
                    if let Err(e) = result {
                        tracing::warn!(error = %e, "job loop task panicked");
                    }
                }
                () = tokio::time::sleep(drain) => {
                    tracing::warn!("job loop did not drain in time, aborting");
                    abort_handle.abort();
                }
            }
        });
        futures_util::future::join_all(waits).await;
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct CountingJob {
        ticks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn id(&self) -> &'static str {
            "counting-job"
        }

        fn interval(&self) -> StdDuration {
            StdDuration::from_millis(20)
        }

        async fn run(&self, _cancel: CancellationToken) -> AppResult<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SlowJob {
        started: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Job for SlowJob {
        fn id(&self) -> &'static str {
            "slow-job"
        }

        fn interval(&self) -> StdDuration {
            StdDuration::from_millis(10)
        }

        fn timeout(&self) -> StdDuration {
            StdDuration::from_millis(30)
        }

        async fn run(&self, _cancel: CancellationToken) -> AppResult<()> {
            self.started.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(StdDuration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn job_ticks_repeatedly_until_shutdown() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let scheduler = Arc::new(Scheduler::new().register(Arc::new(CountingJob { ticks: ticks.clone() })));
        scheduler.clone().start();

        tokio::time::advance(StdDuration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert!(ticks.load(Ordering::SeqCst) >= 2);

        scheduler.shutdown(StdDuration::from_millis(50)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_ticks_are_coalesced() {
        let started = Arc::new(AtomicUsize::new(0));
        let scheduler = Arc::new(Scheduler::new().register(Arc::new(SlowJob { started: started.clone() })));
        scheduler.clone().start();

        tokio::time::advance(StdDuration::from_millis(100)).await;
        tokio::task::yield_now().await;
        assert_eq!(started.load(Ordering::SeqCst), 1);

        scheduler.shutdown(StdDuration::from_millis(10)).await;
    }
}
