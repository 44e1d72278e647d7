use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::error::CycleError;
use crate::pipeline::{CycleReport, RefreshPipeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug)]
pub enum TriggerOutcome {
    Completed(CycleReport),
    Failed(CycleError),
    /// A cycle was already in flight; nothing was started.
    AlreadyRunning,
}

/// Drives refresh cycles on a fixed interval with at most one cycle in
/// flight. Ticks and manual triggers share the same guard.
pub struct Scheduler {
    pipeline: RefreshPipeline,
    interval: Duration,
    running: AtomicBool,
}

/// Returns the scheduler to Idle when the cycle ends, including by panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Scheduler {
    pub fn new(pipeline: RefreshPipeline, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            running: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    pub async fn force_refresh_cycle(&self) -> TriggerOutcome {
        self.try_run_cycle("manual").await
    }

    async fn try_run_cycle(&self, trigger: &'static str) -> TriggerOutcome {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(trigger, "refresh cycle already running; trigger ignored");
            return TriggerOutcome::AlreadyRunning;
        }
        let _guard = RunningGuard(&self.running);

        info!(trigger, "refresh cycle started");
        match self.pipeline.run_cycle().await {
            Ok(report) => {
                info!(
                    trigger,
                    users = report.users,
                    published = report.published,
                    publish_failures = report.publish_failures,
                    articles_skipped = report.articles.is_skipped(),
                    jobs_skipped = report.jobs.is_skipped(),
                    elapsed_ms = (report.finished_at - report.started_at).num_milliseconds(),
                    "refresh cycle finished"
                );
                TriggerOutcome::Completed(report)
            }
            Err(err) => {
                error!(trigger, error = %err, "refresh cycle failed");
                TriggerOutcome::Failed(err)
            }
        }
    }

    /// Ticks until `shutdown` resolves. Each tick runs in its own task so a
    /// long cycle never delays the timer; overlapping ticks are dropped by
    /// the running guard. A cycle in flight at shutdown is awaited before
    /// returning.
    pub async fn run_until<F>(self: Arc<Self>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);
        let mut in_flight: Option<JoinHandle<()>> = None;

        info!(interval_secs = self.interval.as_secs(), "scheduler started");
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("scheduler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    let tick_pending = in_flight.as_ref().is_some_and(|task| !task.is_finished());
                    if tick_pending || self.state() == SchedulerState::Running {
                        debug!("previous refresh cycle still running; tick skipped");
                        continue;
                    }
                    let scheduler = Arc::clone(&self);
                    in_flight = Some(tokio::spawn(async move {
                        scheduler.try_run_cycle("tick").await;
                    }));
                }
            }
        }

        if let Some(task) = in_flight {
            if !task.is_finished() {
                info!("waiting for the running refresh cycle to finish");
            }
            if let Err(err) = task.await {
                error!(error = %err, "refresh cycle task ended abnormally");
            }
        }
    }
}
