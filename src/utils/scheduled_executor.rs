// Scheduled Executor for periodic tasks
// Adapted for async/tokio runtime
//
// Interval jobs: after the startup delay, run; on completion sleep
// max(0, interval - elapsed); an overrunning job starts its next run
// immediately, never queued, with at most one in-flight run per job.
// Time-of-day jobs: next UTC instant matching hour:minute; missed fires
// during downtime are not backfilled.
// Failures back off exponentially (base * 2^(n-1), capped); after
// max_consecutive_failures the job suspends until resumed.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigHandle, MonitorConfig};
use crate::utils::MonitorResult;

/// Per-run context handed to a job. The config snapshot is resolved once at
/// run start; the token is the run's cancellation scope.
pub struct JobContext {
    pub config: Arc<MonitorConfig>,
    pub cancel: CancellationToken,
}

/// A trait for tasks that run on a schedule.
pub trait ScheduledTask: Send + Sync + 'static {
    /// Job name, for logging and the control handle.
    fn name(&self) -> &str;

    /// Execute one run. `Err(Cancelled)` unwinds quietly; any other error
    /// feeds the backoff and suspension accounting.
    fn run(&self, ctx: JobContext) -> Pin<Box<dyn Future<Output = MonitorResult<()>> + Send + '_>>;
}

/// Blanket implementation for Arc<T> where T: ScheduledTask
impl<T: ScheduledTask> ScheduledTask for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn run(&self, ctx: JobContext) -> Pin<Box<dyn Future<Output = MonitorResult<()>> + Send + '_>> {
        (**self).run(ctx)
    }
}

/// When a job fires.
#[derive(Debug, Clone, Copy)]
pub enum Schedule {
    Interval { every: Duration, startup_delay: Duration },
    /// Fires once per day at hour:minute UTC
    Daily { hour: u32, minute: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub max_consecutive_failures: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(30),
            cap: Duration::from_secs(600),
            max_consecutive_failures: 5,
        }
    }
}

impl BackoffPolicy {
    /// Wait after the n-th consecutive failure: min(base * 2^(n-1), cap).
    pub fn wait_after(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(31);
        let factor = 2u64.saturating_pow(exponent);
        self.base.saturating_mul(factor as u32).min(self.cap)
    }
}

/// Handle to a running job: suspension state and resume signal. A
/// successful readiness probe (or operator tooling) resumes suspended
/// jobs through this.
#[derive(Clone)]
pub struct JobControl {
    name: String,
    suspended: Arc<AtomicBool>,
    resume: Arc<Notify>,
}

impl JobControl {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Relaxed)
    }

    /// Wake a suspended job. A no-op while the job is healthy, so routine
    /// readiness probes cannot bank a resume for a future suspension.
    pub fn resume(&self) {
        if self.is_suspended() {
            tracing::info!("Resuming suspended job '{}'", self.name);
            self.resume.notify_one();
        }
    }
}

/// Next UTC instant matching hour:minute; tomorrow when today's slot has
/// already passed.
pub fn next_daily_fire(now: DateTime<Utc>, hour: u32, minute: u32) -> DateTime<Utc> {
    let candidate = now
        .date_naive()
        .and_hms_opt(hour, minute, 0)
        .map(|naive| naive.and_utc())
        .unwrap_or(now);
    if candidate > now { candidate } else { candidate + chrono::Duration::days(1) }
}

/// Scheduled executor for one job.
///
/// `loop_cancel` stops the scheduling loop (no new runs); `run_cancel` is
/// handed to in-flight runs and is cancelled separately after the
/// shutdown drain window elapses.
pub struct ScheduledExecutor {
    schedule: Schedule,
    backoff: BackoffPolicy,
    config: ConfigHandle,
    loop_cancel: CancellationToken,
    run_cancel: CancellationToken,
}

impl ScheduledExecutor {
    pub fn new(
        schedule: Schedule,
        backoff: BackoffPolicy,
        config: ConfigHandle,
        loop_cancel: CancellationToken,
        run_cancel: CancellationToken,
    ) -> Self {
        Self { schedule, backoff, config, loop_cancel, run_cancel }
    }

    /// Spawn the scheduling loop. Returns the control handle.
    pub fn start<T>(self, task: T) -> (tokio::task::JoinHandle<()>, JobControl)
    where
        T: ScheduledTask,
    {
        let control = JobControl {
            name: task.name().to_string(),
            suspended: Arc::new(AtomicBool::new(false)),
            resume: Arc::new(Notify::new()),
        };
        let loop_control = control.clone();

        let handle = tokio::spawn(async move {
            self.run_loop(task, loop_control).await;
        });

        (handle, control)
    }

    async fn run_loop<T: ScheduledTask>(self, task: T, control: JobControl) {
        let name = task.name().to_string();
        tracing::info!("Starting scheduled task '{}' ({:?})", name, self.schedule);

        if let Schedule::Interval { startup_delay, .. } = self.schedule
            && !self.sleep_cancellable(startup_delay).await
        {
            tracing::info!("Scheduled task '{}' cancelled during startup delay", name);
            return;
        }

        let mut consecutive_failures: u32 = 0;

        loop {
            if self.loop_cancel.is_cancelled() {
                break;
            }

            if let Schedule::Daily { hour, minute } = self.schedule {
                let fire_at = next_daily_fire(Utc::now(), hour, minute);
                let wait = (fire_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tracing::debug!("Scheduled task '{}' next fire at {}", name, fire_at);
                if !self.sleep_cancellable(wait).await {
                    break;
                }
            }

            let started = tokio::time::Instant::now();
            let ctx = JobContext {
                config: self.config.current(),
                cancel: self.run_cancel.child_token(),
            };

            match task.run(ctx).await {
                Ok(()) => {
                    consecutive_failures = 0;
                    tracing::debug!("Scheduled task '{}' completed successfully", name);
                },
                Err(e) if e.is_cancelled() => {
                    tracing::debug!("Scheduled task '{}' run cancelled", name);
                    break;
                },
                Err(e) => {
                    consecutive_failures += 1;
                    tracing::error!(
                        job = %name,
                        error = %e,
                        kind = e.kind(),
                        consecutive_failures,
                        "Scheduled task failed"
                    );

                    if consecutive_failures >= self.backoff.max_consecutive_failures {
                        tracing::error!(
                            job = %name,
                            consecutive_failures,
                            "Scheduled task suspended after repeated failures"
                        );
                        control.suspended.store(true, Ordering::Relaxed);
                        let resumed = tokio::select! {
                            _ = self.loop_cancel.cancelled() => false,
                            _ = control.resume.notified() => true,
                        };
                        control.suspended.store(false, Ordering::Relaxed);
                        if !resumed {
                            break;
                        }
                        consecutive_failures = 0;
                        continue;
                    }

                    let wait = self.backoff.wait_after(consecutive_failures);
                    tracing::warn!(job = %name, wait_secs = wait.as_secs(), "Backing off");
                    if !self.sleep_cancellable(wait).await {
                        break;
                    }
                    continue;
                },
            }

            if let Schedule::Interval { every, .. } = self.schedule {
                // An overrun yields a zero sleep: the next run starts
                // immediately, runs are never queued
                let wait = every.saturating_sub(started.elapsed());
                if !self.sleep_cancellable(wait).await {
                    break;
                }
            }
        }

        tracing::info!("Scheduled task '{}' stopped", name);
    }

    /// Sleep unless the loop is cancelled first. True when the full wait
    /// elapsed.
    async fn sleep_cancellable(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.loop_cancel.is_cancelled();
        }
        tokio::select! {
            _ = self.loop_cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
