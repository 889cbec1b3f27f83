//! Recurring task scheduler.
//!
//! One driver loop calls [`Scheduler::tick`] at a fixed cadence. Each due task
//! is spawned as its own tokio task; a task never overlaps with itself, while
//! different tasks may run side by side.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for running task bodies before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub type TaskFuture = BoxFuture<'static, anyhow::Result<()>>;
pub type TaskBody = Arc<dyn Fn() -> TaskFuture + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Interval(Duration),
    DailyAt { hour: u32, minute: u32 },
}

pub struct ScheduledTask {
    name: String,
    kind: TaskKind,
    catch_up: bool,
    body: TaskBody,
    last_run: Option<Instant>,
    running: Arc<AtomicBool>,
    fired_today: bool,
    observed_date: Option<NaiveDate>,
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("last_run", &self.last_run)
            .field("running", &self.is_running())
            .field("fired_today", &self.fired_today)
            .finish_non_exhaustive()
    }
}

impl ScheduledTask {
    pub fn new<F>(name: impl Into<String>, kind: TaskKind, body: F) -> Self
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind,
            catch_up: false,
            body: Arc::new(body),
            last_run: None,
            running: Arc::new(AtomicBool::new(false)),
            fired_today: false,
            observed_date: None,
        }
    }

    pub fn interval<F>(name: impl Into<String>, period: Duration, body: F) -> Self
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        Self::new(name, TaskKind::Interval(period), body)
    }

    pub fn daily_at<F>(name: impl Into<String>, hour: u32, minute: u32, body: F) -> Self
    where
        F: Fn() -> TaskFuture + Send + Sync + 'static,
    {
        Self::new(name, TaskKind::DailyAt { hour, minute }, body)
    }

    /// For daily tasks: also fire when first observed past today's target time.
    pub fn with_catch_up(mut self, catch_up: bool) -> Self {
        self.catch_up = catch_up;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn last_run(&self) -> Option<Instant> {
        self.last_run
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn is_due(&mut self, now: Instant, local: NaiveDateTime) -> bool {
        match self.kind {
            TaskKind::Interval(period) => self
                .last_run
                .map_or(true, |last| now.saturating_duration_since(last) >= period),
            TaskKind::DailyAt { hour, minute } => {
                let today = local.date();
                if self.observed_date != Some(today) {
                    self.observed_date = Some(today);
                    self.fired_today = false;
                }
                if self.fired_today {
                    return false;
                }
                let in_window = local.hour() == hour && local.minute() == minute;
                let missed = self.catch_up
                    && NaiveTime::from_hms_opt(hour, minute, 0)
                        .is_some_and(|target| local.time() >= target);
                in_window || missed
            }
        }
    }
}

/// Clears a task's running flag when the body finishes, panics included.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct Scheduler {
    tasks: Vec<ScheduledTask>,
    in_flight: JoinSet<()>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task: ScheduledTask) {
        info!(name = %task.name, kind = ?task.kind, "task registered");
        self.tasks.push(task);
    }

    pub fn tasks(&self) -> &[ScheduledTask] {
        &self.tasks
    }

    pub fn task(&self, name: &str) -> Option<&ScheduledTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Start every due task that is not already running.
    ///
    /// `now` drives interval tasks, `local` (wall-clock local time) drives
    /// daily tasks. Returns the names of the tasks started. Must be called
    /// from within a tokio runtime.
    pub fn tick(&mut self, now: Instant, local: NaiveDateTime) -> Vec<String> {
        self.reap();
        let mut started = Vec::new();
        for task in &mut self.tasks {
            if task.is_running() {
                debug!(name = %task.name, "still running; skipped");
                continue;
            }
            if !task.is_due(now, local) {
                continue;
            }
            // advance before running: a failing body is not retried early
            task.last_run = Some(now);
            task.fired_today = true;
            task.running.store(true, Ordering::SeqCst);

            let guard = RunningGuard(Arc::clone(&task.running));
            let name = task.name.clone();
            let fut = (task.body)();
            self.in_flight.spawn(async move {
                let _guard = guard;
                debug!(%name, "task started");
                match fut.await {
                    Ok(()) => debug!(%name, "task finished"),
                    Err(err) => warn!(%name, ?err, "task failed"),
                }
            });
            started.push(task.name.clone());
        }
        started
    }

    fn reap(&mut self) {
        while let Some(res) = self.in_flight.try_join_next() {
            if let Err(err) = res {
                if err.is_panic() {
                    error!(?err, "task panicked");
                }
            }
        }
    }

    /// Wait until every started task body has finished.
    pub async fn wait_idle(&mut self) {
        while let Some(res) = self.in_flight.join_next().await {
            if let Err(err) = res {
                if err.is_panic() {
                    error!(?err, "task panicked");
                }
            }
        }
    }

    /// Tick every `every` until cancelled, then wait for running bodies.
    pub async fn run(mut self, every: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(tasks = self.tasks.len(), "scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.tick(Instant::now(), chrono::Local::now().naive_local());
        }
        if tokio::time::timeout(SHUTDOWN_GRACE, self.wait_idle()).await.is_err() {
            warn!("tasks still running at shutdown; aborting");
            self.in_flight.shutdown().await;
        }
        info!("scheduler stopped");
    }
}
