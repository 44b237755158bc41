use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{Instant, interval};
use tokio_util::sync::CancellationToken;
use tracing::{info, trace};

use crate::simlink::SimClient;
use crate::telemetry::{SimState, Telemetry};

/// A periodic job driven by the scheduler tick.
///
/// Jobs gate themselves in `should_fire` (interval, sim state, movement) and
/// are protected by a single-flight lock: the scheduler never starts a run
/// while the previous one is still going.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &'static str;

    fn should_fire(&self, state: SimState, telemetry: Option<&Telemetry>) -> bool;

    /// Atomically claim the job. Returns false while a run is in flight.
    fn try_lock(&self) -> bool;

    fn unlock(&self);

    async fn run(&self, telemetry: Option<Telemetry>);
}

/// Single-flight lock shared by all jobs: compare-and-swap on an atomic.
#[derive(Debug, Default)]
pub struct JobLock {
    busy: AtomicBool,
}

impl JobLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_lock(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn unlock(&self) {
        self.busy.store(false, Ordering::Release);
    }

    pub fn is_locked(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Interval gate for `should_fire`: due when the configured period elapsed
/// since the last `mark`.
#[derive(Debug, Default)]
pub struct IntervalGate {
    last_run: Mutex<Option<Instant>>,
}

impl IntervalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn due(&self, period: Duration) -> bool {
        let guard = self.last_run.lock().unwrap_or_else(|e| e.into_inner());
        match *guard {
            Some(last) => last.elapsed() >= period,
            None => true,
        }
    }

    pub fn mark(&self) {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }
}

/// Tick-driven job runner.
///
/// Every tick it reads the sim state and telemetry once, then offers the
/// pair to each job. Jobs run concurrently with each other but serially with
/// themselves; a job still running when its next tick comes due is skipped.
pub struct Scheduler {
    client: Arc<SimClient>,
    jobs: Vec<Arc<dyn Job>>,
    tick: Duration,
}

impl Scheduler {
    pub fn new(client: Arc<SimClient>, tick: Duration) -> Self {
        Self {
            client,
            jobs: Vec::new(),
            tick,
        }
    }

    pub fn add_job(&mut self, job: Arc<dyn Job>) {
        info!("Registered job {}", job.name());
        self.jobs.push(job);
    }

    /// Run until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = interval(self.tick);
        info!("Scheduler started with {} jobs", self.jobs.len());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let state = self.client.get_state();
            let telemetry = self.client.get_telemetry().ok();

            for job in &self.jobs {
                if !job.should_fire(state, telemetry.as_ref()) {
                    continue;
                }
                if !job.try_lock() {
                    trace!("Job {} still running, skipping tick", job.name());
                    metrics::counter!("scheduler.skipped_locked_total", "job" => job.name())
                        .increment(1);
                    continue;
                }

                let job = Arc::clone(job);
                let telemetry = telemetry.clone();
                tokio::spawn(async move {
                    let start = Instant::now();
                    job.run(telemetry).await;
                    metrics::histogram!("scheduler.job_duration_seconds", "job" => job.name())
                        .record(start.elapsed().as_secs_f64());
                    job.unlock();
                });
            }
        }
        info!("Scheduler stopped");
    }
}
