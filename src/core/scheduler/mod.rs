//! Cron scheduling on top of `tokio_cron_scheduler`.
//!
//! Schedules are registered with classic five-field crontab expressions;
//! the seconds field the underlying scheduler wants is prepended here.
//! Each schedule id owns a single-flight lock: a trigger that fires while
//! the previous run is still active is skipped, never run in parallel —
//! the queue and the style memory are not safe under interleaved writes
//! from the same logical job.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::core::error::PipelineError;
use crate::core::pipeline::{PipelineExecutor, RunOutcome};
use crate::core::types::ScheduleDefinition;

/// How long `shutdown` waits for in-flight runs before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct Scheduler {
    inner: JobScheduler,
    executor: Arc<PipelineExecutor>,
    jobs: HashMap<String, uuid::Uuid>,
    in_flight: Arc<AtomicUsize>,
}

impl Scheduler {
    pub async fn new(executor: Arc<PipelineExecutor>) -> Result<Self> {
        let inner = JobScheduler::new().await?;
        Ok(Self {
            inner,
            executor,
            jobs: HashMap::new(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Arm a schedule. Registration is idempotent: an existing job with
    /// the same id is replaced. Malformed cron input is rejected here and
    /// the schedule is not armed.
    pub async fn add(&mut self, schedule: ScheduleDefinition) -> std::result::Result<(), PipelineError> {
        let cron = to_seconds_cron(&schedule.cron)?;
        let lock = Arc::new(Mutex::new(()));
        let executor = self.executor.clone();
        let in_flight = self.in_flight.clone();
        let shared = Arc::new(schedule.clone());

        let job = Job::new_async(cron.as_str(), move |_uuid, _scheduler| {
            let executor = executor.clone();
            let lock = lock.clone();
            let in_flight = in_flight.clone();
            let schedule = shared.clone();
            Box::pin(async move {
                run_single_flight(&executor, &schedule, &lock, &in_flight).await;
            })
        })
        .map_err(|e| PipelineError::InvalidCron {
            expr: schedule.cron.clone(),
            reason: e.to_string(),
        })?;

        if let Some(previous) = self.jobs.remove(&schedule.id)
            && let Err(e) = self.inner.remove(&previous).await
        {
            warn!("could not remove previous job for '{}': {}", schedule.id, e);
        }

        let job_id = self.inner.add(job).await.map_err(|e| {
            PipelineError::Configuration(format!(
                "cannot register schedule '{}': {}",
                schedule.id, e
            ))
        })?;
        self.jobs.insert(schedule.id.clone(), job_id);
        info!("Schedule '{}' armed: {}", schedule.id, schedule.cron);
        Ok(())
    }

    /// Disarm a schedule. No-op when the id is unknown.
    pub async fn remove(&mut self, id: &str) {
        if let Some(job_id) = self.jobs.remove(id) {
            match self.inner.remove(&job_id).await {
                Ok(()) => info!("Schedule '{}' removed", id),
                Err(e) => warn!("could not remove schedule '{}': {}", id, e),
            }
        }
    }

    pub fn armed_count(&self) -> usize {
        self.jobs.len()
    }

    pub async fn start(&self) -> Result<()> {
        self.inner.start().await?;
        Ok(())
    }

    /// Stop firing triggers, then wait up to the grace period for
    /// in-flight runs to finish. A run cut off here leaves its item
    /// pending, which the next process start retries.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        loop {
            let remaining = self.in_flight.load(Ordering::SeqCst);
            if remaining == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    "shutdown grace period expired with {} run(s) still in flight",
                    remaining
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Ok(())
    }
}

struct FlightGuard<'a>(&'a AtomicUsize);

impl<'a> FlightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Execute one run under the schedule's single-flight lock. An overlapping
/// trigger is skipped — the still-pending queue row makes the next tick
/// pick the work up again.
pub(crate) async fn run_single_flight(
    executor: &PipelineExecutor,
    schedule: &ScheduleDefinition,
    lock: &Mutex<()>,
    in_flight: &AtomicUsize,
) {
    let Ok(_guard) = lock.try_lock() else {
        warn!(
            "[{}] previous run still active, skipping overlapping trigger",
            schedule.id
        );
        return;
    };
    let _flight = FlightGuard::enter(in_flight);

    match executor.run(schedule).await {
        RunOutcome::Published {
            external_id,
            acknowledged: true,
        } => info!("[{}] published {}", schedule.id, external_id),
        RunOutcome::Published {
            external_id,
            acknowledged: false,
        } => warn!(
            "[{}] published {} but the queue row is still pending",
            schedule.id, external_id
        ),
        // Idle and Failed are already logged at the executor boundary.
        RunOutcome::Idle | RunOutcome::Failed(_) => {}
    }
}

/// Validate a five-field crontab expression and prepend the seconds field
/// `tokio_cron_scheduler` expects.
fn to_seconds_cron(expr: &str) -> std::result::Result<String, PipelineError> {
    let fields = expr.split_whitespace().count();
    if fields != 5 {
        return Err(PipelineError::InvalidCron {
            expr: expr.to_string(),
            reason: format!("expected 5 fields, got {}", fields),
        });
    }
    Ok(format!("0 {}", expr.trim()))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use super::*;
    use crate::core::pipeline::testkit::{FakePublisher, fixture, schedule};
    use crate::core::types::{STATUS_DONE, columns};

    #[test]
    fn five_field_cron_gains_a_seconds_field() {
        assert_eq!(to_seconds_cron("0 9 * * *").unwrap(), "0 0 9 * * *");
        assert_eq!(to_seconds_cron("*/5 * * * 1-5").unwrap(), "0 */5 * * * 1-5");
    }

    #[test]
    fn wrong_field_count_is_invalid_cron() {
        assert!(matches!(
            to_seconds_cron("0 9 * *"),
            Err(PipelineError::InvalidCron { .. })
        ));
        assert!(matches!(
            to_seconds_cron("0 0 9 * * *"),
            Err(PipelineError::InvalidCron { .. })
        ));
    }

    #[tokio::test]
    async fn malformed_cron_is_rejected_at_registration() {
        let fx = fixture();
        let mut scheduler = Scheduler::new(Arc::new(fx.executor())).await.unwrap();

        // five fields, none of them parseable
        let mut bad = schedule();
        bad.cron = "foo bar baz qux quux".to_string();
        let err = scheduler.add(bad).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidCron { .. }));
        assert_eq!(scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn registration_is_idempotent_per_id() {
        let fx = fixture();
        let mut scheduler = Scheduler::new(Arc::new(fx.executor())).await.unwrap();

        scheduler.add(schedule()).await.unwrap();
        scheduler.add(schedule()).await.unwrap();
        assert_eq!(scheduler.armed_count(), 1);

        scheduler.remove("job1").await;
        assert_eq!(scheduler.armed_count(), 0);
        // removing an unknown id is a no-op
        scheduler.remove("ghost").await;
    }

    #[tokio::test]
    async fn overlapping_triggers_publish_at_most_once() {
        let mut fx = fixture();
        fx.publisher = Arc::new(FakePublisher::slow("123_456", Duration::from_millis(200)));
        let executor = fx.executor();
        let sched = schedule();
        let lock = Mutex::new(());
        let in_flight = AtomicUsize::new(0);

        tokio::join!(
            run_single_flight(&executor, &sched, &lock, &in_flight),
            run_single_flight(&executor, &sched, &lock, &in_flight),
        );

        assert_eq!(fx.publisher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.queue.mark_done_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.queue.status_of_row(0), STATUS_DONE);
        assert_eq!(in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn sequential_triggers_drain_the_queue_one_row_per_run() {
        let fx = fixture();
        let executor = fx.executor();
        let sched = schedule();
        let lock = Mutex::new(());
        let in_flight = AtomicUsize::new(0);

        run_single_flight(&executor, &sched, &lock, &in_flight).await;
        // queue now has no pending rows; the second trigger is a no-op
        run_single_flight(&executor, &sched, &lock, &in_flight).await;

        assert_eq!(fx.publisher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fx.queue.field_of_row(0, columns::STATUS).as_deref(),
            Some(STATUS_DONE)
        );
    }
}
