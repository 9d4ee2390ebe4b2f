//! Scrape fan-out scheduler.
//!
//! [`Orchestrator::run`] turns synthesized queries into one [`ScrapeTask`] per
//! (query, enabled source) pair and drives them on the tokio runtime:
//!
//! * at most `concurrency` tasks are `InFlight` at any time (a semaphore
//!   permit is held for exactly that state),
//! * every attempt takes a token from the source's bucket and then fetches,
//!   with the token wait and the fetch together bounded by `task_timeout`,
//! * `Timeout`, `NetworkError` and `RateLimited` failures are retried with
//!   capped exponential backoff, with the permit released while backing off,
//! * when `deadline` elapses, outstanding tasks are aborted without being
//!   awaited and reported as `Cancelled`.
//!
//! One task's failure never affects its siblings. The returned
//! [`ScrapeReport`] holds a terminal [`ScrapeResult`] for every task.

mod config;
mod error;
mod rate_limit;
mod report;
mod retry;
mod serde_millis;
mod task;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use listing::{ListingRecord, SourceId};
use query::SearchQuery;
use sources::{AdapterRegistry, SourceAdapter};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub use crate::config::OrchestratorConfig;
pub use crate::error::OrchestratorError;
pub use crate::rate_limit::{RateLimitConfig, RateLimitStats, RateLimiters, TokenBucket};
pub use crate::report::{FailureKind, ScrapeOutcome, ScrapeReport, ScrapeResult};
pub use crate::retry::RetryConfig;
pub use crate::task::{ScrapeTask, TaskId, TaskRef, TaskState};

const METRIC_TASKS: &str = "carfinder_scrape_tasks_total";
const METRIC_TASK_SECONDS: &str = "carfinder_scrape_task_seconds";
const METRIC_IN_FLIGHT: &str = "carfinder_scrape_in_flight";

/// Bounded, deadline-aware scheduler over an [`AdapterRegistry`].
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: AdapterRegistry,
    enabled: BTreeSet<SourceId>,
    limiters: Arc<RateLimiters>,
}

impl Orchestrator {
    /// `enabled` lists the sources allowed to produce tasks; anything else
    /// named by a query is filtered before admission.
    pub fn new(
        config: OrchestratorConfig,
        registry: AdapterRegistry,
        enabled: BTreeSet<SourceId>,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let limiters = Arc::new(RateLimiters::new(
            config.rate_limit,
            config.source_rate_limits.clone(),
        ));
        Ok(Self {
            config,
            registry,
            enabled,
            limiters,
        })
    }

    /// Same orchestrator with a different enabled set; rate-limit buckets are shared.
    pub fn with_enabled_sources(&self, enabled: BTreeSet<SourceId>) -> Self {
        Self {
            config: self.config.clone(),
            registry: self.registry.clone(),
            enabled,
            limiters: Arc::clone(&self.limiters),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn enabled_sources(&self) -> &BTreeSet<SourceId> {
        &self.enabled
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn rate_limit_stats(&self) -> Vec<(SourceId, RateLimitStats)> {
        self.limiters.stats()
    }

    /// Tasks `run` would schedule for `queries`, in id order.
    pub fn plan(&self, queries: &[SearchQuery]) -> Vec<ScrapeTask> {
        self.admit(queries)
            .into_iter()
            .map(|(task, _, _)| task)
            .collect()
    }

    fn admit(&self, queries: &[SearchQuery]) -> Vec<(ScrapeTask, SearchQuery, Arc<dyn SourceAdapter>)> {
        let mut admitted = Vec::new();
        let mut next_id = 0u64;
        for (query_index, query) in queries.iter().enumerate() {
            for source in query.target_sources() {
                if !self.enabled.contains(source) {
                    debug!(source = %source, "source disabled; no task");
                    continue;
                }
                let Some(adapter) = self.registry.get(source) else {
                    warn!(source = %source, "no adapter registered for enabled source; no task");
                    continue;
                };
                let task = ScrapeTask::new(TaskId(next_id), source.clone(), query_index);
                next_id += 1;
                admitted.push((task, query.clone(), adapter));
            }
        }
        admitted
    }

    /// Run every admitted task to a terminal state or until the deadline.
    pub async fn run(&self, queries: &[SearchQuery]) -> ScrapeReport {
        let started = Instant::now();
        let admitted = self.admit(queries);
        if admitted.is_empty() {
            debug!("no scrape tasks admitted");
            return ScrapeReport {
                elapsed: started.elapsed(),
                ..ScrapeReport::empty()
            };
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut slots = Vec::with_capacity(admitted.len());
        let mut set = JoinSet::new();
        for (task, query, adapter) in admitted {
            let bucket = self.limiters.bucket(task.source());
            let slot = Arc::new(Mutex::new(Slot { task, result: None }));
            slots.push(Arc::clone(&slot));
            set.spawn(drive(TaskContext {
                slot,
                query,
                adapter,
                semaphore: Arc::clone(&semaphore),
                bucket,
                retry: self.config.retry,
                task_timeout: self.config.task_timeout,
            }));
        }

        let deadline = tokio::time::sleep_until(started + self.config.deadline);
        tokio::pin!(deadline);
        let mut deadline_exceeded = false;
        loop {
            tokio::select! {
                biased;
                joined = set.join_next() => match joined {
                    None => break,
                    Some(Err(err)) if err.is_panic() => {
                        warn!(error = %err, "scrape task panicked");
                    }
                    Some(_) => {}
                },
                () = &mut deadline => {
                    deadline_exceeded = true;
                    break;
                }
            }
        }
        if deadline_exceeded {
            warn!(
                outstanding = set.len(),
                deadline_ms = self.config.deadline.as_millis() as u64,
                "scrape deadline elapsed; aborting outstanding tasks"
            );
            set.abort_all();
        }
        drop(set);

        let results: Vec<ScrapeResult> = slots
            .iter()
            .map(|slot| collect(slot, started, deadline_exceeded))
            .collect();
        let report = ScrapeReport {
            results,
            deadline_exceeded,
            elapsed: started.elapsed(),
        };
        info!(
            tasks = report.results.len(),
            succeeded = report.succeeded().count(),
            failed = report.failed().count(),
            listings = report.listing_count(),
            deadline_exceeded,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "scrape fan-out finished"
        );
        report
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Task state shared between its driver and the collector.
struct Slot {
    task: ScrapeTask,
    result: Option<ScrapeResult>,
}

type SharedSlot = Arc<Mutex<Slot>>;

fn lock(slot: &SharedSlot) -> std::sync::MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

struct TaskContext {
    slot: SharedSlot,
    query: SearchQuery,
    adapter: Arc<dyn SourceAdapter>,
    semaphore: Arc<Semaphore>,
    bucket: Arc<TokenBucket>,
    retry: RetryConfig,
    task_timeout: Duration,
}

struct InFlightGauge;

impl InFlightGauge {
    fn enter() -> Self {
        metrics::gauge!(METRIC_IN_FLIGHT).increment(1.0);
        InFlightGauge
    }
}

impl Drop for InFlightGauge {
    fn drop(&mut self) {
        metrics::gauge!(METRIC_IN_FLIGHT).decrement(1.0);
    }
}

type AttemptFailure = (FailureKind, String);

async fn drive(ctx: TaskContext) {
    let started = Instant::now();
    loop {
        let Ok(permit) = Arc::clone(&ctx.semaphore).acquire_owned().await else {
            finish(&ctx.slot, started, Err((FailureKind::Cancelled, "permit pool closed".into())));
            return;
        };
        if let Err(err) = lock(&ctx.slot).task.transition(TaskState::InFlight) {
            debug!(error = %err, "task no longer live");
            return;
        }

        let outcome = {
            let _gauge = InFlightGauge::enter();
            attempt(&ctx).await
        };
        drop(permit);

        let (kind, message) = match outcome {
            Ok(listings) => {
                finish(&ctx.slot, started, Ok(listings));
                return;
            }
            Err(failure) => failure,
        };

        let attempts = lock(&ctx.slot).task.attempt_count();
        if !(kind.is_retryable() && ctx.retry.allows_retry(attempts)) {
            finish(&ctx.slot, started, Err((kind, message)));
            return;
        }

        let backoff = ctx.retry.backoff(attempts);
        {
            let mut slot = lock(&ctx.slot);
            if slot.task.transition(TaskState::Retrying).is_err() {
                return;
            }
            debug!(
                task_id = slot.task.id().0,
                source = %slot.task.source(),
                attempt = attempts,
                kind = %kind,
                backoff_ms = backoff.as_millis() as u64,
                error = %message,
                "retrying scrape task"
            );
        }
        tokio::time::sleep(backoff).await;
    }
}

/// One attempt, token wait included, bounded by `task_timeout`.
async fn attempt(ctx: &TaskContext) -> Result<Vec<ListingRecord>, AttemptFailure> {
    let bounded = async {
        if !ctx.bucket.acquire().await {
            return Err((
                FailureKind::RateLimited,
                format!("no rate-limit token for {}", ctx.adapter.source()),
            ));
        }
        ctx.adapter
            .fetch(&ctx.query)
            .await
            .map_err(|err| (FailureKind::from(&err), err.to_string()))
    };
    match tokio::time::timeout(ctx.task_timeout, bounded).await {
        Ok(outcome) => outcome,
        Err(_) => Err((
            FailureKind::Timeout,
            format!("attempt exceeded {}ms", ctx.task_timeout.as_millis()),
        )),
    }
}

fn finish(slot: &SharedSlot, started: Instant, outcome: Result<Vec<ListingRecord>, AttemptFailure>) {
    let mut slot = lock(slot);
    let next = if outcome.is_ok() {
        TaskState::Succeeded
    } else {
        TaskState::Failed
    };
    if let Err(err) = slot.task.transition(next) {
        debug!(error = %err, "task already terminal; dropping late outcome");
        return;
    }
    let outcome = match outcome {
        Ok(listings) => ScrapeOutcome::Success { listings },
        Err((kind, message)) => {
            warn!(
                task_id = slot.task.id().0,
                source = %slot.task.source(),
                attempt = slot.task.attempt_count(),
                kind = %kind,
                error = %message,
                "scrape task failed"
            );
            ScrapeOutcome::Failure { kind, message }
        }
    };
    let result = ScrapeResult {
        task: slot.task.task_ref().clone(),
        outcome,
        attempts: slot.task.attempt_count(),
        elapsed: started.elapsed(),
    };
    record_outcome(&result);
    slot.result = Some(result);
}

/// Final result for a slot, force-cancelling it if it never finished.
fn collect(slot: &SharedSlot, started: Instant, deadline_exceeded: bool) -> ScrapeResult {
    let mut slot = lock(slot);
    if let Some(result) = slot.result.take() {
        return result;
    }
    let state = slot.task.state();
    if let Err(err) = slot.task.transition(TaskState::Failed) {
        warn!(error = %err, "unfinished task in unexpected state");
    }
    let message = if deadline_exceeded {
        format!("global deadline elapsed while {state}")
    } else {
        format!("task ended without an outcome while {state}")
    };
    let result = ScrapeResult {
        task: slot.task.task_ref().clone(),
        outcome: ScrapeOutcome::Failure {
            kind: FailureKind::Cancelled,
            message,
        },
        attempts: slot.task.attempt_count(),
        elapsed: started.elapsed(),
    };
    record_outcome(&result);
    result
}

fn record_outcome(result: &ScrapeResult) {
    let source = result.task.source.to_string();
    metrics::counter!(
        METRIC_TASKS,
        "source" => source.clone(),
        "outcome" => result.outcome_label()
    )
    .increment(1);
    metrics::histogram!(METRIC_TASK_SECONDS, "source" => source).record(result.elapsed.as_secs_f64());
}
