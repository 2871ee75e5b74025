//! Rebuild run execution
//!
//! A run walks its stage list in order. Each stage is fanned out into units on
//! a `JoinSet`, bounded by a semaphore, and fully joined before the next stage
//! starts. Unit failures are isolated: a unit that exhausts its retries is
//! recorded and the stage still reaches its barrier. Only an unreachable
//! rollup store or progress store at a stage boundary fails the run.
//!
//! Finished runs stay in memory for the progress TTL, the same lifetime as
//! their status document, and are evicted lazily after that.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::status::{RunId, RunState, RunStatus, UnitFailure};
use super::unit::{stages_for, units_for, RetryPolicy, WorkUnit};
use crate::builder::{BuildReport, RollupBuilder};
use crate::config::{PipelineConfig, ProgressConfig};
use crate::error::{Error, Result};
use crate::metrics;
use crate::progress::ProgressStore;
use crate::store::RollupStore;
use crate::types::{DateRange, DimensionFilter, Granularity};

struct RunHandle {
    status: Arc<RwLock<RunStatus>>,
    /// Set once, to the terminal state, after the run task has joined
    finished: watch::Sender<RunState>,
}

impl RunHandle {
    fn expired(&self, now: chrono::DateTime<Utc>, ttl: chrono::Duration) -> bool {
        self.status
            .read()
            .finished_at
            .is_some_and(|at| now - at >= ttl)
    }
}

struct UnitOutcome {
    unit: WorkUnit,
    attempts: u32,
    elapsed_secs: f64,
    result: std::result::Result<BuildReport, String>,
}

/// Runs rebuilds of a date range across the rollup hierarchy
pub struct PipelineOrchestrator {
    builder: Arc<RollupBuilder>,
    store: Arc<dyn RollupStore>,
    progress: Arc<dyn ProgressStore>,
    config: PipelineConfig,
    progress_config: ProgressConfig,
    runs: DashMap<RunId, Arc<RunHandle>>,
}

impl PipelineOrchestrator {
    /// Create an orchestrator
    pub fn new(
        builder: Arc<RollupBuilder>,
        store: Arc<dyn RollupStore>,
        progress: Arc<dyn ProgressStore>,
        config: PipelineConfig,
        progress_config: ProgressConfig,
    ) -> Self {
        Self {
            builder,
            store,
            progress,
            config,
            progress_config,
            runs: DashMap::new(),
        }
    }

    /// Start a rebuild run and return its id without waiting for it
    ///
    /// The run is published as `queued` before it is spawned; if that publish
    /// fails nothing is started and the error is returned.
    pub async fn rebuild_range(
        self: &Arc<Self>,
        range: DateRange,
        depth: Granularity,
        filter: DimensionFilter,
    ) -> Result<RunId> {
        self.evict_finished();

        let run_id = RunId::new();
        let stages = stages_for(depth);
        let status = RunStatus::queued(run_id, range, depth, stages);

        self.publish(&status).await.map_err(|e| {
            Error::Orchestration(format!("cannot publish status for run {}: {}", run_id, e))
        })?;

        let (finished, _) = watch::channel(RunState::Queued);
        let handle = Arc::new(RunHandle {
            status: Arc::new(RwLock::new(status)),
            finished,
        });
        self.runs.insert(run_id, handle.clone());
        metrics::record_run_started();

        info!(
            run_id = %run_id,
            range = %range,
            depth = %depth,
            "Rebuild queued"
        );

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let task = tokio::spawn(Arc::clone(&this).execute(
                run_id,
                handle.status.clone(),
                filter,
            ));
            if let Err(e) = task.await {
                let snapshot = {
                    let mut s = handle.status.write();
                    if !s.state.is_terminal() {
                        s.fail(format!("run task aborted: {}", e));
                    }
                    s.clone()
                };
                error!(run_id = %run_id, error = %e, "Run task aborted");
                this.publish_best_effort(&snapshot).await;
                metrics::record_run_finished(RunState::Failed.as_str());
            }
            let state = handle.status.read().state;
            handle.finished.send_replace(state);
        });

        Ok(run_id)
    }

    /// Drop finished runs whose status document has outlived the progress TTL
    ///
    /// Called on every new run; returns the number of runs evicted.
    pub fn evict_finished(&self) -> usize {
        let Ok(ttl) = chrono::Duration::from_std(self.progress_config.ttl()) else {
            return 0;
        };
        let now = Utc::now();
        let mut evicted = 0;
        self.runs.retain(|run_id, handle| {
            if handle.expired(now, ttl) {
                debug!(run_id = %run_id, "Evicting finished run");
                evicted += 1;
                false
            } else {
                true
            }
        });
        evicted
    }

    /// Number of runs held in memory
    pub fn tracked_runs(&self) -> usize {
        self.runs.len()
    }

    /// Latest status of a run
    ///
    /// Runs started by this process are answered from memory; anything else is
    /// looked up in the progress store.
    pub async fn status(&self, run_id: RunId) -> Result<Option<RunStatus>> {
        if let Some(handle) = self.runs.get(&run_id) {
            return Ok(Some(handle.status.read().clone()));
        }
        let key = self.progress_config.key_for(run_id);
        match self.progress.get(&key).await? {
            Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
            None => Ok(None),
        }
    }

    /// Wait for a run to reach a terminal state
    ///
    /// Any number of callers may wait on the same run. A run that is no longer
    /// in memory is answered from its status document when that is terminal.
    pub async fn wait(&self, run_id: RunId) -> Result<RunStatus> {
        let handle = self.runs.get(&run_id).map(|h| Arc::clone(h.value()));
        let Some(handle) = handle else {
            return match self.status(run_id).await? {
                Some(status) if status.state.is_terminal() => Ok(status),
                Some(status) => Err(Error::Orchestration(format!(
                    "run {} is {} and not owned by this process",
                    run_id, status.state
                ))),
                None => Err(Error::Orchestration(format!("unknown run {}", run_id))),
            };
        };

        let mut finished = handle.finished.subscribe();
        finished
            .wait_for(|state| state.is_terminal())
            .await
            .map_err(|_| Error::Orchestration(format!("run {} lost its supervisor", run_id)))?;
        let status = handle.status.read().clone();
        Ok(status)
    }

    async fn execute(
        self: Arc<Self>,
        run_id: RunId,
        status: Arc<RwLock<RunStatus>>,
        filter: DimensionFilter,
    ) {
        let (range, stages) = {
            let s = status.read();
            (s.range, s.stages.clone())
        };
        let started = Instant::now();

        for (index, stage) in stages.iter().copied().enumerate() {
            if let Err(e) = self.store.ping().await {
                self.fail_run(
                    run_id,
                    &status,
                    stage,
                    format!("rollup store unreachable at stage {}: {}", stage, e),
                )
                .await;
                return;
            }

            let units = units_for(stage, &range);
            let snapshot = {
                let mut s = status.write();
                s.begin_stage(index, units.len());
                s.clone()
            };
            if let Err(e) = self.publish(&snapshot).await {
                self.fail_run(
                    run_id,
                    &status,
                    stage,
                    format!("progress store unreachable at stage {}: {}", stage, e),
                )
                .await;
                return;
            }

            info!(
                run_id = %run_id,
                stage = %stage,
                stage_index = index,
                units = units.len(),
                "Stage started"
            );

            if !units.is_empty() {
                self.run_stage(run_id, stage, units, &status, &filter).await;
            }

            let (completed, failed) = {
                let s = status.read();
                (s.stage_units_completed, s.stage_units_failed)
            };
            info!(
                run_id = %run_id,
                stage = %stage,
                completed,
                failed,
                "Stage joined"
            );
        }

        let snapshot = {
            let mut s = status.write();
            s.complete();
            s.clone()
        };
        if let Err(e) = self.publish(&snapshot).await {
            warn!(run_id = %run_id, error = %e, "Failed to publish completed status");
        }
        metrics::record_run_finished(RunState::Completed.as_str());

        info!(
            run_id = %run_id,
            units_completed = snapshot.units_completed,
            units_failed = snapshot.units_failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Rebuild completed"
        );
    }

    /// Fan a stage out and wait for every unit
    async fn run_stage(
        &self,
        run_id: RunId,
        stage: Granularity,
        units: Vec<WorkUnit>,
        status: &Arc<RwLock<RunStatus>>,
        filter: &DimensionFilter,
    ) {
        let policy = self.config.retry_policy();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_units.max(1)));
        let mut join_set = JoinSet::new();

        for unit in units {
            let builder = Arc::clone(&self.builder);
            let permit = Arc::clone(&semaphore);
            let filter = filter.clone();

            join_set.spawn(async move {
                // Acquire semaphore permit to limit concurrency
                let _permit = permit.acquire().await;
                run_unit(run_id, unit, &builder, &filter, policy).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            // Panics are caught per attempt in run_unit; only cancellation lands here
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(run_id = %run_id, stage = %stage, error = %e, "Unit task cancelled");
                    let snapshot = {
                        let mut s = status.write();
                        s.unit_failed(UnitFailure {
                            stage,
                            unit: format!("{} <cancelled>", stage),
                            attempts: 0,
                            error: e.to_string(),
                        });
                        s.clone()
                    };
                    self.publish_best_effort(&snapshot).await;
                    continue;
                },
            };

            metrics::record_unit(stage.as_str(), outcome.elapsed_secs, outcome.result.is_ok());
            match outcome.result {
                Ok(report) => {
                    debug!(
                        run_id = %run_id,
                        unit = %outcome.unit,
                        written = report.written(),
                        "Unit finished"
                    );
                    status.write().unit_succeeded();
                },
                Err(e) => {
                    error!(
                        run_id = %run_id,
                        stage = %stage,
                        unit = %outcome.unit,
                        attempts = outcome.attempts,
                        error = %e,
                        "Unit failed permanently; rows for it stay stale until rebuilt"
                    );
                    let snapshot = {
                        let mut s = status.write();
                        s.unit_failed(UnitFailure {
                            stage,
                            unit: outcome.unit.to_string(),
                            attempts: outcome.attempts,
                            error: e,
                        });
                        s.clone()
                    };
                    self.publish_best_effort(&snapshot).await;
                },
            }
        }
    }

    async fn fail_run(
        &self,
        run_id: RunId,
        status: &Arc<RwLock<RunStatus>>,
        stage: Granularity,
        message: String,
    ) {
        error!(run_id = %run_id, stage = %stage, error = %message, "Rebuild failed");
        let snapshot = {
            let mut s = status.write();
            s.fail(message);
            s.clone()
        };
        self.publish_best_effort(&snapshot).await;
        metrics::record_run_finished(RunState::Failed.as_str());
    }

    async fn publish(&self, status: &RunStatus) -> Result<()> {
        let blob = serde_json::to_string(status)?;
        let key = self.progress_config.key_for(status.run_id);
        self.progress
            .put(&key, blob, self.progress_config.ttl())
            .await?;
        Ok(())
    }

    async fn publish_best_effort(&self, status: &RunStatus) {
        if let Err(e) = self.publish(status).await {
            warn!(run_id = %status.run_id, error = %e, "Failed to publish run status");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run one unit with retries, each attempt under the unit timeout
///
/// A panicking attempt is caught and recorded against the unit without a
/// retry.
async fn run_unit(
    run_id: RunId,
    unit: WorkUnit,
    builder: &RollupBuilder,
    filter: &DimensionFilter,
    policy: RetryPolicy,
) -> UnitOutcome {
    let started = Instant::now();
    let stage = unit.granularity();
    let mut attempt = 0;

    loop {
        attempt += 1;
        let attempt_result =
            AssertUnwindSafe(tokio::time::timeout(policy.timeout, unit.run(builder, filter)))
                .catch_unwind()
                .await;
        let (message, transient) = match attempt_result {
            Ok(Ok(Ok(report))) => {
                return UnitOutcome {
                    unit,
                    attempts: attempt,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                    result: Ok(report),
                };
            },
            Ok(Ok(Err(e))) => (e.to_string(), e.is_transient()),
            Ok(Err(_)) => (format!("timed out after {:?}", policy.timeout), true),
            Err(payload) => (format!("panicked: {}", panic_message(payload.as_ref())), false),
        };

        if !transient || !policy.should_retry(attempt) {
            return UnitOutcome {
                unit,
                attempts: attempt,
                elapsed_secs: started.elapsed().as_secs_f64(),
                result: Err(message),
            };
        }

        warn!(
            run_id = %run_id,
            stage = %stage,
            unit = %unit,
            attempt,
            max_attempts = policy.max_attempts(),
            error = %message,
            "Unit attempt failed, retrying in {:?}",
            policy.backoff
        );
        metrics::record_unit_retry(stage.as_str());
        tokio::time::sleep(policy.backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::InMemoryProgressStore;
    use crate::schema::MetricSchema;
    use crate::source::InMemorySourceReader;
    use crate::store::InMemoryRollupStore;
    use crate::types::DimensionShape;
    use chrono::NaiveDate;
    use std::time::Duration;

    fn orchestrator(
        store: Arc<InMemoryRollupStore>,
        progress: Arc<InMemoryProgressStore>,
    ) -> Arc<PipelineOrchestrator> {
        orchestrator_with_ttl(store, progress, ProgressConfig::default().ttl_secs)
    }

    fn orchestrator_with_ttl(
        store: Arc<InMemoryRollupStore>,
        progress: Arc<InMemoryProgressStore>,
        ttl_secs: u64,
    ) -> Arc<PipelineOrchestrator> {
        let builder = Arc::new(RollupBuilder::new(
            store.clone(),
            Arc::new(InMemorySourceReader::new()),
            Arc::new(MetricSchema::retail()),
            vec![DimensionShape::Store],
        ));
        let config = PipelineConfig {
            max_concurrent_units: 4,
            unit_max_retries: 1,
            unit_retry_backoff_ms: 1,
            unit_timeout_secs: 5,
        };
        Arc::new(PipelineOrchestrator::new(
            builder,
            store,
            progress,
            config,
            ProgressConfig {
                ttl_secs,
                ..ProgressConfig::default()
            },
        ))
    }

    fn week() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2025, 1, 6).unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 12).unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_empty_source_completes() {
        let store = Arc::new(InMemoryRollupStore::new());
        let progress = Arc::new(InMemoryProgressStore::new());
        let orch = orchestrator(store, progress.clone());

        let run_id = orch
            .rebuild_range(week(), Granularity::Weekly, DimensionFilter::all())
            .await
            .unwrap();
        let status = tokio::time::timeout(Duration::from_secs(10), orch.wait(run_id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(status.state, RunState::Completed);
        assert_eq!(status.units_completed, 7 + 7 + 1);
        assert_eq!(status.units_failed, 0);

        let blob = progress
            .get(&format!("rollup:rebuild:{}", run_id))
            .await
            .unwrap()
            .unwrap();
        let published: RunStatus = serde_json::from_str(&blob).unwrap();
        assert_eq!(published.state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_unreachable_store_fails_run() {
        let store = Arc::new(InMemoryRollupStore::new());
        store.set_available(false);
        let progress = Arc::new(InMemoryProgressStore::new());
        let orch = orchestrator(store, progress);

        let run_id = orch
            .rebuild_range(week(), Granularity::Daily, DimensionFilter::all())
            .await
            .unwrap();
        let status = orch.wait(run_id).await.unwrap();
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.current_stage(), Some(Granularity::Hourly));
        assert!(status.error.unwrap().contains("unreachable"));
    }

    #[tokio::test]
    async fn test_status_of_unknown_run() {
        let orch = orchestrator(
            Arc::new(InMemoryRollupStore::new()),
            Arc::new(InMemoryProgressStore::new()),
        );
        assert!(orch.status(RunId::new()).await.unwrap().is_none());
        assert!(orch.wait(RunId::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_finished_runs_are_evicted_after_ttl() {
        let store = Arc::new(InMemoryRollupStore::new());
        let progress = Arc::new(InMemoryProgressStore::new());
        let orch = orchestrator_with_ttl(store, progress, 1);

        let first = orch
            .rebuild_range(week(), Granularity::Hourly, DimensionFilter::all())
            .await
            .unwrap();
        orch.wait(first).await.unwrap();
        assert_eq!(orch.evict_finished(), 0);
        assert_eq!(orch.tracked_runs(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;

        // Starting a run sweeps the expired one
        let second = orch
            .rebuild_range(week(), Granularity::Hourly, DimensionFilter::all())
            .await
            .unwrap();
        assert_eq!(orch.tracked_runs(), 1);
        assert!(orch.status(first).await.unwrap().is_none());
        assert!(orch.wait(first).await.is_err());

        let status = orch.wait(second).await.unwrap();
        assert_eq!(status.state, RunState::Completed);
    }

    #[tokio::test]
    async fn test_wait_falls_back_to_status_document() {
        let store = Arc::new(InMemoryRollupStore::new());
        let progress = Arc::new(InMemoryProgressStore::new());
        let owner = orchestrator(store.clone(), progress.clone());
        let observer = orchestrator(store, progress);

        let run_id = owner
            .rebuild_range(week(), Granularity::Daily, DimensionFilter::all())
            .await
            .unwrap();
        let owned = owner.wait(run_id).await.unwrap();

        let observed = observer.wait(run_id).await.unwrap();
        assert_eq!(observed.state, RunState::Completed);
        assert_eq!(observed.units_completed, owned.units_completed);
        assert_eq!(observer.tracked_runs(), 0);
    }
}
