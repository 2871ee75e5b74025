//! Engine builder with pluggable collaborators
//!
//! This module provides the main RollupEngine type that wires the rollup
//! builder, the pipeline orchestrator and the query planner onto one store.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::builder::{BuildReport, RollupBuilder};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::{PipelineOrchestrator, RunId, RunStatus};
use crate::planner::{QueryPlan, QueryPlanner, QueryRequest, QueryResult};
use crate::progress::{InMemoryProgressStore, ProgressStore, RedisProgressStore};
use crate::schema::MetricSchema;
use crate::source::SourceReader;
use crate::store::{InMemoryRollupStore, RollupStore};
use crate::types::{DateRange, DimensionFilter, Granularity, PeriodKey};

/// Builder for configuring the rollup engine with custom collaborators
pub struct RollupEngineBuilder {
    store: Option<Arc<dyn RollupStore>>,
    source: Option<Arc<dyn SourceReader>>,
    progress: Option<Arc<dyn ProgressStore>>,
    schema: Option<MetricSchema>,
    config: Config,
    today: Option<NaiveDate>,
}

impl RollupEngineBuilder {
    /// Create a new engine builder
    pub fn new() -> Self {
        Self {
            store: None,
            source: None,
            progress: None,
            schema: None,
            config: Config::default(),
            today: None,
        }
    }

    /// Set the rollup store
    pub fn with_store<S>(mut self, store: S) -> Self
    where
        S: RollupStore + 'static,
    {
        self.store = Some(Arc::new(store));
        self
    }

    /// Set the rollup store from an existing Arc
    ///
    /// Use this when the caller keeps a handle on the store, e.g. to inspect
    /// rows in tests.
    pub fn with_store_arc(mut self, store: Arc<dyn RollupStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the raw transaction reader
    pub fn with_source<R>(mut self, source: R) -> Self
    where
        R: SourceReader + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    /// Set the raw transaction reader from an existing Arc
    pub fn with_source_arc(mut self, source: Arc<dyn SourceReader>) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the progress store
    ///
    /// Without one, Redis is used when `progress.redis_url` is configured and
    /// an in-memory store otherwise.
    pub fn with_progress<P>(mut self, progress: P) -> Self
    where
        P: ProgressStore + 'static,
    {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Set the progress store from an existing Arc
    pub fn with_progress_arc(mut self, progress: Arc<dyn ProgressStore>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set the metric catalog (retail catalog by default)
    pub fn with_schema(mut self, schema: MetricSchema) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Set engine configuration
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Pin the planner's notion of today
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Build the engine with configured collaborators
    pub fn build(self) -> Result<RollupEngine> {
        self.config.validate().map_err(Error::Configuration)?;

        let source = self
            .source
            .ok_or_else(|| Error::Configuration("No source reader configured".to_string()))?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryRollupStore::new()) as Arc<dyn RollupStore>);

        let progress: Arc<dyn ProgressStore> = match (self.progress, &self.config.progress.redis_url) {
            (Some(progress), _) => progress,
            (None, Some(url)) => Arc::new(RedisProgressStore::new(url)?),
            (None, None) => Arc::new(InMemoryProgressStore::new()),
        };

        let schema = Arc::new(self.schema.unwrap_or_default());

        let builder = Arc::new(RollupBuilder::new(
            Arc::clone(&store),
            source,
            Arc::clone(&schema),
            self.config.builder.shapes.clone(),
        ));

        let orchestrator = Arc::new(PipelineOrchestrator::new(
            Arc::clone(&builder),
            Arc::clone(&store),
            progress,
            self.config.pipeline.clone(),
            self.config.progress.clone(),
        ));

        let mut planner = QueryPlanner::new(
            Arc::clone(&store),
            Arc::clone(&schema),
            self.config.planner.clone(),
        );
        if let Some(today) = self.today {
            planner = planner.with_today(today);
        }

        info!(
            shapes = ?self.config.builder.shapes,
            max_concurrent_units = self.config.pipeline.max_concurrent_units,
            redis = self.config.progress.redis_url.is_some(),
            "Rollup engine ready"
        );

        Ok(RollupEngine {
            store,
            schema,
            builder,
            orchestrator,
            planner,
            config: self.config,
        })
    }
}

impl Default for RollupEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Rollup engine: build, rebuild and query
pub struct RollupEngine {
    store: Arc<dyn RollupStore>,
    schema: Arc<MetricSchema>,
    builder: Arc<RollupBuilder>,
    orchestrator: Arc<PipelineOrchestrator>,
    planner: QueryPlanner,
    config: Config,
}

impl RollupEngine {
    /// Start configuring an engine
    pub fn builder() -> RollupEngineBuilder {
        RollupEngineBuilder::new()
    }

    /// Get reference to the rollup store
    pub fn store(&self) -> &Arc<dyn RollupStore> {
        &self.store
    }

    /// Get the metric catalog
    pub fn schema(&self) -> &MetricSchema {
        &self.schema
    }

    /// Get engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Rollup Builder
    // =========================================================================

    /// Build one period of one granularity for the keys matching `filter`
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let period = PeriodKey::month(2025, 1)?;
    /// let report = engine.build_period(Granularity::Monthly, period, &DimensionFilter::all()).await?;
    /// println!("{} keys written", report.written());
    /// ```
    pub async fn build_period(
        &self,
        granularity: Granularity,
        period: PeriodKey,
        filter: &DimensionFilter,
    ) -> Result<BuildReport> {
        self.builder.build_period(granularity, period, filter).await
    }

    // =========================================================================
    // Pipeline Orchestrator
    // =========================================================================

    /// Rebuild `[start, end]` up to `depth` for every key
    ///
    /// Returns as soon as the run is queued.
    pub async fn rebuild_range(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        depth: Granularity,
    ) -> Result<RunId> {
        self.rebuild_range_filtered(start, end, depth, DimensionFilter::all())
            .await
    }

    /// Rebuild `[start, end]` up to `depth` for the keys matching `filter`
    pub async fn rebuild_range_filtered(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        depth: Granularity,
        filter: DimensionFilter,
    ) -> Result<RunId> {
        let range = DateRange::new(start, end)?;
        debug!(range = %range, depth = %depth, "Rebuild requested");
        self.orchestrator.rebuild_range(range, depth, filter).await
    }

    /// Latest status of a run, `None` when it is unknown or expired
    pub async fn rebuild_status(&self, run_id: RunId) -> Result<Option<RunStatus>> {
        self.orchestrator.status(run_id).await
    }

    /// Wait for a run started by this engine to finish
    pub async fn wait_for_run(&self, run_id: RunId) -> Result<RunStatus> {
        self.orchestrator.wait(run_id).await
    }

    // =========================================================================
    // Query Planner
    // =========================================================================

    /// Answer a range query
    pub async fn query(&self, request: &QueryRequest) -> Result<QueryResult> {
        Ok(self.planner.query(request).await?)
    }

    /// Plan a range query without executing it
    pub fn explain(&self, request: &QueryRequest) -> Result<QueryPlan> {
        Ok(self.planner.plan(request)?)
    }
}
