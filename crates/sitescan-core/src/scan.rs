//! Scan orchestration.
//!
//! [`Scanner`] wires the components together: it seals the route registry,
//! assigns samples, registers every in-scope route with the aggregator,
//! fills the queue and runs the worker pool. While and after it runs, the
//! scanner is the read-only query surface for report rendering.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::aggregator::{Group, ResultAggregator, RouteResult, RouteStatus};
use crate::columns::{self, CellValue, ReportCategory, SortDirection};
use crate::config::ScanConfig;
use crate::discovery::DiscoveryPlan;
use crate::engine::AuditEngine;
use crate::error::{ScanError, ScanResult};
use crate::obs;
use crate::progress::{ProgressSnapshot, ScanProgress};
use crate::queue::{Task, TaskQueue};
use crate::retry::{RetryController, RetryPolicy};
use crate::route::{Route, RouteRegistry, RouteSet};
use crate::sampling::SamplingPolicy;
use crate::worker::{RouteScope, WorkerContext, WorkerPool};

/// Sample assignment for one in-scope route.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedRoute {
    pub route: Arc<Route>,
    pub group_key: String,
    pub samples: u32,
}

/// Assign samples to the routes within `scanner.max_routes`, in discovery
/// order. Dynamic sampling sees every discovered route, capped or not.
pub fn plan_samples(config: &ScanConfig, routes: &RouteSet) -> Vec<PlannedRoute> {
    let policy = SamplingPolicy::from_config(&config.scanner);
    let discovered = routes.count();
    let in_scope = routes.in_scope(config.scanner.max_routes);
    if in_scope.len() < discovered {
        info!(
            discovered,
            max_routes = config.scanner.max_routes,
            "routes beyond the cap will not be scanned"
        );
    }
    in_scope
        .iter()
        .map(|route| PlannedRoute {
            group_key: route.group_key(config.client.group_routes_key).to_string(),
            samples: policy.samples_for(route, discovered),
            route: Arc::new(route.clone()),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub scan_id: String,
    pub routes: usize,
    pub tasks: usize,
    pub attempts: u64,
    pub completed_routes: usize,
    pub failed_routes: usize,
    pub failed_groups: usize,
    pub progress: ProgressSnapshot,
    pub duration_ms: u64,
}

/// One scan over a sealed route set.
pub struct Scanner {
    config: Arc<ScanConfig>,
    routes: RouteSet,
    plan: Vec<PlannedRoute>,
    tasks: usize,
    engine: Arc<dyn AuditEngine>,
    queue: Arc<TaskQueue>,
    aggregator: Arc<ResultAggregator>,
    progress: Arc<ScanProgress>,
    controller: Arc<RetryController>,
    scope: Arc<RouteScope>,
}

impl Scanner {
    /// Validate `config`, seal `registry` and queue every sample.
    ///
    /// Configuration errors surface here, before anything is scheduled.
    pub fn new(config: ScanConfig, registry: RouteRegistry, engine: Arc<dyn AuditEngine>) -> ScanResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let routes = registry.seal();
        let plan = plan_samples(&config, &routes);

        let queue = Arc::new(TaskQueue::new(config.cluster.skip_duplicate_urls));
        let aggregator = Arc::new(ResultAggregator::new(
            config.client.merge,
            config.client.group_routes_key,
        ));
        let progress = Arc::new(ScanProgress::new());

        // Task ids are (path, sample index) and paths are unique, so
        // `skip_duplicate_urls` only coalesces when the queue already holds
        // work. The aggregator expects exactly the samples that were queued.
        let mut tasks = 0;
        for planned in &plan {
            let mut accepted = 0;
            for sample_index in 0..planned.samples {
                if queue.enqueue(Task::new(Arc::clone(&planned.route), sample_index)) {
                    progress.task_queued();
                    accepted += 1;
                }
            }
            aggregator.register(Arc::clone(&planned.route), accepted)?;
            tasks += accepted as usize;
        }
        debug!(routes = plan.len(), tasks, "scan planned");

        let controller = Arc::new(RetryController::new(
            RetryPolicy::from_config(&config.cluster),
            Arc::clone(&queue),
            Arc::clone(&aggregator),
            Arc::clone(&progress),
        ));

        Ok(Self {
            config,
            routes,
            plan,
            tasks,
            engine,
            queue,
            aggregator,
            progress,
            controller,
            scope: Arc::new(RouteScope::new()),
        })
    }

    /// Discover routes through `discovery`, then build the scanner.
    pub async fn from_discovery(
        config: ScanConfig,
        discovery: &DiscoveryPlan,
        engine: Arc<dyn AuditEngine>,
    ) -> ScanResult<Self> {
        config.validate()?;
        let registry = discovery.collect(&config.scanner).await;
        Self::new(config, registry, engine)
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Every discovered route, including those beyond the cap.
    pub fn routes(&self) -> &RouteSet {
        &self.routes
    }

    pub fn plan(&self) -> &[PlannedRoute] {
        &self.plan
    }

    /// Drain the queue with the worker pool. Always completes; failed routes
    /// are reported in the summary and the aggregate.
    pub async fn run(&self) -> ScanSummary {
        let scan_id = Uuid::new_v4().to_string();
        let span = obs::scan_span(&scan_id);
        self.run_scan(scan_id).instrument(span).await
    }

    async fn run_scan(&self, scan_id: String) -> ScanSummary {
        let pool = WorkerPool::from_config(&self.config.cluster);
        let started = Instant::now();
        obs::emit_scan_started(&scan_id, self.plan.len(), self.tasks, pool.size());

        let ctx = Arc::new(WorkerContext {
            config: Arc::clone(&self.config),
            engine: Arc::clone(&self.engine),
            queue: Arc::clone(&self.queue),
            controller: Arc::clone(&self.controller),
            scope: Arc::clone(&self.scope),
            progress: Arc::clone(&self.progress),
        });
        let attempts = pool.run(ctx).await;

        self.progress.flush();
        let progress = self.progress.snapshot();
        let results = self.aggregator.results();
        let summary = ScanSummary {
            scan_id,
            routes: results.len(),
            tasks: self.tasks,
            attempts,
            completed_routes: results.iter().filter(|r| r.status == RouteStatus::Complete).count(),
            failed_routes: results.iter().filter(|r| r.status == RouteStatus::Failed).count(),
            failed_groups: self.aggregator.groups().iter().filter(|g| g.is_failed()).count(),
            progress,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        obs::emit_scan_finished(
            &summary.scan_id,
            summary.duration_ms,
            progress.succeeded,
            progress.abandoned,
        );
        summary
    }

    /// Take a route out of scope. Its queued samples are abandoned at once,
    /// running ones are interrupted. Returns the number of queued samples
    /// dropped.
    pub fn cancel_route(&self, path: &str) -> ScanResult<usize> {
        if self.aggregator.get(path).is_none() {
            return Err(ScanError::UnknownRoute(path.to_string()));
        }
        self.scope.cancel(path);
        let drained = self.queue.drain_route(path);
        let dropped = drained.len();
        for task in drained {
            self.controller.cancel_queued(task);
        }
        obs::emit_route_cancelled(path, dropped);
        Ok(dropped)
    }

    /// Shrink the scan to its first `cap` routes. Unfinished routes beyond
    /// the cap are cancelled; returns how many.
    pub fn apply_route_cap(&self, cap: usize) -> usize {
        let mut cancelled = 0;
        for result in self.aggregator.results().into_iter().skip(cap) {
            if result.status.is_finished() {
                continue;
            }
            if self.cancel_route(result.path()).is_ok() {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(cap, cancelled, "route cap lowered");
        }
        cancelled
    }

    pub fn route_result(&self, path: &str) -> Option<RouteResult> {
        self.aggregator.get(path)
    }

    pub fn group(&self, key: &str) -> Vec<RouteResult> {
        self.aggregator.group(key)
    }

    pub fn groups(&self) -> Vec<Group> {
        self.aggregator.groups()
    }

    pub fn results(&self) -> Vec<RouteResult> {
        self.aggregator.results()
    }

    /// Project one route onto the configured columns of `category`.
    pub fn project(&self, category: ReportCategory, path: &str) -> ScanResult<Vec<CellValue>> {
        let result = self
            .aggregator
            .get(path)
            .ok_or_else(|| ScanError::UnknownRoute(path.to_string()))?;
        let columns = self
            .config
            .client
            .columns
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(columns::project(columns, &result))
    }

    /// All route results sorted by the column labelled `label`.
    pub fn sorted_results(
        &self,
        category: ReportCategory,
        label: &str,
        direction: SortDirection,
    ) -> ScanResult<Vec<RouteResult>> {
        let column = self
            .config
            .client
            .columns
            .get(&category)
            .and_then(|cols| cols.iter().find(|c| c.label == label))
            .ok_or_else(|| ScanError::UnknownColumn {
                category: category.to_string(),
                label: label.to_string(),
            })?;
        let mut rows = self.aggregator.results();
        columns::sort_by_column(column, direction, &mut rows);
        Ok(rows)
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }
}
