//! Sitescan Core Library
//!
//! Scan orchestration for whole-site page audits: route registry, sampling,
//! task queue, worker pool, retries, result aggregation and column
//! projection.

pub mod aggregator;
pub mod columns;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod obs;
pub mod progress;
pub mod queue;
pub mod report;
pub mod retry;
pub mod route;
pub mod sampling;
pub mod scan;
pub mod telemetry;
pub mod worker;

pub use aggregator::{
    average_reports, Group, MergeStrategy, ResultAggregator, RouteResult, RouteStatus, SampleReport,
};
pub use columns::{
    default_columns, project, sort_by_column, CellValue, ColumnDefinition, ReportCategory,
    SortDirection, SortValue,
};
pub use config::{ClusterConfig, Device, ScanConfig, ScannerConfig};
pub use discovery::{DiscoveryPlan, RouteDiscovery, StaticDiscovery};
pub use engine::{
    AuditEngine, AuditOptions, AuditSession, CommandAuditEngine, CommandEngineConfig, SessionGuard,
};
pub use error::{AuditError, AuditErrorKind, ScanError, ScanResult};
pub use progress::{ProgressSnapshot, ScanProgress};
pub use queue::{Task, TaskId, TaskQueue, TaskStatus};
pub use report::{resolve_metric, AuditReport, MetricValue};
pub use retry::{RetryController, RetryDecision, RetryPolicy, TaskOutcome};
pub use route::{DiscoverySource, GroupRoutesKey, Route, RouteRegistry, RouteSet, DEFAULT_LOCALES};
pub use sampling::SamplingPolicy;
pub use scan::{plan_samples, PlannedRoute, ScanSummary, Scanner};
pub use telemetry::{init_tracing, LogFormat};
pub use worker::{RouteScope, WorkerPool};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
