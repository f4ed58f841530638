//! Result aggregation and route grouping.
//!
//! [`ResultAggregator`] keeps one [`RouteResult`] per route. Each entry sits
//! behind its own mutex, so workers finishing different routes never contend;
//! the outer map is only write-locked while routes are registered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{ScanError, ScanResult};
use crate::report::AuditReport;
use crate::route::{GroupRoutesKey, Route};

/// How the representative report of a multi-sample route is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    /// The most recently received successful report.
    #[default]
    LastSuccessful,
    /// The latest report with every numeric leaf replaced by its mean across
    /// successful samples.
    Average,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    /// No sample has resolved yet.
    Pending,
    /// Some samples resolved, others outstanding.
    Partial,
    /// Every sample resolved and at least one succeeded.
    Complete,
    /// Every sample was abandoned.
    Failed,
}

impl RouteStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, RouteStatus::Complete | RouteStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleReport {
    pub sample_index: u32,
    pub report: Arc<AuditReport>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AbandonedSample {
    pub sample_index: u32,
    #[serde(serialize_with = "serialize_display")]
    pub error: ScanError,
    pub abandoned_at: DateTime<Utc>,
}

fn serialize_display<S: serde::Serializer>(err: &ScanError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(err)
}

/// Aggregated outcome for one route.
#[derive(Debug, Clone, Serialize)]
pub struct RouteResult {
    pub route: Arc<Route>,
    pub group_key: String,
    pub assigned_samples: u32,
    /// Successful reports in receipt order. Use `sample_index` for
    /// assignment order.
    pub reports: Vec<SampleReport>,
    pub abandoned: Vec<AbandonedSample>,
    pub representative: Option<Arc<AuditReport>>,
    pub status: RouteStatus,
}

impl RouteResult {
    fn new(route: Arc<Route>, group_key: String, assigned_samples: u32) -> Self {
        Self {
            route,
            group_key,
            assigned_samples,
            reports: Vec::new(),
            abandoned: Vec::new(),
            representative: None,
            status: RouteStatus::Pending,
        }
    }

    pub fn path(&self) -> &str {
        &self.route.path
    }

    /// Samples with a terminal outcome.
    pub fn resolved(&self) -> u32 {
        (self.reports.len() + self.abandoned.len()) as u32
    }

    fn check_sample(&self, sample_index: u32) -> ScanResult<()> {
        let invalid = |reason: &str| ScanError::InvalidSample {
            path: self.route.path.clone(),
            sample_index,
            reason: reason.to_string(),
        };
        if sample_index >= self.assigned_samples {
            return Err(invalid("index exceeds assigned sample count"));
        }
        let seen = self.reports.iter().any(|r| r.sample_index == sample_index)
            || self.abandoned.iter().any(|a| a.sample_index == sample_index);
        if seen {
            return Err(invalid("outcome already recorded"));
        }
        Ok(())
    }

    fn record_success(
        &mut self,
        sample_index: u32,
        report: AuditReport,
        merge: MergeStrategy,
    ) -> ScanResult<()> {
        self.check_sample(sample_index)?;
        let report = Arc::new(report);
        self.reports.push(SampleReport {
            sample_index,
            report: Arc::clone(&report),
            received_at: Utc::now(),
        });
        self.representative = Some(match merge {
            MergeStrategy::LastSuccessful => report,
            MergeStrategy::Average => Arc::new(average_reports(&self.reports)),
        });
        self.refresh_status();
        Ok(())
    }

    fn record_abandoned(&mut self, sample_index: u32, error: ScanError) -> ScanResult<()> {
        self.check_sample(sample_index)?;
        self.abandoned.push(AbandonedSample {
            sample_index,
            error,
            abandoned_at: Utc::now(),
        });
        self.refresh_status();
        Ok(())
    }

    fn refresh_status(&mut self) {
        let resolved = self.resolved();
        self.status = if resolved == 0 {
            RouteStatus::Pending
        } else if resolved < self.assigned_samples {
            RouteStatus::Partial
        } else if self.reports.is_empty() {
            RouteStatus::Failed
        } else {
            RouteStatus::Complete
        };
    }
}

/// Average every numeric leaf across `samples`, taking the structure and
/// non-numeric leaves from the most recent one.
pub fn average_reports(samples: &[SampleReport]) -> AuditReport {
    let Some(latest) = samples.last() else {
        return AuditReport::from_document(Value::Null);
    };
    let mut merged = latest.report.document().clone();
    let sources: Vec<&Value> = samples.iter().map(|s| s.report.document()).collect();
    average_into(&mut merged, &sources);
    AuditReport::from_document(merged)
}

fn average_into(target: &mut Value, sources: &[&Value]) {
    match target {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                let children: Vec<&Value> = sources.iter().filter_map(|s| s.get(key)).collect();
                average_into(child, &children);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter_mut().enumerate() {
                let children: Vec<&Value> = sources.iter().filter_map(|s| s.get(idx)).collect();
                average_into(child, &children);
            }
        }
        Value::Number(_) => {
            let values: Vec<f64> = sources.iter().filter_map(|v| v.as_f64()).collect();
            if values.is_empty() {
                return;
            }
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            if let Some(n) = serde_json::Number::from_f64(mean) {
                *target = Value::Number(n);
            }
        }
        _ => {}
    }
}

/// Routes sharing one group key.
#[derive(Debug, Clone, Serialize)]
pub struct Group {
    pub key: String,
    pub routes: Vec<RouteResult>,
}

impl Group {
    pub fn failed_count(&self) -> usize {
        self.routes
            .iter()
            .filter(|r| r.status == RouteStatus::Failed)
            .count()
    }

    /// A group is failed when every member route failed.
    pub fn is_failed(&self) -> bool {
        !self.routes.is_empty() && self.failed_count() == self.routes.len()
    }

    pub fn is_finished(&self) -> bool {
        self.routes.iter().all(|r| r.status.is_finished())
    }
}

#[derive(Debug, Default)]
struct Entries {
    by_path: HashMap<String, Arc<Mutex<RouteResult>>>,
    order: Vec<String>,
}

/// Per-route result store.
#[derive(Debug)]
pub struct ResultAggregator {
    merge: MergeStrategy,
    group_by: GroupRoutesKey,
    entries: RwLock<Entries>,
}

impl ResultAggregator {
    pub fn new(merge: MergeStrategy, group_by: GroupRoutesKey) -> Self {
        Self {
            merge,
            group_by,
            entries: RwLock::new(Entries::default()),
        }
    }

    /// Create the result entry for a route with `assigned_samples` samples.
    pub fn register(&self, route: Arc<Route>, assigned_samples: u32) -> ScanResult<()> {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        if entries.by_path.contains_key(&route.path) {
            return Err(ScanError::DuplicateRoute {
                path: route.path.clone(),
            });
        }
        let path = route.path.clone();
        let group_key = route.group_key(self.group_by).to_string();
        entries.by_path.insert(
            path.clone(),
            Arc::new(Mutex::new(RouteResult::new(route, group_key, assigned_samples))),
        );
        entries.order.push(path);
        Ok(())
    }

    fn entry(&self, path: &str) -> ScanResult<Arc<Mutex<RouteResult>>> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries
            .by_path
            .get(path)
            .cloned()
            .ok_or_else(|| ScanError::UnknownRoute(path.to_string()))
    }

    fn update<F>(&self, path: &str, apply: F) -> ScanResult<RouteStatus>
    where
        F: FnOnce(&mut RouteResult) -> ScanResult<()>,
    {
        let entry = self.entry(path)?;
        let mut result = entry.lock().unwrap_or_else(|p| p.into_inner());
        apply(&mut result)?;
        Ok(result.status)
    }

    pub fn on_task_succeeded(
        &self,
        path: &str,
        sample_index: u32,
        report: AuditReport,
    ) -> ScanResult<RouteStatus> {
        let merge = self.merge;
        self.update(path, |result| result.record_success(sample_index, report, merge))
    }

    pub fn on_task_abandoned(
        &self,
        path: &str,
        sample_index: u32,
        error: ScanError,
    ) -> ScanResult<RouteStatus> {
        if !matches!(error, ScanError::Cancelled { .. }) {
            warn!(path = %path, sample_index, error = %error, "sample abandoned");
        }
        self.update(path, |result| result.record_abandoned(sample_index, error))
    }

    /// Snapshot of one route's current result.
    pub fn get(&self, path: &str) -> Option<RouteResult> {
        let entry = self.entry(path).ok()?;
        let result = entry.lock().unwrap_or_else(|p| p.into_inner());
        Some(result.clone())
    }

    /// Snapshots of all routes in registration order.
    pub fn results(&self) -> Vec<RouteResult> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        entries
            .order
            .iter()
            .filter_map(|path| entries.by_path.get(path))
            .map(|entry| entry.lock().unwrap_or_else(|p| p.into_inner()).clone())
            .collect()
    }

    /// Members of group `key`, in registration order.
    pub fn group(&self, key: &str) -> Vec<RouteResult> {
        self.results()
            .into_iter()
            .filter(|r| r.group_key == key)
            .collect()
    }

    /// All groups, ordered by the registration of their first member.
    pub fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<Group> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for result in self.results() {
            match index.get(&result.group_key) {
                Some(&i) => groups[i].routes.push(result),
                None => {
                    index.insert(result.group_key.clone(), groups.len());
                    groups.push(Group {
                        key: result.group_key.clone(),
                        routes: vec![result],
                    });
                }
            }
        }
        groups
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::DiscoverySource;
    use serde_json::json;

    fn route(path: &str, definition: Option<&str>) -> Arc<Route> {
        let r = Route::new(path, DiscoverySource::Manual);
        Arc::new(match definition {
            Some(d) => r.with_definition(d),
            None => r,
        })
    }

    fn report(fcp: f64) -> AuditReport {
        AuditReport::from_engine_output(json!({
            "audits": { "first-contentful-paint": { "numericValue": fcp, "displayValue": format!("{fcp} ms") } }
        }))
    }

    fn abandoned(path: &str, sample_index: u32) -> ScanError {
        ScanError::RetryBudgetExhausted {
            path: path.to_string(),
            sample_index,
            attempts: 1,
            last_error: "render error".to_string(),
        }
    }

    #[test]
    fn test_status_progression_and_last_successful_representative() {
        let agg = ResultAggregator::new(MergeStrategy::LastSuccessful, GroupRoutesKey::DefinitionName);
        agg.register(route("/", None), 3).unwrap();
        assert_eq!(agg.get("/").unwrap().status, RouteStatus::Pending);

        assert_eq!(agg.on_task_succeeded("/", 2, report(100.0)).unwrap(), RouteStatus::Partial);
        assert_eq!(agg.on_task_abandoned("/", 0, abandoned("/", 0)).unwrap(), RouteStatus::Partial);
        assert_eq!(agg.on_task_succeeded("/", 1, report(300.0)).unwrap(), RouteStatus::Complete);

        let result = agg.get("/").unwrap();
        assert_eq!(result.reports.len(), 2);
        // receipt order, not assignment order
        assert_eq!(result.reports[0].sample_index, 2);
        assert_eq!(
            result.representative.unwrap().number("report.audits.first-contentful-paint.numericValue"),
            Some(300.0)
        );
    }

    #[test]
    fn test_all_abandoned_is_failed() {
        let agg = ResultAggregator::new(MergeStrategy::LastSuccessful, GroupRoutesKey::DefinitionName);
        agg.register(route("/broken", None), 2).unwrap();
        agg.on_task_abandoned("/broken", 0, abandoned("/broken", 0)).unwrap();
        let status = agg.on_task_abandoned("/broken", 1, abandoned("/broken", 1)).unwrap();
        assert_eq!(status, RouteStatus::Failed);
        assert!(agg.get("/broken").unwrap().representative.is_none());
    }

    #[test]
    fn test_sample_list_never_exceeds_assignment() {
        let agg = ResultAggregator::new(MergeStrategy::LastSuccessful, GroupRoutesKey::DefinitionName);
        agg.register(route("/", None), 1).unwrap();
        agg.on_task_succeeded("/", 0, report(1.0)).unwrap();

        let dup = agg.on_task_succeeded("/", 0, report(2.0));
        assert!(matches!(dup, Err(ScanError::InvalidSample { .. })));
        let out_of_range = agg.on_task_abandoned("/", 1, abandoned("/", 1));
        assert!(matches!(out_of_range, Err(ScanError::InvalidSample { .. })));

        let result = agg.get("/").unwrap();
        assert_eq!(result.resolved(), 1);
        // the accepted report is kept
        assert_eq!(
            result.representative.unwrap().number("report.audits.first-contentful-paint.numericValue"),
            Some(1.0)
        );
    }

    #[test]
    fn test_unknown_and_duplicate_routes() {
        let agg = ResultAggregator::new(MergeStrategy::LastSuccessful, GroupRoutesKey::DefinitionName);
        agg.register(route("/a", None), 1).unwrap();
        assert!(matches!(
            agg.register(route("/a", None), 1),
            Err(ScanError::DuplicateRoute { .. })
        ));
        assert!(matches!(
            agg.on_task_succeeded("/missing", 0, report(1.0)),
            Err(ScanError::UnknownRoute(_))
        ));
    }

    #[test]
    fn test_average_merge() {
        let agg = ResultAggregator::new(MergeStrategy::Average, GroupRoutesKey::DefinitionName);
        agg.register(route("/", None), 3).unwrap();
        agg.on_task_succeeded("/", 0, report(100.0)).unwrap();
        agg.on_task_succeeded("/", 1, report(200.0)).unwrap();
        agg.on_task_succeeded("/", 2, report(600.0)).unwrap();

        let rep = agg.get("/").unwrap().representative.unwrap();
        assert_eq!(rep.number("report.audits.first-contentful-paint.numericValue"), Some(300.0));
        // non-numeric leaves come from the latest sample
        assert_eq!(
            rep.metric("report.audits.first-contentful-paint.displayValue"),
            Some(&json!("600 ms"))
        );
    }

    #[test]
    fn test_average_skips_samples_missing_a_path() {
        let a = AuditReport::from_document(json!({ "report": { "score": 0.25, "items": [1, 2] } }));
        let b = AuditReport::from_document(json!({ "report": { "items": [3] } }));
        let c = AuditReport::from_document(json!({ "report": { "score": 0.75, "items": [5, 6] } }));
        let samples: Vec<SampleReport> = [a, b, c]
            .into_iter()
            .enumerate()
            .map(|(i, r)| SampleReport {
                sample_index: i as u32,
                report: Arc::new(r),
                received_at: Utc::now(),
            })
            .collect();

        let merged = average_reports(&samples);
        assert_eq!(merged.number("report.score"), Some(0.5));
        assert_eq!(merged.number("report.items.0"), Some(3.0));
        assert_eq!(merged.number("report.items.1"), Some(4.0));
    }

    #[test]
    fn test_grouping_by_definition_with_path_fallback() {
        let agg = ResultAggregator::new(MergeStrategy::LastSuccessful, GroupRoutesKey::DefinitionName);
        agg.register(route("/blog/a", Some("/blog/:slug")), 1).unwrap();
        agg.register(route("/about", None), 1).unwrap();
        agg.register(route("/blog/b", Some("/blog/:slug")), 1).unwrap();

        let groups = agg.groups();
        let keys: Vec<&str> = groups.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["/blog/:slug", "/about"]);

        let blog: Vec<String> = agg.group("/blog/:slug").iter().map(|r| r.path().to_string()).collect();
        assert_eq!(blog, vec!["/blog/a", "/blog/b"]);
        assert_eq!(agg.group("/about").len(), 1);
        assert!(agg.group("/nope").is_empty());
    }

    #[test]
    fn test_group_failure_requires_every_member_failed() {
        let agg = ResultAggregator::new(MergeStrategy::LastSuccessful, GroupRoutesKey::DefinitionName);
        agg.register(route("/blog/a", Some("/blog/:slug")), 1).unwrap();
        agg.register(route("/blog/b", Some("/blog/:slug")), 1).unwrap();
        agg.on_task_abandoned("/blog/a", 0, abandoned("/blog/a", 0)).unwrap();

        let group = &agg.groups()[0];
        assert_eq!(group.failed_count(), 1);
        assert!(!group.is_failed());
        assert!(!group.is_finished());

        agg.on_task_abandoned("/blog/b", 0, abandoned("/blog/b", 0)).unwrap();
        let group = &agg.groups()[0];
        assert!(group.is_failed());
        assert!(group.is_finished());
    }
}
