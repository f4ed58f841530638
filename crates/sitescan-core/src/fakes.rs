//! In-memory audit engine for tests and dry runs.
//!
//! [`ScriptedAuditEngine`] answers every audit from a per-path script and
//! records what happened: attempts per path, concurrent audits, session
//! launches and releases.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::engine::{AuditEngine, AuditOptions, AuditSession};
use crate::error::AuditError;
use crate::report::AuditReport;
use crate::route::Route;

/// How the engine answers audits of one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    /// Fail the first `n` audits, then succeed.
    FailTimes(u32),
    /// Fail exactly these audits (1-based, counted per path).
    FailOnCalls(Vec<u32>),
    AlwaysFail,
    /// Never return.
    Hang,
    Panic,
}

type ReportFn = dyn Fn(&Route, u32) -> Value + Send + Sync;

struct Shared {
    delay: Duration,
    scripts: HashMap<String, Behavior>,
    reports: Box<ReportFn>,
    calls: Mutex<HashMap<String, u32>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    launched: AtomicUsize,
    closed: AtomicUsize,
    aborted: AtomicUsize,
}

impl Shared {
    fn record_call(&self, path: &str) -> u32 {
        let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
        let count = calls.entry(path.to_string()).or_insert(0);
        *count += 1;
        *count
    }
}

/// Decrements the active-audit gauge however the audit ends.
struct ActiveAudit<'a>(&'a Shared);

impl<'a> ActiveAudit<'a> {
    fn enter(shared: &'a Shared) -> Self {
        let now = shared.active.fetch_add(1, Ordering::SeqCst) + 1;
        shared.max_active.fetch_max(now, Ordering::SeqCst);
        Self(shared)
    }
}

impl Drop for ActiveAudit<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Builder-style scripted engine. Unscripted paths succeed.
pub struct ScriptedAuditEngine {
    shared: Arc<Shared>,
}

impl Default for ScriptedAuditEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedAuditEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                delay: Duration::ZERO,
                scripts: HashMap::new(),
                reports: Box::new(default_report),
                calls: Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
                launched: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                aborted: AtomicUsize::new(0),
            }),
        }
    }

    fn configure(mut self, apply: impl FnOnce(&mut Shared)) -> Self {
        match Arc::get_mut(&mut self.shared) {
            Some(shared) => apply(shared),
            None => panic!("ScriptedAuditEngine must be configured before use"),
        }
        self
    }

    /// Every audit takes `delay` before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.configure(|s| s.delay = delay)
    }

    pub fn script(self, path: &str, behavior: Behavior) -> Self {
        let path = path.to_string();
        self.configure(|s| {
            s.scripts.insert(path, behavior);
        })
    }

    /// Build engine output from the route and the per-path call number.
    pub fn with_reports(self, reports: impl Fn(&Route, u32) -> Value + Send + Sync + 'static) -> Self {
        self.configure(|s| s.reports = Box::new(reports))
    }

    /// Audits attempted for `path`.
    pub fn calls(&self, path: &str) -> u32 {
        let calls = self.shared.calls.lock().unwrap_or_else(|p| p.into_inner());
        calls.get(path).copied().unwrap_or(0)
    }

    /// Highest number of audits observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.shared.max_active.load(Ordering::SeqCst)
    }

    pub fn launched(&self) -> usize {
        self.shared.launched.load(Ordering::SeqCst)
    }

    /// Sessions released through `close` or `abort`.
    pub fn released(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst) + self.shared.aborted.load(Ordering::SeqCst)
    }

    pub fn aborted(&self) -> usize {
        self.shared.aborted.load(Ordering::SeqCst)
    }
}

fn default_report(route: &Route, call: u32) -> Value {
    json!({
        "requestedUrl": route.path,
        "audits": {
            "first-contentful-paint": {
                "numericValue": 100.0 * f64::from(call),
                "displayValue": format!("{} ms", 100 * call),
            }
        }
    })
}

#[async_trait]
impl AuditEngine for ScriptedAuditEngine {
    async fn launch(&self) -> Result<Box<dyn AuditSession>, AuditError> {
        self.shared.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct ScriptedSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl AuditSession for ScriptedSession {
    async fn audit(&mut self, route: &Route, _options: &AuditOptions) -> Result<AuditReport, AuditError> {
        let shared = &*self.shared;
        let _active = ActiveAudit::enter(shared);
        let call = shared.record_call(&route.path);
        if !shared.delay.is_zero() {
            tokio::time::sleep(shared.delay).await;
        }

        let failed = match shared.scripts.get(&route.path).unwrap_or(&Behavior::Succeed) {
            Behavior::Succeed => false,
            Behavior::FailTimes(n) => call <= *n,
            Behavior::FailOnCalls(calls) => calls.contains(&call),
            Behavior::AlwaysFail => true,
            Behavior::Hang => return std::future::pending().await,
            Behavior::Panic => panic!("scripted panic auditing {}", route.path),
        };
        if failed {
            return Err(AuditError::render(format!("scripted failure #{call}")));
        }
        Ok(AuditReport::from_engine_output((shared.reports)(route, call)))
    }

    async fn close(self: Box<Self>) {
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn abort(&mut self) {
        self.shared.aborted.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::route::DiscoverySource;

    #[tokio::test]
    async fn test_scripted_failures_are_counted_per_path() {
        let engine = ScriptedAuditEngine::new().script("/flaky", Behavior::FailTimes(1));
        let flaky = Route::new("/flaky", DiscoverySource::Manual);
        let ok = Route::new("/ok", DiscoverySource::Manual);
        let options = AuditOptions::for_route(&ScanConfig::default(), &flaky);

        let mut session = engine.launch().await.unwrap();
        assert!(session.audit(&flaky, &options).await.is_err());
        assert!(session.audit(&flaky, &options).await.is_ok());
        let report = session.audit(&ok, &options).await.unwrap();
        session.close().await;

        assert_eq!(report.number("report.audits.first-contentful-paint.numericValue"), Some(100.0));
        assert_eq!(engine.calls("/flaky"), 2);
        assert_eq!(engine.calls("/ok"), 1);
        assert_eq!(engine.max_concurrent(), 1);
        assert_eq!((engine.launched(), engine.released()), (1, 1));
    }
}
