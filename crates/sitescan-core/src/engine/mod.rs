//! Audit engine interface.
//!
//! The engine that loads a page and scores it lives outside this crate. Each
//! task acquires its own [`AuditSession`] through a [`SessionGuard`], so no
//! browser state is shared between tasks and the session is released on
//! every exit path: explicitly after the audit, or through
//! [`AuditSession::abort`] when the guard is dropped mid-flight.

pub mod command;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{Device, ScanConfig};
use crate::error::AuditError;
use crate::report::AuditReport;
use crate::route::Route;

pub use command::{CommandAuditEngine, CommandEngineConfig};

/// Per-task options handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditOptions {
    /// Absolute URL when a site is configured, otherwise the route path.
    pub url: String,
    pub device: Device,
    pub throttle: bool,
    pub categories: Vec<String>,
    /// Hard wall-clock budget enforced by the worker.
    pub timeout: Duration,
}

impl AuditOptions {
    pub fn for_route(config: &ScanConfig, route: &Route) -> Self {
        Self {
            url: config.audit_url(&route.path),
            device: config.scanner.device,
            throttle: config.scanner.throttle,
            categories: config.audit.only_categories.clone(),
            timeout: config.cluster.timeout(),
        }
    }
}

/// Factory for disposable audit sessions.
#[async_trait]
pub trait AuditEngine: Send + Sync {
    /// Acquire a fresh session (typically a new browser) for one task.
    async fn launch(&self) -> Result<Box<dyn AuditSession>, AuditError>;
}

/// One isolated audit context, used for exactly one task.
#[async_trait]
pub trait AuditSession: Send {
    async fn audit(&mut self, route: &Route, options: &AuditOptions) -> Result<AuditReport, AuditError>;

    /// Orderly release.
    async fn close(self: Box<Self>) {}

    /// Best-effort synchronous release when the session is dropped without
    /// [`close`](AuditSession::close), e.g. on panic.
    fn abort(&mut self) {}
}

/// Scoped ownership of a session.
pub struct SessionGuard {
    session: Option<Box<dyn AuditSession>>,
}

impl SessionGuard {
    pub async fn acquire(engine: &dyn AuditEngine) -> Result<Self, AuditError> {
        let session = engine.launch().await?;
        Ok(Self {
            session: Some(session),
        })
    }

    pub async fn audit(&mut self, route: &Route, options: &AuditOptions) -> Result<AuditReport, AuditError> {
        match self.session.as_mut() {
            Some(session) => session.audit(route, options).await,
            None => Err(AuditError::internal("audit session already released")),
        }
    }

    pub async fn release(mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::DiscoverySource;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Counters {
        closed: AtomicUsize,
        aborted: AtomicUsize,
    }

    struct CountingSession(Arc<Counters>);

    #[async_trait]
    impl AuditSession for CountingSession {
        async fn audit(&mut self, _route: &Route, _options: &AuditOptions) -> Result<AuditReport, AuditError> {
            Ok(AuditReport::from_engine_output(serde_json::json!({})))
        }

        async fn close(self: Box<Self>) {
            self.0.closed.fetch_add(1, Ordering::SeqCst);
        }

        fn abort(&mut self) {
            self.0.aborted.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CountingEngine(Arc<Counters>);

    #[async_trait]
    impl AuditEngine for CountingEngine {
        async fn launch(&self) -> Result<Box<dyn AuditSession>, AuditError> {
            Ok(Box::new(CountingSession(Arc::clone(&self.0))))
        }
    }

    #[tokio::test]
    async fn test_guard_closes_on_release_and_aborts_on_drop() {
        let counters = Arc::new(Counters::default());
        let engine = CountingEngine(Arc::clone(&counters));
        let route = Route::new("/", DiscoverySource::Manual);
        let options = AuditOptions::for_route(&ScanConfig::default(), &route);

        let mut guard = SessionGuard::acquire(&engine).await.unwrap();
        guard.audit(&route, &options).await.unwrap();
        guard.release().await;
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.aborted.load(Ordering::SeqCst), 0);

        let guard = SessionGuard::acquire(&engine).await.unwrap();
        drop(guard);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.aborted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_options_follow_config() {
        let mut config = ScanConfig::default();
        config.site = Some("https://example.com".to_string());
        config.scanner.device = Device::Desktop;
        let route = Route::new("/pricing", DiscoverySource::Manual);

        let options = AuditOptions::for_route(&config, &route);
        assert_eq!(options.url, "https://example.com/pricing");
        assert_eq!(options.device, Device::Desktop);
        assert_eq!(options.timeout, Duration::from_secs(300));
        assert_eq!(options.categories.len(), 4);
    }
}
