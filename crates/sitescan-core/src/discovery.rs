//! Route discovery interface and source selection.
//!
//! Crawling, sitemap and robots.txt parsing live outside this crate. They plug
//! in through [`RouteDiscovery`]; a [`DiscoveryPlan`] consults the sources the
//! configuration enables and folds their output into a [`RouteRegistry`].

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tracing::{debug, info};

use crate::config::ScannerConfig;
use crate::route::{is_i18n_path, DiscoverySource, Route, RouteRegistry};

/// A finite, restartable source of routes.
///
/// Each call to [`discover`](RouteDiscovery::discover) starts from the
/// beginning; routes are produced lazily.
pub trait RouteDiscovery: Send + Sync {
    fn source(&self) -> DiscoverySource;

    fn discover(&self) -> BoxStream<'static, Route>;
}

/// Fixed in-memory route list.
#[derive(Debug, Clone)]
pub struct StaticDiscovery {
    source: DiscoverySource,
    routes: Arc<[Route]>,
}

impl StaticDiscovery {
    pub fn new(source: DiscoverySource, routes: Vec<Route>) -> Self {
        Self {
            source,
            routes: Arc::from(routes),
        }
    }

    /// Parse one route per line: `<path> [definition]`. Blank lines and `#`
    /// comments are skipped.
    pub fn from_lines(source: DiscoverySource, text: &str) -> Self {
        let routes = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| {
                let mut parts = line.split_whitespace();
                let path = parts.next().unwrap_or("/");
                let route = Route::new(path, source);
                match parts.next() {
                    Some(definition) => route.with_definition(definition),
                    None => route,
                }
            })
            .collect();
        Self::new(source, routes)
    }
}

impl RouteDiscovery for StaticDiscovery {
    fn source(&self) -> DiscoverySource {
        self.source
    }

    fn discover(&self) -> BoxStream<'static, Route> {
        let routes = Arc::clone(&self.routes);
        stream::iter((0..routes.len()).map(move |i| routes[i].clone())).boxed()
    }
}

/// The set of discovery sources consulted for one scan.
#[derive(Default, Clone)]
pub struct DiscoveryPlan {
    sources: Vec<Arc<dyn RouteDiscovery>>,
}

impl DiscoveryPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, source: Arc<dyn RouteDiscovery>) -> Self {
        self.sources.push(source);
        self
    }

    /// Whether `source` may be consulted under `config`.
    pub fn is_enabled(config: &ScannerConfig, source: DiscoverySource) -> bool {
        match source {
            DiscoverySource::Crawler => config.crawler,
            DiscoverySource::Sitemap => config.sitemap,
            DiscoverySource::RobotsTxt => config.robots_txt,
            DiscoverySource::Filesystem | DiscoverySource::Manual => true,
        }
    }

    /// Drain every enabled source, in plan order, into a fresh registry.
    ///
    /// Duplicate paths across sources are coalesced (first source wins) and
    /// locale-prefixed paths are dropped when `ignore_i18n_pages` is set.
    pub async fn collect(&self, config: &ScannerConfig) -> RouteRegistry {
        let mut registry = RouteRegistry::new();
        for discovery in &self.sources {
            let source = discovery.source();
            if !Self::is_enabled(config, source) {
                debug!(source = %source, "discovery source disabled");
                continue;
            }

            let mut routes = discovery.discover();
            let mut added = 0usize;
            while let Some(route) = routes.next().await {
                if config.ignore_i18n_pages && is_i18n_path(&route.path, config.locales.as_slice()) {
                    debug!(path = %route.path, "skipping i18n route");
                    continue;
                }
                match registry.add(route) {
                    Ok(()) => added += 1,
                    Err(e) => debug!(source = %source, error = %e, "coalesced route"),
                }
            }
            info!(source = %source, added, "discovery source drained");
        }
        registry
    }
}
