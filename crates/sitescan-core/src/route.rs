//! Routes and the route registry.
//!
//! Discovery writes into a [`RouteRegistry`]; once scanning starts the registry
//! is sealed into an immutable [`RouteSet`]. The seal is the phase boundary
//! between the single-writer discovery phase and the many-reader scan phase.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ScanError, ScanResult};

/// Where a route was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Crawler,
    Sitemap,
    RobotsTxt,
    Filesystem,
    /// Supplied directly by the caller.
    Manual,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiscoverySource::Crawler => "crawler",
            DiscoverySource::Sitemap => "sitemap",
            DiscoverySource::RobotsTxt => "robots_txt",
            DiscoverySource::Filesystem => "filesystem",
            DiscoverySource::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Which route attribute routes are grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupRoutesKey {
    /// Group by definition name, falling back to the path.
    #[default]
    #[serde(rename = "route.definition.name")]
    DefinitionName,
    /// Every route is its own group.
    #[serde(rename = "route.path")]
    Path,
}

/// One normalized page path on the target site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Route {
    /// Normalized path; unique within a registry.
    pub path: String,
    /// Logical page template, e.g. `/blog/:slug`.
    pub definition: Option<String>,
    pub source: DiscoverySource,
}

impl Route {
    /// Build a route, normalizing `path`.
    pub fn new(path: &str, source: DiscoverySource) -> Self {
        Self {
            path: normalize_path(path),
            definition: None,
            source,
        }
    }

    pub fn with_definition(mut self, definition: impl Into<String>) -> Self {
        let definition = definition.into();
        self.definition = if definition.trim().is_empty() {
            None
        } else {
            Some(definition)
        };
        self
    }

    /// Key this route is grouped under.
    pub fn group_key(&self, selector: GroupRoutesKey) -> &str {
        match (selector, &self.definition) {
            (GroupRoutesKey::DefinitionName, Some(name)) => name,
            _ => &self.path,
        }
    }
}

/// Reduce a URL or path to a canonical path.
///
/// Absolute URLs lose scheme and host; query and fragment are dropped;
/// repeated slashes collapse; the trailing slash goes except on `/`.
pub fn normalize_path(raw: &str) -> String {
    let raw = raw.trim();
    let path = match Url::parse(raw) {
        Ok(url) if url.has_host() => url.path().to_string(),
        _ => raw
            .split(['?', '#'])
            .next()
            .unwrap_or_default()
            .to_string(),
    };

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Language codes treated as locale prefixes unless `scanner.locales` says
/// otherwise. Codes that double as common path words (`id`, `it`, `no`, `my`,
/// `ms`, `to`, `is`) are left out.
pub const DEFAULT_LOCALES: &[&str] = &[
    "ar", "bg", "bn", "ca", "cs", "cy", "da", "de", "el", "en", "es", "et", "eu", "fa", "fi",
    "fr", "ga", "gl", "he", "hi", "hr", "hu", "hy", "ja", "ka", "kk", "ko", "lt", "lv", "mk",
    "nb", "nl", "nn", "pl", "pt", "ro", "ru", "sk", "sl", "sq", "sr", "sv", "sw", "ta", "th",
    "tr", "uk", "ur", "vi", "zh",
];

fn locale_prefix() -> &'static Regex {
    static LOCALE: OnceLock<Regex> = OnceLock::new();
    LOCALE.get_or_init(|| {
        Regex::new(r"^/([a-zA-Z]{2})(?:[-_](?:[a-zA-Z]{2}|[0-9]{3}))?(?:/|$)")
            .expect("locale pattern is valid")
    })
}

/// Whether the first path segment is one of `locales`, optionally with a
/// region (`/fr`, `/en-US/...`, `/es-419`).
pub fn is_i18n_path<S: AsRef<str>>(path: &str, locales: &[S]) -> bool {
    locale_prefix()
        .captures(path)
        .and_then(|caps| caps.get(1))
        .is_some_and(|lang| {
            locales
                .iter()
                .any(|locale| locale.as_ref().eq_ignore_ascii_case(lang.as_str()))
        })
}

/// Write-phase route store.
#[derive(Debug, Default)]
pub struct RouteRegistry {
    routes: Vec<Route>,
    paths: HashSet<String>,
}

impl RouteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; fails if its path is already registered.
    pub fn add(&mut self, route: Route) -> ScanResult<()> {
        if !self.paths.insert(route.path.clone()) {
            return Err(ScanError::DuplicateRoute { path: route.path });
        }
        self.routes.push(route);
        Ok(())
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    pub fn count(&self) -> usize {
        self.routes.len()
    }

    pub fn all(&self) -> impl Iterator<Item = &Route> + '_ {
        self.routes.iter()
    }

    /// End the discovery phase.
    pub fn seal(self) -> RouteSet {
        RouteSet {
            routes: Arc::from(self.routes),
        }
    }
}

impl FromIterator<Route> for RouteRegistry {
    /// Collect routes, keeping the first occurrence of each path.
    fn from_iter<I: IntoIterator<Item = Route>>(iter: I) -> Self {
        let mut registry = RouteRegistry::new();
        for route in iter {
            let _ = registry.add(route);
        }
        registry
    }
}

/// Read-phase view of a sealed registry. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RouteSet {
    routes: Arc<[Route]>,
}

impl RouteSet {
    /// Routes in insertion order. Restartable: each call yields from the start.
    pub fn all(&self) -> impl Iterator<Item = &Route> + '_ {
        self.routes.iter()
    }

    pub fn count(&self) -> usize {
        self.routes.len()
    }

    pub fn get(&self, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.path == path)
    }

    /// The first `cap` routes; those beyond never receive tasks.
    pub fn in_scope(&self, cap: usize) -> &[Route] {
        &self.routes[..cap.min(self.routes.len())]
    }
}
