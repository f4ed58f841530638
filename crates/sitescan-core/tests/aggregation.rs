//! Grouping, merging and column projection over completed scans.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::json;
use sitescan_core::fakes::{Behavior, ScriptedAuditEngine};
use sitescan_core::{
    DiscoveryPlan, DiscoverySource, GroupRoutesKey, MergeStrategy, MetricValue, ReportCategory,
    Route, ScanConfig, Scanner, SortDirection, SortValue, StaticDiscovery,
};

fn config() -> ScanConfig {
    let mut config = ScanConfig::default();
    config.cluster.max_concurrency = 2;
    config.cluster.retry_limit = 0;
    config.cluster.retry_delay_ms = 0;
    config.cluster.worker_creation_delay_ms = 0;
    config
}

fn templated_routes() -> Vec<Route> {
    [
        ("/blog/a", Some("/blog/:slug")),
        ("/about", None),
        ("/docs/x", Some("/docs/:page")),
        ("/blog/b", Some("/blog/:slug")),
        ("/docs/y", Some("/docs/:page")),
    ]
    .into_iter()
    .map(|(path, definition)| {
        let route = Route::new(path, DiscoverySource::Crawler);
        match definition {
            Some(d) => route.with_definition(d),
            None => route,
        }
    })
    .collect()
}

fn membership(scanner: &Scanner) -> BTreeMap<String, BTreeSet<String>> {
    scanner
        .groups()
        .into_iter()
        .map(|g| {
            let paths: BTreeSet<String> = g.routes.iter().map(|r| r.path().to_string()).collect();
            (g.key, paths)
        })
        .collect()
}

/// Test: group membership does not depend on registration order.
#[tokio::test]
async fn test_grouping_is_independent_of_insertion_order() {
    let baseline = Scanner::new(
        config(),
        templated_routes().into_iter().collect(),
        Arc::new(ScriptedAuditEngine::new()),
    )
    .unwrap();
    baseline.run().await;
    let expected = membership(&baseline);
    assert_eq!(baseline.group("/blog/:slug").len(), 2);
    assert_eq!(baseline.group("/about").len(), 1);

    for seed in [1u64, 7, 42, 1337, 9001] {
        let mut routes = templated_routes();
        routes.shuffle(&mut StdRng::seed_from_u64(seed));
        let scanner = Scanner::new(config(), routes.into_iter().collect(), Arc::new(ScriptedAuditEngine::new())).unwrap();
        scanner.run().await;

        assert_eq!(membership(&scanner), expected, "seed {seed}");
        assert!(scanner.groups().iter().all(|g| g.is_finished() && !g.is_failed()));

        // group(key) is exactly the results carrying that key
        let results = scanner.results();
        for key in expected.keys() {
            let grouped: BTreeSet<String> = scanner.group(key).iter().map(|r| r.path().to_string()).collect();
            let filtered: BTreeSet<String> = results
                .iter()
                .filter(|r| &r.group_key == key)
                .map(|r| r.path().to_string())
                .collect();
            assert_eq!(grouped, filtered, "seed {seed}, group {key}");
        }
        let grouped_total: usize = scanner.groups().iter().map(|g| g.routes.len()).sum();
        assert_eq!(grouped_total, results.len());
    }
}

/// Test: grouping by path gives every route its own group.
#[tokio::test]
async fn test_group_by_path() {
    let mut config = config();
    config.client.group_routes_key = GroupRoutesKey::Path;
    let scanner = Scanner::new(
        config,
        templated_routes().into_iter().collect(),
        Arc::new(ScriptedAuditEngine::new()),
    )
    .unwrap();
    scanner.run().await;

    assert_eq!(scanner.groups().len(), 5);
    assert_eq!(scanner.group("/blog/a").len(), 1);
    assert!(scanner.group("/blog/:slug").is_empty());
}

/// Test: a group is failed only when all of its routes failed.
#[tokio::test]
async fn test_group_failure_marking() {
    let engine = ScriptedAuditEngine::new()
        .script("/blog/a", Behavior::AlwaysFail)
        .script("/docs/x", Behavior::AlwaysFail)
        .script("/docs/y", Behavior::AlwaysFail);
    let scanner = Scanner::new(config(), templated_routes().into_iter().collect(), Arc::new(engine)).unwrap();
    let summary = scanner.run().await;

    let failed: BTreeSet<String> = scanner
        .groups()
        .into_iter()
        .filter(|g| g.is_failed())
        .map(|g| g.key)
        .collect();
    assert_eq!(failed, BTreeSet::from(["/docs/:page".to_string()]));
    assert_eq!(summary.failed_groups, 1);
    assert_eq!(summary.failed_routes, 3);
}

/// Test: missing metrics project to NoData rather than failing.
#[tokio::test]
async fn test_projection_of_missing_metrics() {
    let scanner = Scanner::new(
        config(),
        ["/about"].iter().map(|p| Route::new(p, DiscoverySource::Manual)).collect(),
        Arc::new(ScriptedAuditEngine::new()),
    )
    .unwrap();

    // before the scan nothing has resolved
    let cells = scanner.project(ReportCategory::Performance, "/about").unwrap();
    assert!(cells.iter().all(|c| c.value.is_no_data()));

    scanner.run().await;
    let cells = scanner.project(ReportCategory::Performance, "/about").unwrap();
    assert_eq!(cells[0].label, "FCP");
    assert_eq!(cells[0].sort_value, Some(SortValue::Number(100.0)));
    assert_eq!(cells[1].label, "LCP");
    assert_eq!(cells[1].value, MetricValue::NoData);

    let seo = scanner.project(ReportCategory::Seo, "/about").unwrap();
    assert!(seo.iter().all(|c| c.value.is_no_data()));
}

/// Test: results sort by a column, routes without data last.
#[tokio::test]
async fn test_sorted_results_by_column() {
    let engine = ScriptedAuditEngine::new()
        .script("/broken", Behavior::AlwaysFail)
        .with_reports(|route, _| {
            let fcp = match route.path.as_str() {
                "/slow" => 2400.0,
                "/fast" => 300.0,
                _ => 900.0,
            };
            json!({ "audits": { "first-contentful-paint": { "numericValue": fcp } } })
        });
    let scanner = Scanner::new(
        config(),
        ["/slow", "/broken", "/fast", "/mid"]
            .iter()
            .map(|p| Route::new(p, DiscoverySource::Manual))
            .collect(),
        Arc::new(engine),
    )
    .unwrap();
    scanner.run().await;

    let order = |direction| -> Vec<String> {
        scanner
            .sorted_results(ReportCategory::Performance, "FCP", direction)
            .unwrap()
            .iter()
            .map(|r| r.path().to_string())
            .collect()
    };
    assert_eq!(order(SortDirection::Ascending), vec!["/fast", "/mid", "/slow", "/broken"]);
    assert_eq!(order(SortDirection::Descending), vec!["/slow", "/mid", "/fast", "/broken"]);
}

/// Test: the average merge strategy averages numeric metrics across samples.
#[tokio::test]
async fn test_average_merge_across_samples() {
    let mut config = config();
    config.cluster.max_concurrency = 1;
    config.scanner.samples = Some(3);
    config.client.merge = MergeStrategy::Average;
    let scanner = Scanner::new(
        config,
        ["/"].iter().map(|p| Route::new(p, DiscoverySource::Manual)).collect(),
        Arc::new(ScriptedAuditEngine::new()),
    )
    .unwrap();
    scanner.run().await;

    let result = scanner.route_result("/").unwrap();
    assert_eq!(result.reports.len(), 3);
    assert_eq!(
        result
            .representative
            .unwrap()
            .number("report.audits.first-contentful-paint.numericValue"),
        Some(200.0)
    );
}

/// Test: disabled discovery sources and locale paths are left out.
#[tokio::test]
async fn test_scan_from_discovery() {
    let mut config = config();
    config.scanner.sitemap = false;
    let discovery = DiscoveryPlan::new()
        .with_source(Arc::new(StaticDiscovery::from_lines(
            DiscoverySource::Crawler,
            "/\n/blog/a /blog/:slug\n/fr/blog/a\n",
        )))
        .with_source(Arc::new(StaticDiscovery::from_lines(
            DiscoverySource::Sitemap,
            "/only-in-sitemap\n",
        )))
        .with_source(Arc::new(StaticDiscovery::from_lines(
            DiscoverySource::Filesystem,
            "/\n/contact\n",
        )));

    let scanner = Scanner::from_discovery(config, &discovery, Arc::new(ScriptedAuditEngine::new()))
        .await
        .unwrap();
    let paths: Vec<&str> = scanner.plan().iter().map(|p| p.route.path.as_str()).collect();
    assert_eq!(paths, vec!["/", "/blog/a", "/contact"]);
    assert_eq!(scanner.plan()[1].group_key, "/blog/:slug");
    assert_eq!(scanner.plan()[0].route.source, DiscoverySource::Crawler);
}

/// Test: the aggregate serializes for report rendering.
#[tokio::test]
async fn test_groups_serialize_to_json() {
    let engine = ScriptedAuditEngine::new().script("/about", Behavior::AlwaysFail);
    let scanner = Scanner::new(config(), templated_routes().into_iter().collect(), Arc::new(engine)).unwrap();
    scanner.run().await;

    let value = serde_json::to_value(scanner.groups()).unwrap();
    let about = value
        .as_array()
        .unwrap()
        .iter()
        .find(|g| g["key"] == "/about")
        .unwrap();
    assert_eq!(about["routes"][0]["status"], "failed");
    assert!(about["routes"][0]["abandoned"][0]["error"]
        .as_str()
        .unwrap()
        .contains("/about"));
}
