//! Column projection: how aggregated reports are laid out for display.
//!
//! A [`ColumnDefinition`] names a metric path inside a route payload and how
//! to sort by it. [`project`] resolves a category's columns against a
//! route's representative report; it reads a snapshot and never blocks on a
//! route finishing.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregator::RouteResult;
use crate::report::{resolve_path, MetricValue};

/// Report tab a column belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ReportCategory {
    Overview,
    Performance,
    Accessibility,
    BestPractices,
    Seo,
}

impl ReportCategory {
    pub const ALL: [ReportCategory; 5] = [
        ReportCategory::Overview,
        ReportCategory::Performance,
        ReportCategory::Accessibility,
        ReportCategory::BestPractices,
        ReportCategory::Seo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ReportCategory::Overview => "overview",
            ReportCategory::Performance => "performance",
            ReportCategory::Accessibility => "accessibility",
            ReportCategory::BestPractices => "best-practices",
            ReportCategory::Seo => "seo",
        }
    }
}

impl fmt::Display for ReportCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReportCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown report category `{s}`"))
    }
}

impl TryFrom<String> for ReportCategory {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReportCategory> for String {
    fn from(category: ReportCategory) -> Self {
        category.as_str().to_string()
    }
}

/// One display column of a report category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub label: String,
    /// Dotted metric path inside the route payload.
    pub key: String,
    /// Relative display weight.
    #[serde(default = "default_cols")]
    pub cols: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    /// Sub-path under `key` to sort by, or `length:<sub-path>` to sort by
    /// the number of items in an array.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
    #[serde(default)]
    pub warning: bool,
    /// Explicit sortability. Columns with a sort key are always sortable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sortable: Option<bool>,
}

fn default_cols() -> u32 {
    1
}

impl ColumnDefinition {
    pub fn new(label: impl Into<String>, key: impl Into<String>, cols: u32) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            cols,
            tooltip: None,
            sort_key: None,
            warning: false,
            sortable: None,
        }
    }

    pub fn sort_by(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    pub fn tooltip(mut self, tooltip: impl Into<String>) -> Self {
        self.tooltip = Some(tooltip.into());
        self
    }

    pub fn sortable(mut self) -> Self {
        self.sortable = Some(true);
        self
    }

    pub fn warning(mut self) -> Self {
        self.warning = true;
        self
    }

    pub fn is_sortable(&self) -> bool {
        self.sortable.unwrap_or(self.sort_key.is_some())
    }

    /// Sort value of this column for `payload`, if it is sortable and the
    /// data is present.
    pub fn sort_value(&self, payload: &Value) -> Option<SortValue> {
        if !self.is_sortable() {
            return None;
        }
        let base = resolve_path(payload, &self.key)?;
        match self.sort_key.as_deref() {
            None => SortValue::from_value(base),
            Some(sort_key) => match sort_key.strip_prefix("length:") {
                Some(sub) => resolve_path(base, sub)
                    .and_then(Value::as_array)
                    .map(|items| SortValue::Number(items.len() as f64)),
                None => resolve_path(base, sort_key).and_then(SortValue::from_value),
            },
        }
    }
}

/// Column tables shown when no configuration overrides them.
pub fn default_columns() -> BTreeMap<ReportCategory, Vec<ColumnDefinition>> {
    use ReportCategory::*;

    let items = "length:details.items";
    let mut columns = BTreeMap::new();
    columns.insert(
        Overview,
        vec![ColumnDefinition::new("Screenshot Timeline", "report.audits.screenshot-thumbnails", 6)],
    );
    columns.insert(
        Performance,
        vec![
            ColumnDefinition::new("FCP", "report.audits.first-contentful-paint", 1)
                .tooltip("Time at which the first text or image is painted.")
                .sort_by("numericValue"),
            ColumnDefinition::new("LCP", "report.audits.largest-contentful-paint", 2)
                .tooltip("Time at which the largest text or image is painted.")
                .sort_by("numericValue"),
            ColumnDefinition::new("CLS", "report.audits.cumulative-layout-shift", 2)
                .tooltip("Movement of visible elements within the viewport.")
                .sort_by("numericValue"),
            ColumnDefinition::new("FID", "report.audits.max-potential-fid", 1)
                .tooltip("Deprecated in favour of INP. Duration of the longest task.")
                .sort_by("numericValue")
                .warning(),
            ColumnDefinition::new("TBT", "report.audits.total-blocking-time", 1)
                .tooltip("Time between FCP and Time to Interactive spent in long tasks.")
                .sort_by("numericValue"),
            ColumnDefinition::new("SI", "report.audits.speed-index", 1)
                .tooltip("How quickly the contents of a page are visibly populated.")
                .sort_by("numericValue"),
        ],
    );
    columns.insert(
        Accessibility,
        vec![
            ColumnDefinition::new("Color Contrast", "report.audits.color-contrast", 3)
                .tooltip("Background and foreground colors lack sufficient contrast.")
                .sort_by(items),
            ColumnDefinition::new("Headings", "report.audits.heading-order", 1)
                .tooltip("Heading elements appear in sequentially-descending order.")
                .sort_by(items),
            ColumnDefinition::new("ARIA", "report.computed.ariaIssues", 1)
                .tooltip("Aggregate of all ARIA audits.")
                .sort_by("displayValue")
                .sortable(),
            ColumnDefinition::new("Labels", "report.audits.label", 1)
                .tooltip("Form elements have associated labels.")
                .sort_by(items),
            ColumnDefinition::new("Image Alts", "report.audits.image-alt", 1)
                .tooltip("Image elements have [alt] attributes.")
                .sort_by(items),
            ColumnDefinition::new("Link Names", "report.audits.link-name", 1)
                .tooltip("Links have a discernible name.")
                .sort_by(items),
        ],
    );
    columns.insert(
        BestPractices,
        vec![
            ColumnDefinition::new("Errors", "report.audits.errors-in-console", 2)
                .tooltip("No browser errors logged to the console.")
                .sort_by(items),
            ColumnDefinition::new("Inspector Issues", "report.audits.inspector-issues", 2)
                .tooltip("No issues in the devtools Issues panel.")
                .sort_by(items),
            ColumnDefinition::new("Images Responsive", "report.audits.image-size-responsive", 2)
                .tooltip("Serves images with appropriate resolution.")
                .sort_by(items),
            ColumnDefinition::new("Image Aspect Ratio", "report.audits.image-aspect-ratio", 2)
                .tooltip("Displays images with correct aspect ratio.")
                .sort_by(items),
        ],
    );
    columns.insert(
        Seo,
        vec![
            ColumnDefinition::new("Indexable", "report.audits.is-crawlable", 1)
                .tooltip("Page is not blocked from indexing."),
            ColumnDefinition::new("Internal link", "seo.internalLinks", 1).sortable(),
            ColumnDefinition::new("External link", "seo.externalLinks", 1).sortable(),
            ColumnDefinition::new("Description", "seo.description", 2),
            ColumnDefinition::new("Share Image", "seo.og.image", 2),
        ],
    );
    columns
}

/// Comparable projection of a metric.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SortValue {
    Number(f64),
    Text(String),
}

impl SortValue {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(SortValue::Number),
            Value::String(s) => Some(SortValue::Text(s.clone())),
            Value::Bool(b) => Some(SortValue::Number(if *b { 1.0 } else { 0.0 })),
            Value::Array(items) => Some(SortValue::Number(items.len() as f64)),
            _ => None,
        }
    }

    /// Numbers order before text.
    fn compare(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Number(a), SortValue::Number(b)) => a.total_cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            (SortValue::Number(_), SortValue::Text(_)) => Ordering::Less,
            (SortValue::Text(_), SortValue::Number(_)) => Ordering::Greater,
        }
    }
}

/// One resolved cell of a projected row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CellValue {
    pub label: String,
    pub value: MetricValue,
    pub sort_value: Option<SortValue>,
    pub warning: bool,
    pub cols: u32,
}

/// Resolve `columns` against the representative report of `result`.
///
/// Routes with no successful sample yet project to all-`NoData` cells.
pub fn project(columns: &[ColumnDefinition], result: &RouteResult) -> Vec<CellValue> {
    let payload = result.representative.as_deref().map(|r| r.document());
    columns
        .iter()
        .map(|column| {
            let value = payload.and_then(|p| resolve_path(p, &column.key));
            CellValue {
                label: column.label.clone(),
                value: MetricValue::from(value),
                sort_value: payload.and_then(|p| column.sort_value(p)),
                warning: column.warning,
                cols: column.cols,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Sort rows by `column`. Rows without a sort value go last in either
/// direction.
pub fn sort_by_column(column: &ColumnDefinition, direction: SortDirection, rows: &mut [RouteResult]) {
    rows.sort_by_cached_key(|row| {
        row.representative
            .as_deref()
            .and_then(|r| column.sort_value(r.document()))
            .map(SortKey)
    });
    // `None` sorts first under Option's ordering; move those rows to the end.
    let missing = rows
        .iter()
        .take_while(|row| {
            row.representative
                .as_deref()
                .and_then(|r| column.sort_value(r.document()))
                .is_none()
        })
        .count();
    rows.rotate_left(missing);
    if direction == SortDirection::Descending {
        let present = rows.len() - missing;
        rows[..present].reverse();
    }
}

/// Total order over [`SortValue`] for sorting.
#[derive(Debug, Clone, PartialEq)]
struct SortKey(SortValue);

impl Eq for SortKey {}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0)
    }
}
