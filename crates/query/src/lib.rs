//! Tabula query: the selector pipeline over a view snapshot.
//!
//! filter -> sort -> paginate, plus column resolution re-exported from
//! `tabula-core`. The free functions recompute on every call; [`Selectors`]
//! memoizes row orders per snapshot identity.

#![forbid(unsafe_code)]

pub mod filter;
mod memo;
pub mod page;
pub mod sort;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tabula_core::columns::{self, SchemaPolicy};
use tabula_core::{ColumnProperties, Record, RenderSettings, Snapshot, SortKey};
use tracing::{debug, warn};

pub use filter::{filter_rows, FilterMode, RecordMatcher};
pub use page::PageInfo;
pub use sort::{compare_cells, compare_values, sort_rows, DefaultSort, Row, SortStrategy, StrategyRegistry};
pub use tabula_core;

use memo::Memo;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("invalid page size {0}: must be at least 1")]
    InvalidPageSize(i64),
    #[error("invalid current page {0}: pages start at 1")]
    InvalidCurrentPage(i64),
    #[error("column '{column}' refers to unknown sort method '{method}'")]
    UnknownSortMethod { column: String, method: String },
    #[error("sort method '{method}' for column '{column}' did not return a permutation of its input")]
    StrategyContract { column: String, method: String },
    /// Error raised by a sort strategy, passed through as-is.
    #[error(transparent)]
    Strategy(#[from] anyhow::Error),
}

/// Engine options. Defaults: case-insensitive substring filter, columns from the first record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub case_sensitive: bool,
    pub filter_mode: FilterMode,
    pub schema_policy: SchemaPolicy,
}

impl QueryConfig {
    /// Read `TABULA_FILTER_CASE_SENSITIVE`, `TABULA_FILTER_MODE` and `TABULA_SCHEMA_POLICY`.
    pub fn from_env() -> Self { Self::from_lookup(|k| std::env::var(k).ok()) }

    /// Like [`from_env`](Self::from_env) with a custom variable source. Bad values keep the default.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(v) = get("TABULA_FILTER_CASE_SENSITIVE") {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => cfg.case_sensitive = true,
                "0" | "false" | "no" | "off" => cfg.case_sensitive = false,
                _ => warn!(value = %v, "invalid TABULA_FILTER_CASE_SENSITIVE; expected true/false"),
            }
        }
        if let Some(v) = get("TABULA_FILTER_MODE") {
            match v.parse() {
                Ok(m) => cfg.filter_mode = m,
                Err(e) => warn!(error = %e, "invalid TABULA_FILTER_MODE; keeping default"),
            }
        }
        if let Some(v) = get("TABULA_SCHEMA_POLICY") {
            match v.parse() {
                Ok(p) => cfg.schema_policy = p,
                Err(e) => warn!(error = %e, "invalid TABULA_SCHEMA_POLICY; keeping default"),
            }
        }
        cfg
    }
}

// ---- uncached selectors ----

pub fn filtered_data<'a>(snap: &'a Snapshot, cfg: &QueryConfig) -> Vec<&'a Record> {
    filter_rows(snap, cfg).into_iter().map(|r| r.record).collect()
}

pub fn sorted_data<'a>(snap: &'a Snapshot, cfg: &QueryConfig, registry: &StrategyRegistry) -> Result<Vec<&'a Record>, QueryError> {
    Ok(sort_rows(snap, filter_rows(snap, cfg), registry)?.into_iter().map(|r| r.record).collect())
}

/// The sorted records on the current page.
pub fn current_page_data<'a>(snap: &'a Snapshot, cfg: &QueryConfig, registry: &StrategyRegistry) -> Result<Vec<&'a Record>, QueryError> {
    let sorted = sorted_data(snap, cfg, registry)?;
    let window = page::page_window(snap, sorted.len())?;
    Ok(sorted[window].to_vec())
}

/// Memoizing selector engine.
///
/// Filtered and sorted row orders are cached for the most recent snapshot,
/// keyed on `Arc` identity: pass the same `Arc<Snapshot>` to get cached
/// results, a new one to recompute. A cached sort does not re-run strategies.
#[derive(Default)]
pub struct Selectors {
    config: QueryConfig,
    strategies: StrategyRegistry,
    filtered: Memo<Vec<usize>>,
    sorted: Memo<Vec<usize>>,
}

impl std::fmt::Debug for Selectors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Selectors").field("config", &self.config).field("strategies", &self.strategies).finish()
    }
}

fn resolve<'a>(snap: &'a Snapshot, positions: &[usize]) -> Vec<&'a Record> {
    positions.iter().map(|&pos| &snap.data[pos]).collect()
}

impl Selectors {
    pub fn new(config: QueryConfig, strategies: StrategyRegistry) -> Self {
        Self { config, strategies, filtered: Memo::default(), sorted: Memo::default() }
    }

    pub fn config(&self) -> &QueryConfig { &self.config }

    pub fn strategies(&self) -> &StrategyRegistry { &self.strategies }

    /// Drop cached row orders.
    pub fn invalidate(&self) {
        self.filtered.clear();
        self.sorted.clear();
    }

    // ---- accessors ----

    pub fn data<'a>(&self, snap: &'a Snapshot) -> &'a [Record] { tabula_core::data(snap) }
    pub fn filter<'a>(&self, snap: &'a Snapshot) -> &'a str { tabula_core::filter(snap) }
    pub fn current_page(&self, snap: &Snapshot) -> i64 { tabula_core::current_page(snap) }
    pub fn page_size(&self, snap: &Snapshot) -> i64 { tabula_core::page_size(snap) }
    pub fn sort_properties<'a>(&self, snap: &'a Snapshot) -> &'a [SortKey] { tabula_core::sort_properties(snap) }
    pub fn render_properties<'a>(&self, snap: &'a Snapshot) -> Option<&'a RenderSettings> { tabula_core::render_properties(snap) }

    // ---- columns ----

    pub fn all_columns<'a>(&self, snap: &'a Snapshot) -> Vec<&'a str> { columns::all_columns(snap, self.config.schema_policy) }

    pub fn sorted_column_properties(&self, snap: &Snapshot) -> Vec<ColumnProperties> {
        columns::sorted_column_properties(snap, self.config.schema_policy)
    }

    pub fn visible_columns(&self, snap: &Snapshot) -> Vec<String> { columns::visible_columns(snap, self.config.schema_policy) }

    pub fn column_titles(&self, snap: &Snapshot) -> Vec<String> { columns::column_titles(snap, self.config.schema_policy) }

    // ---- rows ----

    fn filtered_positions(&self, snap: &Arc<Snapshot>) -> Arc<Vec<usize>> {
        if let Some(hit) = self.filtered.get(snap) {
            debug!(selector = "filtered", "memo hit");
            metrics::counter!("query_memo_hits_total", 1, "selector" => "filtered");
            return hit;
        }
        let positions = filter_rows(snap, &self.config).iter().map(|r| r.pos).collect();
        self.filtered.insert(snap, positions)
    }

    fn sorted_positions(&self, snap: &Arc<Snapshot>) -> Result<Arc<Vec<usize>>, QueryError> {
        if let Some(hit) = self.sorted.get(snap) {
            debug!(selector = "sorted", "memo hit");
            metrics::counter!("query_memo_hits_total", 1, "selector" => "sorted");
            return Ok(hit);
        }
        let filtered = self.filtered_positions(snap);
        let started = std::time::Instant::now();
        let rows = filtered.iter().map(|&pos| Row { pos, record: &snap.data[pos] }).collect();
        let out: Vec<usize> = sort_rows(snap, rows, &self.strategies)?.iter().map(|r| r.pos).collect();
        metrics::histogram!("query_sort_ms", started.elapsed().as_secs_f64() * 1_000.0);
        metrics::gauge!("query_rows", out.len() as f64);
        debug!(rows = out.len(), keys = snap.sort_properties.len(), "sort applied");
        Ok(self.sorted.insert(snap, out))
    }

    pub fn filtered_data<'a>(&self, snap: &'a Arc<Snapshot>) -> Vec<&'a Record> {
        resolve(snap, &self.filtered_positions(snap))
    }

    pub fn sorted_data<'a>(&self, snap: &'a Arc<Snapshot>) -> Result<Vec<&'a Record>, QueryError> {
        Ok(resolve(snap, &self.sorted_positions(snap)?))
    }

    pub fn current_page_data<'a>(&self, snap: &'a Arc<Snapshot>) -> Result<Vec<&'a Record>, QueryError> {
        let sorted = self.sorted_positions(snap)?;
        let window = page::page_window(snap, sorted.len())?;
        Ok(resolve(snap, &sorted[window]))
    }

    // ---- pagination ----

    pub fn max_page(&self, snap: &Snapshot) -> Result<usize, QueryError> { page::max_page(snap) }
    pub fn has_next(&self, snap: &Snapshot) -> Result<bool, QueryError> { page::has_next(snap) }
    pub fn has_previous(&self, snap: &Snapshot) -> bool { page::has_previous(snap) }

    pub fn page_info(&self, snap: &Arc<Snapshot>) -> Result<PageInfo, QueryError> {
        page::page_info(snap, self.filtered_positions(snap).len())
    }
}
