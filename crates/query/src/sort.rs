//! Sort engine: multi-key ordering through pluggable strategies.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{Number, Value};
use tabula_core::columns::column_properties_for;
use tabula_core::{sort_properties, Record, Snapshot};
use tracing::debug;

use crate::QueryError;

/// A record paired with its position in the snapshot's `data`.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    pub pos: usize,
    pub record: &'a Record,
}

impl<'a> Row<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> { self.record.get(column) }
}

/// One sort pass for one column.
///
/// A strategy receives the rows as left by the passes before it and must
/// return a reordering of exactly those rows.
pub trait SortStrategy: Send + Sync {
    fn reorder<'a>(&self, rows: Vec<Row<'a>>, column: &str, ascending: bool) -> anyhow::Result<Vec<Row<'a>>>;
}

/// Stable sort on the column value using [`compare_cells`].
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSort;

impl SortStrategy for DefaultSort {
    fn reorder<'a>(&self, mut rows: Vec<Row<'a>>, column: &str, ascending: bool) -> anyhow::Result<Vec<Row<'a>>> {
        rows.sort_by(|a, b| compare_cells(a.get(column), b.get(column), ascending));
        Ok(rows)
    }
}

struct FnStrategy<F>(F);

impl<F> SortStrategy for FnStrategy<F>
where
    F: for<'a> Fn(Vec<Row<'a>>, &str, bool) -> anyhow::Result<Vec<Row<'a>>> + Send + Sync,
{
    fn reorder<'a>(&self, rows: Vec<Row<'a>>, column: &str, ascending: bool) -> anyhow::Result<Vec<Row<'a>>> {
        (self.0)(rows, column, ascending)
    }
}

/// Named strategies that column metadata can refer to via `sortMethod`.
#[derive(Clone)]
pub struct StrategyRegistry {
    default: Arc<dyn SortStrategy>,
    named: FxHashMap<String, Arc<dyn SortStrategy>>,
}

impl Default for StrategyRegistry {
    fn default() -> Self { Self { default: Arc::new(DefaultSort), named: FxHashMap::default() } }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.named.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("StrategyRegistry").field("named", &names).finish()
    }
}

impl StrategyRegistry {
    pub fn new() -> Self { Self::default() }

    /// Replace the strategy used for columns without a `sortMethod`.
    pub fn with_default(mut self, strategy: impl SortStrategy + 'static) -> Self {
        self.default = Arc::new(strategy);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, strategy: impl SortStrategy + 'static) -> &mut Self {
        self.named.insert(name.into(), Arc::new(strategy));
        self
    }

    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: for<'a> Fn(Vec<Row<'a>>, &str, bool) -> anyhow::Result<Vec<Row<'a>>> + Send + Sync + 'static,
    {
        self.register(name, FnStrategy(f))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SortStrategy>> { self.named.get(name) }

    pub fn default_strategy(&self) -> &Arc<dyn SortStrategy> { &self.default }
}

/// Apply the snapshot's sort keys to `rows`.
///
/// Keys run from lowest to highest priority and every default pass is stable,
/// so later passes only reorder ties left by earlier keys. Each key's strategy
/// runs exactly once.
pub fn sort_rows<'a>(snap: &Snapshot, mut rows: Vec<Row<'a>>, registry: &StrategyRegistry) -> Result<Vec<Row<'a>>, QueryError> {
    for key in sort_properties(snap).iter().rev() {
        let method = column_properties_for(snap, &key.id).and_then(|c| c.sort_method.as_deref());
        rows = match method {
            None => registry.default_strategy().reorder(rows, &key.id, key.sort_ascending)?,
            Some(name) => {
                let strategy = registry.get(name).ok_or_else(|| QueryError::UnknownSortMethod {
                    column: key.id.clone(),
                    method: name.to_string(),
                })?;
                debug!(column = %key.id, method = name, ascending = key.sort_ascending, "custom sort pass");
                let mut expected: Vec<usize> = rows.iter().map(|r| r.pos).collect();
                let out = strategy.reorder(rows, &key.id, key.sort_ascending)?;
                let mut got: Vec<usize> = out.iter().map(|r| r.pos).collect();
                expected.sort_unstable();
                got.sort_unstable();
                if expected != got {
                    return Err(QueryError::StrategyContract { column: key.id.clone(), method: name.to_string() });
                }
                out
            }
        };
    }
    Ok(rows)
}

/// Compare two cells for one sort direction. Absent and `null` cells sort
/// last regardless of direction.
pub fn compare_cells(a: Option<&Value>, b: Option<&Value>, ascending: bool) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => {
            let o = compare_values(x, y);
            if ascending { o } else { o.reverse() }
        }
    }
}

/// Natural ordering of JSON values. Mixed types order by kind:
/// bool < number < string < array < object.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(_), Value::Array(_)) | (Value::Object(_), Value::Object(_)) => a.to_string().cmp(&b.to_string()),
        _ => kind_rank(a).cmp(&kind_rank(b)),
    }
}

fn compare_numbers(x: &Number, y: &Number) -> Ordering {
    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) { return a.cmp(&b); }
    if let (Some(a), Some(b)) = (x.as_u64(), y.as_u64()) { return a.cmp(&b); }
    let a = x.as_f64().unwrap_or(0.0);
    let b = y.as_f64().unwrap_or(0.0);
    a.total_cmp(&b)
}

fn kind_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}
