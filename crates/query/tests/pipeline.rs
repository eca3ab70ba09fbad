#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tabula_query::tabula_core::{ColumnProperties, Record, RenderProperties, RenderSettings, Snapshot, SortKey};
use tabula_query::{QueryConfig, QueryError, Row, Selectors, SortStrategy, StrategyRegistry};

fn records(v: serde_json::Value) -> Vec<Record> { serde_json::from_value(v).unwrap() }

fn star_wars() -> Vec<Record> {
    records(json!([
        { "id": "1", "name": "luke skywalker", "food": "orange" },
        { "id": "2", "name": "han solo", "food": "banana" },
        { "id": "3", "name": "han solo", "food": "apple" },
        { "id": "4", "name": "luke skywalker", "food": "apple" }
    ]))
}

fn ids(rows: &[&Record]) -> Vec<String> {
    rows.iter().map(|r| r["id"].as_str().unwrap().to_string()).collect()
}

/// Records every call and returns its input untouched.
#[derive(Default)]
struct Spy {
    calls: AtomicUsize,
    seen: Mutex<Vec<(Vec<usize>, String, bool)>>,
}

struct SpyHandle(Arc<Spy>);

impl SortStrategy for SpyHandle {
    fn reorder<'a>(&self, rows: Vec<Row<'a>>, column: &str, ascending: bool) -> anyhow::Result<Vec<Row<'a>>> {
        self.0.calls.fetch_add(1, Ordering::SeqCst);
        self.0.seen.lock().unwrap().push((rows.iter().map(|r| r.pos).collect(), column.to_string(), ascending));
        Ok(rows)
    }
}

fn with_method(column: &str, method: &str) -> RenderProperties {
    RenderProperties::with_columns([ColumnProperties::new(column).with_sort_method(method)])
}

#[test]
fn filtered_data_returns_all_without_filter() {
    let engine = Selectors::default();
    let snap = Arc::new(Snapshot::new(star_wars()));
    assert_eq!(ids(&engine.filtered_data(&snap)), vec!["1", "2", "3", "4"]);
}

#[test]
fn filtered_data_filters_when_filter_present() {
    let engine = Selectors::default();
    let snap = Arc::new(Snapshot::new(star_wars()).with_filter("luke"));
    assert_eq!(ids(&engine.filtered_data(&snap)), vec!["1", "4"]);
}

#[test]
fn default_sort_when_no_method_configured() {
    let engine = Selectors::default();
    let snap = Arc::new(Snapshot::new(star_wars()).with_sort([SortKey::asc("name")]));
    assert_eq!(ids(&engine.sorted_data(&snap).unwrap()), vec!["2", "3", "1", "4"]);
}

#[test]
fn no_sort_keys_keep_filtered_order() {
    let engine = Selectors::default();
    let snap = Arc::new(Snapshot::new(star_wars()).with_filter("apple"));
    assert_eq!(ids(&engine.sorted_data(&snap).unwrap()), vec!["3", "4"]);
}

#[test]
fn multiple_sort_keys_are_lexicographic() {
    let engine = Selectors::default();
    let snap = Arc::new(Snapshot::new(star_wars()).with_sort([SortKey::asc("name"), SortKey::asc("food")]));
    assert_eq!(ids(&engine.sorted_data(&snap).unwrap()), vec!["3", "2", "4", "1"]);

    let snap = Arc::new(Snapshot::new(star_wars()).with_sort([SortKey::desc("name"), SortKey::asc("food")]));
    assert_eq!(ids(&engine.sorted_data(&snap).unwrap()), vec!["4", "1", "3", "2"]);
}

#[test]
fn configured_strategy_owns_its_pass_and_runs_once() {
    let spy = Arc::new(Spy::default());
    let mut reg = StrategyRegistry::new();
    reg.register("spy", SpyHandle(Arc::clone(&spy)));
    let engine = Selectors::new(QueryConfig::default(), reg);

    let snap = Arc::new(
        Snapshot::new(star_wars())
            .with_sort([SortKey::asc("name")])
            .with_render(with_method("name", "spy")),
    );
    // the spy returns its input, so filtered order survives
    assert_eq!(ids(&engine.sorted_data(&snap).unwrap()), vec!["1", "2", "3", "4"]);
    assert_eq!(spy.calls.load(Ordering::SeqCst), 1);
    assert_eq!(spy.seen.lock().unwrap()[0], (vec![0, 1, 2, 3], "name".to_string(), true));
}

#[test]
fn strategy_sees_rows_left_by_lower_priority_keys() {
    let spy = Arc::new(Spy::default());
    let mut reg = StrategyRegistry::new();
    reg.register("spy", SpyHandle(Arc::clone(&spy)));
    let engine = Selectors::new(QueryConfig::default(), reg);

    let snap = Arc::new(
        Snapshot::new(star_wars())
            .with_sort([SortKey::desc("name"), SortKey::asc("food")])
            .with_render(with_method("name", "spy")),
    );
    assert_eq!(ids(&engine.sorted_data(&snap).unwrap()), vec!["3", "4", "2", "1"]);
    assert_eq!(spy.seen.lock().unwrap()[0], (vec![2, 3, 1, 0], "name".to_string(), false));
}

#[test]
fn memoized_sort_does_not_rerun_strategies() {
    let spy = Arc::new(Spy::default());
    let mut reg = StrategyRegistry::new();
    reg.register("spy", SpyHandle(Arc::clone(&spy)));
    let engine = Selectors::new(QueryConfig::default(), reg);
    let snap = Arc::new(
        Snapshot::new(star_wars())
            .with_sort([SortKey::asc("name")])
            .with_render(with_method("name", "spy")),
    );
    engine.sorted_data(&snap).unwrap();
    engine.sorted_data(&snap).unwrap();
    engine.current_page_data(&snap).unwrap();
    assert_eq!(spy.calls.load(Ordering::SeqCst), 1);

    // a new snapshot value recomputes, even with equal content
    let next = Arc::new((*snap).clone());
    engine.sorted_data(&next).unwrap();
    assert_eq!(spy.calls.load(Ordering::SeqCst), 2);

    engine.invalidate();
    engine.sorted_data(&next).unwrap();
    assert_eq!(spy.calls.load(Ordering::SeqCst), 3);
}

#[test]
fn closure_strategy_reorders() {
    let mut reg = StrategyRegistry::new();
    reg.register_fn("by_length", |mut rows, column, ascending| {
        rows.sort_by_key(|r: &Row<'_>| r.get(column).and_then(|v| v.as_str()).map(str::len).unwrap_or(0));
        if !ascending { rows.reverse(); }
        Ok(rows)
    });
    let engine = Selectors::new(QueryConfig::default(), reg);
    let snap = Arc::new(
        Snapshot::new(star_wars())
            .with_sort([SortKey::asc("food")])
            .with_render(with_method("food", "by_length")),
    );
    // apple(5) apple(5) banana(6) orange(6), stable
    assert_eq!(ids(&engine.sorted_data(&snap).unwrap()), vec!["3", "4", "1", "2"]);
}

#[test]
fn strategy_errors_surface_unchanged() {
    let mut reg = StrategyRegistry::new();
    reg.register_fn("boom", |_rows, column, _ascending| Err(anyhow::anyhow!("cannot sort {}", column)));
    let engine = Selectors::new(QueryConfig::default(), reg);
    let snap = Arc::new(
        Snapshot::new(star_wars())
            .with_sort([SortKey::asc("name")])
            .with_render(with_method("name", "boom")),
    );
    let err = engine.sorted_data(&snap).unwrap_err();
    assert!(matches!(err, QueryError::Strategy(_)));
    assert_eq!(err.to_string(), "cannot sort name");
}

#[test]
fn strategy_must_return_a_permutation() {
    let mut reg = StrategyRegistry::new();
    reg.register_fn("drop_one", |mut rows, _column, _ascending| {
        rows.pop();
        Ok(rows)
    });
    let engine = Selectors::new(QueryConfig::default(), reg);
    let snap = Arc::new(
        Snapshot::new(star_wars())
            .with_sort([SortKey::asc("name")])
            .with_render(with_method("name", "drop_one")),
    );
    assert!(matches!(engine.sorted_data(&snap), Err(QueryError::StrategyContract { .. })));
}

#[test]
fn unknown_sort_method_is_an_error() {
    let engine = Selectors::default();
    let snap = Arc::new(
        Snapshot::new(star_wars())
            .with_sort([SortKey::asc("name")])
            .with_render(with_method("name", "missing")),
    );
    match engine.sorted_data(&snap) {
        Err(QueryError::UnknownSortMethod { column, method }) => {
            assert_eq!(column, "name");
            assert_eq!(method, "missing");
        }
        other => panic!("expected UnknownSortMethod, got {:?}", other.map(|r| r.len())),
    }
}

#[test]
fn heterogeneous_records_sort_missing_values_last() {
    let engine = Selectors::default();
    let data = records(json!([
        { "id": "1", "rank": 3 },
        { "id": "2" },
        { "id": "3", "rank": 1 },
        { "id": "4", "rank": null }
    ]));
    let asc = Arc::new(Snapshot::new(data.clone()).with_sort([SortKey::asc("rank")]));
    assert_eq!(ids(&engine.sorted_data(&asc).unwrap()), vec!["3", "1", "2", "4"]);
    let desc = Arc::new(Snapshot::new(data).with_sort([SortKey::desc("rank")]));
    assert_eq!(ids(&engine.sorted_data(&desc).unwrap()), vec!["1", "3", "2", "4"]);
}

#[test]
fn current_page_data_windows_sorted_rows() {
    let engine = Selectors::default();
    let snap = Arc::new(
        Snapshot::new(star_wars())
            .with_sort([SortKey::asc("name"), SortKey::asc("food")])
            .with_page(2, 3),
    );
    assert_eq!(ids(&engine.current_page_data(&snap).unwrap()), vec!["1"]);

    let past_end = Arc::new(Snapshot::new(star_wars()).with_page(9, 3));
    assert!(engine.current_page_data(&past_end).unwrap().is_empty());

    let bad = Arc::new(Snapshot::new(star_wars()).with_page(1, 0));
    assert!(matches!(engine.current_page_data(&bad), Err(QueryError::InvalidPageSize(0))));
}

#[test]
fn page_info_counts_filtered_rows_but_pages_over_raw_data() {
    let engine = Selectors::default();
    let snap = Arc::new(Snapshot::new(star_wars()).with_filter("han").with_page(1, 2));
    let info = engine.page_info(&snap).unwrap();
    assert_eq!(info.total, 4);
    assert_eq!(info.filtered, 2);
    assert_eq!(info.max_page, 2);
    assert!(info.has_next);
    assert!(!info.has_previous);
}

#[test]
fn uncached_functions_match_engine() {
    let snap = Arc::new(Snapshot::new(star_wars()).with_filter("a").with_sort([SortKey::desc("food")]).with_page(1, 2));
    let engine = Selectors::default();
    let cfg = QueryConfig::default();
    let reg = StrategyRegistry::new();
    assert_eq!(tabula_query::filtered_data(&snap, &cfg), engine.filtered_data(&snap));
    assert_eq!(tabula_query::sorted_data(&snap, &cfg, &reg).unwrap(), engine.sorted_data(&snap).unwrap());
    assert_eq!(tabula_query::current_page_data(&snap, &cfg, &reg).unwrap(), engine.current_page_data(&snap).unwrap());
}

#[test]
fn engine_resolves_columns_from_snapshot() {
    let engine = Selectors::default();
    let snap: Snapshot = serde_json::from_value(json!({
        "data": [{ "id": "1", "name": "luke", "food": "apple" }],
        "renderProperties": { "columnProperties": {
            "name": { "displayName": "Name", "order": 2 },
            "id": { "displayName": "ID", "order": 1 }
        } }
    }))
    .unwrap();
    assert_eq!(engine.all_columns(&snap), vec!["id", "name", "food"]);
    assert_eq!(engine.visible_columns(&snap), vec!["id", "name"]);
    assert_eq!(engine.column_titles(&snap), vec!["ID", "Name"]);
    let sorted: Vec<String> = engine.sorted_column_properties(&snap).into_iter().map(|c| c.id).collect();
    assert_eq!(sorted, vec!["id", "name", "food"]);
}

#[test]
fn whitespace_filter_is_not_empty() {
    let engine = Selectors::default();
    let data = records(json!([{ "id": "1", "name": "luke skywalker" }, { "id": "2", "name": "leia" }]));
    let snap = Arc::new(Snapshot::new(data).with_filter(" "));
    assert_eq!(ids(&engine.filtered_data(&snap)), vec!["1"]);
}

#[test]
fn opaque_render_properties_pass_through() {
    let engine = Selectors::default();
    let snap: Snapshot = serde_json::from_value(json!({
        "data": [{ "id": "1", "name": "luke" }],
        "renderProperties": "hello"
    }))
    .unwrap();
    assert_eq!(engine.render_properties(&snap), Some(&RenderSettings::Opaque(json!("hello"))));
    assert_eq!(engine.visible_columns(&snap), vec!["id", "name"]);
    assert_eq!(engine.column_titles(&snap), vec!["id", "name"]);
}
