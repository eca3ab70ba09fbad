use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tabula_query::tabula_core::{Record, Snapshot, SortKey};
use tabula_query::{FilterMode, QueryConfig, Selectors, StrategyRegistry};

fn gen_record(i: usize) -> Record {
    let team = match i % 3 {
        0 => "web",
        1 => "api",
        _ => "batch",
    };
    let v = json!({
        "id": i,
        "name": format!("obj-{i:06}"),
        "team": team,
        "zone": format!("zone-{}", i % 20),
        "score": (i * 7919) % 1000,
    });
    match v {
        serde_json::Value::Object(m) => m,
        _ => Record::new(),
    }
}

fn gen_snapshot(n: usize) -> Snapshot {
    Snapshot::new((0..n).map(gen_record).collect())
}

fn percentile_us(xs: &mut [u128], p: f64) -> u128 {
    xs.sort_unstable();
    let idx = ((xs.len() as f64 - 1.0) * p).round() as usize;
    xs[idx]
}

fn main() {
    let n: usize = std::env::var("TABULA_BENCH_ROWS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(100_000);
    let rounds: usize = std::env::var("TABULA_BENCH_ROUNDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);

    eprintln!("building snapshot: {} rows", n);
    let t0 = Instant::now();
    let base = gen_snapshot(n);
    let build_ms = t0.elapsed().as_secs_f64() * 1_000.0;
    println!("snapshot_build: {:.1}ms rows={}", build_ms, n);

    let filters = ["", "web", "zone-1", "obj-0001"];
    let sorts: [Vec<SortKey>; 3] = [
        vec![],
        vec![SortKey::asc("score")],
        vec![SortKey::asc("team"), SortKey::desc("score"), SortKey::asc("name")],
    ];

    let run = |label: &str, cfg: QueryConfig| {
        let mut cold: Vec<u128> = Vec::new();
        let mut warm: Vec<u128> = Vec::new();
        for round in 0..rounds {
            let engine = Selectors::new(cfg, StrategyRegistry::new());
            let snap = Arc::new(
                base.clone()
                    .with_filter(filters[round % filters.len()])
                    .with_sort(sorts[round % sorts.len()].clone())
                    .with_page(1, 50),
            );
            let t = Instant::now();
            let _ = engine.current_page_data(&snap);
            cold.push(t.elapsed().as_micros());
            let t = Instant::now();
            let _ = engine.current_page_data(&snap);
            warm.push(t.elapsed().as_micros());
        }
        let c50 = percentile_us(&mut cold.clone(), 0.50) as f64 / 1000.0;
        let c99 = percentile_us(&mut cold, 0.99) as f64 / 1000.0;
        let w50 = percentile_us(&mut warm, 0.50) as f64 / 1000.0;
        println!("{}: cold p50={:.3}ms p99={:.3}ms warm p50={:.3}ms ({} rounds)", label, c50, c99, w50, rounds);
    };

    run("substring", QueryConfig::default());
    run("fuzzy", QueryConfig { filter_mode: FilterMode::Fuzzy, ..QueryConfig::default() });
}
