use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tabula_core::{Record, Snapshot, SortKey, Value};
use tabula_query::{FilterMode, QueryConfig, Selectors, StrategyRegistry};
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "tabulactl", version, about = "Derive table views from a view snapshot")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Snapshot JSON file (default: stdin)
    #[arg(short = 's', long = "snapshot", global = true)]
    snapshot: Option<PathBuf>,

    /// Override the snapshot's filter text
    #[arg(long = "filter", global = true)]
    filter: Option<String>,

    /// Override sort keys, e.g. `--sort name --sort age:desc` (primary first)
    #[arg(long = "sort", global = true, value_parser = parse_sort_key)]
    sort: Vec<SortKey>,

    /// Override the current page
    #[arg(long = "page", global = true)]
    page: Option<i64>,

    /// Override the page size
    #[arg(long = "page-size", global = true)]
    page_size: Option<i64>,

    /// Match the filter case-sensitively
    #[arg(long = "case-sensitive", global = true, action = ArgAction::SetTrue)]
    case_sensitive: bool,

    /// Filter matching mode (substring, fuzzy)
    #[arg(long = "filter-mode", global = true)]
    filter_mode: Option<FilterMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the current page of visible columns
    View,
    /// Print resolved column metadata
    Columns,
    /// Print pagination state
    Pages,
}

fn init_tracing() {
    let env = std::env::var("TABULA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn parse_sort_key(s: &str) -> Result<SortKey, String> {
    let (id, dir) = match s.rsplit_once(':') {
        Some((id, dir)) => (id, dir),
        None => (s, "asc"),
    };
    if id.is_empty() { return Err(format!("empty column in sort key: {}", s)); }
    match dir.to_ascii_lowercase().as_str() {
        "asc" => Ok(SortKey::asc(id)),
        "desc" => Ok(SortKey::desc(id)),
        other => Err(format!("unknown sort direction '{}' (expected asc or desc)", other)),
    }
}

fn load_snapshot(path: Option<&PathBuf>) -> Result<Snapshot> {
    match path {
        Some(p) => {
            let file = std::fs::File::open(p).with_context(|| format!("opening snapshot {}", p.display()))?;
            Snapshot::from_reader(std::io::BufReader::new(file)).with_context(|| format!("parsing snapshot {}", p.display()))
        }
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("reading snapshot from stdin")?;
            Snapshot::from_json(&buf).context("parsing snapshot from stdin")
        }
    }
}

fn apply_overrides(mut snap: Snapshot, cli: &Cli) -> Snapshot {
    if let Some(f) = &cli.filter { snap.filter = f.clone(); }
    if !cli.sort.is_empty() { snap.sort_properties = cli.sort.iter().cloned().collect(); }
    if let Some(p) = cli.page { snap.page_properties.current_page = p; }
    if let Some(s) = cli.page_size { snap.page_properties.page_size = s; }
    snap
}

fn render_cell(v: Option<&Value>) -> String {
    match v {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn print_table(headers: &[String], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) { *w = (*w).max(cell.chars().count()); }
    }
    let line = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| format!("{:<width$}", c, width = *w))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };
    println!("{}", line(headers));
    for row in rows { println!("{}", line(row.as_slice())); }
}

fn project(record: &Record, columns: &[String]) -> serde_json::Map<String, Value> {
    columns
        .iter()
        .map(|c| (c.clone(), record.get(c).cloned().unwrap_or(Value::Null)))
        .collect()
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut config = QueryConfig::from_env();
    if cli.case_sensitive { config.case_sensitive = true; }
    if let Some(mode) = cli.filter_mode { config.filter_mode = mode; }
    debug!(?config, "query config");

    let snap = Arc::new(apply_overrides(load_snapshot(cli.snapshot.as_ref())?, &cli));
    info!(rows = snap.data.len(), filter = %snap.filter, sort_keys = snap.sort_properties.len(), "snapshot loaded");
    let engine = Selectors::new(config, StrategyRegistry::new());

    match cli.command {
        Commands::View => {
            let columns = engine.visible_columns(&snap);
            let rows = engine.current_page_data(&snap)?;
            match cli.output {
                Output::Human => {
                    let titles = engine.column_titles(&snap);
                    let cells: Vec<Vec<String>> = rows
                        .iter()
                        .map(|r| columns.iter().map(|c| render_cell(r.get(c))).collect())
                        .collect();
                    print_table(&titles, &cells);
                    let info = engine.page_info(&snap)?;
                    eprintln!("page {}/{} • {} of {} rows match", info.current_page, info.max_page, info.filtered, info.total);
                }
                Output::Json => {
                    let out: Vec<_> = rows.iter().map(|r| project(r, &columns)).collect();
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
            }
        }
        Commands::Columns => {
            let props = engine.sorted_column_properties(&snap);
            let visible = engine.visible_columns(&snap);
            match cli.output {
                Output::Human => {
                    let headers: Vec<String> = ["ID", "TITLE", "ORDER", "SORT", "VISIBLE"].iter().map(|s| s.to_string()).collect();
                    let rows: Vec<Vec<String>> = props
                        .iter()
                        .map(|c| {
                            vec![
                                c.id.clone(),
                                c.title().to_string(),
                                c.order.map(|o| o.to_string()).unwrap_or_else(|| "-".to_string()),
                                c.sort_method.clone().unwrap_or_else(|| "default".to_string()),
                                if visible.contains(&c.id) { "yes".to_string() } else { "no".to_string() },
                            ]
                        })
                        .collect();
                    print_table(&headers, &rows);
                }
                Output::Json => {
                    #[derive(serde::Serialize)]
                    struct Columns<'a> { visible: &'a [String], properties: &'a [tabula_core::ColumnProperties] }
                    println!("{}", serde_json::to_string_pretty(&Columns { visible: &visible, properties: &props })?);
                }
            }
        }
        Commands::Pages => {
            let info = engine.page_info(&snap)?;
            match cli.output {
                Output::Human => {
                    let yn = |b: bool| if b { "yes" } else { "no" };
                    println!(
                        "page {}/{} • size {} • next: {} • previous: {} • {} of {} rows match",
                        info.current_page, info.max_page, info.page_size, yn(info.has_next), yn(info.has_previous), info.filtered, info.total
                    );
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&info)?),
            }
        }
    }

    Ok(())
}
