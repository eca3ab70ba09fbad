//! Filter engine: keep records whose fields match the filter text.

#![forbid(unsafe_code)]

use std::borrow::Cow;
use std::str::FromStr;

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tabula_core::{data, filter, Record, Snapshot};
use tracing::debug;

use crate::sort::Row;
use crate::QueryConfig;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    /// Some field contains the filter text.
    #[default]
    Substring,
    /// The record's fields, joined, fuzzy-match the filter text (skim scoring).
    Fuzzy,
}

impl FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" | "contains" => Ok(Self::Substring),
            "fuzzy" => Ok(Self::Fuzzy),
            other => Err(format!("unknown filter mode: {}", other)),
        }
    }
}

/// Text a filter is matched against. `null` has none.
pub fn searchable_text(v: &Value) -> Option<Cow<'_, str>> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Bool(b) => Some(Cow::Owned(b.to_string())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Array(_) | Value::Object(_) => Some(Cow::Owned(v.to_string())),
    }
}

/// Compiled form of one filter string.
pub struct RecordMatcher {
    needle: String,
    case_sensitive: bool,
    fuzzy: Option<SkimMatcherV2>,
}

impl RecordMatcher {
    /// `None` when the filter is empty, meaning every record passes.
    /// Whitespace is matched like any other text.
    pub fn new(text: &str, cfg: &QueryConfig) -> Option<Self> {
        if text.is_empty() { return None; }
        let needle = if cfg.case_sensitive { text.to_string() } else { text.to_lowercase() };
        let fuzzy = match cfg.filter_mode {
            FilterMode::Substring => None,
            FilterMode::Fuzzy => {
                let m = SkimMatcherV2::default();
                Some(if cfg.case_sensitive { m.respect_case() } else { m.ignore_case() })
            }
        };
        Some(Self { needle, case_sensitive: cfg.case_sensitive, fuzzy })
    }

    pub fn matches(&self, record: &Record) -> bool {
        match &self.fuzzy {
            None => record.values().filter_map(searchable_text).any(|t| self.contains(&t)),
            Some(m) => {
                let hay: Vec<Cow<'_, str>> = record.values().filter_map(searchable_text).collect();
                m.fuzzy_match(&hay.join(" "), &self.needle).is_some()
            }
        }
    }

    fn contains(&self, text: &str) -> bool {
        if self.case_sensitive { text.contains(self.needle.as_str()) } else { text.to_lowercase().contains(self.needle.as_str()) }
    }
}

/// Records matching the snapshot's filter, in data order.
pub fn filter_rows<'a>(snap: &'a Snapshot, cfg: &QueryConfig) -> Vec<Row<'a>> {
    let started = std::time::Instant::now();
    let all = data(snap).iter().enumerate().map(|(pos, record)| Row { pos, record });
    let out: Vec<Row<'a>> = match RecordMatcher::new(filter(snap), cfg) {
        None => all.collect(),
        Some(m) => all.filter(|r| m.matches(r.record)).collect(),
    };
    debug!(total = data(snap).len(), matched = out.len(), mode = ?cfg.filter_mode, "filter applied");
    metrics::histogram!("query_filter_ms", started.elapsed().as_secs_f64() * 1_000.0);
    out
}
