//! Column resolution for a snapshot.
//!
//! This module provides:
//! - Column inference from record shape, under an explicit [`SchemaPolicy`]
//! - Resolved column metadata in display order
//! - The visible column allowlist and its header titles

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::str::FromStr;

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{data, declared_render, ColumnProperties, Snapshot};

/// Which records define the inferred column set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaPolicy {
    /// Keys of the first record, in declaration order. Assumes uniform records.
    #[default]
    FirstRecord,
    /// Every key seen across all records, in first-encounter order.
    Union,
}

impl FromStr for SchemaPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first_record" | "first-record" => Ok(Self::FirstRecord),
            "union" => Ok(Self::Union),
            other => Err(format!("unknown schema policy: {}", other)),
        }
    }
}

/// Column ids inferred from the data.
pub fn all_columns(snap: &Snapshot, policy: SchemaPolicy) -> Vec<&str> {
    let rows = data(snap);
    match policy {
        SchemaPolicy::FirstRecord => rows
            .first()
            .map(|r| r.keys().map(String::as_str).collect())
            .unwrap_or_default(),
        SchemaPolicy::Union => {
            let mut seen: FxHashSet<&str> = FxHashSet::default();
            let mut out = Vec::new();
            for r in rows {
                for k in r.keys() {
                    if seen.insert(k.as_str()) { out.push(k.as_str()); }
                }
            }
            out
        }
    }
}

fn declared(snap: &Snapshot) -> &[ColumnProperties] {
    declared_render(snap).map(|rp| rp.column_properties.as_slice()).unwrap_or(&[])
}

// Ordered columns first; unordered ones keep their relative order behind them.
fn by_order(a: &ColumnProperties, b: &ColumnProperties) -> Ordering {
    match (a.order, b.order) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Declared column metadata plus a default entry for every inferred column
/// that was not declared, sorted by `order`.
pub fn sorted_column_properties(snap: &Snapshot, policy: SchemaPolicy) -> Vec<ColumnProperties> {
    let declared = declared(snap);
    let mut seen: FxHashSet<&str> = declared.iter().map(|c| c.id.as_str()).collect();
    let mut out: Vec<ColumnProperties> = declared.to_vec();
    for id in all_columns(snap, policy) {
        if seen.insert(id) { out.push(ColumnProperties::new(id)); }
    }
    out.sort_by(by_order);
    out
}

/// Columns a renderer should show, in display order.
///
/// Declaring any column turns the declared set into an allowlist: inferred
/// columns that were never declared are hidden. With nothing declared every
/// inferred column is visible in inferred order.
pub fn visible_columns(snap: &Snapshot, policy: SchemaPolicy) -> Vec<String> {
    let declared = declared(snap);
    if declared.is_empty() {
        return all_columns(snap, policy).into_iter().map(str::to_string).collect();
    }
    let allow: FxHashSet<&str> = declared.iter().map(|c| c.id.as_str()).collect();
    sorted_column_properties(snap, policy)
        .into_iter()
        .filter(|c| allow.contains(c.id.as_str()))
        .map(|c| c.id)
        .collect()
}

/// Header titles for [`visible_columns`], index-aligned with it.
pub fn column_titles(snap: &Snapshot, policy: SchemaPolicy) -> Vec<String> {
    visible_columns(snap, policy)
        .into_iter()
        .map(|id| match column_properties_for(snap, &id) {
            Some(c) => c.title().to_string(),
            None => id,
        })
        .collect()
}

/// Declared metadata for one column, if any.
pub fn column_properties_for<'a>(snap: &'a Snapshot, id: &str) -> Option<&'a ColumnProperties> {
    declared_render(snap).and_then(|rp| rp.column(id))
}
