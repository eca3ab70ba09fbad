//! Tabula core types: the immutable view snapshot and its accessors.
//!
//! A [`Snapshot`] is produced wholesale by whatever owns the view state and is
//! only ever read here. Accessors never fail; absent fields resolve to defaults.

#![forbid(unsafe_code)]

pub mod columns;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub type Value = serde_json::Value;

/// Column id -> value, in declaration order.
pub type Record = serde_json::Map<String, Value>;

/// Sort keys in priority order (primary first). Views rarely sort on more than a few columns.
pub type SortKeys = SmallVec<[SortKey; 4]>;

pub const DEFAULT_CURRENT_PAGE: i64 = 1;
pub const DEFAULT_PAGE_SIZE: i64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SortKey {
    pub id: String,
    #[serde(default = "default_ascending")]
    pub sort_ascending: bool,
}

fn default_ascending() -> bool { true }

impl SortKey {
    pub fn asc(id: impl Into<String>) -> Self { Self { id: id.into(), sort_ascending: true } }
    pub fn desc(id: impl Into<String>) -> Self { Self { id: id.into(), sort_ascending: false } }
}

/// Signed so that a zero or negative page size survives parsing and can be
/// rejected where pagination is computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PageProperties {
    pub current_page: i64,
    pub page_size: i64,
}

impl Default for PageProperties {
    fn default() -> Self { Self { current_page: DEFAULT_CURRENT_PAGE, page_size: DEFAULT_PAGE_SIZE } }
}

/// Display metadata for one column.
///
/// `sort_method` names a strategy registered with the query engine; the
/// configuration itself never carries executable values.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ColumnProperties {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_method: Option<String>,
    /// Renderer-specific keys, kept verbatim.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl ColumnProperties {
    pub fn new(id: impl Into<String>) -> Self { Self { id: id.into(), ..Self::default() } }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self { self.display_name = Some(name.into()); self }
    pub fn with_order(mut self, order: i64) -> Self { self.order = Some(order); self }
    pub fn with_sort_method(mut self, name: impl Into<String>) -> Self { self.sort_method = Some(name.into()); self }

    /// Header text: the display name, or the id when none is configured.
    pub fn title(&self) -> &str { self.display_name.as_deref().unwrap_or(&self.id) }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RenderProperties {
    /// Declared columns in declaration order. Serialized as a map keyed by id.
    #[serde(default, with = "column_map")]
    pub column_properties: Vec<ColumnProperties>,
    /// Anything else the rendering layer stores here passes through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl RenderProperties {
    pub fn with_columns(cols: impl IntoIterator<Item = ColumnProperties>) -> Self {
        Self { column_properties: cols.into_iter().collect(), extra: serde_json::Map::new() }
    }

    pub fn column(&self, id: &str) -> Option<&ColumnProperties> {
        self.column_properties.iter().find(|c| c.id == id)
    }
}

/// What a snapshot carries under `renderProperties`.
///
/// Anything that does not parse as [`RenderProperties`] is kept as-is and
/// declares no columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RenderSettings {
    Columns(RenderProperties),
    Opaque(Value),
}

impl RenderSettings {
    pub fn columns(&self) -> Option<&RenderProperties> {
        match self {
            RenderSettings::Columns(rp) => Some(rp),
            RenderSettings::Opaque(_) => None,
        }
    }
}

impl From<RenderProperties> for RenderSettings {
    fn from(rp: RenderProperties) -> Self { RenderSettings::Columns(rp) }
}

impl From<Value> for RenderSettings {
    fn from(v: Value) -> Self { RenderSettings::Opaque(v) }
}

/// The complete input of one derivation pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub data: Vec<Record>,
    pub filter: String,
    pub sort_properties: SortKeys,
    pub page_properties: PageProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_properties: Option<RenderSettings>,
}

impl Snapshot {
    pub fn new(data: Vec<Record>) -> Self { Self { data, ..Self::default() } }

    pub fn from_json(s: &str) -> Result<Self, CoreError> { Ok(serde_json::from_str(s)?) }

    pub fn from_reader<R: std::io::Read>(r: R) -> Result<Self, CoreError> { Ok(serde_json::from_reader(r)?) }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self { self.filter = filter.into(); self }

    pub fn with_sort(mut self, keys: impl IntoIterator<Item = SortKey>) -> Self {
        self.sort_properties = keys.into_iter().collect();
        self
    }

    pub fn with_page(mut self, current_page: i64, page_size: i64) -> Self {
        self.page_properties = PageProperties { current_page, page_size };
        self
    }

    pub fn with_render(mut self, render: impl Into<RenderSettings>) -> Self {
        self.render_properties = Some(render.into());
        self
    }
}

// ---- accessors ----

pub fn data(s: &Snapshot) -> &[Record] { &s.data }

pub fn filter(s: &Snapshot) -> &str { &s.filter }

pub fn current_page(s: &Snapshot) -> i64 { s.page_properties.current_page }

pub fn page_size(s: &Snapshot) -> i64 { s.page_properties.page_size }

pub fn sort_properties(s: &Snapshot) -> &[SortKey] { &s.sort_properties }

pub fn render_properties(s: &Snapshot) -> Option<&RenderSettings> { s.render_properties.as_ref() }

/// Declared column layout, if the render settings carry one.
pub fn declared_render(s: &Snapshot) -> Option<&RenderProperties> {
    render_properties(s).and_then(RenderSettings::columns)
}

pub mod prelude {
    pub use super::{ColumnProperties, PageProperties, Record, RenderProperties, RenderSettings, Snapshot, SortKey, SortKeys, Value};
    pub use super::columns::SchemaPolicy;
}

mod column_map {
    use std::fmt;

    use serde::de::{MapAccess, SeqAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::ColumnProperties;

    pub fn serialize<S: Serializer>(cols: &[ColumnProperties], ser: S) -> Result<S::Ok, S::Error> {
        let mut map = ser.serialize_map(Some(cols.len()))?;
        for c in cols { map.serialize_entry(&c.id, c)?; }
        map.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<ColumnProperties>, D::Error> {
        de.deserialize_any(ColumnsVisitor)
    }

    struct ColumnsVisitor;

    impl<'de> Visitor<'de> for ColumnsVisitor {
        type Value = Vec<ColumnProperties>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of column id to column properties")
        }

        // Map keys win over any `id` inside the entry.
        fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut out: Vec<ColumnProperties> = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, mut props)) = access.next_entry::<String, ColumnProperties>()? {
                props.id = key;
                match out.iter().position(|c| c.id == props.id) {
                    Some(i) => out[i] = props,
                    None => out.push(props),
                }
            }
            Ok(out)
        }

        // Without a map key the entry has to name itself.
        fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some(props) = access.next_element::<ColumnProperties>()? {
                if props.id.is_empty() {
                    return Err(serde::de::Error::custom("column properties in a list need a non-empty `id`"));
                }
                out.push(props);
            }
            Ok(out)
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> { Ok(Vec::new()) }
    }
}
