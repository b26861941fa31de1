//! Dataset catalog loaded from a YAML description.
//!
//! A catalog is a set of named sources. Each source is either a Parquet
//! dataset (a single file, or a directory of partition files) or a SQLite
//! database, stored under a URL template such as
//! `${PUDL_INTAKE_PATH}/hourly_emissions_epacems.parquet`.
//!
//! Templates are expanded against [`CatalogConfig::template_vars`] when the
//! catalog is opened. `${VAR:-default}` supplies a fallback. The process
//! environment is never consulted here.
//!
//! A [`Catalog`] is an ordinary owned value: open as many as needed, drop
//! them when done.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::{debug, info};

use catalog_common::{
    CatalogConfig, CatalogError, CatalogResult, FilterBuilder, PartitionScheme, STATE_COLUMN,
    YEAR_COLUMN,
};

use crate::object_store::StorageLocation;

/// The catalog shipped with this crate.
pub const BUILTIN_CATALOG_YAML: &str = include_str!("../catalog/pudl_catalog.yaml");

/// Metadata fields every catalog entry is expected to carry.
pub const REQUIRED_METADATA_FIELDS: &[&str] = &["title", "license", "provider", "path"];

// ============================================================================
// YAML description
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDescription {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
    pub sources: BTreeMap<String, SourceDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescription {
    #[serde(default)]
    pub description: String,
    pub driver: Driver,
    pub urlpath: String,
    #[serde(default)]
    pub layout: Layout,
    #[serde(default)]
    pub partition_by: Vec<String>,
    pub file_pattern: Option<String>,
    /// File whose footer describes a partitioned dataset's columns.
    pub schema_urlpath: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    Parquet,
    Sqlite,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layout {
    #[default]
    SingleFile,
    Partitioned,
}

// ============================================================================
// Typed entries
// ============================================================================

/// Free-form entry metadata (title, license, provider, path, ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntryMetadata(BTreeMap<String, Value>);

impl EntryMetadata {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Whether `field` is present with a non-empty value.
    pub fn has(&self, field: &str) -> bool {
        self.get(field).map_or(false, is_truthy)
    }

    /// A field as text. Mappings fall back to their `name` or `title` key.
    pub fn text(&self, field: &str) -> Option<&str> {
        match self.get(field)? {
            Value::String(s) => Some(s.as_str()),
            Value::Mapping(map) => map
                .get("name")
                .or_else(|| map.get("title"))
                .and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.text("title")
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Sequence(seq) => !seq.is_empty(),
        Value::Mapping(map) => !map.is_empty(),
        Value::Number(_) | Value::Tagged(_) => true,
    }
}

/// How a Parquet dataset is laid out in storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetLayout {
    /// One monolithic file.
    SingleFile,
    /// A directory of files, one per partition.
    Partitioned(PartitionScheme),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParquetSource {
    pub location: StorageLocation,
    pub layout: DatasetLayout,
    /// Partition columns; the single-file variant is still sorted by these.
    pub partition_by: Vec<String>,
    /// Where to read the schema when no partition file is read.
    pub schema_location: Option<StorageLocation>,
}

impl ParquetSource {
    pub fn is_partitioned(&self) -> bool {
        matches!(self.layout, DatasetLayout::Partitioned(_))
    }

    /// Filter builder keyed on this dataset's year and state columns.
    ///
    /// With two partition columns the first is the year and the second the
    /// region; otherwise the default `year`/`state` names are used.
    pub fn filter_builder(&self) -> FilterBuilder {
        match self.partition_by.as_slice() {
            [year, region] => FilterBuilder::new(year.clone(), region.clone()),
            _ => FilterBuilder::new(YEAR_COLUMN, STATE_COLUMN),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteSource {
    pub location: StorageLocation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySource {
    Parquet(ParquetSource),
    Sqlite(SqliteSource),
}

impl EntrySource {
    pub fn location(&self) -> &StorageLocation {
        match self {
            EntrySource::Parquet(p) => &p.location,
            EntrySource::Sqlite(s) => &s.location,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EntrySource::Parquet(p) if p.is_partitioned() => "parquet (partitioned)",
            EntrySource::Parquet(_) => "parquet",
            EntrySource::Sqlite(_) => "sqlite",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub name: String,
    pub description: String,
    pub metadata: EntryMetadata,
    pub source: EntrySource,
}

impl CatalogEntry {
    pub fn parquet(&self) -> CatalogResult<&ParquetSource> {
        match &self.source {
            EntrySource::Parquet(p) => Ok(p),
            EntrySource::Sqlite(_) => Err(CatalogError::invalid_parameter(
                "entry",
                format!("{} is a SQLite database, not a Parquet dataset", self.name),
            )),
        }
    }

    pub fn sqlite(&self) -> CatalogResult<&SqliteSource> {
        match &self.source {
            EntrySource::Sqlite(s) => Ok(s),
            EntrySource::Parquet(_) => Err(CatalogError::invalid_parameter(
                "entry",
                format!("{} is a Parquet dataset, not a SQLite database", self.name),
            )),
        }
    }

    fn from_description(name: &str, desc: SourceDescription) -> CatalogResult<Self> {
        let location = StorageLocation::parse(&desc.urlpath).map_err(|e| {
            CatalogError::InvalidCatalog(format!("source {}: {}", name, e))
        })?;

        let schema_location = desc
            .schema_urlpath
            .as_deref()
            .map(StorageLocation::parse)
            .transpose()
            .map_err(|e| CatalogError::InvalidCatalog(format!("source {}: {}", name, e)))?;

        let source = match (desc.driver, desc.layout) {
            (Driver::Sqlite, _) => EntrySource::Sqlite(SqliteSource { location }),
            (Driver::Parquet, Layout::SingleFile) => EntrySource::Parquet(ParquetSource {
                location,
                layout: DatasetLayout::SingleFile,
                partition_by: desc.partition_by,
                schema_location,
            }),
            (Driver::Parquet, Layout::Partitioned) => {
                let scheme = PartitionScheme::new(desc.partition_by.clone(), desc.file_pattern)
                    .map_err(|e| CatalogError::InvalidCatalog(format!("source {}: {}", name, e)))?;
                EntrySource::Parquet(ParquetSource {
                    location,
                    layout: DatasetLayout::Partitioned(scheme),
                    partition_by: desc.partition_by,
                    schema_location,
                })
            }
        };

        Ok(Self {
            name: name.to_string(),
            description: desc.description.trim().to_string(),
            metadata: EntryMetadata(desc.metadata),
            source,
        })
    }
}

// ============================================================================
// Catalog handle
// ============================================================================

#[derive(Debug, Clone)]
pub struct Catalog {
    description: String,
    metadata: BTreeMap<String, Value>,
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// Open the catalog bundled with this crate.
    pub fn builtin(config: &CatalogConfig) -> CatalogResult<Self> {
        Self::from_yaml_str(BUILTIN_CATALOG_YAML, config)
    }

    /// Load a catalog description from a YAML file.
    pub fn open<P: AsRef<Path>>(path: P, config: &CatalogConfig) -> CatalogResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            CatalogError::InvalidCatalog(format!(
                "Failed to read catalog from {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;
        info!(path = ?path.as_ref(), "Opening catalog");
        Self::from_yaml_str(&content, config)
    }

    /// Parse a YAML catalog description, expanding `${VAR}` templates.
    pub fn from_yaml_str(content: &str, config: &CatalogConfig) -> CatalogResult<Self> {
        let expanded = expand_template(content, &config.template_vars())?;
        let description: CatalogDescription = serde_yaml::from_str(&expanded)?;
        Self::from_description(description)
    }

    pub fn from_description(description: CatalogDescription) -> CatalogResult<Self> {
        let mut entries = BTreeMap::new();
        for (name, source) in description.sources {
            let entry = CatalogEntry::from_description(&name, source)?;
            debug!(entry = %name, kind = entry.source.kind(), location = %entry.source.location(), "Resolved catalog entry");
            entries.insert(name, entry);
        }

        Ok(Self {
            description: description.description.trim().to_string(),
            metadata: description.metadata,
            entries,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn metadata(&self) -> &BTreeMap<String, Value> {
        &self.metadata
    }

    /// Entry names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by name.
    pub fn entry(&self, name: &str) -> CatalogResult<&CatalogEntry> {
        self.entries
            .get(name)
            .ok_or_else(|| CatalogError::EntryNotFound(name.to_string()))
    }

    /// Names of entries lacking a non-empty `field` in their metadata.
    pub fn missing_metadata(&self, field: &str) -> Vec<&str> {
        self.entries
            .values()
            .filter(|e| !e.metadata.has(field))
            .map(|e| e.name.as_str())
            .collect()
    }

    /// Fail with [`CatalogError::MissingMetadata`] for the first entry
    /// lacking `field`.
    pub fn validate_required_metadata(&self, field: &str) -> CatalogResult<()> {
        match self.missing_metadata(field).first() {
            Some(entry) => Err(CatalogError::MissingMetadata {
                entry: entry.to_string(),
                field: field.to_string(),
            }),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Template expansion
// ============================================================================

/// Expand `${VAR}` and `${VAR:-default}` using `vars`.
pub fn expand_template(content: &str, vars: &HashMap<String, String>) -> CatalogResult<String> {
    let mut result = String::with_capacity(content.len());
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_expr = String::new();
            let mut brace_count = 1;

            while brace_count > 0 {
                match chars.next() {
                    Some('{') => {
                        brace_count += 1;
                        var_expr.push('{');
                    }
                    Some('}') => {
                        brace_count -= 1;
                        if brace_count > 0 {
                            var_expr.push('}');
                        }
                    }
                    Some(c) => var_expr.push(c),
                    None => {
                        return Err(CatalogError::InvalidCatalog(format!(
                            "Unclosed variable substitution: ${{{}",
                            var_expr
                        )))
                    }
                }
            }

            result.push_str(&resolve_var_expr(&var_expr, vars)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

fn resolve_var_expr(expr: &str, vars: &HashMap<String, String>) -> CatalogResult<String> {
    let (name, default) = match expr.split_once(":-") {
        Some((name, default)) => (name.trim(), Some(default)),
        None => (expr.trim(), None),
    };

    match (vars.get(name), default) {
        (Some(val), _) if !val.is_empty() => Ok(val.clone()),
        (_, Some(default)) => Ok(default.to_string()),
        (Some(val), None) => Ok(val.clone()),
        (None, None) => Err(CatalogError::InvalidCatalog(format!(
            "Template variable {} not set",
            name
        ))),
    }
}
