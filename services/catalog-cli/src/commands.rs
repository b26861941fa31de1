//! Subcommand implementations.
//!
//! Each command writes its report to `out`; logging goes to stderr.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::util::pretty::pretty_format_batches;
use tracing::info;

use catalog_common::{CatalogConfig, FilterBuilder, FilterSet, Protocol, CATALOG_VERSION};
use columnar::read_entry;
use storage::{
    check_files, Catalog, CheckMethod, EntrySource, ObjectStorage, PartitionCache,
    SqliteDatabase, StorageLocation, DEFAULT_MEMORY_CAPACITY, EXPECTED_FILES,
};

/// Everything a command needs, built once from the command line.
pub struct Session {
    pub config: CatalogConfig,
    pub catalog: Catalog,
    pub cache: Option<Arc<PartitionCache>>,
}

impl Session {
    pub fn new(config: CatalogConfig, catalog: Catalog, use_cache: bool) -> Result<Self> {
        let cache = if use_cache {
            Some(Arc::new(PartitionCache::new(
                &config.cache_dir,
                DEFAULT_MEMORY_CAPACITY,
            )?))
        } else {
            None
        };
        Ok(Self {
            config,
            catalog,
            cache,
        })
    }
}

pub fn list(session: &Session, out: &mut impl Write) -> Result<()> {
    for entry in session.catalog.entries() {
        writeln!(
            out,
            "{:<40} {:<24} {}",
            entry.name,
            entry.source.kind(),
            entry.metadata.title().unwrap_or("")
        )?;
    }
    Ok(())
}

pub fn describe(session: &Session, name: &str, out: &mut impl Write) -> Result<()> {
    let entry = session.catalog.entry(name)?;

    writeln!(out, "name:     {}", entry.name)?;
    writeln!(out, "kind:     {}", entry.source.kind())?;
    writeln!(out, "location: {}", entry.source.location())?;
    if let EntrySource::Parquet(source) = &entry.source {
        if !source.partition_by.is_empty() {
            writeln!(out, "partitioned by: {}", source.partition_by.join(", "))?;
        }
    }
    if !entry.description.is_empty() {
        writeln!(out, "\n{}\n", entry.description)?;
    }
    for field in entry.metadata.fields() {
        match entry.metadata.get(field) {
            Some(serde_yaml::Value::String(s)) => writeln!(out, "{}: {}", field, s)?,
            Some(value) => {
                let rendered = serde_yaml::to_string(value)?;
                writeln!(out, "{}:", field)?;
                for line in rendered.lines() {
                    writeln!(out, "  {}", line)?;
                }
            }
            None => {}
        }
    }
    Ok(())
}

pub fn build(
    builder: &FilterBuilder,
    years: &[i32],
    states: &[String],
) -> Result<Option<FilterSet>> {
    builder
        .build(years, states)
        .context("Invalid year or state")
}

pub fn filter(
    builder: &FilterBuilder,
    years: &[i32],
    states: &[String],
    out: &mut impl Write,
) -> Result<()> {
    match build(builder, years, states)? {
        Some(filter) => {
            writeln!(out, "{}", filter.to_json()?)?;
            info!(filter = %filter, conjunctions = filter.len(), "Built filter");
        }
        None => writeln!(out, "null")?,
    }
    Ok(())
}

pub async fn read(
    session: &Session,
    name: &str,
    years: &[i32],
    states: &[String],
    limit: usize,
    out: &mut impl Write,
) -> Result<()> {
    let entry = session.catalog.entry(name)?;
    let source = entry.parquet()?;
    let filter = build(&source.filter_builder(), years, states)?;

    let result = read_entry(entry, filter.as_ref(), session.cache.clone())
        .await
        .with_context(|| format!("Failed to read {}", name))?;

    writeln!(out, "rows: {}", result.num_rows())?;
    writeln!(
        out,
        "files read: {} (pruned {}), row groups pruned: {}/{}",
        result.stats.files_read,
        result.stats.files_pruned,
        result.stats.row_groups_pruned,
        result.stats.row_groups_total
    )?;
    writeln!(out, "schema:")?;
    for field in result.schema().fields() {
        writeln!(out, "  {}: {}", field.name(), field.data_type())?;
    }
    if limit > 0 && result.num_rows() > 0 {
        writeln!(out, "{}", pretty_format_batches(&[result.head(limit)])?)?;
    }
    Ok(())
}

pub async fn tables(session: &Session, name: &str, out: &mut impl Write) -> Result<()> {
    let entry = session.catalog.entry(name)?;
    let location = &entry.sqlite()?.location;
    let storage = ObjectStorage::connect(location)?;

    let path = match &session.cache {
        Some(cache) => cache.local_path(&storage, &location.path).await?,
        None if location.protocol == Protocol::Local => location.to_string().into(),
        None => bail!("{} is remote; a cache directory is needed to open it", location),
    };

    let db = SqliteDatabase::open(&path).await?;
    for table in db.tables().await? {
        writeln!(out, "{:<60} {}", table, db.row_count(&table).await?)?;
    }
    db.close().await;
    Ok(())
}

/// Check that the published files exist under the configured intake path,
/// or under a protocol's published mirror.
pub async fn check(
    session: &Session,
    protocol: Option<Protocol>,
    out: &mut impl Write,
) -> Result<()> {
    let base = match protocol {
        Some(protocol) => session.config.clone().for_protocol(protocol)?.intake_path,
        None => session.config.intake_path.clone(),
    };
    let location = StorageLocation::parse(&base)?;
    let storage = ObjectStorage::connect(&location)?;
    let method = CheckMethod::for_protocol(location.protocol);

    info!(base = %location, version = CATALOG_VERSION, ?method, "Checking catalog files");
    let statuses = check_files(&storage, &location.path, EXPECTED_FILES, method).await?;

    let mut missing = 0;
    for status in &statuses {
        let mark = if status.exists { "ok" } else { "MISSING" };
        match status.size {
            Some(size) => writeln!(out, "{:<8} {} ({} bytes)", mark, status.name, size)?,
            None => writeln!(out, "{:<8} {}", mark, status.name)?,
        }
        missing += usize::from(!status.exists);
    }
    if missing > 0 {
        bail!("{} of {} catalog files missing under {}", missing, statuses.len(), location);
    }
    Ok(())
}

pub fn validate_metadata(session: &Session, fields: &[String], out: &mut impl Write) -> Result<()> {
    let mut failures = Vec::new();
    for field in fields {
        let missing = session.catalog.missing_metadata(field);
        if missing.is_empty() {
            writeln!(out, "ok       {}", field)?;
        } else {
            writeln!(out, "MISSING  {} in {}", field, missing.join(", "))?;
            failures.push(field.as_str());
        }
    }
    if !failures.is_empty() {
        bail!("metadata fields missing: {}", failures.join(", "));
    }
    Ok(())
}
