//! PUDL data catalog command line tool.
//!
//! Lists and describes catalog entries, builds year/state pushdown filters,
//! reads EPA CEMS data with partition pruning, and checks that the published
//! catalog files are in place.

mod commands;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use catalog_common::{CatalogConfig, FilterBuilder, Protocol, INTAKE_CACHE_VAR, INTAKE_PATH_VAR};
use storage::{Catalog, REQUIRED_METADATA_FIELDS};

use commands::Session;

#[derive(Parser, Debug)]
#[command(name = "pudl-catalog")]
#[command(about = "Access the PUDL data catalog")]
struct Args {
    /// Root location of the catalog data
    #[arg(long, env = "PUDL_INTAKE_PATH")]
    intake_path: Option<String>,

    /// Local directory for cached downloads
    #[arg(long, env = "PUDL_INTAKE_CACHE")]
    cache_dir: Option<PathBuf>,

    /// Catalog description to use instead of the built-in one
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Read remote data without caching it locally
    #[arg(long)]
    no_cache: bool,

    /// Log level
    #[arg(long, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List catalog entries
    List,

    /// Show an entry's location and metadata
    Describe { entry: String },

    /// Print the pushdown filter for the given years and states as JSON
    Filter {
        #[command(flatten)]
        selection: Selection,

        /// Column holding the report year
        #[arg(long, default_value = "year")]
        year_column: String,

        /// Column holding the state code
        #[arg(long, default_value = "state")]
        state_column: String,
    },

    /// Read a Parquet entry, optionally restricted to years and states
    Read {
        entry: String,

        #[command(flatten)]
        selection: Selection,

        /// Number of rows to print
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// List the tables of a SQLite entry with their row counts
    Tables { entry: String },

    /// Check that the published catalog files exist
    CheckFiles {
        /// Check a published mirror instead of the intake path
        #[arg(long)]
        protocol: Option<Protocol>,
    },

    /// Check that every entry carries the given metadata fields
    ValidateMetadata {
        /// Field to require; defaults to title, license, provider and path
        #[arg(long = "field")]
        fields: Vec<String>,
    },
}

#[derive(clap::Args, Debug, Default)]
struct Selection {
    /// Report years, comma separated
    #[arg(long, value_delimiter = ',')]
    years: Vec<i32>,

    /// State codes, comma separated
    #[arg(long, value_delimiter = ',')]
    states: Vec<String>,
}

fn init_tracing(args: &Args) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

fn load_config(args: &Args) -> CatalogConfig {
    CatalogConfig::from_lookup(|key| match key {
        INTAKE_PATH_VAR => args.intake_path.clone(),
        INTAKE_CACHE_VAR => args
            .cache_dir
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        other => std::env::var(other).ok(),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args);

    let config = load_config(&args);
    info!(intake_path = %config.intake_path, cache_dir = %config.cache_dir.display(), "Loaded configuration");

    let catalog = match &args.catalog {
        Some(path) => Catalog::open(path, &config)?,
        None => Catalog::builtin(&config)?,
    };
    let session = Session::new(config, catalog, !args.no_cache)?;

    let mut out = std::io::stdout().lock();
    match args.command {
        Command::List => commands::list(&session, &mut out),
        Command::Describe { entry } => commands::describe(&session, &entry, &mut out),
        Command::Filter {
            selection,
            year_column,
            state_column,
        } => commands::filter(
            &FilterBuilder::new(year_column, state_column),
            &selection.years,
            &selection.states,
            &mut out,
        ),
        Command::Read {
            entry,
            selection,
            limit,
        } => {
            commands::read(
                &session,
                &entry,
                &selection.years,
                &selection.states,
                limit,
                &mut out,
            )
            .await
        }
        Command::Tables { entry } => commands::tables(&session, &entry, &mut out).await,
        Command::CheckFiles { protocol } => commands::check(&session, protocol, &mut out).await,
        Command::ValidateMetadata { fields } => {
            let fields = if fields.is_empty() {
                REQUIRED_METADATA_FIELDS.iter().map(|f| f.to_string()).collect()
            } else {
                fields
            };
            commands::validate_metadata(&session, &fields, &mut out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_filter_args() {
        let args = Args::try_parse_from([
            "pudl-catalog",
            "filter",
            "--years",
            "2019,2020",
            "--states",
            "ID,co",
        ])
        .unwrap();
        match args.command {
            Command::Filter { selection, .. } => {
                assert_eq!(selection.years, vec![2019, 2020]);
                assert_eq!(selection.states, vec!["ID", "co"]);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_protocol() {
        let args = Args::try_parse_from(["pudl-catalog", "check-files", "--protocol", "https"])
            .unwrap();
        assert!(matches!(
            args.command,
            Command::CheckFiles {
                protocol: Some(Protocol::Https)
            }
        ));
        assert!(
            Args::try_parse_from(["pudl-catalog", "check-files", "--protocol", "ftp"]).is_err()
        );
    }

    #[test]
    fn test_flags_override_config() {
        let args = Args::try_parse_from([
            "pudl-catalog",
            "--intake-path",
            "/data/pudl",
            "--cache-dir",
            "/tmp/pudl-cache",
            "list",
        ])
        .unwrap();
        let config = load_config(&args);
        assert_eq!(config.intake_path, "/data/pudl");
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/pudl-cache"));
    }
}
