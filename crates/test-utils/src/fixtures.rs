//! Parquet fixtures laid out the way the published catalog is.
//!
//! - `hourly_emissions_epacems.parquet`: one file, one row group per
//!   (year, state), sorted by year then state
//! - `hourly_emissions_epacems/epacems-{year}-{state}.parquet`: one file per
//!   partition
//! - `hourly_emissions_epacems_hive/year=Y/state=S/part-0.parquet`

use std::fs;
use std::path::{Path, PathBuf};

use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;

use crate::generators::{epacems_batch, epacems_schema};

/// Report years present in the fixtures.
pub const TEST_YEARS: &[i32] = &[2019, 2020];

/// States present in the fixtures, in sorted order.
pub const TEST_STATES: &[&str] = &["CA", "CO", "ID", "NY"];

/// Hours written per (year, state) partition.
pub const ROWS_PER_PARTITION: usize = 24;

pub const MONOLITHIC_FILE: &str = "hourly_emissions_epacems.parquet";
pub const PARTITIONED_DIR: &str = "hourly_emissions_epacems";
pub const HIVE_DIR: &str = "hourly_emissions_epacems_hive";

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_max_row_group_size(1 << 20)
        .build()
}

/// Encode every (year, state) combination into one Parquet file, flushing
/// after each so that each partition is its own row group.
pub fn epacems_parquet_bytes(years: &[i32], states: &[&str], rows: usize) -> Vec<u8> {
    let mut writer = ArrowWriter::try_new(Vec::new(), epacems_schema(), Some(writer_properties()))
        .expect("Failed to create parquet writer");

    for &year in years {
        for state in states {
            writer
                .write(&epacems_batch(year, state, rows))
                .expect("Failed to write batch");
            writer.flush().expect("Failed to flush row group");
        }
    }

    writer.into_inner().expect("Failed to finish parquet file")
}

/// Write the single-file dataset into `dir`.
pub fn write_epacems_monolithic(dir: &Path, years: &[i32], states: &[&str], rows: usize) -> PathBuf {
    let path = dir.join(MONOLITHIC_FILE);
    fs::write(&path, epacems_parquet_bytes(years, states, rows))
        .expect("Failed to write monolithic fixture");
    path
}

/// Write one `epacems-{year}-{state}.parquet` per partition under
/// `dir/hourly_emissions_epacems`.
pub fn write_epacems_partitioned(dir: &Path, years: &[i32], states: &[&str], rows: usize) -> PathBuf {
    let root = dir.join(PARTITIONED_DIR);
    fs::create_dir_all(&root).expect("Failed to create partition directory");

    for &year in years {
        for state in states {
            let file = root.join(format!("epacems-{}-{}.parquet", year, state));
            fs::write(&file, epacems_parquet_bytes(&[year], &[state], rows))
                .expect("Failed to write partition fixture");
        }
    }
    root
}

/// Write the same partitions as Hive-style `year=Y/state=S` directories.
pub fn write_epacems_hive(dir: &Path, years: &[i32], states: &[&str], rows: usize) -> PathBuf {
    let root = dir.join(HIVE_DIR);

    for &year in years {
        for state in states {
            let part_dir = root.join(format!("year={}", year)).join(format!("state={}", state));
            fs::create_dir_all(&part_dir).expect("Failed to create partition directory");
            fs::write(
                part_dir.join("part-0.parquet"),
                epacems_parquet_bytes(&[year], &[state], rows),
            )
            .expect("Failed to write partition fixture");
        }
    }
    root
}

/// Write all three layouts with the default years and states.
pub fn write_epacems_fixtures(dir: &Path) {
    write_epacems_monolithic(dir, TEST_YEARS, TEST_STATES, ROWS_PER_PARTITION);
    write_epacems_partitioned(dir, TEST_YEARS, TEST_STATES, ROWS_PER_PARTITION);
    write_epacems_hive(dir, TEST_YEARS, TEST_STATES, ROWS_PER_PARTITION);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::temp_test_dir;

    #[test]
    fn test_partitioned_file_names() {
        let dir = temp_test_dir();
        let root = write_epacems_partitioned(dir.path(), &[2020], &["ID", "NY"], 2);

        let mut names: Vec<String> = fs::read_dir(&root)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["epacems-2020-ID.parquet", "epacems-2020-NY.parquet"]);
    }

    #[test]
    fn test_hive_layout() {
        let dir = temp_test_dir();
        let root = write_epacems_hive(dir.path(), &[2019], &["CA"], 2);
        assert!(root.join("year=2019/state=CA/part-0.parquet").is_file());
    }

    #[test]
    fn test_parquet_magic() {
        let bytes = epacems_parquet_bytes(TEST_YEARS, TEST_STATES, 2);
        assert_eq!(&bytes[..4], b"PAR1");
        assert_eq!(&bytes[bytes.len() - 4..], b"PAR1");
    }
}
