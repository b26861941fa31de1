//! Read-only access to the SQLite databases in the catalog.

use std::path::{Path, PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tracing::{debug, info};

use catalog_common::{CatalogError, CatalogResult};

/// A SQLite database opened read-only.
pub struct SqliteDatabase {
    pool: SqlitePool,
    path: PathBuf,
}

impl SqliteDatabase {
    /// Open the database file at `path`.
    pub async fn open(path: impl AsRef<Path>) -> CatalogResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(CatalogError::NotFound(path.display().to_string()));
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .read_only(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                CatalogError::DatabaseError(format!(
                    "Failed to open {}: {}",
                    path.display(),
                    e
                ))
            })?;

        info!(path = %path.display(), "Opened SQLite database");
        Ok(Self { pool, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// User table names in alphabetical order.
    pub async fn tables(&self) -> CatalogResult<Vec<String>> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CatalogError::DatabaseError(format!("Query failed: {}", e)))?;

        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("name")
                    .map_err(|e| CatalogError::DatabaseError(format!("Bad row: {}", e)))
            })
            .collect()
    }

    /// Number of rows in `table`.
    pub async fn row_count(&self, table: &str) -> CatalogResult<u64> {
        let quoted = quote_identifier(table)?;
        if !self.tables().await?.iter().any(|t| t == table) {
            return Err(CatalogError::NotFound(format!(
                "table {} in {}",
                table,
                self.path.display()
            )));
        }
        let table = quoted;
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CatalogError::DatabaseError(format!("Count failed: {}", e)))?;

        debug!(table = %table, count, "Counted rows");
        Ok(count.max(0) as u64)
    }

    /// Number of columns in `table`.
    pub async fn column_count(&self, table: &str) -> CatalogResult<u64> {
        quote_identifier(table)?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info(?)")
            .bind(table)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CatalogError::DatabaseError(format!("Query failed: {}", e)))?;
        Ok(count.max(0) as u64)
    }

    /// Tables with no rows.
    pub async fn empty_tables(&self) -> CatalogResult<Vec<String>> {
        let mut empty = Vec::new();
        for table in self.tables().await? {
            if self.row_count(&table).await? == 0 {
                empty.push(table);
            }
        }
        Ok(empty)
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn quote_identifier(name: &str) -> CatalogResult<String> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(CatalogError::invalid_parameter(
            "table",
            format!("{:?} is not a valid table name", name),
        ));
    }
    Ok(format!("\"{}\"", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("pudl.sqlite");
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();

        for statement in [
            "CREATE TABLE plants_eia (plant_id_eia INTEGER PRIMARY KEY, plant_name TEXT, state TEXT)",
            "INSERT INTO plants_eia VALUES (3, 'Barry', 'AL'), (10, 'Greene County', 'AL')",
            "CREATE TABLE utilities_eia (utility_id_eia INTEGER, utility_name TEXT)",
        ] {
            sqlx::query(statement).execute(&pool).await.unwrap();
        }
        pool.close().await;
        path
    }

    #[tokio::test]
    async fn test_tables_and_counts() {
        let dir = TempDir::new().unwrap();
        let db = SqliteDatabase::open(create_db(&dir).await).await.unwrap();

        assert_eq!(db.tables().await.unwrap(), vec!["plants_eia", "utilities_eia"]);
        assert_eq!(db.row_count("plants_eia").await.unwrap(), 2);
        assert_eq!(db.column_count("plants_eia").await.unwrap(), 3);
        assert_eq!(db.empty_tables().await.unwrap(), vec!["utilities_eia"]);
    }

    #[tokio::test]
    async fn test_rejects_bad_table_name() {
        let dir = TempDir::new().unwrap();
        let db = SqliteDatabase::open(create_db(&dir).await).await.unwrap();
        let err = db.row_count("plants_eia; DROP TABLE plants_eia").await.unwrap_err();
        assert!(err.is_caller_error());

        let err = db.row_count("plants_ferc1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = SqliteDatabase::open("/nonexistent/pudl.sqlite")
            .await
            .err()
            .unwrap();
        assert!(err.is_not_found());
    }
}
