use std::collections::BTreeSet;

use parking_lot::RwLock;
use sqlx::{Row, SqlitePool};

use crate::error::{Error, Result};
use crate::models::ColumnInfo;

/// SchemaCatalog
///
/// Process-wide cache of the table names present in the store. The list is
/// discovered lazily on first use and only re-read when a caller forces it;
/// every table-creation path must force a refresh before dependent operations
/// run, otherwise they see a stale list and fail with `NotFound`.
pub struct SchemaCatalog {
    pool: SqlitePool,
    tables: RwLock<Option<BTreeSet<String>>>,
}

impl SchemaCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            tables: RwLock::new(None),
        }
    }

    /// Cached table names, re-queried on first call or when `force_refresh` is set.
    pub async fn list_tables(&self, force_refresh: bool) -> Result<BTreeSet<String>> {
        if !force_refresh {
            let cached = self.tables.read().clone();
            if let Some(tables) = cached {
                return Ok(tables);
            }
        }

        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite\\_%' ESCAPE '\\'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::query("listing tables failed", e))?;

        let mut tables = BTreeSet::new();
        for row in rows {
            let name: String = row
                .try_get(0)
                .map_err(|e| Error::query("decoding table name failed", e))?;
            tables.insert(name);
        }

        tracing::debug!(count = tables.len(), "schema catalog refreshed");
        *self.tables.write() = Some(tables.clone());
        Ok(tables)
    }

    /// Whether the cached list knows `table`. Does not refresh a populated cache.
    pub async fn contains(&self, table: &str) -> Result<bool> {
        Ok(self.list_tables(false).await?.contains(table))
    }

    /// Drops the cached list; the next call re-discovers it.
    pub fn invalidate(&self) {
        *self.tables.write() = None;
    }

    /// columns_of
    ///
    /// Column metadata in declaration order. An unknown table yields an empty
    /// list: callers treat that as "no constraints known".
    pub async fn columns_of(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        let rows = sqlx::query(
            "SELECT name, type, \"notnull\", dflt_value FROM pragma_table_info(?1) ORDER BY cid",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::query(format!("reading columns of {table} failed"), e))?;

        rows.iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_get("name")?,
                    declared_type: row.try_get("type")?,
                    required: row.try_get::<i64, _>("notnull")? > 0,
                    default: row.try_get("dflt_value")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| Error::query(format!("decoding columns of {table} failed"), e))
    }
}
