use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{
    Column, Row, Sqlite, SqlitePool, TypeInfo, ValueRef,
    query::Query,
    sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};

use crate::catalog::SchemaCatalog;
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::models::{ColumnInfo, EntitySchema, Filter, Record, Value};
use crate::query::{self, Binding, ParamNames, RESERVED_COLUMNS, quote_ident};

/// Persistence Trait
///
/// The CRUD contract repositories are written against. Every operation on a
/// table requires the table to be known to the schema catalog; unknown tables
/// fail with `NotFound`.
///
/// Store failures are logged with the native diagnostic and surface as
/// `Error::Query` (reads) or `Error::Persistence` (writes).
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Creates `name` if absent and refreshes the catalog.
    async fn create_table(&self, name: &str, schema: &EntitySchema) -> Result<()>;

    async fn list_tables(&self, force_refresh: bool) -> Result<BTreeSet<String>>;
    async fn columns_of(&self, table: &str) -> Result<Vec<ColumnInfo>>;

    async fn count(&self, table: &str, filter: &Filter) -> Result<i64>;
    // None when no row matches.
    async fn get(&self, table: &str, id: i64) -> Result<Option<Record>>;
    // `limit <= 0` is unbounded, `offset <= 0` is no offset, `order` is passed through verbatim.
    async fn select(
        &self,
        table: &str,
        offset: i64,
        limit: i64,
        order: &str,
        filter: &Filter,
    ) -> Result<Vec<Record>>;
    async fn select_query(&self, sql: &str, params: &[Binding]) -> Result<Vec<Record>>;

    async fn insert(&self, table: &str, data: Record) -> Result<i64>;
    // `id` and `created` are never overwritten; `updated` is always refreshed.
    async fn update(&self, table: &str, id: i64, data: Record) -> Result<u64>;
    async fn update_all(&self, table: &str, data: Record, condition: &Filter) -> Result<u64>;
    async fn delete(&self, table: &str, id: i64) -> Result<u64>;
    async fn delete_all(&self, table: &str, condition: &Filter) -> Result<u64>;
}

/// PersistenceState
///
/// The shared handle repositories and the application state hold.
pub type PersistenceState = Arc<dyn Persistence>;

/// SqliteEngine
///
/// The `Persistence` implementation over a single SQLite connection. The pool
/// is capped at one connection; concurrent writers wait on the store's busy
/// timeout instead of queueing here.
pub struct SqliteEngine {
    pool: SqlitePool,
    catalog: Arc<SchemaCatalog>,
}

impl SqliteEngine {
    pub fn new(pool: SqlitePool, catalog: Arc<SchemaCatalog>) -> Self {
        Self { pool, catalog }
    }

    /// Opens the store named by `config.db_url`.
    pub async fn connect(config: &AppConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.db_url)
            .map_err(|e| Error::persistence("invalid store connection string", e))?
            .create_if_missing(true)
            .busy_timeout(config.busy_timeout);

        // One long-lived connection: in-memory stores vanish with it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::persistence("connecting to the store failed", e))?;

        tracing::info!(db_url = %config.db_url, "store connected");

        let catalog = Arc::new(SchemaCatalog::new(pool.clone()));
        Ok(Self::new(pool, catalog))
    }

    /// A private in-memory store, mainly for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(&AppConfig::default()).await
    }

    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn require_table(&self, table: &str) -> Result<()> {
        if self.catalog.contains(table).await? {
            Ok(())
        } else {
            Err(Error::NotFound(format!("table {table} does not exist")))
        }
    }

    async fn fetch_records(&self, sql: &str, bindings: &[Binding], context: &str) -> Result<Vec<Record>> {
        let sql = query::expand_named(sql, bindings)?;
        tracing::trace!(sql = %sql, params = bindings.len(), "select");
        let rows = bind_all(sqlx::query(&sql), bindings)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::query(context, e))?;
        rows.iter()
            .map(decode_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::query(context, e))
    }

    async fn execute(&self, sql: &str, bindings: &[Binding], context: &str) -> Result<u64> {
        let sql = query::expand_named(sql, bindings)?;
        tracing::trace!(sql = %sql, params = bindings.len(), "execute");
        let result = bind_all(sqlx::query(&sql), bindings)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::persistence(context, e))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Persistence for SqliteEngine {
    async fn create_table(&self, name: &str, schema: &EntitySchema) -> Result<()> {
        if schema.is_empty() {
            return Err(Error::Schema(format!("table {name} declares no columns")));
        }
        if let Some(reserved) = schema.names().find(|c| RESERVED_COLUMNS.contains(c)) {
            return Err(Error::Schema(format!(
                "table {name} redeclares reserved column {reserved}"
            )));
        }

        let sql = query::create_table_sql(name, schema)?;
        tracing::debug!(table = %name, sql = %sql, "create table");
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::persistence(format!("creating table {name} failed"), e))?;

        self.catalog.list_tables(true).await?;
        Ok(())
    }

    async fn list_tables(&self, force_refresh: bool) -> Result<BTreeSet<String>> {
        self.catalog.list_tables(force_refresh).await
    }

    async fn columns_of(&self, table: &str) -> Result<Vec<ColumnInfo>> {
        self.catalog.columns_of(table).await
    }

    async fn count(&self, table: &str, filter: &Filter) -> Result<i64> {
        self.require_table(table).await?;

        let clause = query::build_where(filter);
        let mut sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause.sql);
        }
        let sql = query::expand_named(&sql, &clause.bindings)?;

        let row = bind_all(sqlx::query(&sql), &clause.bindings)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::query(format!("counting {table} failed"), e))?;
        row.try_get::<i64, _>(0)
            .map_err(|e| Error::query(format!("counting {table} failed"), e))
    }

    async fn get(&self, table: &str, id: i64) -> Result<Option<Record>> {
        self.require_table(table).await?;

        let sql = format!("SELECT * FROM {} WHERE \"id\" = :id", quote_ident(table));
        let bindings = [Binding::new("id", id)];
        let mut records = self
            .fetch_records(&sql, &bindings, &format!("reading {table} #{id} failed"))
            .await?;
        Ok(if records.is_empty() {
            None
        } else {
            Some(records.swap_remove(0))
        })
    }

    async fn select(
        &self,
        table: &str,
        offset: i64,
        limit: i64,
        order: &str,
        filter: &Filter,
    ) -> Result<Vec<Record>> {
        self.require_table(table).await?;

        let clause = query::build_where(filter);
        let mut sql = format!("SELECT * FROM {}", quote_ident(table));
        if !clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clause.sql);
        }
        if !order.trim().is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        if limit > 0 {
            sql.push_str(&format!(" LIMIT {limit}"));
        } else if offset > 0 {
            sql.push_str(" LIMIT -1");
        }
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        self.fetch_records(&sql, &clause.bindings, &format!("selecting from {table} failed"))
            .await
    }

    async fn select_query(&self, sql: &str, params: &[Binding]) -> Result<Vec<Record>> {
        self.fetch_records(sql, params, "raw query failed").await
    }

    async fn insert(&self, table: &str, mut data: Record) -> Result<i64> {
        self.require_table(table).await?;
        tracing::trace!(table = %table, "insert");

        data.remove("id");
        let now = now_timestamp();
        if !data.contains("created") {
            data.insert("created", now.clone());
        }
        if !data.contains("updated") {
            data.insert("updated", now);
        }

        let mut names = ParamNames::new();
        let mut columns = Vec::with_capacity(data.len());
        let mut placeholders = Vec::with_capacity(data.len());
        let mut bindings = Vec::with_capacity(data.len());
        for (column, value) in data {
            let name = names.claim(&query::param_name(&column));
            columns.push(quote_ident(&column));
            placeholders.push(format!(":{name}"));
            bindings.push(Binding::new(name, value));
        }
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            placeholders.join(", ")
        );
        let sql = query::expand_named(&sql, &bindings)?;

        let result = bind_all(sqlx::query(&sql), &bindings)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::persistence(format!("insert into {table} failed"), e))?;
        Ok(result.last_insert_rowid())
    }

    async fn update(&self, table: &str, id: i64, data: Record) -> Result<u64> {
        self.require_table(table).await?;
        tracing::trace!(table = %table, id, "update");

        let (set_sql, mut bindings) = set_clause(data);
        bindings.push(Binding::new("where_id", id));
        let sql = format!(
            "UPDATE {} SET {set_sql} WHERE \"id\" = :where_id",
            quote_ident(table)
        );
        self.execute(&sql, &bindings, &format!("update of {table} #{id} failed"))
            .await
    }

    async fn update_all(&self, table: &str, data: Record, condition: &Filter) -> Result<u64> {
        self.require_table(table).await?;
        tracing::trace!(table = %table, "update all");

        let clause = query::build_where_prefixed(condition, "where_");
        if clause.is_empty() {
            return Err(Error::Schema(format!(
                "bulk update of {table} needs a condition"
            )));
        }
        let (set_sql, mut bindings) = set_clause(data);
        let sql = format!(
            "UPDATE {} SET {set_sql} WHERE {}",
            quote_ident(table),
            clause.sql
        );
        bindings.extend(clause.bindings);
        self.execute(&sql, &bindings, &format!("bulk update of {table} failed"))
            .await
    }

    async fn delete(&self, table: &str, id: i64) -> Result<u64> {
        self.require_table(table).await?;
        tracing::trace!(table = %table, id, "delete");

        let sql = format!("DELETE FROM {} WHERE \"id\" = :id", quote_ident(table));
        self.execute(
            &sql,
            &[Binding::new("id", id)],
            &format!("delete of {table} #{id} failed"),
        )
        .await
    }

    async fn delete_all(&self, table: &str, condition: &Filter) -> Result<u64> {
        self.require_table(table).await?;
        tracing::trace!(table = %table, "delete all");

        let clause = query::build_where(condition);
        if clause.is_empty() {
            return Err(Error::Schema(format!(
                "bulk delete from {table} needs a condition"
            )));
        }
        let sql = format!("DELETE FROM {} WHERE {}", quote_ident(table), clause.sql);
        self.execute(&sql, &clause.bindings, &format!("bulk delete from {table} failed"))
            .await
    }
}

/// Current time in the stored timestamp format. Microsecond precision keeps
/// successive writes strictly ordered.
pub fn now_timestamp() -> String {
    Utc::now().format("%Y-%m-%d %H:%M:%S%.6f").to_string()
}

/// `SET` clause for update paths. `id` and `created` are dropped and `updated`
/// is always refreshed. Bindings are prefixed with `set_` so they cannot collide
/// with `where_` condition bindings.
fn set_clause(mut data: Record) -> (String, Vec<Binding>) {
    data.remove("id");
    data.remove("created");
    data.insert("updated", now_timestamp());

    let mut names = ParamNames::new();
    let mut parts = Vec::with_capacity(data.len());
    let mut bindings = Vec::with_capacity(data.len());
    for (column, value) in data {
        let name = names.claim(&format!("set_{}", query::param_name(&column)));
        parts.push(format!("{} = :{name}", quote_ident(&column)));
        bindings.push(Binding::new(name, value));
    }
    (parts.join(", "), bindings)
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    bindings: &[Binding],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for binding in bindings {
        query = match &binding.value {
            Value::Null => query.bind(Option::<i64>::None),
            Value::Integer(i) => query.bind(*i),
            Value::Real(r) => query.bind(*r),
            Value::Text(s) => query.bind(s.clone()),
        };
    }
    query
}

/// Decodes a row by the storage class of each cell rather than the declared
/// column type.
fn decode_row(row: &SqliteRow) -> std::result::Result<Record, sqlx::Error> {
    let mut record = Record::new();
    for column in row.columns() {
        let idx = column.ordinal();
        let raw = row.try_get_raw(idx)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get_unchecked::<i64, _>(idx)?),
                "REAL" => Value::Real(row.try_get_unchecked::<f64, _>(idx)?),
                "BLOB" => Value::Text(
                    String::from_utf8_lossy(&row.try_get_unchecked::<Vec<u8>, _>(idx)?)
                        .into_owned(),
                ),
                _ => Value::Text(row.try_get_unchecked::<String, _>(idx)?),
            }
        };
        record.insert(column.name(), value);
    }
    Ok(record)
}
