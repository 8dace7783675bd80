//! Database access for the chat pipeline.
//!
//! This module handles:
//! - Pooled connections per distinct connection descriptor, shared by concurrent runs
//! - Liveness checks before heavier use
//! - Schema introspection (tables, columns, nullability)
//! - Execution of extracted queries with results converted to JSON rows
//!
//! Every database round trip is bounded by a timeout that is also enforced
//! by the engine, so a timed-out statement never keeps a pooled connection
//! busy. Sessions are opened read-only unless configured otherwise.

use crate::application::use_cases::sql_extractor::ExtractedQuery;
use crate::domain::db_connection::{ConnectionDescriptor, DbKind};
use crate::domain::error::DbError;
use crate::domain::pipeline::{QueryResult, Row};
use crate::domain::schema::{ColumnDescriptor, SchemaSnapshot};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::postgres::types::{PgInterval, PgMoney};
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Postgres, Row as _, Sqlite, TypeInfo, ValueRef};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// SQLite VM instructions between deadline checks.
const SQLITE_PROGRESS_OPS: i32 = 1_000;

/// Extra time the engine gets to cancel a statement on its own before the
/// connection is abandoned.
const DEADLINE_GRACE: Duration = Duration::from_secs(2);

/// Configuration for the connection manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConnectionConfig {
    /// Maximum connections in each pool
    pub max_connections: u32,
    /// Connection and liveness timeout in seconds
    pub connect_timeout_secs: u64,
    /// Metadata and query timeout in seconds
    pub query_timeout_secs: u64,
    /// Idle timeout in seconds, for connections and for whole cached pools
    pub idle_timeout_secs: u64,
    /// Maximum number of cached pools; the least recently used one is closed
    /// when a new pool would exceed it
    pub max_pools: usize,
    /// Open sessions read-only so write statements are rejected by the engine
    pub read_only: bool,
    /// Directory SQLite database files must live in. SQLite connections are
    /// refused when unset.
    pub sqlite_root: Option<PathBuf>,
}

impl Default for DbConnectionConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            connect_timeout_secs: 10,
            query_timeout_secs: 30,
            idle_timeout_secs: 300,
            max_pools: 32,
            read_only: true,
            sqlite_root: None,
        }
    }
}

/// Database operations the pipeline depends on.
#[async_trait]
pub trait SqlDatabase: Send + Sync {
    /// Connect-and-discard check; failures are `ConnectionFailed`.
    async fn check_liveness(&self, conn: &ConnectionDescriptor) -> Result<(), DbError>;

    async fn snapshot_schema(&self, conn: &ConnectionDescriptor)
        -> Result<SchemaSnapshot, DbError>;

    async fn execute(
        &self,
        conn: &ConnectionDescriptor,
        query: &ExtractedQuery,
    ) -> Result<QueryResult, DbError>;
}

#[derive(Clone)]
enum DbPool {
    Postgres(PgPool),
    Sqlite(SqlitePool),
}

impl DbPool {
    fn is_closed(&self) -> bool {
        match self {
            DbPool::Postgres(pool) => pool.is_closed(),
            DbPool::Sqlite(pool) => pool.is_closed(),
        }
    }

    async fn close(&self) {
        match self {
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::Sqlite(pool) => pool.close().await,
        }
    }
}

/// Identity of a pool. The password only enters as a digest so the cache
/// never holds it in clear.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    engine: DbKind,
    host: String,
    port: u16,
    database: String,
    username: String,
    password_fingerprint: String,
}

impl PoolKey {
    fn from_descriptor(conn: &ConnectionDescriptor) -> Self {
        Self {
            engine: conn.engine,
            host: conn.host.clone(),
            port: conn.port,
            database: conn.database.clone(),
            username: conn.username.clone(),
            password_fingerprint: hex::encode(Sha256::digest(conn.password.as_bytes())),
        }
    }
}

struct PoolEntry {
    pool: DbPool,
    /// Milliseconds since the manager was created
    last_used: AtomicU64,
}

/// Manages database pools shared across pipeline runs
pub struct DbConnectionManager {
    pools: Arc<RwLock<HashMap<PoolKey, PoolEntry>>>,
    config: DbConnectionConfig,
    started: Instant,
}

impl DbConnectionManager {
    /// Create a new connection manager with default configuration
    pub fn new() -> Self {
        Self::with_config(DbConnectionConfig::default())
    }

    /// Create a new connection manager with custom configuration
    pub fn with_config(config: DbConnectionConfig) -> Self {
        Self {
            pools: Arc::new(RwLock::new(HashMap::new())),
            config,
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &DbConnectionConfig {
        &self.config
    }

    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn connect_budget(&self) -> Duration {
        Duration::from_secs(self.config.connect_timeout_secs)
    }

    fn query_budget(&self) -> Duration {
        Duration::from_secs(self.config.query_timeout_secs)
    }

    fn build_pg_options(&self, conn: &ConnectionDescriptor) -> Result<PgConnectOptions, DbError> {
        if conn.host.trim().is_empty() {
            return Err(DbError::ConnectionFailed(
                "PostgreSQL host is required".to_string(),
            ));
        }
        if conn.username.trim().is_empty() {
            return Err(DbError::ConnectionFailed(
                "PostgreSQL username is required".to_string(),
            ));
        }

        // The server cancels statements that outlive the query timeout.
        let mut session = vec![(
            "statement_timeout",
            self.config.query_timeout_secs.saturating_mul(1000).to_string(),
        )];
        if self.config.read_only {
            session.push(("default_transaction_read_only", "on".to_string()));
        }

        Ok(PgConnectOptions::new()
            .host(&conn.host)
            .port(conn.port)
            .database(&conn.database)
            .username(&conn.username)
            .password(&conn.password)
            .options(session))
    }

    /// Resolves a SQLite database against the configured root and refuses
    /// anything that lands outside it.
    async fn resolve_sqlite_path(&self, conn: &ConnectionDescriptor) -> Result<PathBuf, DbError> {
        let root = self.config.sqlite_root.as_ref().ok_or_else(|| {
            DbError::ConnectionFailed(
                "SQLite connections are disabled; set database.sqlite_root to allow them"
                    .to_string(),
            )
        })?;
        let root = tokio::fs::canonicalize(root).await.map_err(|e| {
            DbError::ConnectionFailed(format!(
                "SQLite root {} is not accessible: {}",
                root.display(),
                e
            ))
        })?;
        let path = tokio::fs::canonicalize(root.join(&conn.database))
            .await
            .map_err(|e| {
                DbError::ConnectionFailed(format!(
                    "SQLite database {} is not accessible: {}",
                    conn.database, e
                ))
            })?;

        if !path.starts_with(&root) {
            return Err(DbError::ConnectionFailed(format!(
                "SQLite database {} is outside the allowed directory",
                conn.database
            )));
        }
        Ok(path)
    }

    async fn build_sqlite_options(
        &self,
        conn: &ConnectionDescriptor,
    ) -> Result<SqliteConnectOptions, DbError> {
        let path = self.resolve_sqlite_path(conn).await?;
        Ok(SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .read_only(self.config.read_only))
    }

    async fn create_pool(&self, conn: &ConnectionDescriptor) -> Result<DbPool, DbError> {
        let connect_timeout = self.connect_budget();
        let idle_timeout = Duration::from_secs(self.config.idle_timeout_secs);

        let pool = match conn.engine {
            DbKind::Postgresql => {
                let options = self.build_pg_options(conn)?;
                let connect = PgPoolOptions::new()
                    .max_connections(self.config.max_connections)
                    .acquire_timeout(connect_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(options);
                DbPool::Postgres(self.connect_within(connect).await?)
            }
            DbKind::Sqlite => {
                let options = self.build_sqlite_options(conn).await?;
                let connect = SqlitePoolOptions::new()
                    .max_connections(self.config.max_connections)
                    .acquire_timeout(connect_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(options);
                DbPool::Sqlite(self.connect_within(connect).await?)
            }
        };

        info!(
            target_db = %conn.display_target(),
            read_only = self.config.read_only,
            "Created connection pool"
        );

        Ok(pool)
    }

    async fn connect_within<P>(
        &self,
        connect: impl Future<Output = Result<P, sqlx::Error>>,
    ) -> Result<P, DbError> {
        tokio::time::timeout(self.connect_budget(), connect)
            .await
            .map_err(|_| {
                DbError::ConnectionFailed(format!(
                    "Connection timed out after {} seconds",
                    self.config.connect_timeout_secs
                ))
            })?
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))
    }

    /// Get or create the pool for the given descriptor
    async fn get_pool(&self, conn: &ConnectionDescriptor) -> Result<DbPool, DbError> {
        self.evict_idle().await;
        let key = PoolKey::from_descriptor(conn);

        {
            let pools = self.pools.read().await;
            if let Some(entry) = pools.get(&key) {
                if !entry.pool.is_closed() {
                    entry.last_used.store(self.now_ms(), Ordering::Relaxed);
                    return Ok(entry.pool.clone());
                }
                warn!(
                    target_db = %conn.display_target(),
                    "Connection pool is closed, will recreate"
                );
            }
        }

        let pool = self.create_pool(conn).await?;

        let mut pools = self.pools.write().await;
        if let Some(existing) = pools.get(&key) {
            if !existing.pool.is_closed() {
                // Another run created the pool while we were connecting.
                existing.last_used.store(self.now_ms(), Ordering::Relaxed);
                let existing = existing.pool.clone();
                drop(pools);
                pool.close().await;
                return Ok(existing);
            }
        }
        pools.insert(
            key.clone(),
            PoolEntry {
                pool: pool.clone(),
                last_used: AtomicU64::new(self.now_ms()),
            },
        );

        let mut evicted = Vec::new();
        while pools.len() > self.config.max_pools.max(1) {
            let oldest = pools
                .iter()
                .filter(|(k, _)| **k != key)
                .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                .map(|(k, _)| k.clone());
            match oldest.and_then(|k| pools.remove(&k)) {
                Some(entry) => evicted.push(entry.pool),
                None => break,
            }
        }
        drop(pools);

        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "Pool cache full, closed least recently used pools");
            close_in_background(evicted);
        }
        Ok(pool)
    }

    /// Closes and forgets pools unused for longer than the idle timeout.
    /// Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        let idle_ms = self.config.idle_timeout_secs.saturating_mul(1000);
        let now = self.now_ms();
        let is_stale = |entry: &PoolEntry| {
            entry.pool.is_closed()
                || now.saturating_sub(entry.last_used.load(Ordering::Relaxed)) >= idle_ms
        };

        if !self.pools.read().await.values().any(|entry| is_stale(entry)) {
            return 0;
        }

        let mut pools = self.pools.write().await;
        let stale: Vec<PoolKey> = pools
            .iter()
            .filter(|(_, entry)| is_stale(*entry))
            .map(|(key, _)| key.clone())
            .collect();
        let evicted: Vec<DbPool> = stale
            .iter()
            .filter_map(|key| pools.remove(key))
            .map(|entry| entry.pool)
            .collect();
        drop(pools);

        let count = evicted.len();
        if count > 0 {
            info!(evicted = count, "Evicted idle connection pools");
            close_in_background(evicted);
        }
        count
    }

    /// Runs a Postgres statement on a dedicated connection. On timeout the
    /// connection is detached from the pool instead of being returned busy.
    async fn fetch_pg<'q>(
        &self,
        pool: &PgPool,
        query: Query<'q, Postgres, PgArguments>,
        what: &str,
        budget: Duration,
        stage_error: fn(String) -> DbError,
    ) -> Result<Vec<PgRow>, DbError> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        match tokio::time::timeout(budget + DEADLINE_GRACE, query.fetch_all(&mut *conn)).await {
            Ok(Ok(rows)) => Ok(rows),
            Ok(Err(e)) if is_statement_timeout(&e) => Err(timed_out(what, budget, stage_error)),
            Ok(Err(e)) => Err(classify_sqlx_error(e, stage_error)),
            Err(_) => {
                warn!(what, "Statement outlived its deadline, dropping connection");
                drop(conn.detach());
                Err(timed_out(what, budget, stage_error))
            }
        }
    }

    /// Runs a SQLite statement on a dedicated connection with a progress
    /// handler that interrupts it once the budget is spent.
    async fn fetch_sqlite<'q>(
        &self,
        pool: &SqlitePool,
        query: Query<'q, Sqlite, SqliteArguments<'q>>,
        what: &str,
        budget: Duration,
        stage_error: fn(String) -> DbError,
    ) -> Result<Vec<SqliteRow>, DbError> {
        let mut conn = pool
            .acquire()
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        let deadline = Instant::now() + budget;
        conn.lock_handle()
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?
            .set_progress_handler(SQLITE_PROGRESS_OPS, move || Instant::now() < deadline);

        match tokio::time::timeout(budget + DEADLINE_GRACE, query.fetch_all(&mut *conn)).await {
            Ok(result) => {
                // A connection that still carries the deadline must not be reused.
                let cleared = match conn.lock_handle().await {
                    Ok(mut handle) => {
                        handle.remove_progress_handler();
                        true
                    }
                    Err(_) => false,
                };
                if !cleared {
                    drop(conn.detach());
                }

                match result {
                    Ok(rows) => Ok(rows),
                    Err(e) if is_interrupted(&e) => Err(timed_out(what, budget, stage_error)),
                    Err(e) => Err(classify_sqlx_error(e, stage_error)),
                }
            }
            Err(_) => {
                warn!(what, "Statement outlived its deadline, dropping connection");
                drop(conn.detach());
                Err(timed_out(what, budget, stage_error))
            }
        }
    }

    async fn list_pg_tables(&self, pool: &PgPool) -> Result<Vec<String>, DbError> {
        let query = r#"
            SELECT table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_schema = 'public'
                AND table_type = 'BASE TABLE'
            ORDER BY table_name
        "#;

        let rows = self
            .fetch_pg(
                pool,
                sqlx::query(query),
                "Table listing",
                self.query_budget(),
                DbError::SchemaIntrospectionFailed,
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("table_name"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                DbError::SchemaIntrospectionFailed(format!("Failed to parse table_name: {}", e))
            })
    }

    async fn list_pg_columns(
        &self,
        pool: &PgPool,
        table_name: &str,
    ) -> Result<Vec<ColumnDescriptor>, DbError> {
        let query = r#"
            SELECT
                column_name::text AS column_name,
                data_type::text AS data_type,
                is_nullable = 'YES' AS is_nullable
            FROM information_schema.columns
            WHERE table_schema = 'public' AND table_name = $1
            ORDER BY ordinal_position
        "#;

        let rows = self
            .fetch_pg(
                pool,
                sqlx::query(query).bind(table_name),
                "Column listing",
                self.query_budget(),
                DbError::SchemaIntrospectionFailed,
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            columns.push(ColumnDescriptor {
                name: row.try_get("column_name").map_err(parse_error("column_name"))?,
                data_type: row.try_get("data_type").map_err(parse_error("data_type"))?,
                nullable: row.try_get("is_nullable").map_err(parse_error("is_nullable"))?,
            });
        }
        Ok(columns)
    }

    async fn list_sqlite_tables(&self, pool: &SqlitePool) -> Result<Vec<String>, DbError> {
        let query = r#"
            SELECT name
            FROM sqlite_master
            WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
            ORDER BY name
        "#;

        let rows = self
            .fetch_sqlite(
                pool,
                sqlx::query(query),
                "Table listing",
                self.query_budget(),
                DbError::SchemaIntrospectionFailed,
            )
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DbError::SchemaIntrospectionFailed(format!("Failed to parse name: {}", e)))
    }

    async fn list_sqlite_columns(
        &self,
        pool: &SqlitePool,
        table_name: &str,
    ) -> Result<Vec<ColumnDescriptor>, DbError> {
        let query = r#"SELECT name, type, "notnull" AS not_null FROM pragma_table_info(?1) ORDER BY cid"#;

        let rows = self
            .fetch_sqlite(
                pool,
                sqlx::query(query).bind(table_name),
                "Column listing",
                self.query_budget(),
                DbError::SchemaIntrospectionFailed,
            )
            .await?;

        let mut columns = Vec::with_capacity(rows.len());
        for row in rows {
            let declared: String = row.try_get("type").map_err(parse_error("type"))?;
            let not_null: i64 = row.try_get("not_null").map_err(parse_error("notnull"))?;
            columns.push(ColumnDescriptor {
                name: row.try_get("name").map_err(parse_error("name"))?,
                data_type: if declared.trim().is_empty() {
                    "ANY".to_string()
                } else {
                    declared
                },
                nullable: not_null == 0,
            });
        }
        Ok(columns)
    }

    /// Close all connection pools
    pub async fn close_all(&self) {
        let mut pools = self.pools.write().await;
        for (key, entry) in pools.drain() {
            info!(engine = ?key.engine, database = %key.database, "Closing connection pool");
            entry.pool.close().await;
        }
    }

    /// Number of cached pools
    pub async fn pool_count(&self) -> usize {
        self.pools.read().await.len()
    }
}

impl Default for DbConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SqlDatabase for DbConnectionManager {
    async fn check_liveness(&self, conn: &ConnectionDescriptor) -> Result<(), DbError> {
        let pool = self.get_pool(conn).await?;
        let health_check = "SELECT 1 AS health_check";
        let health_failed = |msg: String| {
            DbError::ConnectionFailed(format!("Connected but health check failed: {}", msg))
        };

        match &pool {
            DbPool::Postgres(pool) => {
                self.fetch_pg(
                    pool,
                    sqlx::query(health_check),
                    "Health check",
                    self.connect_budget(),
                    health_failed,
                )
                .await?;
            }
            DbPool::Sqlite(pool) => {
                self.fetch_sqlite(
                    pool,
                    sqlx::query(health_check),
                    "Health check",
                    self.connect_budget(),
                    health_failed,
                )
                .await?;
            }
        }

        debug!(target_db = %conn.display_target(), "Liveness check passed");
        Ok(())
    }

    async fn snapshot_schema(
        &self,
        conn: &ConnectionDescriptor,
    ) -> Result<SchemaSnapshot, DbError> {
        let pool = self.get_pool(conn).await?;
        let mut snapshot = SchemaSnapshot::new();

        match &pool {
            DbPool::Postgres(pool) => {
                for table in self.list_pg_tables(pool).await? {
                    let columns = self.list_pg_columns(pool, &table).await?;
                    snapshot = snapshot.with_table(table, columns);
                }
            }
            DbPool::Sqlite(pool) => {
                for table in self.list_sqlite_tables(pool).await? {
                    let columns = self.list_sqlite_columns(pool, &table).await?;
                    snapshot = snapshot.with_table(table, columns);
                }
            }
        }

        info!(
            target_db = %conn.display_target(),
            tables = snapshot.tables().len(),
            "Schema snapshot built"
        );

        Ok(snapshot)
    }

    async fn execute(
        &self,
        conn: &ConnectionDescriptor,
        query: &ExtractedQuery,
    ) -> Result<QueryResult, DbError> {
        let pool = self.get_pool(conn).await?;
        let sql = query.as_str();

        // Generated statements are one-off; keep them out of the statement cache.
        let result = match &pool {
            DbPool::Postgres(pool) => {
                let rows = self
                    .fetch_pg(
                        pool,
                        sqlx::query(sql).persistent(false),
                        "Query",
                        self.query_budget(),
                        DbError::QueryExecutionFailed,
                    )
                    .await?;
                rows_to_result(&rows, pg_column_value)
            }
            DbPool::Sqlite(pool) => {
                let rows = self
                    .fetch_sqlite(
                        pool,
                        sqlx::query(sql).persistent(false),
                        "Query",
                        self.query_budget(),
                        DbError::QueryExecutionFailed,
                    )
                    .await?;
                rows_to_result(&rows, sqlite_column_value)
            }
        }
        .map_err(DbError::QueryExecutionFailed)?;

        info!(
            target_db = %conn.display_target(),
            rows = result.row_count(),
            "Query executed"
        );

        Ok(result)
    }
}

fn close_in_background(pools: Vec<DbPool>) {
    for pool in pools {
        tokio::spawn(async move { pool.close().await });
    }
}

fn timed_out(what: &str, budget: Duration, stage_error: fn(String) -> DbError) -> DbError {
    stage_error(format!("{} timed out after {} seconds", what, budget.as_secs()))
}

/// Postgres `query_canceled`, raised when `statement_timeout` fires.
fn is_statement_timeout(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("57014"),
        _ => false,
    }
}

/// SQLite `SQLITE_INTERRUPT`, raised when the progress handler gives up.
fn is_interrupted(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.code().as_deref() == Some("9") || db.message().contains("interrupted")
        }
        _ => false,
    }
}

fn classify_sqlx_error(err: sqlx::Error, stage_error: fn(String) -> DbError) -> DbError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => DbError::ConnectionFailed(err.to_string()),
        other => stage_error(other.to_string()),
    }
}

fn parse_error(field: &'static str) -> impl Fn(sqlx::Error) -> DbError {
    move |e| DbError::SchemaIntrospectionFailed(format!("Failed to parse {}: {}", field, e))
}

fn rows_to_result<R, F>(rows: &[R], value_of: F) -> Result<QueryResult, String>
where
    R: sqlx::Row,
    F: Fn(&R, usize) -> Result<Value, String>,
{
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut map = Row::new();
        for (i, column) in row.columns().iter().enumerate() {
            map.insert(column.name().to_string(), value_of(row, i)?);
        }
        out.push(map);
    }

    Ok(QueryResult { columns, rows: out })
}

fn unsupported_column<R: sqlx::Row>(row: &R, index: usize, type_name: &str) -> String
where
    usize: sqlx::ColumnIndex<R>,
{
    format!(
        "Column {} has unsupported type {}; cast it to text in the query",
        row.column(index).name(),
        type_name
    )
}

fn number_or_string(text: String) -> Value {
    text.parse::<serde_json::Number>()
        .map(Value::Number)
        .unwrap_or(Value::String(text))
}

fn decimal_to_json(value: sqlx::types::BigDecimal) -> Value {
    number_or_string(value.to_string())
}

/// `money` is a fixed two-digit fraction of an i64 amount.
fn money_to_json(money: PgMoney) -> Value {
    let sign = if money.0 < 0 { "-" } else { "" };
    let cents = money.0.unsigned_abs();
    number_or_string(format!("{}{}.{:02}", sign, cents / 100, cents % 100))
}

/// ISO 8601 duration, e.g. `P1M2DT3600.5S`.
fn interval_to_json(interval: PgInterval) -> Value {
    let seconds = interval.microseconds as f64 / 1_000_000.0;
    Value::String(format!(
        "P{}M{}DT{}S",
        interval.months, interval.days, seconds
    ))
}

fn float_to_json(n: f64) -> Value {
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Extract a PostgreSQL column value as serde_json::Value
fn pg_column_value(row: &PgRow, index: usize) -> Result<Value, String> {
    let type_name = {
        let raw = row.try_get_raw(index).map_err(|e| e.to_string())?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_string()
    };

    // Try different types in order of likelihood
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(Value::String(v));
    }
    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<i32, _>(index) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<i16, _>(index) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<sqlx::types::BigDecimal, _>(index) {
        return Ok(decimal_to_json(v));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(float_to_json(v));
    }
    if let Ok(v) = row.try_get::<f32, _>(index) {
        return Ok(float_to_json(v as f64));
    }
    if let Ok(v) = row.try_get::<bool, _>(index) {
        return Ok(Value::Bool(v));
    }
    if let Ok(v) = row.try_get::<sqlx::types::Uuid, _>(index) {
        return Ok(Value::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
        return Ok(Value::String(v.to_rfc3339()));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(index) {
        return Ok(Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(index) {
        return Ok(Value::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<chrono::NaiveTime, _>(index) {
        return Ok(Value::String(v.to_string()));
    }
    if let Ok(v) = row.try_get::<PgInterval, _>(index) {
        return Ok(interval_to_json(v));
    }
    if let Ok(v) = row.try_get::<PgMoney, _>(index) {
        return Ok(money_to_json(v));
    }
    if let Ok(v) = row.try_get::<Value, _>(index) {
        return Ok(v);
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(Value::String(hex::encode(v)));
    }

    // One-dimensional arrays of the common element types
    if let Ok(v) = row.try_get::<Vec<String>, _>(index) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Vec<i64>, _>(index) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Vec<i32>, _>(index) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Vec<i16>, _>(index) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Vec<f64>, _>(index) {
        return Ok(Value::Array(v.into_iter().map(float_to_json).collect()));
    }
    if let Ok(v) = row.try_get::<Vec<bool>, _>(index) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<Vec<sqlx::types::Uuid>, _>(index) {
        return Ok(Value::from(
            v.iter().map(ToString::to_string).collect::<Vec<_>>(),
        ));
    }

    Err(unsupported_column(row, index, &type_name))
}

/// Extract a SQLite column value as serde_json::Value
fn sqlite_column_value(row: &SqliteRow, index: usize) -> Result<Value, String> {
    let type_name = {
        let raw = row.try_get_raw(index).map_err(|e| e.to_string())?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        raw.type_info().name().to_string()
    };

    if let Ok(v) = row.try_get::<i64, _>(index) {
        return Ok(Value::from(v));
    }
    if let Ok(v) = row.try_get::<f64, _>(index) {
        return Ok(float_to_json(v));
    }
    if let Ok(v) = row.try_get::<String, _>(index) {
        return Ok(Value::String(v));
    }
    if let Ok(v) = row.try_get::<Vec<u8>, _>(index) {
        return Ok(Value::String(hex::encode(v)));
    }

    Err(unsupported_column(row, index, &type_name))
}
