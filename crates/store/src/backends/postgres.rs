//! PostgreSQL backend
//!
//! The engine is synchronous, so the store owns a current-thread tokio
//! runtime and blocks on each sqlx call. One dedicated connection is used
//! for the whole run: session-level advisory locks live on it.

use sqlx::{Connection, PgConnection};
use std::io::ErrorKind;
use tokio::runtime::{Builder, Runtime};

use schemig_core::{ConnectionIdentity, StoreError, StoreResult};

use crate::security::quoted_identifier;
use crate::store::Store;

/// Store backed by a single PostgreSQL connection
pub struct PgStore {
    runtime: Runtime,
    conn: PgConnection,
}

impl PgStore {
    /// Connect to the database named by `identity`.
    ///
    /// Refused connections surface as transient errors so callers can retry
    /// while the database is still starting.
    pub fn connect(identity: &ConnectionIdentity) -> StoreResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Unsupported(format!("Failed to start I/O runtime: {}", e)))?;

        tracing::debug!("Connecting to {}", identity);
        let conn = runtime
            .block_on(PgConnection::connect(identity.as_secret_str()))
            .map_err(map_sqlx_error)?;

        Ok(Self { runtime, conn })
    }
}

impl Store for PgStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    fn execute_batch(&mut self, statements: &[String]) -> StoreResult<()> {
        let Self { runtime, conn } = self;
        runtime
            .block_on(async {
                let mut transaction = conn.begin().await?;
                for statement in statements {
                    sqlx::query(statement.as_str()).execute(&mut *transaction).await?;
                }
                transaction.commit().await
            })
            .map_err(map_sqlx_error)
    }

    fn table_exists(&mut self, table: &str) -> StoreResult<bool> {
        let Self { runtime, conn } = self;
        runtime
            .block_on(
                sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
                    .bind(table)
                    .fetch_one(&mut *conn),
            )
            .map_err(map_sqlx_error)
    }

    fn read_version_row(&mut self, table: &str, module: &str) -> StoreResult<Option<i64>> {
        let sql = select_version_sql(table)?;
        if !self.table_exists(table)? {
            return Ok(None);
        }

        let Self { runtime, conn } = self;
        runtime
            .block_on(
                sqlx::query_scalar::<_, i64>(&sql)
                    .bind(module)
                    .fetch_optional(&mut *conn),
            )
            .map_err(map_sqlx_error)
    }

    fn write_version_row(&mut self, table: &str, module: &str, version: i64) -> StoreResult<()> {
        let create_sql = create_version_table_sql(table)?;
        let upsert_sql = upsert_version_sql(table)?;

        let Self { runtime, conn } = self;
        runtime
            .block_on(async {
                let mut transaction = conn.begin().await?;
                sqlx::query(&create_sql).execute(&mut *transaction).await?;
                sqlx::query(&upsert_sql)
                    .bind(module)
                    .bind(version)
                    .execute(&mut *transaction)
                    .await?;
                transaction.commit().await
            })
            .map_err(map_sqlx_error)
    }

    fn read_key(&mut self, table: &str, key: &str) -> StoreResult<Option<String>> {
        let sql = select_key_sql(table)?;
        if !self.table_exists(table)? {
            return Ok(None);
        }

        let Self { runtime, conn } = self;
        runtime
            .block_on(
                sqlx::query_scalar::<_, String>(&sql)
                    .bind(key)
                    .fetch_optional(&mut *conn),
            )
            .map_err(map_sqlx_error)
    }

    fn write_key(&mut self, table: &str, key: &str, value: &str) -> StoreResult<()> {
        let create_sql = create_key_table_sql(table)?;
        let upsert_sql = upsert_key_sql(table)?;

        let Self { runtime, conn } = self;
        runtime
            .block_on(async {
                let mut transaction = conn.begin().await?;
                sqlx::query(&create_sql).execute(&mut *transaction).await?;
                sqlx::query(&upsert_sql)
                    .bind(key)
                    .bind(value)
                    .execute(&mut *transaction)
                    .await?;
                transaction.commit().await
            })
            .map_err(map_sqlx_error)
    }

    fn try_lock(&mut self, name: &str) -> StoreResult<bool> {
        let Self { runtime, conn } = self;
        runtime
            .block_on(
                sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock(hashtext($1))")
                    .bind(name)
                    .fetch_one(&mut *conn),
            )
            .map_err(map_sqlx_error)
    }

    fn unlock(&mut self, name: &str) -> StoreResult<()> {
        let Self { runtime, conn } = self;
        let released = runtime
            .block_on(
                sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock(hashtext($1))")
                    .bind(name)
                    .fetch_one(&mut *conn),
            )
            .map_err(map_sqlx_error)?;

        if !released {
            tracing::warn!("Advisory lock '{}' was not held by this session", name);
        }
        Ok(())
    }
}

/// SQL to create a `(module, version)` marker table
fn create_version_table_sql(table: &str) -> StoreResult<String> {
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    \
            module VARCHAR(64) PRIMARY KEY,\n    \
            version BIGINT NOT NULL,\n    \
            updated_at TIMESTAMPTZ NOT NULL DEFAULT now()\n\
        )",
        quoted_identifier(table)?
    ))
}

fn upsert_version_sql(table: &str) -> StoreResult<String> {
    Ok(format!(
        "INSERT INTO {} (module, version, updated_at) VALUES ($1, $2, now()) \
         ON CONFLICT (module) DO UPDATE SET version = EXCLUDED.version, updated_at = now()",
        quoted_identifier(table)?
    ))
}

fn select_version_sql(table: &str) -> StoreResult<String> {
    Ok(format!(
        "SELECT version FROM {} WHERE module = $1",
        quoted_identifier(table)?
    ))
}

/// SQL to create a `(key, value)` table
fn create_key_table_sql(table: &str) -> StoreResult<String> {
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    \
            key VARCHAR(255) PRIMARY KEY,\n    \
            value TEXT NOT NULL\n\
        )",
        quoted_identifier(table)?
    ))
}

fn upsert_key_sql(table: &str) -> StoreResult<String> {
    Ok(format!(
        "INSERT INTO {} (key, value) VALUES ($1, $2) \
         ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
        quoted_identifier(table)?
    ))
}

fn select_key_sql(table: &str) -> StoreResult<String> {
    Ok(format!(
        "SELECT value FROM {} WHERE key = $1",
        quoted_identifier(table)?
    ))
}

/// Map a sqlx error onto the engine's transient/fatal classes
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Io(io) => classify_io(io),
        sqlx::Error::PoolTimedOut => StoreError::Timeout(err.to_string()),
        sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            StoreError::ConnectionReset(err.to_string())
        }
        sqlx::Error::Database(db) => classify_sqlstate(db.code().as_deref(), db.message()),
        _ => StoreError::Query(err.to_string()),
    }
}

fn classify_io(err: &std::io::Error) -> StoreError {
    match err.kind() {
        ErrorKind::ConnectionRefused | ErrorKind::NotConnected | ErrorKind::AddrNotAvailable => {
            StoreError::Unavailable(err.to_string())
        }
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::UnexpectedEof => StoreError::ConnectionReset(err.to_string()),
        ErrorKind::TimedOut => StoreError::Timeout(err.to_string()),
        _ => StoreError::Query(err.to_string()),
    }
}

/// Classify a server error by SQLSTATE
fn classify_sqlstate(code: Option<&str>, message: &str) -> StoreError {
    match code {
        // Class 08: connection exception
        Some(code) if code.starts_with("08") => StoreError::ConnectionReset(format!("{} (SQLSTATE {})", message, code)),
        // cannot_connect_now: the server is starting up or in recovery
        Some("57P03") => StoreError::StartingUp(message.to_string()),
        Some(code @ ("57P01" | "57P02")) => {
            StoreError::ConnectionReset(format!("{} (SQLSTATE {})", message, code))
        }
        Some("53300") => StoreError::Unavailable(message.to_string()),
        Some(code) => StoreError::Query(format!("{} (SQLSTATE {})", message, code)),
        None => StoreError::Query(message.to_string()),
    }
}
