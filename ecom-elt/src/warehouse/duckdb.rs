//! Embedded DuckDB warehouse.
//!
//! The connection is synchronous, so every job runs on the blocking pool
//! behind a shared mutex. Loads and queries each run in one transaction; a
//! failed job leaves the previous table contents untouched.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use ::duckdb::{params, Connection};
use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{
    missing_columns, new_job_id, JobStats, LoadJob, QueryJob, Result, TableRef, Warehouse,
    WarehouseError, WriteDisposition,
};

/// Location string that selects an in-memory database.
pub const IN_MEMORY: &str = ":memory:";

/// Warehouse backed by a DuckDB database.
#[derive(Clone)]
pub struct DuckDbWarehouse {
    conn: Arc<Mutex<Connection>>,
    location: String,
}

impl fmt::Debug for DuckDbWarehouse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DuckDbWarehouse")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl DuckDbWarehouse {
    /// Opens (or creates) a database file; `:memory:` opens an in-memory one.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if the database cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.as_os_str() == IN_MEMORY {
            return Self::open_in_memory();
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| WarehouseError::Connection(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| WarehouseError::Connection(format!("{}: {e}", path.display())))?;

        info!(path = %path.display(), "Opened DuckDB warehouse");
        Ok(Self::from_connection(conn, path.display().to_string()))
    }

    /// Opens an in-memory database.
    ///
    /// # Errors
    ///
    /// Returns `Connection` if DuckDB cannot start.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WarehouseError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn, IN_MEMORY.to_string()))
    }

    fn from_connection(conn: Connection, location: String) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            location,
        }
    }

    /// The database file, or `:memory:`.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Runs `f` against the raw connection on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns `Query` with the DuckDB error message if `f` fails.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> ::duckdb::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.blocking(move |conn| f(conn).map_err(|e| WarehouseError::Query(e.to_string())))
            .await
    }

    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock();
            f(&mut guard)
        })
        .await
        .map_err(|e| WarehouseError::Internal(e.to_string()))?
    }
}

#[async_trait]
impl Warehouse for DuckDbWarehouse {
    async fn load_csv(&self, job: &LoadJob) -> Result<JobStats> {
        let started = Instant::now();
        let job_id = new_job_id();
        let destination = job.destination.to_string();
        let owned = job.clone();

        let rows = self.blocking(move |conn| load_blocking(conn, &owned)).await?;

        info!(
            job_id = %job_id,
            table = %destination,
            rows,
            write_disposition = %job.write_disposition,
            "Load job finished"
        );
        Ok(JobStats {
            job_id,
            destination: Some(destination),
            output_rows: Some(rows),
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn run_query(&self, job: &QueryJob) -> Result<JobStats> {
        let started = Instant::now();
        let job_id = new_job_id();
        let owned = job.clone();

        let rows = self.blocking(move |conn| query_blocking(conn, &owned)).await?;

        info!(
            job_id = %job_id,
            table = %job.destination.as_ref().map_or_else(String::new, ToString::to_string),
            rows = ?rows,
            "Query job finished"
        );
        Ok(JobStats {
            job_id,
            destination: job.destination.as_ref().map(ToString::to_string),
            output_rows: rows,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    async fn row_count(&self, table: &TableRef) -> Result<u64> {
        let table = table.clone();
        self.blocking(move |conn| {
            count_rows(conn, &table).map_err(|e| WarehouseError::Query(e.to_string()))
        })
        .await
    }

    async fn columns(&self, table: &TableRef) -> Result<Vec<String>> {
        let table = table.clone();
        self.blocking(move |conn| {
            table_columns(conn, &table).map_err(|e| WarehouseError::Query(e.to_string()))
        })
        .await
    }
}

fn load_blocking(conn: &mut Connection, job: &LoadJob) -> Result<u64> {
    let table = &job.destination;
    let load_err = |e: ::duckdb::Error| WarehouseError::Load {
        table: table.to_string(),
        message: e.to_string(),
    };

    if job.source_uris.is_empty() {
        return Err(WarehouseError::Load {
            table: table.to_string(),
            message: "no source files".to_string(),
        });
    }

    let source = format!("SELECT * FROM {}", read_csv_expr(job));
    let columns = describe_columns(conn, &source).map_err(load_err)?;
    let missing = missing_columns(&job.expected_columns, &columns);
    if !missing.is_empty() {
        return Err(WarehouseError::SchemaMismatch {
            table: table.to_string(),
            missing,
        });
    }

    let tx = conn.transaction().map_err(load_err)?;
    ensure_schema(&tx, &table.dataset).map_err(load_err)?;
    let exists = table_exists(&tx, table).map_err(load_err)?;
    let ident = table.sql_ident();

    let statement = match job.write_disposition {
        WriteDisposition::WriteAppend if exists => format!("INSERT INTO {ident} BY NAME {source};"),
        WriteDisposition::WriteEmpty if exists && count_rows(&tx, table).map_err(load_err)? > 0 => {
            return Err(WarehouseError::TableNotEmpty(table.to_string()));
        }
        _ => format!("CREATE OR REPLACE TABLE {ident} AS {source};"),
    };
    debug!(table = %table, sql = %statement, "Running load");
    tx.execute_batch(&statement).map_err(load_err)?;

    let rows = count_rows(&tx, table).map_err(load_err)?;
    tx.commit().map_err(load_err)?;
    Ok(rows)
}

fn query_blocking(conn: &mut Connection, job: &QueryJob) -> Result<Option<u64>> {
    let query_err = |e: ::duckdb::Error| WarehouseError::Query(e.to_string());

    let tx = conn.transaction().map_err(query_err)?;
    if let Some(dest) = &job.destination {
        ensure_schema(&tx, &dest.dataset).map_err(query_err)?;
    }
    tx.execute_batch(&job.sql).map_err(query_err)?;

    let rows = match &job.destination {
        Some(dest) => Some(count_rows(&tx, dest).map_err(query_err)?),
        None => None,
    };
    tx.commit().map_err(query_err)?;
    Ok(rows)
}

fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// `read_csv(...)` over the job's files.
fn read_csv_expr(job: &LoadJob) -> String {
    let files = job
        .source_uris
        .iter()
        .map(|uri| quote_literal(uri))
        .collect::<Vec<_>>()
        .join(", ");
    let header = job.skip_leading_rows > 0;
    let skip = job.skip_leading_rows.saturating_sub(1);
    // Without autodetect every column stays text.
    let all_varchar = !job.autodetect;

    format!(
        "read_csv([{files}], header = {header}, skip = {skip}, auto_detect = true, all_varchar = {all_varchar})"
    )
}

fn ensure_schema(conn: &Connection, dataset: &str) -> ::duckdb::Result<()> {
    conn.execute_batch(&format!("CREATE SCHEMA IF NOT EXISTS \"{dataset}\";"))
}

fn table_exists(conn: &Connection, table: &TableRef) -> ::duckdb::Result<bool> {
    conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_schema = ? AND table_name = ?",
        params![table.dataset, table.table],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| n > 0)
}

fn count_rows(conn: &Connection, table: &TableRef) -> ::duckdb::Result<u64> {
    conn.query_row(
        &format!("SELECT COUNT(*) FROM {}", table.sql_ident()),
        [],
        |row| row.get::<_, i64>(0),
    )
    .map(|n| u64::try_from(n).unwrap_or(0))
}

fn table_columns(conn: &Connection, table: &TableRef) -> ::duckdb::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT column_name FROM information_schema.columns \
         WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
    )?;
    let columns = stmt
        .query_map(params![table.dataset, table.table], |row| row.get::<_, String>(0))?
        .collect();
    columns
}

fn describe_columns(conn: &Connection, select_sql: &str) -> ::duckdb::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("DESCRIBE {select_sql}"))?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect();
    columns
}
