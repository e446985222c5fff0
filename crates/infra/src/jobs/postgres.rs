//! Postgres-backed job repository.
//!
//! Expected shape of the dataruns table (extra columns are ignored):
//!
//! ```sql
//! CREATE TABLE dataruns (
//!     id        BIGINT PRIMARY KEY,
//!     status    TEXT NOT NULL,          -- pending | running | complete | error
//!     end_time  TIMESTAMPTZ NULL
//! );
//! ```
//!
//! Close variants work too: any integer `id`, a `VARCHAR` or native enum
//! `status` (with the lowercase labels above), and `TIMESTAMP` without time
//! zone for `end_time`. Reads cast to the canonical types; `connect` inspects
//! the `status` column so writes can cast back to an enum.
//!
//! ## Sessions
//!
//! `update_job` runs `SELECT ... FOR UPDATE` and `UPDATE` inside one
//! transaction, so a reconciliation never interleaves with the worker's own
//! status write on the same row.
//!
//! ## Runtime
//!
//! The supervisor is synchronous (its loops are thread-based and poll), so the
//! repository owns a current-thread Tokio runtime and blocks on each query.
//! It must not be called from inside another Tokio runtime.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;

use runwarden_core::{DatarunId, JobRecord, JobStatus};

use super::store::{JobRepository, RepositoryError};

/// Default table holding datarun records.
pub const DEFAULT_TABLE: &str = "dataruns";

/// Postgres job repository.
#[derive(Debug)]
pub struct PostgresJobRepository {
    pool: PgPool,
    runtime: tokio::runtime::Runtime,
    table: String,
    /// SQL expression assigned to `status` in updates (`$2`, possibly cast).
    status_value: String,
}

/// Columns read back, cast to the types `decode_row` expects.
const SELECT_COLUMNS: &str = "id::bigint AS id, status::text AS status, end_time::timestamptz AS end_time";

/// One row of `information_schema.columns` for the dataruns table.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ColumnInfo {
    name: String,
    data_type: String,
    udt_schema: String,
    udt_name: String,
}

fn storage(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Storage(e.to_string())
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
fn validate_table_name(table: &str) -> Result<(), RepositoryError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        && !table.starts_with(|c: char| c.is_ascii_digit());
    if valid {
        Ok(())
    } else {
        Err(RepositoryError::Storage(format!("invalid table name: {table:?}")))
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Check the table has the columns we need and work out how `status` is
/// written back.
fn status_assignment(table: &str, columns: &[ColumnInfo]) -> Result<String, RepositoryError> {
    let find = |name: &str| columns.iter().find(|c| c.name == name);

    let missing: Vec<&str> = ["id", "status", "end_time"]
        .into_iter()
        .filter(|name| find(*name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(RepositoryError::Storage(format!(
            "table {table} is missing column(s) {}; expected id, status, end_time",
            missing.join(", ")
        )));
    }

    let Some(status) = find("status") else {
        return Err(RepositoryError::Storage(format!("table {table} has no status column")));
    };
    match status.data_type.as_str() {
        "text" | "character varying" | "character" => Ok("$2".to_string()),
        "USER-DEFINED" if is_identifier(&status.udt_schema) && is_identifier(&status.udt_name) => {
            Ok(format!("$2::text::{}.{}", status.udt_schema, status.udt_name))
        }
        other => Err(RepositoryError::Storage(format!(
            "column {table}.status has unsupported type {other} ({}); expected TEXT, VARCHAR or an enum",
            status.udt_name
        ))),
    }
}

fn decode_row(row: &PgRow) -> Result<JobRecord, RepositoryError> {
    let id: i64 = row.try_get("id").map_err(storage)?;
    let status: String = row.try_get("status").map_err(storage)?;
    let end_time: Option<DateTime<Utc>> = row.try_get("end_time").map_err(storage)?;

    Ok(JobRecord {
        id: DatarunId::new(id),
        status: status.parse::<JobStatus>()?,
        end_time,
    })
}

impl PostgresJobRepository {
    /// Connect to `database_url` and read/write records in `table`.
    pub fn connect(database_url: &str, table: impl Into<String>) -> Result<Self, RepositoryError> {
        let table = table.into();
        validate_table_name(&table)?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(storage)?;

        let pool = runtime
            .block_on(
                PgPoolOptions::new()
                    .max_connections(2)
                    .connect(database_url),
            )
            .map_err(storage)?;

        let (schema, name) = match table.rsplit_once('.') {
            Some((schema, name)) => (Some(schema.to_string()), name.to_string()),
            None => (None, table.clone()),
        };
        let rows = runtime
            .block_on(
                sqlx::query(
                    "SELECT column_name::text, data_type::text, udt_schema::text, udt_name::text \
                     FROM information_schema.columns \
                     WHERE table_name = $1 AND table_schema = COALESCE($2::text, current_schema())",
                )
                .bind(name)
                .bind(schema)
                .fetch_all(&pool),
            )
            .map_err(storage)?;

        let columns = rows
            .iter()
            .map(|row| {
                Ok(ColumnInfo {
                    name: row.try_get(0).map_err(storage)?,
                    data_type: row.try_get(1).map_err(storage)?,
                    udt_schema: row.try_get(2).map_err(storage)?,
                    udt_name: row.try_get(3).map_err(storage)?,
                })
            })
            .collect::<Result<Vec<_>, RepositoryError>>()?;
        let status_value = status_assignment(&table, &columns)?;

        Ok(Self {
            pool,
            runtime,
            table,
            status_value,
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

impl JobRepository for PostgresJobRepository {
    #[instrument(skip(self), fields(table = %self.table), err)]
    fn get_job(&self, id: DatarunId) -> Result<Option<JobRecord>, RepositoryError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE id = $1",
            self.table
        );

        let row = self
            .runtime
            .block_on(
                sqlx::query(&sql)
                    .bind(id.get())
                    .fetch_optional(&self.pool),
            )
            .map_err(storage)?;

        row.as_ref().map(decode_row).transpose()
    }

    #[instrument(skip(self, mutator), fields(table = %self.table), err)]
    fn update_job(
        &self,
        id: DatarunId,
        mutator: &mut dyn FnMut(&mut JobRecord),
    ) -> Result<JobRecord, RepositoryError> {
        let select = format!(
            "SELECT {SELECT_COLUMNS} FROM {} WHERE id = $1 FOR UPDATE",
            self.table
        );
        let update = format!(
            "UPDATE {} SET status = {}, end_time = $3 WHERE id = $1",
            self.table, self.status_value
        );

        self.runtime.block_on(async {
            let mut tx = self.pool.begin().await.map_err(storage)?;

            let row = sqlx::query(&select)
                .bind(id.get())
                .fetch_optional(&mut *tx)
                .await
                .map_err(storage)?
                .ok_or(RepositoryError::NotFound(id))?;

            let mut record = decode_row(&row)?;
            mutator(&mut record);

            sqlx::query(&update)
                .bind(id.get())
                .bind(record.status.as_str())
                .bind(record.end_time)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;

            // Dropping the transaction without commit rolls it back.
            tx.commit().await.map_err(storage)?;
            Ok::<_, RepositoryError>(record)
        })
    }
}
