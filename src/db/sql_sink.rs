//! sqlx-backed sink over a single Postgres or SQLite connection
use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::future::Future;
use std::str::FromStr;

use super::sink::{ColumnInfo, Dialect, IdentityLookup, RelationalSink, SinkError};
use super::statement::quote_ident;
use crate::config::{CONNECT_TIMEOUT, ConnectTarget, STATEMENT_TIMEOUT};
use crate::plan::TableName;
use crate::source::Value;

const PG_DESCRIBE_TABLE: &str = r#"
    SELECT column_name::text, udt_name::text, is_nullable::text
    FROM information_schema.columns
    WHERE table_name::text = $1
    AND table_schema::text = COALESCE($2::text, current_schema()::text)
    ORDER BY ordinal_position
"#;

enum SinkConnection {
    Postgres(PgConnection),
    Sqlite(SqliteConnection),
}

/// A [`RelationalSink`] that owns one database connection
///
/// Every statement runs on the same connection, so the transaction opened by
/// [`RelationalSink::begin`] spans the whole load.
pub struct SqlSink {
    conn: SinkConnection,
}

/// Bound a driver future by the statement timeout
async fn timed<T>(fut: impl Future<Output = Result<T, sqlx::Error>>) -> Result<T, sqlx::Error> {
    tokio::time::timeout(STATEMENT_TIMEOUT, fut)
        .await
        // Surface timeouts as a driver error so they classify as fatal
        .map_err(|_| sqlx::Error::PoolTimedOut)?
}

impl SqlSink {
    pub async fn connect_to(target: &ConnectTarget) -> Result<Self> {
        match target {
            ConnectTarget::Url(url) => Self::connect(url).await,
            ConnectTarget::Settings(settings) => {
                Self::connect_postgres(&settings.connect_options()).await
            }
        }
    }

    /// Connect using a `postgres://` or `sqlite:` URL
    pub async fn connect(url: &str) -> Result<Self> {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let options =
                PgConnectOptions::from_str(url).context("Invalid Postgres connection URL")?;
            return Self::connect_postgres(&options).await;
        }
        if !url.starts_with("sqlite:") {
            bail!("Unsupported database URL scheme; expected postgres:// or sqlite:");
        }

        let options = SqliteConnectOptions::from_str(url)
            .context("Invalid SQLite connection URL")?
            .foreign_keys(true);
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, options.connect())
            .await
            .map_err(|_| anyhow!("Timed out after {:?} opening SQLite", CONNECT_TIMEOUT))?
            .context("Failed to open SQLite database")?;
        Ok(Self {
            conn: SinkConnection::Sqlite(conn),
        })
    }

    async fn connect_postgres(options: &PgConnectOptions) -> Result<Self> {
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, options.connect())
            .await
            .map_err(|_| anyhow!("Timed out after {:?} connecting to Postgres", CONNECT_TIMEOUT))?
            .context("Failed to connect to Postgres")?;
        Ok(Self {
            conn: SinkConnection::Postgres(conn),
        })
    }

    /// Open a private in-memory SQLite database with foreign keys enforced
    #[cfg(test)]
    pub async fn sqlite_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn close(self) -> Result<()> {
        match self.conn {
            SinkConnection::Postgres(conn) => conn.close().await?,
            SinkConnection::Sqlite(conn) => conn.close().await?,
        }
        Ok(())
    }

    /// Execute `;`-separated DDL/DML outside the load transaction
    #[cfg(test)]
    pub async fn execute_script(&mut self, script: &str) -> Result<()> {
        for statement in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            match &mut self.conn {
                SinkConnection::Postgres(conn) => {
                    sqlx::query(statement).execute(&mut *conn).await?;
                }
                SinkConnection::Sqlite(conn) => {
                    sqlx::query(statement).execute(&mut *conn).await?;
                }
            }
        }
        Ok(())
    }

    /// First column of every row, as integers
    #[cfg(test)]
    pub async fn query_i64(&mut self, sql: &str) -> Result<Vec<Option<i64>>> {
        let rows = match &mut self.conn {
            SinkConnection::Postgres(conn) => {
                sqlx::query_scalar::<_, Option<i64>>(sql)
                    .fetch_all(&mut *conn)
                    .await?
            }
            SinkConnection::Sqlite(conn) => {
                sqlx::query_scalar::<_, Option<i64>>(sql)
                    .fetch_all(&mut *conn)
                    .await?
            }
        };
        Ok(rows)
    }

    /// First column of every row, as text
    #[cfg(test)]
    pub async fn query_text(&mut self, sql: &str) -> Result<Vec<Option<String>>> {
        let rows = match &mut self.conn {
            SinkConnection::Postgres(conn) => {
                sqlx::query_scalar::<_, Option<String>>(sql)
                    .fetch_all(&mut *conn)
                    .await?
            }
            SinkConnection::Sqlite(conn) => {
                sqlx::query_scalar::<_, Option<String>>(sql)
                    .fetch_all(&mut *conn)
                    .await?
            }
        };
        Ok(rows)
    }

    /// Row count of a table
    #[cfg(test)]
    pub async fn count_rows(&mut self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        let counts = self.query_i64(&sql).await?;
        Ok(counts.first().copied().flatten().unwrap_or(0))
    }

    /// Run a transaction-control or savepoint statement
    ///
    /// These never describe a row, so any failure is fatal.
    async fn control(&mut self, sql: &str) -> Result<(), SinkError> {
        let result = match &mut self.conn {
            SinkConnection::Postgres(conn) => {
                timed(sqlx::query(sql).persistent(false).execute(&mut *conn))
                    .await
                    .map(|_| ())
            }
            SinkConnection::Sqlite(conn) => {
                timed(sqlx::query(sql).persistent(false).execute(&mut *conn))
                    .await
                    .map(|_| ())
            }
        };
        result
            .with_context(|| format!("Failed to execute {}", sql))
            .map_err(SinkError::Fatal)
    }
}

#[async_trait]
impl IdentityLookup for SqlSink {
    fn dialect(&self) -> Dialect {
        match self.conn {
            SinkConnection::Postgres(_) => Dialect::Postgres,
            SinkConnection::Sqlite(_) => Dialect::Sqlite,
        }
    }

    async fn describe_table(&mut self, table: &TableName) -> Result<Vec<ColumnInfo>, SinkError> {
        let columns = match &mut self.conn {
            SinkConnection::Postgres(conn) => {
                let rows = timed(
                    sqlx::query_as::<_, (String, String, String)>(PG_DESCRIBE_TABLE)
                        .bind(table.name.as_str())
                        .bind(table.schema.as_deref())
                        .fetch_all(&mut *conn),
                )
                .await
                .with_context(|| format!("Failed to describe table {}", table))?;

                rows.into_iter()
                    .map(|(name, type_name, is_nullable)| ColumnInfo {
                        name,
                        type_name,
                        nullable: is_nullable == "YES",
                    })
                    .collect()
            }
            SinkConnection::Sqlite(conn) => {
                let pragma = match &table.schema {
                    Some(schema) => format!(
                        "PRAGMA {}.table_info({})",
                        quote_ident(schema),
                        quote_ident(&table.name)
                    ),
                    None => format!("PRAGMA table_info({})", quote_ident(&table.name)),
                };
                let rows: Vec<(i64, String, String, i64, Option<String>, i64)> =
                    timed(sqlx::query_as(&pragma).fetch_all(&mut *conn))
                        .await
                        .with_context(|| format!("Failed to describe table {}", table))?;

                rows.into_iter()
                    .map(|(_, name, declared_type, not_null, _, _)| ColumnInfo {
                        name,
                        type_name: declared_type,
                        nullable: not_null == 0,
                    })
                    .collect()
            }
        };
        Ok(columns)
    }

    async fn select_id(&mut self, sql: &str, values: &[Value]) -> Result<Option<i64>, SinkError> {
        let dialect = self.dialect();
        let result = match &mut self.conn {
            SinkConnection::Postgres(conn) => {
                let mut query = sqlx::query_scalar::<_, i64>(sql);
                for value in values {
                    query = query.bind(value.as_deref());
                }
                timed(query.fetch_optional(&mut *conn)).await
            }
            SinkConnection::Sqlite(conn) => {
                let mut query = sqlx::query_scalar::<_, i64>(sql);
                for value in values {
                    query = query.bind(value.as_deref());
                }
                timed(query.fetch_optional(&mut *conn)).await
            }
        };
        result.map_err(|e| SinkError::classify(e, dialect))
    }
}

#[async_trait]
impl RelationalSink for SqlSink {
    async fn begin(&mut self) -> Result<(), SinkError> {
        self.control("BEGIN").await
    }

    async fn savepoint(&mut self, name: &str) -> Result<(), SinkError> {
        self.control(&format!("SAVEPOINT {}", quote_ident(name))).await
    }

    async fn rollback_to_savepoint(&mut self, name: &str) -> Result<(), SinkError> {
        self.control(&format!("ROLLBACK TO SAVEPOINT {}", quote_ident(name)))
            .await
    }

    async fn release_savepoint(&mut self, name: &str) -> Result<(), SinkError> {
        self.control(&format!("RELEASE SAVEPOINT {}", quote_ident(name)))
            .await
    }

    async fn insert_returning_id(&mut self, sql: &str, values: &[Value]) -> Result<i64, SinkError> {
        let dialect = self.dialect();
        let result = match &mut self.conn {
            SinkConnection::Postgres(conn) => {
                let mut query = sqlx::query_scalar::<_, i64>(sql);
                for value in values {
                    query = query.bind(value.as_deref());
                }
                timed(query.fetch_one(&mut *conn)).await
            }
            SinkConnection::Sqlite(conn) => {
                let mut query = sqlx::query_scalar::<_, i64>(sql);
                for value in values {
                    query = query.bind(value.as_deref());
                }
                timed(query.fetch_one(&mut *conn)).await
            }
        };
        result.map_err(|e| SinkError::classify(e, dialect))
    }

    async fn commit(&mut self) -> Result<(), SinkError> {
        self.control("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), SinkError> {
        self.control("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(name: &str) -> TableName {
        TableName {
            schema: None,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_describe_sqlite_table() {
        let mut sink = SqlSink::sqlite_in_memory().await.unwrap();
        sink.execute_script(
            "CREATE TABLE color (color_id INTEGER PRIMARY KEY, color_name TEXT NOT NULL, hex TEXT)",
        )
        .await
        .unwrap();

        let columns = sink.describe_table(&table("color")).await.unwrap();
        let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["color_id", "color_name", "hex"]);
        assert!(!columns[1].nullable);
        assert!(columns[2].nullable);

        let missing = sink.describe_table(&table("nope")).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn test_savepoint_isolates_failed_insert() {
        let mut sink = SqlSink::sqlite_in_memory().await.unwrap();
        sink.execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT UNIQUE)")
            .await
            .unwrap();
        let insert = "INSERT INTO t (name) VALUES (?) RETURNING CAST(id AS BIGINT)";

        sink.begin().await.unwrap();
        sink.savepoint("sp_t_row_1").await.unwrap();
        let id = sink
            .insert_returning_id(insert, &[Some("a".to_string())])
            .await
            .unwrap();
        sink.release_savepoint("sp_t_row_1").await.unwrap();

        sink.savepoint("sp_t_row_2").await.unwrap();
        let err = sink
            .insert_returning_id(insert, &[Some("a".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SinkError::Rejected {
                kind: crate::db::RejectionKind::UniqueViolation,
                ..
            }
        ));
        sink.rollback_to_savepoint("sp_t_row_2").await.unwrap();
        sink.release_savepoint("sp_t_row_2").await.unwrap();
        sink.commit().await.unwrap();

        assert_eq!(id, 1);
        assert_eq!(sink.count_rows("t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rollback_discards_everything() {
        let mut sink = SqlSink::sqlite_in_memory().await.unwrap();
        sink.execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();

        sink.begin().await.unwrap();
        sink.insert_returning_id(
            "INSERT INTO t (name) VALUES (?) RETURNING CAST(id AS BIGINT)",
            &[None],
        )
        .await
        .unwrap();
        sink.rollback().await.unwrap();

        assert_eq!(sink.count_rows("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_foreign_keys_enforced() {
        let mut sink = SqlSink::sqlite_in_memory().await.unwrap();
        sink.execute_script(
            "CREATE TABLE p (id INTEGER PRIMARY KEY);
             CREATE TABLE c (id INTEGER PRIMARY KEY, p_id INTEGER REFERENCES p(id))",
        )
        .await
        .unwrap();

        let err = sink
            .insert_returning_id(
                "INSERT INTO c (p_id) VALUES (?) RETURNING CAST(id AS BIGINT)",
                &[Some("42".to_string())],
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SinkError::Rejected {
                kind: crate::db::RejectionKind::ForeignKeyViolation,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_connect_to_explicit_url() {
        let target = ConnectTarget::Url("sqlite::memory:".to_string());
        let mut sink = SqlSink::connect_to(&target).await.unwrap();
        assert_eq!(sink.dialect(), Dialect::Sqlite);
        sink.execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        assert_eq!(sink.count_rows("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_scheme_rejected() {
        assert!(SqlSink::connect("mysql://localhost/db").await.is_err());
    }

    #[tokio::test]
    async fn test_select_id_absent_row() {
        let mut sink = SqlSink::sqlite_in_memory().await.unwrap();
        sink.execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        let found = sink
            .select_id(
                "SELECT CAST(id AS BIGINT) FROM t WHERE name = ? LIMIT 1",
                &[Some("x".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(found, None);
    }
}
