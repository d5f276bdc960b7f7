//! sqlx-backed implementation of the node session traits.
//!
//! Reads are prepared and bound with `sqlx::query`. Statements MySQL will not
//! prepare (`CHANGE MASTER TO`, `START GROUP_REPLICATION`, `SET GLOBAL`) go
//! over the text protocol with `sqlx::raw_sql`; their values are rendered in
//! the quoting the session's `sql_mode` parses.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::{ColumnIndex, Connection, Executor, Row};
use tracing::debug;

use super::dsn::Dsn;
use super::session::{NodeConnector, NodeSession, ReplicationCredentials};
use crate::error::{Error, Result};
use crate::sql::{Dialect, Statement};

/// Opens plain `MySqlConnection`s, one per call
#[derive(Clone, Debug, Default)]
pub struct MysqlConnector;

#[async_trait]
impl NodeConnector for MysqlConnector {
    async fn connect(&self, dsn: &Dsn) -> Result<Box<dyn NodeSession>> {
        let conn = open_connection(dsn).await?;
        Ok(Box::new(MysqlSession {
            host: dsn.host.clone(),
            conn,
            dialect: None,
        }))
    }
}

pub(crate) async fn open_connection(dsn: &Dsn) -> Result<MySqlConnection> {
    open_with(dsn, &dsn.connect_options()).await
}

pub(crate) async fn open_with(dsn: &Dsn, options: &MySqlConnectOptions) -> Result<MySqlConnection> {
    debug!("Connecting to {}", dsn);
    MySqlConnection::connect_with(options)
        .await
        .map_err(|source| Error::ConnectFailed {
            host: dsn.host.clone(),
            source,
        })
}

/// Read a column as text, whatever its declared SQL type
pub(crate) fn text_column<I>(row: &MySqlRow, index: I) -> std::result::Result<Option<String>, sqlx::Error>
where
    I: ColumnIndex<MySqlRow>,
{
    row.try_get_unchecked::<Option<String>, _>(index)
}

/// Send finished SQL text on `conn`. `label` is what gets logged, so rendered
/// credentials never reach the log.
pub(crate) async fn execute_text(
    conn: &mut MySqlConnection,
    host: &str,
    sql: &str,
    label: &str,
) -> Result<u64> {
    debug!(host, "Executing: {}", label);
    let result = conn
        .execute(sqlx::raw_sql(sql))
        .await
        .map_err(|e| Error::query(host, e))?;
    Ok(result.rows_affected())
}

/// Send finished SQL text on `conn` and collect its rows
pub(crate) async fn fetch_text(
    conn: &mut MySqlConnection,
    host: &str,
    sql: &str,
    label: &str,
) -> Result<Vec<MySqlRow>> {
    debug!(host, "Querying: {}", label);
    conn.fetch_all(sqlx::raw_sql(sql))
        .await
        .map_err(|e| Error::query(host, e))
}

/// Run a `SELECT COUNT(*) ...` given as finished text
pub(crate) async fn count_text(
    conn: &mut MySqlConnection,
    host: &str,
    sql: &str,
    label: &str,
) -> Result<i64> {
    let rows = fetch_text(conn, host, sql, label).await?;
    let text = match rows.first() {
        Some(row) => text_column(row, 0).map_err(|e| Error::query(host, e))?,
        None => None,
    };
    Ok(text.and_then(|t| t.trim().parse().ok()).unwrap_or(0))
}

const MEMBER_STATE_ONLINE: &str = "ONLINE";
const MEMBER_STATE_RECOVERING: &str = "RECOVERING";

pub struct MysqlSession {
    host: String,
    conn: MySqlConnection,
    dialect: Option<Dialect>,
}

impl MysqlSession {
    /// Run a statement that carries no values
    async fn execute(&mut self, sql: &str) -> Result<()> {
        execute_text(&mut self.conn, &self.host, sql, sql).await.map(|_| ())
    }

    /// Run a statement that cannot be prepared, with its values rendered as
    /// literals in the quoting this session parses
    async fn execute_literal(&mut self, stmt: Statement) -> Result<()> {
        let dialect = self.dialect().await?;
        let sql = stmt.render_in(dialect)?;
        execute_text(&mut self.conn, &self.host, &sql, stmt.sql())
            .await
            .map(|_| ())
    }

    /// Literal quoting for this session, from its `sql_mode`
    async fn dialect(&mut self) -> Result<Dialect> {
        if let Some(dialect) = self.dialect {
            return Ok(dialect);
        }
        let sql_mode: Option<String> = sqlx::query_scalar("SELECT @@SESSION.sql_mode")
            .fetch_one(&mut self.conn)
            .await
            .map_err(|e| Error::query(&self.host, e))?;
        let dialect = Dialect::for_sql_mode(sql_mode.as_deref().unwrap_or_default());
        debug!(host = %self.host, ?dialect, "Session literal dialect");
        self.dialect = Some(dialect);
        Ok(dialect)
    }

    async fn variable(&mut self, name: &str) -> Result<Option<String>> {
        let value: Option<Option<String>> = sqlx::query_scalar(
            "SELECT VARIABLE_VALUE FROM performance_schema.global_variables \
             WHERE VARIABLE_NAME = ?",
        )
        .bind(name)
        .fetch_optional(&mut self.conn)
        .await
        .map_err(|e| Error::query(&self.host, e))?;
        Ok(value.flatten())
    }

    /// This node's row in `replication_group_members`, if it has one
    async fn member_state(&mut self) -> Result<Option<String>> {
        let state: Option<Option<String>> = sqlx::query_scalar(
            "SELECT MEMBER_STATE FROM performance_schema.replication_group_members \
             WHERE MEMBER_ID = @@server_uuid",
        )
        .fetch_optional(&mut self.conn)
        .await
        .map_err(|e| Error::query(&self.host, e))?;
        Ok(state.flatten())
    }

    /// Close the connection explicitly rather than on drop
    pub async fn close(self) -> Result<()> {
        let host = self.host;
        self.conn.close().await.map_err(|e| Error::query(&host, e))
    }
}

#[async_trait]
impl NodeSession for MysqlSession {
    async fn server_uuid(&mut self) -> Result<String> {
        self.variable("server_uuid")
            .await?
            .ok_or_else(|| Error::ConfigError(format!("{} did not report server_uuid", self.host)))
    }

    async fn is_primary_member(&mut self, uuid: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM performance_schema.replication_group_members \
             WHERE MEMBER_ID = ? AND MEMBER_ROLE = 'PRIMARY'",
        )
        .bind(uuid)
        .fetch_one(&mut self.conn)
        .await
        .map_err(|e| Error::query(&self.host, e))?;
        Ok(count > 0)
    }

    async fn group_replication_running(&mut self) -> Result<bool> {
        let state = self.member_state().await?;
        Ok(state.as_deref() == Some(MEMBER_STATE_ONLINE))
    }

    async fn group_replication_active(&mut self) -> Result<bool> {
        let state = self.member_state().await?;
        Ok(matches!(
            state.as_deref(),
            Some(MEMBER_STATE_ONLINE | MEMBER_STATE_RECOVERING)
        ))
    }

    async fn bootstrap_group(&mut self) -> Result<()> {
        self.execute("SET GLOBAL group_replication_bootstrap_group = ON")
            .await?;
        let started = self.execute("START GROUP_REPLICATION").await;
        // bootstrap_group must be OFF again even when START failed.
        let reset = self
            .execute("SET GLOBAL group_replication_bootstrap_group = OFF")
            .await;
        started?;
        reset
    }

    async fn join_group(&mut self, credentials: &ReplicationCredentials) -> Result<()> {
        self.execute_literal(
            Statement::new(
                "CHANGE MASTER TO MASTER_USER = ?, MASTER_PASSWORD = ? \
                 FOR CHANNEL 'group_replication_recovery'",
            )
            .bind(credentials.user.as_str())
            .bind(credentials.password.as_str()),
        )
        .await?;
        self.execute("START GROUP_REPLICATION").await
    }

    async fn semi_sync_master_enabled(&mut self) -> Result<bool> {
        let value = self.variable("rpl_semi_sync_master_enabled").await?;
        Ok(value.is_some_and(|v| v.eq_ignore_ascii_case("ON")))
    }

    async fn replica_running(&mut self) -> Result<bool> {
        let row = sqlx::query("SHOW SLAVE STATUS")
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|e| Error::query(&self.host, e))?;
        let Some(row) = row else {
            return Ok(false);
        };
        let io: Option<String> = row
            .try_get("Slave_IO_Running")
            .map_err(|e| Error::query(&self.host, e))?;
        let sql: Option<String> = row
            .try_get("Slave_SQL_Running")
            .map_err(|e| Error::query(&self.host, e))?;
        Ok(io.as_deref() == Some("Yes") && sql.as_deref() == Some("Yes"))
    }

    async fn promote_semi_sync_master(&mut self) -> Result<()> {
        self.execute("SET GLOBAL rpl_semi_sync_master_enabled = ON").await?;
        self.execute("SET GLOBAL super_read_only = OFF").await?;
        self.execute("SET GLOBAL read_only = OFF").await
    }

    async fn replicate_from(
        &mut self,
        source: &Dsn,
        credentials: &ReplicationCredentials,
        read_only: bool,
    ) -> Result<()> {
        self.execute("STOP SLAVE").await?;
        self.execute_literal(
            Statement::new(
                "CHANGE MASTER TO MASTER_HOST = ?, MASTER_PORT = ?, MASTER_USER = ?, \
                 MASTER_PASSWORD = ?, MASTER_AUTO_POSITION = 1",
            )
            .bind(source.host.as_str())
            .bind(source.port)
            .bind(credentials.user.as_str())
            .bind(credentials.password.as_str()),
        )
        .await?;
        self.execute("SET GLOBAL rpl_semi_sync_slave_enabled = ON").await?;
        if read_only {
            self.execute("SET GLOBAL super_read_only = ON").await?;
        }
        self.execute("START SLAVE").await
    }
}
