//! ProxySQL admin interface access
//!
//! [`AdminSession`] is the narrow set of table operations the synchronizer
//! needs. [`ProxyAdminConnector`] implements it over sqlx; tests swap in an
//! in-memory table store.

use async_trait::async_trait;
use sqlx::mysql::MySqlConnection;
use sqlx::Connection;

use super::tables::{AdminTable, Record};
use crate::error::{Error, Result};
use crate::mysql::client::{count_text, execute_text, fetch_text, open_with, text_column};
use crate::mysql::Dsn;
use crate::sql::{Dialect, SqlValue, Statement};

/// Column/value pairs, used both for `SET` lists and `WHERE` keys
pub type Assignments = [(&'static str, SqlValue)];

#[async_trait]
pub trait AdminConnector: Send + Sync {
    /// Fails with `Error::ConnectFailed` when the admin port is unreachable.
    async fn connect(&self, dsn: &Dsn) -> Result<Box<dyn AdminSession>>;
}

#[async_trait]
pub trait AdminSession: Send {
    async fn select_all(&mut self, table: AdminTable, columns: &[&'static str]) -> Result<Vec<Record>>;

    /// Rows matching every key column
    async fn count(&mut self, table: AdminTable, key: &Assignments) -> Result<i64>;

    async fn insert(&mut self, table: AdminTable, columns: &Assignments) -> Result<()>;

    async fn update(&mut self, table: AdminTable, set: &Assignments, key: &Assignments) -> Result<u64>;

    async fn delete(&mut self, table: AdminTable, key: &Assignments) -> Result<u64>;

    /// `LOAD <module> TO RUNTIME` then `SAVE <module> TO DISK`
    async fn load_to_runtime(&mut self, table: AdminTable) -> Result<()>;
}

fn where_clause(key: &Assignments) -> String {
    key.iter()
        .map(|(column, _)| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn bind_all(mut stmt: Statement, values: &Assignments) -> Statement {
    for (_, value) in values {
        stmt = stmt.bind(value.clone());
    }
    stmt
}

pub fn select_statement(table: AdminTable, columns: &[&'static str]) -> Statement {
    Statement::new(format!("SELECT {} FROM {}", columns.join(", "), table.name()))
}

pub fn count_statement(table: AdminTable, key: &Assignments) -> Statement {
    bind_all(
        Statement::new(format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            table.name(),
            where_clause(key)
        )),
        key,
    )
}

pub fn insert_statement(table: AdminTable, columns: &Assignments) -> Statement {
    let names: Vec<&str> = columns.iter().map(|(c, _)| *c).collect();
    let placeholders = vec!["?"; columns.len()].join(", ");
    bind_all(
        Statement::new(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table.name(),
            names.join(", "),
            placeholders
        )),
        columns,
    )
}

pub fn update_statement(table: AdminTable, set: &Assignments, key: &Assignments) -> Statement {
    let assignments = set
        .iter()
        .map(|(column, _)| format!("{column} = ?"))
        .collect::<Vec<_>>()
        .join(", ");
    let stmt = Statement::new(format!(
        "UPDATE {} SET {} WHERE {}",
        table.name(),
        assignments,
        where_clause(key)
    ));
    bind_all(bind_all(stmt, set), key)
}

pub fn delete_statement(table: AdminTable, key: &Assignments) -> Statement {
    bind_all(
        Statement::new(format!(
            "DELETE FROM {} WHERE {}",
            table.name(),
            where_clause(key)
        )),
        key,
    )
}

/// Admin sessions over a plain MySQL protocol connection
#[derive(Clone, Debug, Default)]
pub struct ProxyAdminConnector;

#[async_trait]
impl AdminConnector for ProxyAdminConnector {
    async fn connect(&self, dsn: &Dsn) -> Result<Box<dyn AdminSession>> {
        let conn = open_with(dsn, &dsn.admin_connect_options()).await?;
        Ok(Box::new(ProxyAdminSession {
            host: dsn.host.clone(),
            conn,
        }))
    }
}

/// Admin statements are rendered once, with SQLite quoting, and sent as text.
pub struct ProxyAdminSession {
    host: String,
    conn: MySqlConnection,
}

impl ProxyAdminSession {
    /// The exact text sent to the admin port for `stmt`
    pub fn wire_sql(stmt: &Statement) -> Result<String> {
        stmt.render_in(Dialect::Standard)
    }

    async fn execute(&mut self, stmt: Statement) -> Result<u64> {
        let sql = Self::wire_sql(&stmt)?;
        execute_text(&mut self.conn, &self.host, &sql, stmt.sql()).await
    }

    pub async fn close(self) -> Result<()> {
        let host = self.host;
        self.conn.close().await.map_err(|e| Error::query(&host, e))
    }
}

#[async_trait]
impl AdminSession for ProxyAdminSession {
    async fn select_all(&mut self, table: AdminTable, columns: &[&'static str]) -> Result<Vec<Record>> {
        let stmt = select_statement(table, columns);
        let sql = Self::wire_sql(&stmt)?;
        let rows = fetch_text(&mut self.conn, &self.host, &sql, stmt.sql()).await?;
        rows.iter()
            .map(|row| {
                columns
                    .iter()
                    .enumerate()
                    .map(|(index, column)| {
                        let value = text_column(row, index).map_err(|e| Error::query(&self.host, e))?;
                        Ok::<_, Error>((column.to_string(), value.map_or(SqlValue::Null, SqlValue::Text)))
                    })
                    .collect()
            })
            .collect()
    }

    async fn count(&mut self, table: AdminTable, key: &Assignments) -> Result<i64> {
        let stmt = count_statement(table, key);
        let sql = Self::wire_sql(&stmt)?;
        count_text(&mut self.conn, &self.host, &sql, stmt.sql()).await
    }

    async fn insert(&mut self, table: AdminTable, columns: &Assignments) -> Result<()> {
        self.execute(insert_statement(table, columns)).await.map(|_| ())
    }

    async fn update(&mut self, table: AdminTable, set: &Assignments, key: &Assignments) -> Result<u64> {
        self.execute(update_statement(table, set, key)).await
    }

    async fn delete(&mut self, table: AdminTable, key: &Assignments) -> Result<u64> {
        self.execute(delete_statement(table, key)).await
    }

    async fn load_to_runtime(&mut self, table: AdminTable) -> Result<()> {
        let module = table.module();
        self.execute(Statement::new(format!("LOAD {module} TO RUNTIME")))
            .await?;
        self.execute(Statement::new(format!("SAVE {module} TO DISK")))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Vec<(&'static str, SqlValue)> {
        vec![("username", "app".into()), ("frontend", 1.into())]
    }

    #[test]
    fn test_count_statement() {
        let stmt = count_statement(AdminTable::MysqlUsers, &key());
        assert_eq!(
            stmt.render().unwrap(),
            "SELECT COUNT(*) FROM mysql_users WHERE username = 'app' AND frontend = 1"
        );
    }

    #[test]
    fn test_insert_statement() {
        let columns: Vec<(&'static str, SqlValue)> = vec![("hostname", "proxy-0".into()), ("port", 6032.into())];
        let stmt = insert_statement(AdminTable::ProxySqlServers, &columns);
        assert_eq!(
            stmt.render().unwrap(),
            "INSERT INTO proxysql_servers (hostname, port) VALUES ('proxy-0', 6032)"
        );
    }

    #[test]
    fn test_update_binds_set_before_key() {
        let set: Vec<(&'static str, SqlValue)> = vec![("hostgroup_id", 10.into()), ("comment", "writer".into())];
        let key: Vec<(&'static str, SqlValue)> = vec![("hostname", "db-0".into())];
        let stmt = update_statement(AdminTable::MysqlServers, &set, &key);
        assert_eq!(
            stmt.render().unwrap(),
            "UPDATE mysql_servers SET hostgroup_id = 10, comment = 'writer' WHERE hostname = 'db-0'"
        );
    }

    #[test]
    fn test_admin_quoting_of_hostile_values() {
        let key: Vec<(&'static str, SqlValue)> = vec![("hostname", "x'; DROP TABLE mysql_users; --".into())];
        let sql = ProxyAdminSession::wire_sql(&delete_statement(AdminTable::MysqlServers, &key)).unwrap();
        assert_eq!(
            sql,
            "DELETE FROM mysql_servers WHERE hostname = 'x''; DROP TABLE mysql_users; --'"
        );
    }

    #[test]
    fn test_admin_password_with_backslash_and_question_mark() {
        let columns: Vec<(&'static str, SqlValue)> = vec![("username", "app".into()), ("password", r"p\'?".into())];
        let sql = ProxyAdminSession::wire_sql(&insert_statement(AdminTable::MysqlUsers, &columns)).unwrap();
        // Backslash stays literal; the quote is doubled; the '?' is data.
        assert_eq!(
            sql,
            r"INSERT INTO mysql_users (username, password) VALUES ('app', 'p\''?')"
        );

        // The text must be sent as-is: rendering it again as a template would
        // take the '?' for a placeholder.
        assert!(Statement::new(sql.clone()).render().is_err());
        let key: Vec<(&'static str, SqlValue)> = vec![("username", "app".into())];
        let set: Vec<(&'static str, SqlValue)> = vec![("password", r"p\'?".into())];
        let update = ProxyAdminSession::wire_sql(&update_statement(AdminTable::MysqlUsers, &set, &key)).unwrap();
        assert_eq!(
            update,
            r"UPDATE mysql_users SET password = 'p\''?' WHERE username = 'app'"
        );
    }

    #[test]
    fn test_select_statement() {
        let stmt = select_statement(AdminTable::ProxySqlServers, &["hostname", "port"]);
        assert_eq!(stmt.sql(), "SELECT hostname, port FROM proxysql_servers");
    }
}
