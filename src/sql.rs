//! Parameterized administrative statements
//!
//! ProxySQL's admin interface and MySQL's `CHANGE MASTER TO` do not go
//! through the prepared statement protocol, so those statements are sent as
//! text.
//! Values are still never formatted into SQL by hand: a [`Statement`] keeps
//! `?` placeholders and typed [`SqlValue`]s, and renders them as escaped
//! literals in one place.

use std::fmt;

use crate::error::{Error, Result};

/// Literal quoting rules of the server a statement is sent to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Dialect {
    /// Backslash escapes, as MySQL parses them
    #[default]
    MySql,
    /// Quotes are doubled and backslashes are literal. ProxySQL's admin
    /// interface (SQLite) parses this, as does MySQL under
    /// `NO_BACKSLASH_ESCAPES`.
    Standard,
}

impl Dialect {
    /// Dialect a MySQL session with the given `@@sql_mode` parses
    pub fn for_sql_mode(sql_mode: &str) -> Self {
        let no_backslash_escapes = sql_mode
            .split(',')
            .any(|mode| mode.trim().eq_ignore_ascii_case("NO_BACKSLASH_ESCAPES"));
        if no_backslash_escapes {
            Dialect::Standard
        } else {
            Dialect::MySql
        }
    }
}

/// A value bound to a `?` placeholder
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Text(String),
}

impl SqlValue {
    /// Render as a MySQL literal
    pub fn to_literal(&self) -> String {
        self.to_literal_in(Dialect::MySql)
    }

    pub fn to_literal_in(&self, dialect: Dialect) -> String {
        match (self, dialect) {
            (SqlValue::Null, _) => "NULL".to_string(),
            (SqlValue::Int(v), _) => v.to_string(),
            (SqlValue::Text(s), Dialect::MySql) => quote_literal(s),
            (SqlValue::Text(s), Dialect::Standard) => quote_standard_literal(s),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Text(s) => s.parse().ok(),
            SqlValue::Null => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<u16> for SqlValue {
    fn from(v: u16) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<u32> for SqlValue {
    fn from(v: u32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Quote a string as a single-quoted MySQL literal
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\0' => out.push_str("\\0"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x1a' => out.push_str("\\Z"),
            '\'' => out.push_str("\\'"),
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Quote a string with doubled quotes and no backslash escapes
pub fn quote_standard_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// SQL text with `?` placeholders and the values bound to them
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<SqlValue>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<SqlValue>) -> Self {
        self.params.push(value.into());
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[SqlValue] {
        &self.params
    }

    /// Render for MySQL; see [`Statement::render_in`]
    pub fn render(&self) -> Result<String> {
        self.render_in(Dialect::MySql)
    }

    /// Substitute every placeholder with its escaped literal.
    ///
    /// Question marks inside quoted strings or backtick identifiers are left
    /// alone. The number of placeholders must match the number of values.
    pub fn render_in(&self, dialect: Dialect) -> Result<String> {
        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 8);
        let mut params = self.params.iter();
        let mut quote: Option<char> = None;
        let mut escaped = false;

        for c in self.sql.chars() {
            if let Some(q) = quote {
                out.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' && q != '`' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
                continue;
            }
            match c {
                '\'' | '"' | '`' => {
                    quote = Some(c);
                    out.push(c);
                }
                '?' => {
                    let value = params.next().ok_or_else(|| {
                        Error::ConfigError(format!(
                            "statement has more placeholders than values: {}",
                            self.sql
                        ))
                    })?;
                    out.push_str(&value.to_literal_in(dialect));
                }
                c => out.push(c),
            }
        }

        if params.next().is_some() {
            return Err(Error::ConfigError(format!(
                "statement has more values than placeholders: {}",
                self.sql
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_binds_in_order() {
        let stmt = Statement::new("UPDATE t SET a = ?, b = ? WHERE c = ?")
            .bind(10)
            .bind("x")
            .bind(SqlValue::Null);
        assert_eq!(
            stmt.render().unwrap(),
            "UPDATE t SET a = 10, b = 'x' WHERE c = NULL"
        );
    }

    #[test]
    fn test_render_escapes_injection() {
        let stmt = Statement::new("SELECT COUNT(*) FROM mysql_users WHERE username = ?")
            .bind("x' OR '1'='1");
        assert_eq!(
            stmt.render().unwrap(),
            r"SELECT COUNT(*) FROM mysql_users WHERE username = 'x\' OR \'1\'=\'1'"
        );
    }

    #[test]
    fn test_render_ignores_quoted_question_marks() {
        let stmt = Statement::new("SELECT '?', `a?b` FROM t WHERE x = ?").bind(1);
        assert_eq!(stmt.render().unwrap(), "SELECT '?', `a?b` FROM t WHERE x = 1");
    }

    #[test]
    fn test_render_count_mismatch() {
        assert!(Statement::new("SELECT ?").render().is_err());
        assert!(Statement::new("SELECT 1").bind(1).render().is_err());
    }

    #[test]
    fn test_quote_literal_control_chars() {
        assert_eq!(quote_literal("a\nb\\c\0"), r"'a\nb\\c\0'");
    }

    #[test]
    fn test_standard_dialect_doubles_quotes() {
        let stmt = Statement::new("DELETE FROM mysql_users WHERE username = ?").bind(r"o'brien\");
        assert_eq!(
            stmt.render_in(Dialect::Standard).unwrap(),
            r"DELETE FROM mysql_users WHERE username = 'o''brien\'"
        );
    }

    #[test]
    fn test_dialect_follows_sql_mode() {
        assert_eq!(
            Dialect::for_sql_mode("ONLY_FULL_GROUP_BY,STRICT_TRANS_TABLES"),
            Dialect::MySql
        );
        assert_eq!(
            Dialect::for_sql_mode("STRICT_TRANS_TABLES,NO_BACKSLASH_ESCAPES"),
            Dialect::Standard
        );
        assert_eq!(Dialect::for_sql_mode(""), Dialect::MySql);

        let stmt = Statement::new("CHANGE MASTER TO MASTER_PASSWORD = ?").bind(r"p\'w");
        assert_eq!(
            stmt.render_in(Dialect::for_sql_mode("NO_BACKSLASH_ESCAPES")).unwrap(),
            r"CHANGE MASTER TO MASTER_PASSWORD = 'p\''w'"
        );
    }

    #[test]
    fn test_option_and_bool_conversion() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("db")), SqlValue::Text("db".into()));
        assert_eq!(SqlValue::from(true), SqlValue::Int(1));
        assert_eq!(SqlValue::Text("42".into()).as_int(), Some(42));
    }
}
