use std::fmt;
use std::hash::{Hash, Hasher};

use sqlx::mysql::MySqlConnectOptions;

/// Address and credentials of one MySQL or ProxySQL admin endpoint.
///
/// Two descriptors are equal when they point at the same `host:port`,
/// whatever credentials they carry.
#[derive(Clone)]
pub struct Dsn {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub database: String,
}

impl Dsn {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: password.into(),
            database: String::new(),
        }
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_options(&self) -> MySqlConnectOptions {
        let options = MySqlConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password);
        if self.database.is_empty() {
            options
        } else {
            options.database(&self.database)
        }
    }

    /// Options for ProxySQL's admin interface, which rejects the session
    /// `SET` statements sqlx issues by default
    pub fn admin_connect_options(&self) -> MySqlConnectOptions {
        self.connect_options()
            .pipes_as_concat(false)
            .no_engine_substitution(false)
            .timezone(None)
            .set_names(false)
    }
}

impl PartialEq for Dsn {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.port == other.port
    }
}

impl Eq for Dsn {}

impl Hash for Dsn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.port.hash(state);
    }
}

impl fmt::Debug for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dsn")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)?;
        if !self.database.is_empty() {
            write!(f, "/{}", self.database)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_equality_ignores_credentials() {
        let a = Dsn::new("db-0", 3306, "root", "one");
        let b = Dsn::new("db-0", 3306, "repl", "two").with_database("app");
        assert_eq!(a, b);

        let set: HashSet<Dsn> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_port_distinguishes() {
        assert_ne!(
            Dsn::new("db-0", 3306, "root", "pw"),
            Dsn::new("db-0", 3307, "root", "pw")
        );
    }

    #[test]
    fn test_debug_redacts_password() {
        let dsn = Dsn::new("db-0", 3306, "root", "s3cret");
        let debug = format!("{dsn:?}");
        assert!(!debug.contains("s3cret"));
        assert_eq!(dsn.to_string(), "root@db-0:3306");
        assert_eq!(dsn.address(), "db-0:3306");
    }
}
