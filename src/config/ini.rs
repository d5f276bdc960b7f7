//! Section/key-value documents (`my.cnf` style)
//!
//! ```text
//! [mysqld]
//! server_id=1
//! gtid_mode="ON"
//!
//! [client]
//! port=3306
//! ```

use std::fmt;

use crate::error::{Error, Result};

/// One `[name]` section; keys are unique and keep first-insertion order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set a key that came from outside the operator, refusing anything the
    /// text form could not read back as the same entry
    pub fn try_set(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        let value = value.into();
        check_entry(&key, &value)?;
        self.set(key, value);
        Ok(())
    }

    /// Set `key`, overwriting any earlier value in place. The key is trusted;
    /// see [`Section::try_set`].
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered collection of sections
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: Vec<Section>,
}

impl IniDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Section `name`, appended empty if it does not exist yet
    pub fn section_mut(&mut self, name: &str) -> &mut Section {
        let index = match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(Section::new(name));
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn set(&mut self, section: &str, key: impl Into<String>, value: impl Into<String>) {
        self.section_mut(section).set(key, value);
    }

    /// Apply a table of defaults to `section`
    pub fn set_all(&mut self, section: &str, entries: &[(&str, &str)]) {
        let section = self.section_mut(section);
        for (key, value) in entries {
            section.set(*key, *value);
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?.get(key)
    }

    /// Parse the text form.
    ///
    /// Accepts `#` comments, blank lines, and quoted or bare values. Lines
    /// that are neither headers nor `key=value`, and keys before the first
    /// header, fail with `Error::ConfigParse`.
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = IniDocument::new();
        let mut current: Option<usize> = None;

        for (index, raw) in text.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some(rest) = line.strip_prefix('[') {
                let name = rest
                    .strip_suffix(']')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| parse_error(line_no, format!("malformed section header '{line}'")))?;
                doc.section_mut(name);
                current = doc.sections.iter().position(|s| s.name == name);
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(parse_error(line_no, format!("unrecognized line '{line}'")));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(parse_error(line_no, "empty key".to_string()));
            }
            let Some(section) = current else {
                return Err(parse_error(
                    line_no,
                    format!("key '{key}' appears before any section"),
                ));
            };

            doc.sections[section].set(key, unquote(value.trim()));
        }

        Ok(doc)
    }
}

impl fmt::Display for IniDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, section) in self.sections.iter().enumerate() {
            if index > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.name)?;
            for (key, value) in section.entries() {
                if is_unsigned_integer(value) {
                    writeln!(f, "{key}={value}")?;
                } else {
                    writeln!(f, "{key}=\"{value}\"")?;
                }
            }
        }
        Ok(())
    }
}

/// A key must survive `key=value` framing: no `=` or line break, no
/// surrounding whitespace, and no leading `#` or `[` that would turn the line
/// into a comment or header. Values only need to stay on one line.
fn check_entry(key: &str, value: &str) -> Result<()> {
    let invalid = |reason: &str| -> Result<()> {
        Err(Error::ConfigError(format!("invalid config key '{key}': {reason}")))
    };
    if key.is_empty() {
        return invalid("empty");
    }
    if key.trim() != key {
        return invalid("surrounding whitespace");
    }
    if key.starts_with('#') || key.starts_with('[') {
        return invalid("starts with '#' or '['");
    }
    if key.contains(['=', '\n', '\r']) {
        return invalid("contains '=' or a line break");
    }
    if value.contains(['\n', '\r']) {
        return Err(Error::ConfigError(format!("value of config key '{key}' spans lines")));
    }
    Ok(())
}

fn parse_error(line: usize, message: String) -> Error {
    Error::ConfigParse { line, message }
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// `^\d+$`
pub(crate) fn is_unsigned_integer(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_is_last_write_wins() {
        let mut doc = IniDocument::new();
        doc.set("mysqld", "port", "3306");
        doc.set("mysqld", "bind_address", "0.0.0.0");
        doc.set("mysqld", "port", "3307");

        let section = doc.section("mysqld").unwrap();
        assert_eq!(section.len(), 2);
        assert_eq!(doc.get("mysqld", "port"), Some("3307"));
        // Overwrite keeps the original position
        assert_eq!(section.entries().next(), Some(("port", "3307")));
    }

    #[test]
    fn test_serialize_quoting_and_spacing() {
        let mut doc = IniDocument::new();
        doc.set("mysqld", "server_id", "12");
        doc.set("mysqld", "gtid_mode", "ON");
        doc.set("mysqld", "offset", "-1");
        doc.set("client", "port", "3306");

        assert_eq!(
            doc.to_string(),
            "[mysqld]\nserver_id=12\ngtid_mode=\"ON\"\noffset=\"-1\"\n\n[client]\nport=3306\n"
        );
    }

    #[test]
    fn test_parse_comments_and_bare_values() {
        let text = "# generated\n\n[mysqld]\nport = 3306\nlog_bin=binlog\nreport_host=\"db-0\"\n";
        let doc = IniDocument::parse(text).unwrap();
        assert_eq!(doc.get("mysqld", "port"), Some("3306"));
        assert_eq!(doc.get("mysqld", "log_bin"), Some("binlog"));
        assert_eq!(doc.get("mysqld", "report_host"), Some("db-0"));
    }

    #[test]
    fn test_parse_rejects_key_outside_section() {
        let err = IniDocument::parse("# header\nport=3306\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse { line: 2, .. }));
    }

    #[test]
    fn test_parse_rejects_unknown_line() {
        let err = IniDocument::parse("[mysqld]\nskip-name-resolve\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse { line: 2, .. }));

        let err = IniDocument::parse("[mysqld\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse { line: 1, .. }));
    }

    #[test]
    fn test_round_trip_preserves_values() {
        let mut doc = IniDocument::new();
        doc.set("mysqld", "group_replication_group_seeds", "a:33061,b:33061");
        doc.set("mysqld", "server_id", "3");
        doc.set("mysqld", "empty", "");
        doc.set("mysqld", "with_equals", "k=v");
        doc.set("mysqld", "with_quote", "say \"hi\"");
        doc.set("client", "socket", "/var/run/mysqld/mysqld.sock");

        let parsed = IniDocument::parse(&doc.to_string()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn test_repeated_section_headers_merge() {
        let doc = IniDocument::parse("[a]\nx=1\n[b]\ny=2\n[a]\nx=3\n").unwrap();
        assert_eq!(doc.sections().len(), 2);
        assert_eq!(doc.get("a", "x"), Some("3"));
    }

    #[test]
    fn test_try_set_refuses_keys_that_do_not_round_trip() {
        let mut section = Section::new("mysqld");
        for key in ["a=b", "#max_connections", "[client", "", " port", "a\nb"] {
            assert!(section.try_set(key, "1").is_err(), "{key:?} accepted");
        }
        assert!(section.try_set("init_connect", "SET a=1\nSET b=2").is_err());
        assert!(section.is_empty());

        section.try_set("innodb_buffer_pool_size", "1G").unwrap();
        section.try_set("sql_mode", "a=b # not a comment").unwrap();
        let mut doc = IniDocument::new();
        doc.sections.push(section);
        assert_eq!(IniDocument::parse(&doc.to_string()).unwrap(), doc);
    }

    #[test]
    fn test_unsigned_integer_detection() {
        assert!(is_unsigned_integer("0"));
        assert!(is_unsigned_integer("1048576"));
        assert!(!is_unsigned_integer(""));
        assert!(!is_unsigned_integer("1G"));
        assert!(!is_unsigned_integer("-5"));
    }
}
