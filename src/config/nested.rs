//! ProxySQL's nested configuration format
//!
//! Top-level scalars come first, then named blocks. A block is either a
//! map rendered inside `{ }` or a list of maps rendered inside `( )`.

use std::fmt;

use super::ini::is_unsigned_integer;

/// Ordered `key=value` pairs
pub type Entries = Vec<(String, String)>;

/// Canonical order of the blocks ProxySQL reads
pub const BLOCK_ORDER: &[&str] = &[
    "admin_variables",
    "mysql_variables",
    "mysql_servers",
    "mysql_users",
    "mysql_query_rules",
    "scheduler",
    "proxysql_servers",
    "mysql_replication_hostgroups",
    "mysql_group_replication_hostgroups",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Block {
    Map(Entries),
    List(Vec<Entries>),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NestedDocument {
    scalars: Entries,
    blocks: Vec<(String, Block)>,
}

impl NestedDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_scalar(&mut self, key: impl Into<String>, value: impl Into<String>) {
        upsert(&mut self.scalars, key.into(), value.into());
    }

    /// Insert or replace block `name`
    pub fn set_block(&mut self, name: impl Into<String>, block: Block) {
        let name = name.into();
        match self.blocks.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = block,
            None => self.blocks.push((name, block)),
        }
    }

    /// Append one row to list block `name`, creating it if needed.
    ///
    /// A map block of the same name is replaced by a list.
    pub fn push_row(&mut self, name: &str, row: Entries) {
        match self.blocks.iter_mut().find(|(n, _)| n == name) {
            Some((_, Block::List(rows))) => rows.push(row),
            Some(entry) => entry.1 = Block::List(vec![row]),
            None => self.blocks.push((name.to_string(), Block::List(vec![row]))),
        }
    }

    pub fn scalar(&self, key: &str) -> Option<&str> {
        self.scalars
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.iter().find(|(n, _)| n == name).map(|(_, b)| b)
    }

    /// Blocks in render order: known blocks in canonical order, then the
    /// rest in insertion order
    fn ordered_blocks(&self) -> Vec<&(String, Block)> {
        let mut blocks: Vec<_> = self.blocks.iter().collect();
        blocks.sort_by_key(|(name, _)| {
            BLOCK_ORDER
                .iter()
                .position(|known| known == name)
                .unwrap_or(BLOCK_ORDER.len())
        });
        blocks
    }
}

fn upsert(entries: &mut Entries, key: String, value: String) {
    match entries.iter_mut().find(|(k, _)| *k == key) {
        Some(entry) => entry.1 = value,
        None => entries.push((key, value)),
    }
}

/// Build an entry list from string-ish pairs
pub fn entries<K, V, I>(pairs: I) -> Entries
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

fn render_value(value: &str) -> String {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if is_unsigned_integer(digits) {
        value.to_string()
    } else {
        format!("\"{value}\"")
    }
}

fn render_inline(row: &Entries) -> String {
    let fields: Vec<String> = row
        .iter()
        .map(|(k, v)| format!("{k}={}", render_value(v)))
        .collect();
    format!("{{ {} }}", fields.join(", "))
}

impl fmt::Display for NestedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.scalars {
            writeln!(f, "{key}={}", render_value(value))?;
        }

        for (name, block) in self.ordered_blocks() {
            writeln!(f)?;
            writeln!(f, "{name}=")?;
            match block {
                Block::Map(map) => {
                    writeln!(f, "{{")?;
                    for (key, value) in map {
                        writeln!(f, "    {key}={}", render_value(value))?;
                    }
                    writeln!(f, "}}")?;
                }
                Block::List(rows) => {
                    writeln!(f, "(")?;
                    for (index, row) in rows.iter().enumerate() {
                        let sep = if index + 1 < rows.len() { "," } else { "" };
                        writeln!(f, "    {}{sep}", render_inline(row))?;
                    }
                    writeln!(f, ")")?;
                }
            }
        }
        Ok(())
    }
}
