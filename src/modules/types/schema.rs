//! Query result and catalog shapes shared by every SQL engine

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One result row: column name to value, in catalog column order
pub type Row = Map<String, Value>;

/// Ordered sequence of rows
pub type RowSet = Vec<Row>;

/// Caller supplied query parameters
///
/// A JSON array binds `?` markers by position, a JSON object binds `:name` markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParams {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl QueryParams {
    pub fn is_empty(&self) -> bool {
        match self {
            QueryParams::Positional(values) => values.is_empty(),
            QueryParams::Named(values) => values.is_empty(),
        }
    }
}

impl From<Vec<Value>> for QueryParams {
    fn from(values: Vec<Value>) -> Self {
        QueryParams::Positional(values)
    }
}

impl From<Map<String, Value>> for QueryParams {
    fn from(values: Map<String, Value>) -> Self {
        QueryParams::Named(values)
    }
}

/// Column as reported by an engine catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// 1-based position in the table definition
    pub ordinal_position: i64,
}

/// Column participating in an index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    pub name: String,
    /// 1-based position within the index key
    pub key_ordinal: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<IndexColumn>,
    pub unique: bool,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintInfo {
    pub name: String,
    /// Engine spelling, e.g. `PRIMARY KEY`, `FOREIGN KEY`, `UNIQUE`, `CHECK`
    pub constraint_type: String,
    pub columns: Vec<String>,
}

/// Full description of one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    /// Owning database or schema
    pub schema: String,
    pub columns: Vec<ColumnInfo>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
    #[serde(default)]
    pub constraints: Vec<ConstraintInfo>,
    /// Engine specific statistics (row/byte estimates, partitions)
    #[serde(default)]
    pub stats: Map<String, Value>,
}

impl TableInfo {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: schema.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            constraints: Vec::new(),
            stats: Map::new(),
        }
    }

    /// `schema.name`
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Result of describing a table: either the table or an explicit not-found payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableLookup {
    Found(TableInfo),
    Missing { error: String },
}

impl TableLookup {
    pub const NOT_FOUND: &'static str = "table not found";

    pub fn not_found() -> Self {
        TableLookup::Missing {
            error: Self::NOT_FOUND.to_string(),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, TableLookup::Found(_))
    }

    pub fn into_table(self) -> Option<TableInfo> {
        match self {
            TableLookup::Found(info) => Some(info),
            TableLookup::Missing { .. } => None,
        }
    }
}

/// `namespace -> table -> TableInfo`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaDescriptor(pub BTreeMap<String, BTreeMap<String, TableInfo>>);

impl SchemaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: TableInfo) {
        self.0
            .entry(table.schema.clone())
            .or_default()
            .insert(table.name.clone(), table);
    }

    pub fn get(&self, namespace: &str, table: &str) -> Option<&TableInfo> {
        self.0.get(namespace).and_then(|tables| tables.get(table))
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableInfo> {
        self.0.values().flat_map(|tables| tables.values())
    }

    pub fn table_count(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.table_count() == 0
    }
}

/// Whether a statement reads or mutates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    Read,
    Write,
}

const READ_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "VALUES", "TABLE", "EXISTS", "PRAGMA",
];

/// Statements led by these cannot mutate, whatever follows
const INSPECT_KEYWORDS: &[&str] = &["SHOW", "DESCRIBE", "DESC"];

/// Any of these outside literals and comments makes a statement a write
const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "MERGE", "UPSERT", "INTO", "DROP", "CREATE", "ALTER",
    "TRUNCATE", "GRANT", "REVOKE", "RENAME", "COPY", "CALL", "EXEC", "EXECUTE", "LOCK",
    "ATTACH", "DETACH", "VACUUM", "OPTIMIZE",
];

impl StatementKind {
    /// Classifies a statement.
    ///
    /// A read starts with a read keyword, holds a single statement and has no
    /// data-modifying keyword anywhere outside literals, quoted identifiers and
    /// comments. The text is lexed both the standard way and the MySQL way
    /// (backslash escapes, `#` comments) and must read as a read both times.
    pub fn classify(sql: &str) -> Self {
        if scan_is_read(sql, Lexing::Standard) && scan_is_read(sql, Lexing::Mysql) {
            StatementKind::Read
        } else {
            StatementKind::Write
        }
    }

    pub fn is_read(&self) -> bool {
        *self == StatementKind::Read
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexing {
    /// `''` doubling only, `[x]` identifiers, `$tag$` bodies
    Standard,
    /// Backslash escapes in strings, `#` and `-- ` comments
    Mysql,
}

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Word(&'a str),
    Separator,
}

/// Keywords and statement separators outside literals, quoted identifiers and
/// comments. `None` when a literal, identifier or comment is left open.
fn tokens(sql: &str, lexing: Lexing) -> Option<Vec<Token<'_>>> {
    let bytes = sql.as_bytes();
    let mysql = lexing == Lexing::Mysql;
    let mut out = Vec::new();
    let mut i = 0;

    let line_end = |from: usize| sql[from..].find('\n').map(|n| from + n + 1).unwrap_or(bytes.len());

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'-' if bytes.get(i + 1) == Some(&b'-')
                && (!mysql || bytes.get(i + 2).map_or(true, |b| b.is_ascii_whitespace())) =>
            {
                i = line_end(i);
            }
            b'#' if mysql => i = line_end(i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = i + 2 + sql[i + 2..].find("*/")? + 2;
            }
            b'\'' | b'"' | b'`' => i = close_quote(bytes, i, c, mysql && c != b'`')?,
            b'[' if !mysql => i = i + 1 + sql[i + 1..].find(']')? + 1,
            b'$' if !mysql => match dollar_tag(&sql[i..]) {
                Some(tag) => {
                    let body = i + tag.len();
                    i = body + sql[body..].find(tag)? + tag.len();
                }
                None => i += 1,
            },
            b';' => {
                out.push(Token::Separator);
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
                {
                    i += 1;
                }
                out.push(Token::Word(&sql[start..i]));
            }
            _ => i += 1,
        }
    }

    Some(out)
}

/// Index just past the quote closing the one at `open`; doubled quotes escape
fn close_quote(bytes: &[u8], open: usize, quote: u8, backslash_escapes: bool) -> Option<usize> {
    let mut i = open + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if backslash_escapes => i += 2,
            b if b == quote => {
                if bytes.get(i + 1) == Some(&quote) {
                    i += 2;
                } else {
                    return Some(i + 1);
                }
            }
            _ => i += 1,
        }
    }
    None
}

/// `$tag$` or `$$` opening a dollar-quoted body; `$1` parameters are not tags
fn dollar_tag(rest: &str) -> Option<&str> {
    let tail = &rest[1..];
    let end = tail.find('$')?;
    let tag = &tail[..end];
    let valid = tag
        .chars()
        .enumerate()
        .all(|(n, c)| c == '_' || c.is_ascii_alphabetic() || (n > 0 && c.is_ascii_digit()));
    if valid {
        Some(&rest[..end + 2])
    } else {
        None
    }
}

fn scan_is_read(sql: &str, lexing: Lexing) -> bool {
    let tokens = match tokens(sql, lexing) {
        Some(tokens) => tokens,
        None => return false,
    };

    let is = |word: &str, set: &[&str]| set.iter().any(|k| k.eq_ignore_ascii_case(word));

    let first = match tokens.first() {
        Some(Token::Word(word)) if is(word, READ_KEYWORDS) => *word,
        _ => return false,
    };

    // A separator may only trail the statement
    if let Some(sep) = tokens.iter().position(|t| *t == Token::Separator) {
        if tokens[sep..].iter().any(|t| matches!(t, Token::Word(_))) {
            return false;
        }
    }

    if is(first, INSPECT_KEYWORDS) {
        return true;
    }

    !tokens
        .iter()
        .any(|t| matches!(t, Token::Word(word) if is(word, WRITE_KEYWORDS)))
}

/// The single synthetic row returned by a committed write
pub fn write_result(rows_affected: u64) -> RowSet {
    let mut row = Row::new();
    row.insert("rows_affected".to_string(), Value::from(rows_affected));
    row.insert("status".to_string(), Value::from("success"));
    vec![row]
}
