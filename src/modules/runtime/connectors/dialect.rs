//! Per-engine SQL dialects
//!
//! A dialect owns everything that differs textually between engines:
//! identifier quoting, native placeholder syntax, transaction statements,
//! the liveness query and the catalog SQL. Connectors never build SQL inline.

use polyquery_core::{error::Result, PolyqueryError};
use polyquery_types::{QueryParams, Row, RowSet};
use serde_json::{Map, Value};

/// How bound values reach the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStyle {
    /// Driver level parameters using the dialect's placeholder syntax
    Native,
    /// Values are escaped and written into the statement text
    Inline,
}

/// Statement text plus the values for its native placeholders
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub args: Vec<Value>,
}

impl BoundStatement {
    pub fn plain(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            args: Vec::new(),
        }
    }
}

/// Catalog SQL with `?` markers and their values
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogQuery {
    pub sql: String,
    pub args: Vec<Value>,
}

impl CatalogQuery {
    pub fn new(sql: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            args,
        }
    }
}

/// Fully resolved address of one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    /// Database for engines that address catalogs with four-part names
    pub database: Option<String>,
    pub schema: String,
    pub table: String,
}

/// Textual syntax of an engine
pub trait Dialect: Send + Sync {
    /// Quote an identifier, doubling any embedded closing quote
    fn quote_ident(&self, ident: &str) -> String;

    fn bind_style(&self) -> BindStyle {
        BindStyle::Native
    }

    /// Native placeholder for the 1-based parameter `index`
    fn placeholder(&self, index: usize) -> String;

    /// Whether `[...]` delimits identifiers
    fn bracket_identifiers(&self) -> bool {
        false
    }

    /// Whether a backslash escapes the next character inside string literals
    fn backslash_escapes(&self) -> bool {
        false
    }

    /// Escaped literal for inline binding
    fn literal(&self, value: &Value) -> String {
        ansi_literal(value)
    }

    fn begin_sql(&self) -> Option<&'static str>;

    fn commit_sql(&self) -> Option<&'static str>;

    fn rollback_sql(&self) -> Option<&'static str>;

    /// Minimal liveness query
    fn ping_sql(&self) -> &'static str {
        "SELECT 1"
    }
}

/// Catalog model of an engine
///
/// Every query returns rows with lowercase aliases:
/// - tables: `table_schema`, `table_name`
/// - columns: `column_name`, `data_type`, `is_nullable`, `column_default`, `ordinal_position`
/// - indexes: `index_name`, `column_name`, `key_ordinal`, `is_unique`, `is_primary`
/// - constraints: `constraint_name`, `constraint_type`, `column_name`
pub trait CatalogDialect: Dialect {
    fn tables_query(&self, database: Option<&str>) -> CatalogQuery;

    fn columns_query(&self, table: &TableRef) -> CatalogQuery;

    fn indexes_query(&self, table: &TableRef) -> Option<CatalogQuery>;

    fn constraints_query(&self, table: &TableRef) -> Option<CatalogQuery>;

    fn stats_query(&self, table: &TableRef) -> Option<CatalogQuery>;

    /// Schema used for unqualified table names
    fn default_schema(&self) -> String;

    /// Resolve `table` or `schema.table` against an optional database/schema hint.
    /// Parts may be quoted with `"`, backticks or brackets to carry dots.
    fn table_ref(&self, table: &str, database: Option<&str>) -> TableRef {
        let mut parts = split_name(table);
        let name = parts.pop().unwrap_or_default();
        match parts.pop() {
            Some(schema) => self.table_in(&schema, &name, database),
            None => {
                let schema = database
                    .map(str::to_string)
                    .unwrap_or_else(|| self.default_schema());
                self.table_in(&schema, &name, database)
            }
        }
    }

    /// Address a table already split into schema and name
    fn table_in(&self, schema: &str, table: &str, _database: Option<&str>) -> TableRef {
        TableRef {
            database: None,
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    /// Fold stats rows into the table's `stats` map
    fn stats_from_rows(&self, rows: RowSet) -> Map<String, Value> {
        rows.into_iter().next().unwrap_or_default()
    }
}

/// Split a dotted name into unquoted parts.
/// Dots inside `"..."`, backticks or `[...]` belong to the part.
pub fn split_name(name: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = name.chars().peekable();

    while let Some(c) = chars.next() {
        let close = match c {
            '"' => '"',
            '`' => '`',
            '[' => ']',
            '.' => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            other => {
                current.push(other);
                continue;
            }
        };
        while let Some(inner) = chars.next() {
            if inner == close {
                if chars.peek() == Some(&close) {
                    chars.next();
                    current.push(close);
                    continue;
                }
                break;
            }
            current.push(inner);
        }
    }
    parts.push(current);
    parts
}

/// Render `schema.table` so that [`split_name`] gives the parts back
pub fn join_name(schema: &str, table: &str) -> String {
    format!("{}.{}", name_part(schema), name_part(table))
}

fn name_part(part: &str) -> String {
    if part.contains(&['.', '"', '`', '['][..]) {
        format!("\"{}\"", part.replace('"', "\"\""))
    } else {
        part.to_string()
    }
}

/// Literal spelling shared by most engines
pub fn ansi_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Array(items) => {
            let elements: Vec<String> = items.iter().map(ansi_literal).collect();
            format!("({})", elements.join(", "))
        }
        Value::Object(_) => format!("'{}'", value.to_string().replace('\'', "''")),
    }
}

/// Rewrite caller markers into the dialect's native form.
///
/// Positional params bind `?` markers, named params bind `:name` markers.
/// Markers inside string literals, quoted identifiers and comments are left
/// alone, as are `::` casts. A positional list for a statement without `?`
/// markers is passed through untouched.
pub fn bind(
    dialect: &dyn Dialect,
    query: &str,
    params: Option<&QueryParams>,
) -> Result<BoundStatement> {
    let params = match params {
        Some(p) if !p.is_empty() => p,
        _ => return Ok(BoundStatement::plain(query)),
    };

    let mut binder = Binder {
        dialect,
        sql: String::with_capacity(query.len() + 16),
        args: Vec::new(),
    };

    match params {
        QueryParams::Positional(values) => {
            let mut next = values.iter();
            let mut markers = 0usize;
            scan(query, dialect, |token| match token {
                Token::Text(text) => {
                    binder.sql.push_str(text);
                    Ok(())
                }
                Token::Positional => {
                    markers += 1;
                    let value = next.next().ok_or_else(|| {
                        PolyqueryError::Validation(format!(
                            "statement has more '?' markers than the {} supplied params",
                            values.len()
                        ))
                    })?;
                    binder.push(value);
                    Ok(())
                }
                Token::Named(name) => {
                    binder.sql.push(':');
                    binder.sql.push_str(name);
                    Ok(())
                }
            })?;

            if markers == 0 {
                if dialect.bind_style() == BindStyle::Inline {
                    return Err(PolyqueryError::Validation(
                        "positional params require '?' markers for this engine".to_string(),
                    ));
                }
                return Ok(BoundStatement {
                    sql: query.to_string(),
                    args: values.clone(),
                });
            }
            if markers != values.len() {
                return Err(PolyqueryError::Validation(format!(
                    "statement has {} '?' markers but {} params were supplied",
                    markers,
                    values.len()
                )));
            }
        }
        QueryParams::Named(values) => {
            scan(query, dialect, |token| match token {
                Token::Text(text) => {
                    binder.sql.push_str(text);
                    Ok(())
                }
                Token::Positional => {
                    binder.sql.push('?');
                    Ok(())
                }
                Token::Named(name) => {
                    let value = values.get(name).ok_or_else(|| {
                        PolyqueryError::Validation(format!("missing value for param ':{}'", name))
                    })?;
                    binder.push(value);
                    Ok(())
                }
            })?;
        }
    }

    Ok(BoundStatement {
        sql: binder.sql,
        args: binder.args,
    })
}

struct Binder<'a> {
    dialect: &'a dyn Dialect,
    sql: String,
    args: Vec<Value>,
}

impl Binder<'_> {
    fn push(&mut self, value: &Value) {
        match self.dialect.bind_style() {
            BindStyle::Native => {
                self.args.push(value.clone());
                let marker = self.dialect.placeholder(self.args.len());
                self.sql.push_str(&marker);
            }
            BindStyle::Inline => {
                let literal = self.dialect.literal(value);
                self.sql.push_str(&literal);
            }
        }
    }
}

enum Token<'q> {
    Text(&'q str),
    Positional,
    Named(&'q str),
}

/// Split a statement into plain text and parameter markers
fn scan<'q, F>(query: &'q str, dialect: &dyn Dialect, mut emit: F) -> Result<()>
where
    F: FnMut(Token<'q>) -> Result<()>,
{
    let brackets = dialect.bracket_identifiers();
    let backslash = dialect.backslash_escapes();
    let bytes = query.as_bytes();
    let mut start = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            quote @ (b'\'' | b'"' | b'`') => {
                i = skip_quoted(bytes, i, quote, backslash);
            }
            b'[' if brackets => {
                i = skip_quoted(bytes, i, b']', false);
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                i = bytes[i..]
                    .iter()
                    .position(|&b| b == b'\n')
                    .map(|p| i + p + 1)
                    .unwrap_or(bytes.len());
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = query[i + 2..]
                    .find("*/")
                    .map(|p| i + 2 + p + 2)
                    .unwrap_or(bytes.len());
            }
            b'?' => {
                emit(Token::Text(&query[start..i]))?;
                emit(Token::Positional)?;
                i += 1;
                start = i;
            }
            b':' if bytes.get(i + 1) == Some(&b':') => {
                i += 2;
            }
            b':' if i > 0 && bytes[i - 1] == b':' => {
                i += 1;
            }
            b':' if bytes
                .get(i + 1)
                .map_or(false, |b| b.is_ascii_alphabetic() || *b == b'_') =>
            {
                let name_end = bytes[i + 1..]
                    .iter()
                    .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
                    .map(|p| i + 1 + p)
                    .unwrap_or(bytes.len());
                emit(Token::Text(&query[start..i]))?;
                emit(Token::Named(&query[i + 1..name_end]))?;
                i = name_end;
                start = i;
            }
            _ => i += 1,
        }
    }

    emit(Token::Text(&query[start..]))
}

/// Index just past the closing delimiter; a doubled delimiter is an escape
fn skip_quoted(bytes: &[u8], open: usize, close: u8, backslash: bool) -> usize {
    let mut i = open + 1;
    while i < bytes.len() {
        if backslash && bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == close {
            if bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

/// Case-insensitive field lookup on a catalog row
pub fn field<'r>(row: &'r Row, key: &str) -> Option<&'r Value> {
    row.get(key).or_else(|| {
        row.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

pub fn text(row: &Row, key: &str) -> Option<String> {
    match field(row, key)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn int(row: &Row, key: &str) -> i64 {
    match field(row, key) {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or_default(),
        Some(Value::String(s)) => s.trim().parse().unwrap_or_default(),
        Some(Value::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}

pub fn flag(row: &Row, key: &str) -> bool {
    match field(row, key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map_or(false, |v| v != 0),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_uppercase().as_str(),
            "YES" | "Y" | "TRUE" | "T" | "1"
        ),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Dollar;

    impl Dialect for Dollar {
        fn quote_ident(&self, ident: &str) -> String {
            format!("\"{}\"", ident.replace('"', "\"\""))
        }
        fn placeholder(&self, index: usize) -> String {
            format!("${}", index)
        }
        fn begin_sql(&self) -> Option<&'static str> {
            Some("BEGIN")
        }
        fn commit_sql(&self) -> Option<&'static str> {
            Some("COMMIT")
        }
        fn rollback_sql(&self) -> Option<&'static str> {
            Some("ROLLBACK")
        }
    }

    struct Inline;

    impl Dialect for Inline {
        fn quote_ident(&self, ident: &str) -> String {
            format!("`{}`", ident)
        }
        fn bind_style(&self) -> BindStyle {
            BindStyle::Inline
        }
        fn placeholder(&self, _index: usize) -> String {
            String::new()
        }
        fn begin_sql(&self) -> Option<&'static str> {
            None
        }
        fn commit_sql(&self) -> Option<&'static str> {
            None
        }
        fn rollback_sql(&self) -> Option<&'static str> {
            None
        }
    }

    struct Backslash;

    impl Dialect for Backslash {
        fn quote_ident(&self, ident: &str) -> String {
            format!("`{}`", ident.replace('`', "``"))
        }
        fn placeholder(&self, _index: usize) -> String {
            "?".to_string()
        }
        fn backslash_escapes(&self) -> bool {
            true
        }
        fn begin_sql(&self) -> Option<&'static str> {
            None
        }
        fn commit_sql(&self) -> Option<&'static str> {
            None
        }
        fn rollback_sql(&self) -> Option<&'static str> {
            None
        }
    }

    struct Catalog;

    impl Dialect for Catalog {
        fn quote_ident(&self, ident: &str) -> String {
            format!("\"{}\"", ident.replace('"', "\"\""))
        }
        fn placeholder(&self, index: usize) -> String {
            format!("${}", index)
        }
        fn begin_sql(&self) -> Option<&'static str> {
            None
        }
        fn commit_sql(&self) -> Option<&'static str> {
            None
        }
        fn rollback_sql(&self) -> Option<&'static str> {
            None
        }
    }

    impl CatalogDialect for Catalog {
        fn tables_query(&self, _database: Option<&str>) -> CatalogQuery {
            CatalogQuery::new("SELECT 1", vec![])
        }
        fn columns_query(&self, _table: &TableRef) -> CatalogQuery {
            CatalogQuery::new("SELECT 1", vec![])
        }
        fn indexes_query(&self, _table: &TableRef) -> Option<CatalogQuery> {
            None
        }
        fn constraints_query(&self, _table: &TableRef) -> Option<CatalogQuery> {
            None
        }
        fn stats_query(&self, _table: &TableRef) -> Option<CatalogQuery> {
            None
        }
        fn default_schema(&self) -> String {
            "public".to_string()
        }
    }

    fn positional(values: Value) -> QueryParams {
        serde_json::from_value(values).unwrap()
    }

    #[test]
    fn test_bind_without_params_is_identity() {
        let bound = bind(&Dollar, "SELECT '?' FROM t", None).unwrap();
        assert_eq!(bound, BoundStatement::plain("SELECT '?' FROM t"));
    }

    #[test]
    fn test_bind_positional_rewrites_markers() {
        let params = positional(json!([1, "a"]));
        let bound = bind(
            &Dollar,
            "SELECT * FROM t WHERE id = ? AND note <> '?' AND name = ?",
            Some(&params),
        )
        .unwrap();
        assert_eq!(
            bound.sql,
            "SELECT * FROM t WHERE id = $1 AND note <> '?' AND name = $2"
        );
        assert_eq!(bound.args, vec![json!(1), json!("a")]);
    }

    #[test]
    fn test_bind_named_skips_casts_and_strings() {
        let params = positional(json!({"id": 7}));
        let bound = bind(
            &Dollar,
            "SELECT created::date, ':id' FROM t WHERE id = :id OR parent = :id",
            Some(&params),
        )
        .unwrap();
        assert_eq!(
            bound.sql,
            "SELECT created::date, ':id' FROM t WHERE id = $1 OR parent = $2"
        );
        assert_eq!(bound.args.len(), 2);
    }

    #[test]
    fn test_bind_named_missing_value() {
        let params = positional(json!({"other": 1}));
        let err = bind(&Dollar, "SELECT :id", Some(&params)).unwrap_err();
        assert!(err.to_string().contains(":id"));
    }

    #[test]
    fn test_bind_positional_count_mismatch() {
        let params = positional(json!([1]));
        assert!(bind(&Dollar, "SELECT ?, ?", Some(&params)).is_err());
    }

    #[test]
    fn test_bind_passthrough_native_placeholders() {
        let params = positional(json!([5]));
        let bound = bind(&Dollar, "SELECT * FROM t WHERE id = $1", Some(&params)).unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE id = $1");
        assert_eq!(bound.args, vec![json!(5)]);
    }

    #[test]
    fn test_bind_inline_escapes_literals() {
        let params = positional(json!(["O'Brien", null, true]));
        let bound = bind(&Inline, "SELECT ?, ?, ? -- trailing ?\n", Some(&params));
        // comment markers are not counted
        let bound = bound.unwrap();
        assert_eq!(bound.sql, "SELECT 'O''Brien', NULL, TRUE -- trailing ?\n");
        assert!(bound.args.is_empty());
    }

    #[test]
    fn test_bind_ignores_markers_in_comments_and_identifiers() {
        let params = positional(json!({"v": 1}));
        let bound = bind(
            &Dollar,
            "/* :skip */ SELECT \"col:x\" FROM t WHERE a = :v",
            Some(&params),
        )
        .unwrap();
        assert_eq!(bound.sql, "/* :skip */ SELECT \"col:x\" FROM t WHERE a = $1");
    }

    #[test]
    fn test_row_helpers() {
        let row: Row = json!({
            "COLUMN_NAME": "id",
            "is_nullable": "NO",
            "ordinal_position": "3",
            "is_unique": 1
        })
        .as_object()
        .cloned()
        .unwrap();
        assert_eq!(text(&row, "column_name").as_deref(), Some("id"));
        assert!(!flag(&row, "is_nullable"));
        assert_eq!(int(&row, "ordinal_position"), 3);
        assert!(flag(&row, "is_unique"));
        assert_eq!(text(&row, "missing"), None);
    }

    #[test]
    fn test_backslash_is_literal_in_standard_strings() {
        let params = positional(json!([5]));
        let bound = bind(
            &Dollar,
            "SELECT * FROM t WHERE path = 'C:\\' AND id = ?",
            Some(&params),
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE path = 'C:\\' AND id = $1");
        assert_eq!(bound.args, vec![json!(5)]);
    }

    #[test]
    fn test_backslash_escapes_quotes_where_the_engine_does() {
        let params = positional(json!([5]));
        let bound = bind(
            &Backslash,
            "SELECT * FROM t WHERE note = 'it\\'s ?' AND id = ?",
            Some(&params),
        )
        .unwrap();
        assert_eq!(bound.sql, "SELECT * FROM t WHERE note = 'it\\'s ?' AND id = ?");
        assert_eq!(bound.args, vec![json!(5)]);
    }

    #[test]
    fn test_split_name_honours_quotes() {
        assert_eq!(split_name("sales.orders"), vec!["sales", "orders"]);
        assert_eq!(split_name("\"my.schema\".\"ta.ble\""), vec!["my.schema", "ta.ble"]);
        assert_eq!(split_name("[a].[b.c]"), vec!["a", "b.c"]);
        assert_eq!(split_name("`x``y`.z"), vec!["x`y", "z"]);
        assert_eq!(split_name("\"say \"\"hi\"\"\""), vec!["say \"hi\""]);
        assert_eq!(split_name("orders"), vec!["orders"]);
    }

    #[test]
    fn test_listed_names_resolve_back_to_their_parts() {
        for (schema, table) in [
            ("public", "orders"),
            ("my.schema", "ta.ble"),
            ("odd\"name", "[x]"),
        ] {
            let listed = join_name(schema, table);
            let resolved = Catalog.table_ref(&listed, None);
            assert_eq!((resolved.schema.as_str(), resolved.table.as_str()), (schema, table), "{}", listed);
        }
        assert_eq!(join_name("public", "orders"), "public.orders");

        let plain = Catalog.table_ref("orders", None);
        assert_eq!(plain.schema, "public");
        let hinted = Catalog.table_ref("orders", Some("sales"));
        assert_eq!(hinted.schema, "sales");
    }
}
