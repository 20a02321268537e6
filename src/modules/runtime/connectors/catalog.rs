//! Engine independent catalog walking

use polyquery_core::error::Result;
use polyquery_types::{
    ColumnInfo, ConstraintInfo, IndexColumn, IndexInfo, QueryParams, RowSet, SchemaDescriptor,
    TableInfo, TableLookup,
};
use tracing::{debug, warn};

use super::dialect::{bind, flag, int, text, CatalogDialect, CatalogQuery, TableRef};
use super::traits::SqlSession;

async fn run<S, D>(session: &mut S, dialect: &D, query: CatalogQuery) -> Result<RowSet>
where
    S: SqlSession,
    D: CatalogDialect,
{
    let params = QueryParams::Positional(query.args);
    let bound = bind(dialect, &query.sql, Some(&params))?;
    session.fetch(&bound).await
}

/// `(schema, table)` pairs in catalog order
pub async fn list_tables<S, D>(
    session: &mut S,
    dialect: &D,
    database: Option<&str>,
) -> Result<Vec<(String, String)>>
where
    S: SqlSession,
    D: CatalogDialect,
{
    let rows = run(session, dialect, dialect.tables_query(database)).await?;
    Ok(rows
        .iter()
        .filter_map(|row| Some((text(row, "table_schema")?, text(row, "table_name")?)))
        .collect())
}

/// Describe one table; a table without catalog columns does not exist
pub async fn describe_table<S, D>(
    session: &mut S,
    dialect: &D,
    table: &TableRef,
) -> Result<TableLookup>
where
    S: SqlSession,
    D: CatalogDialect,
{
    let column_rows = run(session, dialect, dialect.columns_query(table)).await?;
    if column_rows.is_empty() {
        debug!("No catalog columns for {}.{}", table.schema, table.table);
        return Ok(TableLookup::not_found());
    }

    let mut info = TableInfo::new(table.schema.clone(), table.table.clone());
    info.columns = column_rows
        .iter()
        .filter_map(|row| {
            Some(ColumnInfo {
                name: text(row, "column_name")?,
                data_type: text(row, "data_type").unwrap_or_default(),
                nullable: flag(row, "is_nullable"),
                default: text(row, "column_default"),
                ordinal_position: int(row, "ordinal_position"),
            })
        })
        .collect();
    info.columns.sort_by_key(|c| c.ordinal_position);

    if let Some(query) = dialect.indexes_query(table) {
        info.indexes = group_indexes(&run(session, dialect, query).await?);
    }

    if let Some(query) = dialect.constraints_query(table) {
        info.constraints = group_constraints(&run(session, dialect, query).await?);
    }

    if let Some(query) = dialect.stats_query(table) {
        // Stats are best effort; some catalogs restrict them by privilege
        match run(session, dialect, query).await {
            Ok(rows) => info.stats = dialect.stats_from_rows(rows),
            Err(e) => warn!(
                "Stats unavailable for {}.{}: {}",
                table.schema, table.table, e
            ),
        }
    }

    Ok(TableLookup::Found(info))
}

/// Describe every table of a namespace
pub async fn walk_schema<S, D>(
    session: &mut S,
    dialect: &D,
    database: Option<&str>,
) -> Result<SchemaDescriptor>
where
    S: SqlSession,
    D: CatalogDialect,
{
    let mut schema = SchemaDescriptor::new();
    for (namespace, name) in list_tables(session, dialect, database).await? {
        let table = dialect.table_in(&namespace, &name, database);
        // A table dropped between listing and describing is skipped
        if let TableLookup::Found(info) = describe_table(session, dialect, &table).await? {
            schema.insert(info);
        }
    }
    Ok(schema)
}

fn group_indexes(rows: &RowSet) -> Vec<IndexInfo> {
    let mut indexes: Vec<IndexInfo> = Vec::new();
    for row in rows {
        let Some(name) = text(row, "index_name") else {
            continue;
        };
        let column = IndexColumn {
            name: text(row, "column_name").unwrap_or_default(),
            key_ordinal: int(row, "key_ordinal"),
        };
        match indexes.iter_mut().find(|i| i.name == name) {
            Some(index) => index.columns.push(column),
            None => indexes.push(IndexInfo {
                name,
                columns: vec![column],
                unique: flag(row, "is_unique"),
                primary: flag(row, "is_primary"),
            }),
        }
    }
    for index in &mut indexes {
        index.columns.sort_by_key(|c| c.key_ordinal);
    }
    indexes
}

fn group_constraints(rows: &RowSet) -> Vec<ConstraintInfo> {
    let mut constraints: Vec<ConstraintInfo> = Vec::new();
    for row in rows {
        let Some(name) = text(row, "constraint_name") else {
            continue;
        };
        let column = text(row, "column_name");
        match constraints.iter_mut().find(|c| c.name == name) {
            Some(constraint) => constraint.columns.extend(column),
            None => constraints.push(ConstraintInfo {
                name,
                constraint_type: text(row, "constraint_type").unwrap_or_default(),
                columns: column.into_iter().collect(),
            }),
        }
    }
    constraints
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(value: serde_json::Value) -> RowSet {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn test_group_indexes_orders_keys() {
        let grouped = group_indexes(&rows(json!([
            {"index_name": "orders_pkey", "column_name": "id", "key_ordinal": 1, "is_unique": true, "is_primary": true},
            {"index_name": "orders_cust_date", "column_name": "created_at", "key_ordinal": 2, "is_unique": 0, "is_primary": 0},
            {"index_name": "orders_cust_date", "column_name": "customer_id", "key_ordinal": 1, "is_unique": 0, "is_primary": 0}
        ])));
        assert_eq!(grouped.len(), 2);
        assert!(grouped[0].primary);
        let composite = &grouped[1];
        assert_eq!(composite.columns[0].name, "customer_id");
        assert_eq!(composite.columns[1].key_ordinal, 2);
        assert!(!composite.unique);
    }

    #[test]
    fn test_group_constraints_without_columns() {
        let grouped = group_constraints(&rows(json!([
            {"constraint_name": "orders_pkey", "constraint_type": "PRIMARY KEY", "column_name": "id"},
            {"constraint_name": "amount_positive", "constraint_type": "CHECK", "column_name": null}
        ])));
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].columns, vec!["id".to_string()]);
        assert!(grouped[1].columns.is_empty());
    }
}
