//! Deterministic narrative summaries of results and schemas

use polyquery_core::InsightGenerator;
use polyquery_types::{RowSet, SchemaDescriptor};
use serde_json::Value;
use std::fmt::Write;

/// Reports row counts, column sets and numeric ranges
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryInsights;

struct NumericRange {
    min: f64,
    max: f64,
    sum: f64,
    count: usize,
}

impl NumericRange {
    fn new(value: f64) -> Self {
        Self {
            min: value,
            max: value,
            sum: value,
            count: 1,
        }
    }

    fn add(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

fn numeric_ranges(rows: &RowSet) -> Vec<(String, NumericRange)> {
    let mut ranges: Vec<(String, NumericRange)> = Vec::new();
    for row in rows {
        for (column, value) in row {
            let Some(number) = value.as_f64() else {
                continue;
            };
            match ranges.iter_mut().find(|(name, _)| name == column) {
                Some((_, range)) => range.add(number),
                None => ranges.push((column.clone(), NumericRange::new(number))),
            }
        }
    }
    ranges
}

fn null_counts(rows: &RowSet) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for row in rows {
        for (column, value) in row {
            if !matches!(value, Value::Null) {
                continue;
            }
            match counts.iter_mut().find(|(name, _)| name == column) {
                Some((_, n)) => *n += 1,
                None => counts.push((column.clone(), 1)),
            }
        }
    }
    counts
}

impl InsightGenerator for SummaryInsights {
    fn analyze(&self, rows: &RowSet, analysis_type: &str) -> String {
        let mut out = String::new();
        let columns: Vec<&str> = rows
            .first()
            .map(|row| row.keys().map(String::as_str).collect())
            .unwrap_or_default();

        let _ = writeln!(
            out,
            "{} analysis: {} row(s), {} column(s)",
            analysis_type,
            rows.len(),
            columns.len()
        );
        if rows.is_empty() {
            out.push_str("The query returned no rows.");
            return out;
        }
        let _ = writeln!(out, "Columns: {}", columns.join(", "));

        for (column, range) in numeric_ranges(rows) {
            let _ = writeln!(
                out,
                "- {}: min {}, max {}, mean {:.2} over {} value(s)",
                column,
                range.min,
                range.max,
                range.mean(),
                range.count
            );
        }
        for (column, nulls) in null_counts(rows) {
            let _ = writeln!(out, "- {}: {} null value(s)", column, nulls);
        }
        out.trim_end().to_string()
    }

    fn recommend(&self, schema: &SchemaDescriptor, context: &str) -> String {
        let mut out = String::new();
        if !context.is_empty() {
            let _ = writeln!(out, "Context: {}", context);
        }
        let _ = writeln!(
            out,
            "{} table(s) across {} namespace(s)",
            schema.table_count(),
            schema.namespaces().count()
        );

        let needle = context.to_lowercase();
        for table in schema.tables() {
            let mut notes = Vec::new();
            if table.indexes.is_empty() {
                notes.push("no indexes".to_string());
            }
            let has_primary = table.indexes.iter().any(|i| i.primary)
                || table
                    .constraints
                    .iter()
                    .any(|c| c.constraint_type.eq_ignore_ascii_case("PRIMARY KEY"));
            if !has_primary {
                notes.push("no primary key".to_string());
            }
            let relevant = !needle.is_empty()
                && (table.name.to_lowercase().contains(&needle)
                    || table
                        .columns
                        .iter()
                        .any(|c| needle.contains(&c.name.to_lowercase())));
            if relevant {
                notes.push("matches the context".to_string());
            }
            if !notes.is_empty() {
                let _ = writeln!(out, "- {}: {}", table.qualified_name(), notes.join("; "));
            }
        }
        out.trim_end().to_string()
    }
}
