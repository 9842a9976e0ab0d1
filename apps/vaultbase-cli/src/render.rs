use std::io::Write;

use anyhow::Result;
use clap::ValueEnum;
use serde_json::{Map, Value as JsonValue};
use vaultbase_attachments::{display_names, parse_refs};
use vaultbase_storage::{ColumnKind, Record, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn kind_label(kind: &ColumnKind) -> String {
    match kind {
        ColumnKind::Id => "id".to_string(),
        ColumnKind::Text => "text".to_string(),
        ColumnKind::Real => "real".to_string(),
        ColumnKind::Date => "date".to_string(),
        ColumnKind::File => "file".to_string(),
        ColumnKind::Relation { table } => format!("relation={table}"),
    }
}

fn cell_text(kind: &ColumnKind, value: &Value) -> String {
    match (kind, value) {
        (ColumnKind::File, Value::Text(refs)) => display_names(refs),
        // Cells never contain tabs or newlines in text output.
        _ => value.to_string().replace(['\t', '\n', '\r'], " "),
    }
}

fn cell_json(kind: &ColumnKind, value: &Value) -> JsonValue {
    match (kind, value) {
        (ColumnKind::File, Value::Text(refs)) => JsonValue::Array(
            parse_refs(refs)
                .into_iter()
                .map(|r| JsonValue::String(r.original_name))
                .collect(),
        ),
        (_, Value::Null) => JsonValue::Null,
        (_, Value::Integer(n)) => JsonValue::from(*n),
        (_, Value::Real(n)) => serde_json::Number::from_f64(*n).map_or(JsonValue::Null, JsonValue::Number),
        (_, Value::Text(s)) => JsonValue::String(s.clone()),
        (_, Value::Blob(_)) => JsonValue::String(value.to_string()),
    }
}

fn kind_of<'a>(kinds: &'a [(String, ColumnKind)], column: &str) -> &'a ColumnKind {
    kinds
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(column))
        .map_or(&ColumnKind::Text, |(_, kind)| kind)
}

/// Tab-separated with a header row, or a JSON array of objects.
pub fn write_records(
    out: &mut dyn Write,
    kinds: &[(String, ColumnKind)],
    records: &[Record],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Text => {
            let header: Vec<&str> = kinds.iter().map(|(name, _)| name.as_str()).collect();
            writeln!(out, "{}", header.join("\t"))?;
            for record in records {
                let mut cells = vec![record.id.to_string()];
                cells.extend(
                    record
                        .values
                        .iter()
                        .map(|(name, value)| cell_text(kind_of(kinds, name), value)),
                );
                writeln!(out, "{}", cells.join("\t"))?;
            }
        }
        OutputFormat::Json => {
            let rows: Vec<JsonValue> = records
                .iter()
                .map(|record| {
                    let mut row = Map::new();
                    row.insert("id".to_string(), JsonValue::from(record.id));
                    for (name, value) in &record.values {
                        row.insert(name.clone(), cell_json(kind_of(kinds, name), value));
                    }
                    JsonValue::Object(row)
                })
                .collect();
            serde_json::to_writer_pretty(&mut *out, &rows)?;
            writeln!(out)?;
        }
    }
    Ok(())
}
