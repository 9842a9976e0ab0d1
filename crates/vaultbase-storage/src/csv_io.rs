use std::path::Path;

use vaultbase_fs::AtomicWriteError;

use crate::column::ColumnInfo;
use crate::error::{Result, StoreError};
use crate::value::{Record, Value};

/// Write `records` under a header of every physical column name.
pub(crate) fn export(columns: &[ColumnInfo], records: &[Record], dest: &Path) -> Result<usize> {
    let header: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();

    let written = vaultbase_fs::atomic_write(dest, |file| {
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(&header)?;
        for record in records {
            let row: Vec<String> = columns
                .iter()
                .map(|c| {
                    if c.primary_key {
                        record.id.to_string()
                    } else {
                        record.get(&c.name).map(Value::to_string).unwrap_or_default()
                    }
                })
                .collect();
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok::<_, csv::Error>(records.len())
    });

    written.map_err(|err| match err {
        AtomicWriteError::Io(source) => StoreError::Io {
            path: dest.to_path_buf(),
            source,
        },
        AtomicWriteError::Writer(err) => StoreError::Csv(err),
    })
}

/// Read a CSV file for import into a table with `columns`.
///
/// Every header name must be an existing column. Empty fields become NULL.
pub(crate) fn read(source: &Path, columns: &[ColumnInfo]) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    let mut reader = csv::Reader::from_path(source)?;
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();

    let unknown: Vec<String> = header
        .iter()
        .filter(|h| !columns.iter().any(|c| c.name.eq_ignore_ascii_case(h)))
        .cloned()
        .collect();
    if !unknown.is_empty() {
        return Err(StoreError::UnknownColumns(unknown));
    }

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(
            record
                .iter()
                .map(|field| {
                    if field.is_empty() {
                        Value::Null
                    } else {
                        Value::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok((header, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn columns() -> Vec<ColumnInfo> {
        ["id", "client", "amount"]
            .iter()
            .enumerate()
            .map(|(position, name)| ColumnInfo {
                position,
                name: name.to_string(),
                declared_type: if position == 0 { "INTEGER" } else { "TEXT" }.to_string(),
                primary_key: position == 0,
            })
            .collect()
    }

    #[test]
    fn export_renders_nulls_and_blobs() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("out.csv");
        let records = vec![Record {
            id: 4,
            values: vec![
                ("client".to_string(), Value::Blob(vec![1, 2])),
                ("amount".to_string(), Value::Null),
            ],
        }];

        assert_eq!(export(&columns(), &records, &path).expect("export"), 1);
        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text, "id,client,amount\n4,<BINARY_FILE>,\n");
    }

    #[test]
    fn unknown_header_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "client,colour\nAcme,red\n").expect("write");

        match read(&path, &columns()) {
            Err(StoreError::UnknownColumns(names)) => assert_eq!(names, vec!["colour".to_string()]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ragged_rows_are_an_error() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("in.csv");
        std::fs::write(&path, "client,amount\nAcme\n").expect("write");
        assert!(matches!(read(&path, &columns()), Err(StoreError::Csv(_))));
    }
}
