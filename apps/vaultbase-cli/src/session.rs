use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use vaultbase_attachments::{format_refs, parse_refs, AttachmentConfig, AttachmentRef, AttachmentStore};
use vaultbase_storage::{
    validate_email, validate_value, ColumnKind, Record, RecordStore, SpecialType, StoreConfig, Value,
};

use crate::layout::DataLayout;
use crate::settings::Settings;

/// A `column=value` pair from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub column: String,
    pub raw: String,
}

pub fn parse_assignment(arg: &str) -> Result<Assignment, String> {
    match arg.split_once('=') {
        Some((column, raw)) if !column.is_empty() => Ok(Assignment {
            column: column.to_string(),
            raw: raw.to_string(),
        }),
        _ => Err(format!("expected COLUMN=VALUE, got {arg:?}")),
    }
}

/// An authenticated, open data directory: the record store plus the attachment
/// store that owns the blobs referenced from FILE columns.
///
/// Blobs a command stops referencing are only deleted at [`Session::close`],
/// once the undo journal is gone, and only if no cell points at them again.
pub struct Session {
    pub store: RecordStore,
    pub attachments: AttachmentStore,
    released: Vec<AttachmentRef>,
}

impl Session {
    pub fn open(layout: &DataLayout, settings: &Settings) -> Result<Self> {
        layout.create_dirs()?;

        let attachments = AttachmentStore::open(AttachmentConfig {
            blob_dir: layout.files_dir(),
            key_path: layout.files_key(),
            legacy_key_path: Some(layout.legacy_key()),
            view_dir: layout.views_dir(),
        })
        .context("open attachment store")?;
        attachments.purge_views();

        let mut config = StoreConfig::new(layout.db_path(), layout.db_key());
        config.sync_interval = settings.sync_interval;
        config.journal_capacity = settings.journal_capacity;
        let store = RecordStore::open(config).context("open database")?;

        Ok(Self {
            store,
            attachments,
            released: Vec::new(),
        })
    }

    /// Delete released blobs that no FILE cell references, then close the store.
    pub fn close(mut self) {
        if !self.released.is_empty() {
            match self.referenced_blobs() {
                Ok(live) => {
                    let unused: Vec<AttachmentRef> = self
                        .released
                        .drain(..)
                        .filter(|r| !live.contains(&r.blob_name))
                        .collect();
                    let deleted = self.attachments.delete_all(&unused);
                    log::debug!("deleted {deleted} released attachment blob(s)");
                }
                Err(err) => log::warn!("keeping released attachment blobs: {err:#}"),
            }
        }
        self.store.close();
    }

    /// Blob names referenced from any FILE column of any table.
    fn referenced_blobs(&self) -> Result<HashSet<String>> {
        let mut live = HashSet::new();
        for table in self.store.list_tables()? {
            for record in self.store.get_records(&table, None)? {
                for value in self.file_values(&table, &record)? {
                    live.extend(parse_refs(&value).into_iter().map(|r| r.blob_name));
                }
            }
        }
        Ok(live)
    }

    fn release(&mut self, refs: impl IntoIterator<Item = AttachmentRef>) -> usize {
        let before = self.released.len();
        self.released.extend(refs);
        self.released.len() - before
    }

    pub fn kinds(&self, table: &str) -> Result<Vec<(String, ColumnKind)>> {
        Ok(self
            .store
            .column_kinds(table)?
            .into_iter()
            .map(|(info, kind)| (info.name, kind))
            .collect())
    }

    /// Validate command-line assignments against the table's column kinds.
    pub fn parse_values(&self, table: &str, assignments: &[Assignment]) -> Result<Vec<(String, Value)>> {
        let kinds = self.kinds(table)?;
        let mut values = Vec::with_capacity(assignments.len());
        for Assignment { column, raw } in assignments {
            let (name, kind) = kinds
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .ok_or_else(|| anyhow!("unknown column {table}.{column}"))?;
            if *kind == ColumnKind::File {
                bail!("{name} is a FILE column; use `attach`");
            }
            let value = validate_value(kind, raw).map_err(|err| anyhow!("{name}: {err}"))?;
            if *kind == ColumnKind::Text && name.to_ascii_lowercase().ends_with("email") {
                validate_email(raw).map_err(|err| anyhow!("{name}: {err}"))?;
            }
            values.push((name.clone(), value));
        }
        Ok(values)
    }

    fn file_values(&self, table: &str, record: &Record) -> Result<Vec<String>> {
        let columns = self.store.columns_with_special(table, SpecialType::File)?;
        Ok(columns
            .iter()
            .filter_map(|c| record.get(c).and_then(Value::as_text))
            .map(str::to_string)
            .collect())
    }

    /// Delete a row and release the blobs its FILE columns referenced.
    pub fn delete_record(&mut self, table: &str, id: i64) -> Result<usize> {
        let record = self
            .store
            .get_record(table, id)?
            .ok_or_else(|| anyhow!("record {id} not found in {table}"))?;
        let files = self.file_values(table, &record)?;
        self.store.delete_record(table, id)?;
        Ok(self.release(files.iter().flat_map(|v| parse_refs(v))))
    }

    /// Drop a table and release every blob referenced from its FILE columns.
    pub fn drop_table(&mut self, table: &str) -> Result<usize> {
        let mut files = Vec::new();
        for record in self.store.get_records(table, None)? {
            files.extend(self.file_values(table, &record)?);
        }
        self.store.drop_table(table)?;
        Ok(self.release(files.iter().flat_map(|v| parse_refs(v))))
    }

    fn require_file_column(&self, table: &str, column: &str) -> Result<String> {
        match self
            .kinds(table)?
            .into_iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(column))
        {
            Some((name, ColumnKind::File)) => Ok(name),
            Some((name, _)) => bail!("{table}.{name} is not a FILE column"),
            None => bail!("unknown column {table}.{column}"),
        }
    }

    fn current_refs(&self, table: &str, id: i64, column: &str) -> Result<Vec<AttachmentRef>> {
        let record = self
            .store
            .get_record(table, id)?
            .ok_or_else(|| anyhow!("record {id} not found in {table}"))?;
        Ok(record
            .get(column)
            .and_then(Value::as_text)
            .map(parse_refs)
            .unwrap_or_default())
    }

    /// Encrypt `files` into the blob directory and point the cell at them. Without
    /// `append` the blobs previously referenced by the cell are released.
    pub fn attach(
        &mut self,
        table: &str,
        id: i64,
        column: &str,
        files: &[PathBuf],
        append: bool,
    ) -> Result<Vec<AttachmentRef>> {
        let column = self.require_file_column(table, column)?;
        let old = self.current_refs(table, id, &column)?;

        let mut added = Vec::with_capacity(files.len());
        for file in files {
            match self.attachments.save(file) {
                Ok(reference) => added.push(reference),
                Err(err) => {
                    self.attachments.delete_all(&added);
                    return Err(err).with_context(|| format!("attach {}", file.display()));
                }
            }
        }

        let refs: Vec<AttachmentRef> = if append {
            old.iter().cloned().chain(added.iter().cloned()).collect()
        } else {
            added.clone()
        };
        let value = Value::Text(format_refs(&refs));
        if let Err(err) = self.store.update_record(table, id, &[(column.as_str(), value)]) {
            self.attachments.delete_all(&added);
            return Err(err.into());
        }
        if !append {
            self.release(old);
        }
        Ok(added)
    }

    /// Clear the cell and release the blobs it referenced.
    pub fn detach(&mut self, table: &str, id: i64, column: &str) -> Result<usize> {
        let column = self.require_file_column(table, column)?;
        let old = self.current_refs(table, id, &column)?;
        self.store
            .update_record(table, id, &[(column.as_str(), Value::Null)])?;
        Ok(self.release(old))
    }

    /// Decrypt the `index`-th attachment of a cell into the view directory.
    pub fn open_attachment(&self, table: &str, id: i64, column: &str, index: usize) -> Result<PathBuf> {
        let column = self.require_file_column(table, column)?;
        let refs = self.current_refs(table, id, &column)?;
        let reference = refs
            .get(index)
            .ok_or_else(|| anyhow!("{table}.{column} of record {id} has {} attachment(s)", refs.len()))?;
        Ok(self.attachments.open_for_read(reference)?)
    }

    pub fn export_csv(&self, table: &str, dest: &Path) -> Result<usize> {
        self.store
            .export_csv(table, dest)
            .with_context(|| format!("export {table} to {}", dest.display()))
    }
}
