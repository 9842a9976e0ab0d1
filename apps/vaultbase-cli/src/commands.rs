use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;
use vaultbase_storage::{BaseType, ColumnSpec, Filter, SpecialColumn, SpecialType, Value};

use crate::render::{kind_label, write_records, OutputFormat};
use crate::session::{parse_assignment, Assignment, Session};

/// Commands that operate on an open data directory. Available both as
/// top-level subcommands and inside `shell`.
#[derive(Debug, Subcommand)]
pub enum DataCommand {
    /// List user tables.
    Tables,
    /// Create a table. Columns are `NAME[:TYPE]`, TYPE one of text, real, date,
    /// file, or relation=TABLE (default text).
    CreateTable {
        name: String,
        #[arg(value_parser = parse_column_spec)]
        columns: Vec<ColumnSpec>,
    },
    /// Drop a table and delete its attachments.
    DropTable { name: String },
    /// Append a column (`NAME[:TYPE]`) to a table.
    AddColumn {
        table: String,
        #[arg(value_parser = parse_column_spec)]
        column: ColumnSpec,
    },
    /// Rename a column, keeping its type.
    RenameColumn { table: String, old: String, new: String },
    /// Show a table's columns and their types.
    Columns { table: String },
    /// Print the rows of a table.
    List {
        table: String,
        /// SQLite `WHERE` clause with `?` placeholders.
        #[arg(long = "where")]
        filter: Option<String>,
        /// Positional values for the `--where` placeholders (repeatable).
        #[arg(long = "param", requires = "filter")]
        params: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Insert a row from `COLUMN=VALUE` pairs and print its id.
    Insert {
        table: String,
        #[arg(value_parser = parse_assignment)]
        values: Vec<Assignment>,
    },
    /// Change cells of an existing row.
    Update {
        table: String,
        id: i64,
        #[arg(value_parser = parse_assignment, required = true)]
        values: Vec<Assignment>,
    },
    /// Delete a row and its attachments.
    Delete { table: String, id: i64 },
    /// Encrypt files into a FILE cell.
    Attach {
        table: String,
        id: i64,
        column: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Keep the attachments already in the cell.
        #[arg(long)]
        append: bool,
    },
    /// Clear a FILE cell and delete its attachments.
    Detach { table: String, id: i64, column: String },
    /// Decrypt an attachment to a temporary file and print its path.
    OpenAttachment {
        table: String,
        id: i64,
        column: String,
        /// Position of the attachment within the cell.
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Write a table as CSV.
    ExportCsv { table: String, dest: PathBuf },
    /// Append rows from a CSV file whose header names existing columns.
    ImportCsv { table: String, source: PathBuf },
    /// Copy the encrypted database to DEST.
    Backup { dest: PathBuf },
}

pub fn parse_column_spec(arg: &str) -> Result<ColumnSpec, String> {
    let (name, ty) = match arg.rsplit_once(':') {
        Some((name, ty)) => (name, ty),
        None => (arg, "text"),
    };
    let (ty, extra) = match ty.split_once('=') {
        Some((ty, extra)) => (ty, Some(extra)),
        None => (ty, None),
    };
    let spec = match (ty.to_ascii_lowercase().as_str(), extra) {
        ("text", None) => ColumnSpec::new(name, BaseType::Text),
        ("real" | "number", None) => ColumnSpec::new(name, BaseType::Real),
        ("date", None) => ColumnSpec::special(name, SpecialColumn::new(SpecialType::Date)),
        ("file", None) => ColumnSpec::special(name, SpecialColumn::new(SpecialType::File)),
        ("relation", Some(table)) if !table.is_empty() => {
            ColumnSpec::special(name, SpecialColumn::with_extra(SpecialType::Relation, table))
        }
        ("relation", _) => return Err("relation columns need a target: NAME:relation=TABLE".to_string()),
        _ => return Err(format!("unknown column type {ty:?}")),
    };
    Ok(spec)
}

pub fn run_data(session: &mut Session, command: DataCommand, out: &mut dyn Write) -> Result<()> {
    match command {
        DataCommand::Tables => {
            for table in session.store.list_tables()? {
                writeln!(out, "{table}")?;
            }
        }
        DataCommand::CreateTable { name, columns } => {
            session.store.create_table(&name, &columns)?;
            writeln!(out, "created {name}")?;
        }
        DataCommand::DropTable { name } => {
            let removed = session.drop_table(&name)?;
            writeln!(out, "dropped {name} ({removed} attachment(s) released)")?;
        }
        DataCommand::AddColumn { table, column } => {
            session.store.add_column(&table, &column)?;
            writeln!(out, "added {table}.{}", column.name)?;
        }
        DataCommand::RenameColumn { table, old, new } => {
            session.store.rename_column(&table, &old, &new)?;
            writeln!(out, "renamed {table}.{old} to {new}")?;
        }
        DataCommand::Columns { table } => {
            for (name, kind) in session.kinds(&table)? {
                writeln!(out, "{name}\t{}", kind_label(&kind))?;
            }
        }
        DataCommand::List {
            table,
            filter,
            params,
            format,
        } => {
            let filter = filter.map(|clause| {
                params
                    .into_iter()
                    .fold(Filter::new(clause), |f, p| f.param(Value::Text(p)))
            });
            let records = session.store.get_records(&table, filter.as_ref())?;
            let kinds = session.kinds(&table)?;
            write_records(out, &kinds, &records, format)?;
        }
        DataCommand::Insert { table, values } => {
            let values = session.parse_values(&table, &values)?;
            let id = session.store.insert_record(&table, &values)?;
            writeln!(out, "{id}")?;
        }
        DataCommand::Update { table, id, values } => {
            let values = session.parse_values(&table, &values)?;
            session.store.update_record(&table, id, &values)?;
            writeln!(out, "updated {table} {id}")?;
        }
        DataCommand::Delete { table, id } => {
            let removed = session.delete_record(&table, id)?;
            writeln!(out, "deleted {table} {id} ({removed} attachment(s) released)")?;
        }
        DataCommand::Attach {
            table,
            id,
            column,
            files,
            append,
        } => {
            for reference in session.attach(&table, id, &column, &files, append)? {
                writeln!(out, "attached {}", reference.original_name)?;
            }
        }
        DataCommand::Detach { table, id, column } => {
            let removed = session.detach(&table, id, &column)?;
            writeln!(out, "detached {removed} attachment(s)")?;
        }
        DataCommand::OpenAttachment {
            table,
            id,
            column,
            index,
        } => {
            let path = session.open_attachment(&table, id, &column, index)?;
            writeln!(out, "{}", path.display())?;
        }
        DataCommand::ExportCsv { table, dest } => {
            let rows = session.export_csv(&table, &dest)?;
            writeln!(out, "exported {rows} row(s) to {}", dest.display())?;
        }
        DataCommand::ImportCsv { table, source } => {
            let rows = session.store.import_csv(&table, &source)?;
            writeln!(out, "imported {rows} row(s) into {table}")?;
        }
        DataCommand::Backup { dest } => {
            let bytes = session.store.backup_to(&dest)?;
            writeln!(out, "backed up {bytes} bytes to {}", dest.display())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_specs() {
        assert_eq!(parse_column_spec("client"), Ok(ColumnSpec::text("client")));
        assert_eq!(parse_column_spec("amount:REAL"), Ok(ColumnSpec::real("amount")));
        assert_eq!(
            parse_column_spec("due:date"),
            Ok(ColumnSpec::special("due", SpecialColumn::new(SpecialType::Date)))
        );
        assert_eq!(
            parse_column_spec("client:relation=Clients"),
            Ok(ColumnSpec::special(
                "client",
                SpecialColumn::with_extra(SpecialType::Relation, "Clients")
            ))
        );
        assert!(parse_column_spec("client:relation").is_err());
        assert!(parse_column_spec("client:blob").is_err());
    }
}
