//! Line-oriented session. Undo and redo only make sense here: the journal lives
//! as long as one open store.

use std::io::{BufRead, Write};

use anyhow::Result;
use clap::{Parser, Subcommand};
use vaultbase_storage::{JournalOutcome, StoreError};

use crate::commands::{run_data, DataCommand};
use crate::session::Session;

#[derive(Debug, Parser)]
#[command(no_binary_name = true, disable_version_flag = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Debug, Subcommand)]
enum ShellCommand {
    /// Revert the most recent record change.
    Undo,
    /// Re-apply the most recently undone change.
    Redo,
    /// Sync and leave the shell.
    #[command(alias = "quit")]
    Exit,
    #[command(flatten)]
    Data(DataCommand),
}

/// Split a line on whitespace; double quotes group words and `\"` escapes a quote.
pub fn split_line(line: &str) -> Result<Vec<String>, String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            '\\' if quoted => match chars.next() {
                Some(next) => current.push(next),
                None => return Err("trailing backslash".to_string()),
            },
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quoted {
        return Err("unterminated quote".to_string());
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Run commands from `input` until it ends or `exit`. Command errors are
/// reported and the loop continues.
pub fn run(session: &mut Session, input: &mut dyn BufRead, out: &mut dyn Write, prompt: bool) -> Result<()> {
    let mut line = String::new();
    loop {
        if prompt {
            write!(out, "vaultbase> ")?;
            out.flush()?;
        }
        line.clear();
        if input.read_line(&mut line)? == 0 {
            break;
        }

        let words = match split_line(&line) {
            Ok(words) if words.is_empty() => continue,
            Ok(words) => words,
            Err(err) => {
                writeln!(out, "error: {err}")?;
                continue;
            }
        };
        let parsed = match ShellLine::try_parse_from(words) {
            Ok(parsed) => parsed,
            Err(err) => {
                write!(out, "{}", err.render())?;
                continue;
            }
        };

        match parsed.command {
            ShellCommand::Exit => break,
            ShellCommand::Undo => report(out, session.store.undo())?,
            ShellCommand::Redo => report(out, session.store.redo())?,
            ShellCommand::Data(command) => {
                if let Err(err) = run_data(session, command, out) {
                    writeln!(out, "error: {err:#}")?;
                }
            }
        }
    }
    Ok(())
}

fn report(out: &mut dyn Write, result: Result<JournalOutcome, StoreError>) -> std::io::Result<()> {
    match result {
        Ok(outcome) => writeln!(out, "{outcome}"),
        Err(err) => writeln!(out, "error: {err}"),
    }
}
