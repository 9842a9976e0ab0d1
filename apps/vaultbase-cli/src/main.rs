use std::io::{IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use vaultbase_auth::AuthGate;

mod commands;
mod layout;
mod render;
mod session;
mod settings;
mod shell;

use commands::{run_data, DataCommand};
use layout::DataLayout;
use session::Session;
use settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "vaultbase")]
#[command(about = "Manage an encrypted vaultbase data directory.")]
struct Cli {
    /// Data directory (defaults to the per-user application data directory).
    #[arg(long, env = "VAULTBASE_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Password for the data directory.
    #[arg(long, env = "VAULTBASE_PASSWORD", hide_env_values = true, global = true)]
    password: Option<String>,

    /// Read the password from a file (trailing newlines are trimmed).
    #[arg(long, value_name = "PATH", conflicts_with = "password", global = true)]
    password_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the data directory, settings, credentials, and keys.
    Init,
    /// Change the password.
    Passwd {
        #[arg(long = "new", value_name = "PASSWORD")]
        new_password: String,
    },
    /// Install a base64 key used to read attachments sealed by an older installation.
    InstallLegacyKey { key: String },
    /// Read commands from stdin, with undo/redo over the session's changes.
    Shell,
    #[command(flatten)]
    Data(DataCommand),
}

fn main() -> ExitCode {
    env_logger::init_from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"));

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let layout = DataLayout::resolve(cli.data_dir.clone())?;
    let settings = Settings::load(&layout.settings_file());
    let gate = AuthGate::new(layout.auth_file()).with_iterations(settings.auth_iterations);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let command = match cli.command {
        Command::Init => return init(&layout, &settings, &gate, &mut out),
        command => command,
    };
    let password = resolve_password(cli.password, cli.password_file.as_deref())?;
    authenticate(&gate, &layout, &settings, &password)?;

    match command {
        // Runs before authentication, above.
        Command::Init => {}
        Command::Passwd { new_password } => {
            if new_password.is_empty() {
                bail!("the new password must not be empty");
            }
            if !gate.set_password(&new_password) {
                bail!("could not update {}", gate.path().display());
            }
            writeln!(out, "password changed")?;
        }
        Command::InstallLegacyKey { key } => {
            vaultbase_attachments::install_legacy_key(&layout.legacy_key(), key.trim())
                .context("install legacy key")?;
            writeln!(out, "legacy key installed")?;
        }
        Command::Shell => {
            let mut session = Session::open(&layout, &settings)?;
            let stdin = std::io::stdin();
            let prompt = stdin.is_terminal();
            let result = shell::run(&mut session, &mut stdin.lock(), &mut out, prompt);
            session.close();
            result?;
        }
        Command::Data(command) => {
            let mut session = Session::open(&layout, &settings)?;
            let result = run_data(&mut session, command, &mut out);
            session.close();
            result?;
        }
    }
    Ok(())
}

fn init(layout: &DataLayout, settings: &Settings, gate: &AuthGate, out: &mut dyn Write) -> Result<()> {
    layout.create_dirs()?;
    let settings_path = layout.settings_file();
    if !settings_path.exists() {
        settings.save(&settings_path)?;
    }
    let created = gate
        .ensure_credentials_exist(&settings.default_password)
        .context("create credential file")?;
    Session::open(layout, settings)?.close();

    writeln!(out, "initialized {}", layout.data_dir().display())?;
    if created {
        writeln!(out, "the default password is set; change it with `vaultbase passwd`")?;
    }
    Ok(())
}

fn resolve_password(password: Option<String>, password_file: Option<&Path>) -> Result<String> {
    match (password, password_file) {
        (_, Some(path)) => read_password_file(path),
        (Some(password), None) => Ok(password),
        (None, None) => bail!("a password is required (--password, --password-file, or VAULTBASE_PASSWORD)"),
    }
}

/// Every command but `init` runs behind the password gate. A missing credential
/// file is created with the default password first.
fn authenticate(gate: &AuthGate, layout: &DataLayout, settings: &Settings, password: &str) -> Result<()> {
    std::fs::create_dir_all(layout.data_dir())
        .with_context(|| format!("create {}", layout.data_dir().display()))?;
    gate.ensure_credentials_exist(&settings.default_password)
        .context("create credential file")?;
    if !gate.verify(password) {
        bail!("authentication failed");
    }
    Ok(())
}

fn read_password_file(path: &Path) -> Result<String> {
    let value = std::fs::read_to_string(path)
        .with_context(|| format!("read password file {}", path.display()))?;
    Ok(value.trim_end_matches(&['\r', '\n'][..]).to_string())
}
