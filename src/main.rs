//! `optctl`: inspect and edit a settings file from the shell.
//!
//! Works without a schema: every key is shown and written as plain JSON.
//! All access goes through the same sidecar locks the library uses, so it is
//! safe to run next to a live process.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::Value;

use options_store::config::{load_config, StoreConfig};
use options_store::lifecycle::signals;
use options_store::observability::logging::init_logging;
use options_store::options::StorePolicy;
use options_store::persistence::SettingsWatcher;
use options_store::storage::Document;
use options_store::{LockedFileStore, OptionsStore, ReadOutcome, SchemaRegistry, Shutdown};

#[derive(Parser)]
#[command(name = "optctl")]
#[command(about = "Inspect and edit a settings file", long_about = None)]
struct Cli {
    /// Store configuration (TOML). Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the whole document
    Show { file: PathBuf },
    /// Print one key
    Get { file: PathBuf, key: String },
    /// Set a key to a JSON value (bare words are taken as strings).
    /// Refused when the store config freezes settings or restricts the key
    Set { file: PathBuf, key: String, value: String },
    /// Remove a key so it falls back to its default. Same restrictions as `set`
    Unset { file: PathBuf, key: String },
    /// Print keys whose values change until interrupted
    Watch { file: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                return ExitCode::FAILURE;
            }
        },
        None => StoreConfig::default(),
    };
    init_logging(cli.debug || config.debug);

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, config: &StoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let files = LockedFileStore::from_config(config);
    let policy = StorePolicy::from_config(config);

    match command {
        Commands::Show { file } => {
            let doc = read(&files, &file)?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        Commands::Get { file, key } => {
            let doc = read(&files, &file)?;
            match doc.get(&key) {
                Some(value) => println!("{}", serde_json::to_string_pretty(value)?),
                None => return Err(format!("{} is not set in {}", key, file.display()).into()),
            }
        }
        Commands::Set { file, key, value } => {
            policy.check_writable(&key)?;
            let value = parse_value(&value);
            let mut doc = read(&files, &file)?;
            doc.insert(key, value);
            write(&files, &doc, &file, config.atomic_writes)?;
        }
        Commands::Unset { file, key } => {
            policy.check_writable(&key)?;
            let mut doc = read(&files, &file)?;
            if doc.remove(&key).is_none() {
                return Err(format!("{} is not set in {}", key, file.display()).into());
            }
            write(&files, &doc, &file, config.atomic_writes)?;
        }
        Commands::Watch { file } => watch(&file, config).await?,
    }

    Ok(())
}

fn read(files: &LockedFileStore, path: &Path) -> Result<Document, String> {
    match files.read(path) {
        ReadOutcome::Document(doc) => Ok(doc),
        ReadOutcome::NotFound => Ok(Document::new()),
        ReadOutcome::Invalid(reason) => Err(format!("{} is not a settings document: {}", path.display(), reason)),
        ReadOutcome::Unreadable(e) => Err(format!("cannot read {}: {}", path.display(), e)),
    }
}

fn write(
    files: &LockedFileStore,
    doc: &Document,
    path: &Path,
    atomic: bool,
) -> Result<(), String> {
    if files.write(doc, path, atomic) {
        Ok(())
    } else {
        Err(format!("failed to write {}", path.display()))
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn watch(path: &Path, config: &StoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    // No schema: every key is carried as an unknown key and reported on change.
    let store = Arc::new(OptionsStore::from_config(SchemaRegistry::new(), config));
    let report = store.load(path);
    if report.failed {
        return Err(format!("cannot load {}", path.display()).into());
    }

    let (watcher, mut updates) = SettingsWatcher::new(path, Arc::clone(&store));
    let _watcher = watcher.run()?;

    let shutdown = Shutdown::new();
    let _signals = signals::install(shutdown.clone());
    println!("Watching {} (Ctrl-C to stop)", path.display());

    loop {
        tokio::select! {
            event = updates.recv() => {
                let Some(event) = event else { break };
                for key in &event.report.changed {
                    match store.get_raw(key) {
                        Ok(value) => println!("{} = {}", key, value),
                        Err(_) => println!("{} removed", key),
                    }
                }
            }
            _ = shutdown.wait() => break,
        }
    }

    Ok(())
}
