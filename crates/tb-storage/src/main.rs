//! Telebuf maintenance CLI.
//!
//! Inspects and drives one feature's batch storage from the command line:
//! - `status`: directory statistics and consent as JSON
//! - `consent`: persist a new consent decision and run its migration
//! - `write`: append one record through the regular write path
//! - `drain`: list (and optionally delete) every readable batch

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tb_common::{ConfigResolver, Error, ErrorCategory, StorageConfig, TrackingConsent};
use tb_storage::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use tb_storage::{
    ConsentAwareStorage, ConsentProvider, DataWriter, EventSerializer, SerializedEvent,
    StorageLayout, TrackingConsentProvider,
};

const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Telebuf - consent-aware telemetry batch storage
#[derive(Parser)]
#[command(name = "tb")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOpts,
}

/// Options shared by every command
#[derive(Args, Debug)]
struct GlobalOpts {
    /// Storage root directory (overrides the config file)
    #[arg(long, global = true, env = "TB_STORAGE_ROOT")]
    root: Option<PathBuf>,

    /// Feature whose batches are managed
    #[arg(long, global = true, default_value = "events")]
    feature: String,

    /// Path to storage.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Minimum log level
    #[arg(long, global = true, value_enum)]
    log_level: Option<LogLevel>,

    /// Log output format
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print storage statistics and the current consent as JSON
    Status,

    /// Record a consent decision and migrate buffered data accordingly
    Consent {
        /// pending, granted or not-granted
        value: TrackingConsent,
    },

    /// Write one record
    Write {
        /// Record payload, stored as is
        payload: String,
    },

    /// Print every readable batch as a JSON line
    Drain {
        /// Delete batches after printing them
        #[arg(long)]
        drop: bool,
    },
}

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum ExitCode {
    Ok = 0,
    Failure = 1,
    ConfigError = 2,
}

impl From<&Error> for ExitCode {
    fn from(err: &Error) -> Self {
        match err.category() {
            ErrorCategory::Config => ExitCode::ConfigError,
            _ => ExitCode::Failure,
        }
    }
}

/// Stores the payload bytes unchanged.
struct PayloadSerializer;

impl EventSerializer<String> for PayloadSerializer {
    fn serialize(&self, item: &String) -> Option<SerializedEvent> {
        Some(SerializedEvent::new(item.as_bytes()))
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(&LogConfig::from_env(
        cli.global.log_level,
        cli.global.log_format,
    ));

    let code = match run(&cli) {
        Ok(()) => ExitCode::Ok,
        Err(e) => {
            eprintln!("tb: {} (code {})", e, e.code());
            ExitCode::from(&e)
        }
    };
    std::process::exit(code as i32);
}

fn run(cli: &Cli) -> tb_common::Result<()> {
    let config = load_config(&cli.global)?;
    let layout = StorageLayout::new(&config.root_dir, &cli.global.feature, config.schema_version)?;
    let provider = TrackingConsentProvider::with_state_file(layout.consent_state_file());
    let storage = ConsentAwareStorage::open(config, &cli.global.feature, &provider)?;
    let result = match &cli.command {
        Commands::Status => status(&storage, &provider),
        Commands::Consent { value } => consent(&storage, &provider, *value),
        Commands::Write { payload } => write(&storage, payload),
        Commands::Drain { drop } => drain(&storage, *drop),
    };
    storage.shutdown();
    result
}

fn load_config(global: &GlobalOpts) -> tb_common::Result<StorageConfig> {
    let (mut config, source) = ConfigResolver::new(global.config.clone()).load()?;
    tracing::debug!(
        resolution = %source.resolution,
        path = ?source.path,
        "storage config loaded"
    );
    if let Some(root) = &global.root {
        config.root_dir = root.clone();
    }
    config.validate()?;
    Ok(config)
}

fn settle(storage: &ConsentAwareStorage) -> tb_common::Result<()> {
    if storage.wait_idle(IDLE_TIMEOUT) {
        Ok(())
    } else {
        Err(Error::QueueShutdown)
    }
}

fn status(storage: &ConsentAwareStorage, provider: &TrackingConsentProvider) -> tb_common::Result<()> {
    settle(storage)?;
    let output = serde_json::json!({
        "consent": provider.current_consent(),
        "storage": storage.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn consent(
    storage: &ConsentAwareStorage,
    provider: &TrackingConsentProvider,
    value: TrackingConsent,
) -> tb_common::Result<()> {
    let previous = provider.current_consent();
    provider.set_consent(value);
    settle(storage)?;
    let output = serde_json::json!({
        "previous": previous,
        "consent": value,
        "active_consent": storage.active_consent(),
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

fn write(storage: &ConsentAwareStorage, payload: &str) -> tb_common::Result<()> {
    settle(storage)?;
    storage
        .writer::<String, _>(PayloadSerializer)
        .write(payload.to_string());
    settle(storage)
}

fn drain(storage: &ConsentAwareStorage, drop: bool) -> tb_common::Result<()> {
    settle(storage)?;
    let mut released = Vec::new();
    let mut seen = HashSet::new();
    while let Some(batch) = storage.lock_and_read_next() {
        if !seen.insert(batch.id.clone()) {
            // A dropped batch came back: its file could not be deleted.
            storage.release(&batch);
            break;
        }
        let line = serde_json::json!({
            "id": batch.id,
            "bytes": batch.data.len(),
            "has_metadata": batch.metadata.is_some(),
        });
        println!("{}", serde_json::to_string(&line)?);
        if drop {
            storage.drop_batch(&batch);
        } else {
            // Released at the end so the loop does not see it again.
            released.push(batch);
        }
    }
    for batch in &released {
        storage.release(batch);
    }
    Ok(())
}
