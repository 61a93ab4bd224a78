//! `ember` command-line front end for the pcode runtime.

mod config;
mod error;

use clap::{Parser as ClapParser, Subcommand};
use config::{EmberConfig, CONFIG_FILE};
use ember_rt::exec::{ProgramCursor, Step};
use ember_rt::store::{BlobId, FileStore, PcodeStore};
use ember_rt::Runtime;
use error::CliError;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ANSI color helpers
fn green(s: &str) -> String {
    format!("\x1b[32m{}\x1b[0m", s)
}
fn red(s: &str) -> String {
    format!("\x1b[31m{}\x1b[0m", s)
}
fn gray(s: &str) -> String {
    format!("\x1b[90m{}\x1b[0m", s)
}
fn status_label(label: &str) -> String {
    format!("\x1b[1;32m{:>12}\x1b[0m", label)
}

#[derive(ClapParser)]
#[command(name = "ember", version, about = "Ember pcode runtime")]
struct Cli {
    /// Path to ember.toml (default: nearest one upward from the current directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load pcode and execute it on the tick thread
    Run {
        /// Raw pcode files to load
        files: Vec<PathBuf>,

        /// Stored blob ids to load
        #[arg(long = "blob")]
        blobs: Vec<u64>,

        /// Tick period in milliseconds (default: from config)
        #[arg(long)]
        period_ms: Option<u64>,

        /// Stop after this many milliseconds (default: until Ctrl-C)
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Manage the pcode store
    Store {
        #[command(subcommand)]
        sub: StoreCommands,
    },
    /// Create an ember.toml config file in the current directory
    Init,
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Persist a pcode file and print its id
    Put { file: PathBuf },
    /// Write a stored blob to a file or stdout
    Get {
        id: u64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a stored blob
    Rm { id: u64 },
    /// List stored blobs
    Ls,
}

fn main() {
    let cli = Cli::parse();

    let result = EmberConfig::load(cli.config.as_deref()).and_then(|cfg| {
        init_tracing(&cfg.log.level);
        match cli.command {
            Commands::Run {
                files,
                blobs,
                period_ms,
                duration_ms,
            } => cmd_run(cfg, &files, &blobs, period_ms, duration_ms),
            Commands::Store { sub } => cmd_store(&cfg, sub),
            Commands::Init => cmd_init(),
        }
    });

    if let Err(e) = result {
        eprintln!("{} {}", red("error:"), e);
        std::process::exit(1);
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_env("EMBER_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_file(path: &Path) -> Result<Vec<u8>, CliError> {
    std::fs::read(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn cmd_run(
    cfg: EmberConfig,
    files: &[PathBuf],
    blobs: &[u64],
    period_ms: Option<u64>,
    duration_ms: Option<u64>,
) -> Result<(), CliError> {
    if files.is_empty() && blobs.is_empty() {
        return Err(CliError::Usage(
            "nothing to run: pass pcode files or --blob ids".to_string(),
        ));
    }
    let period = match period_ms {
        Some(0) => return Err(CliError::Usage("--period-ms must be > 0".to_string())),
        Some(ms) => Duration::from_millis(ms),
        None => cfg.runtime.tick.period(),
    };

    let mut rt = Runtime::new(cfg.runtime.clone())?;
    for file in files {
        let handle = rt.load(&read_file(file)?)?;
        println!("{} {} as {}", status_label("Loaded"), file.display(), handle);
    }
    if !blobs.is_empty() {
        let store = FileStore::open(&cfg.store.dir)?;
        for &id in blobs {
            let handle = rt.load_from_store(&store, BlobId(id))?;
            println!("{} blob {} as {}", status_label("Loaded"), id, handle);
        }
    }

    let executed = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&executed);
    let mut cursor = ProgramCursor::new();
    rt.start(period, move |state| match cursor.step_state(state) {
        Ok(Step::Executed {
            handle,
            offset,
            opcode,
        }) => {
            tracing::trace!(%handle, offset, opcode, "step");
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Step::Idle) => {}
        Err(e) => tracing::warn!(error = %e, "step skipped"),
    })?;
    println!(
        "{} {} program(s), period {}ms",
        status_label("Running"),
        rt.loaded()?.len(),
        period.as_millis()
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    match duration_ms {
        Some(ms) => {
            let _ = rx.recv_timeout(Duration::from_millis(ms));
        }
        None => {
            let _ = rx.recv();
        }
    }

    let ticks = rt.tick_count();
    rt.stop()?;
    println!(
        "{} {} tick(s), {} opcode(s) executed",
        status_label("Stopped"),
        ticks,
        executed.load(Ordering::Relaxed)
    );
    Ok(())
}

fn cmd_store(cfg: &EmberConfig, sub: StoreCommands) -> Result<(), CliError> {
    let store = FileStore::open(&cfg.store.dir)?;
    match sub {
        StoreCommands::Put { file } => {
            let id = store.persist(&read_file(&file)?)?;
            println!("{} {} as blob {}", status_label("Stored"), file.display(), id);
        }
        StoreCommands::Get { id, output } => {
            let data = store.retrieve(BlobId(id))?;
            match output {
                Some(path) => std::fs::write(&path, &data).map_err(|source| CliError::Io {
                    path: path.clone(),
                    source,
                })?,
                None => {
                    let mut stdout = std::io::stdout().lock();
                    stdout
                        .write_all(&data)
                        .and_then(|_| stdout.flush())
                        .map_err(|source| CliError::Io {
                            path: PathBuf::from("<stdout>"),
                            source,
                        })?;
                }
            }
        }
        StoreCommands::Rm { id } => {
            store.delete(BlobId(id))?;
            println!("{} blob {}", status_label("Removed"), id);
        }
        StoreCommands::Ls => {
            let ids = store.list()?;
            if ids.is_empty() {
                println!("{}", gray("store is empty"));
            }
            for id in ids {
                let len = store.retrieve(id)?.len();
                println!("{:>8}  {} bytes", id.0, len);
            }
        }
    }
    Ok(())
}

fn cmd_init() -> Result<(), CliError> {
    let path = PathBuf::from(CONFIG_FILE);
    if path.exists() {
        return Err(CliError::Usage(format!("{} already exists", CONFIG_FILE)));
    }
    std::fs::write(&path, EmberConfig::default_template()).map_err(|source| CliError::Io {
        path: path.clone(),
        source,
    })?;
    println!("{} {}", green("created"), CONFIG_FILE);
    Ok(())
}
