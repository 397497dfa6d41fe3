//! gfglock CLI - Password-based in-place file encryption
//!
//! Encrypts or decrypts every given file (directories are walked
//! recursively) using a pool of worker threads.

use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use gfglock::config::{DEFAULT_CHUNK_SIZE, default_threads};
use gfglock::passphrase::{PasswordReader, ReaderPasswordReader, TerminalPasswordReader};
use gfglock::predict::{format_bytes, format_duration};
use gfglock::{
    Algorithm, BatchConfig, BatchEngine, BatchEvent, BatchRequest, BatchSummary, ErrorCategory,
    ErrorKind, GfglockError, Mode, Result,
};

const MIB: u64 = 1024 * 1024;

#[derive(Parser)]
#[command(name = "gfglock")]
#[command(version)]
#[command(about = "Password-based in-place file encryption.", long_about = None)]
struct Cli {
    /// Read password from stdin instead of from terminal
    #[arg(long, global = true)]
    password_stdin: bool,

    /// Log more (-v for info, -vv for debug); RUST_LOG takes precedence
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt files in place
    #[command(alias = "e")]
    Encrypt {
        /// Files or directories to encrypt
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        /// Cipher to use: aes256_gcm, aes256_cfb or chacha20_poly1305
        #[arg(short, long, default_value_t = Algorithm::Aes256Gcm)]
        algorithm: Algorithm,

        /// Chunk size in MiB for files of 10 MiB and more
        #[arg(long, value_name = "MIB", conflicts_with = "whole_file")]
        chunk_size: Option<u64>,

        /// Read every file into memory instead of streaming it in chunks
        #[arg(long)]
        whole_file: bool,

        /// Store files under a timestamped random name; the real name is
        /// kept inside the encrypted data
        #[arg(long)]
        encrypt_names: bool,

        #[command(flatten)]
        jobs: JobArgs,
    },

    /// Decrypt files in place
    #[command(alias = "d")]
    Decrypt {
        /// Files or directories to decrypt
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        jobs: JobArgs,
    },
}

#[derive(Args)]
struct JobArgs {
    /// Number of worker threads (at most one less than the CPU count)
    #[arg(short = 'j', long)]
    threads: Option<usize>,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(summary) if summary.failed == 0 => {}
        Ok(_) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e.chain_message());
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<BatchSummary> {
    let (mode, paths, config) = match cli.command {
        Commands::Encrypt {
            paths,
            algorithm,
            chunk_size,
            whole_file,
            encrypt_names,
            jobs,
        } => {
            let chunk_size = if whole_file {
                None
            } else {
                Some(chunk_bytes(chunk_size)?)
            };
            let config = BatchConfig {
                threads: jobs.threads.unwrap_or_else(default_threads),
                chunk_size,
                algorithm,
                encrypt_filenames: encrypt_names,
                ..BatchConfig::default()
            };
            (Mode::Encrypt, paths, config)
        }
        Commands::Decrypt { paths, jobs } => {
            let config = BatchConfig {
                threads: jobs.threads.unwrap_or_else(default_threads),
                ..BatchConfig::default()
            };
            (Mode::Decrypt, paths, config)
        }
    };

    let paths = expand_paths(&paths)?;
    let mut reader = get_password_reader(cli.password_stdin, mode);
    let password = reader.read_password()?;
    if password.is_empty() {
        return Err(GfglockError::with_kind(
            ErrorCategory::User,
            ErrorKind::PasswordUnavailable,
            "password must not be empty",
        ));
    }

    let engine = BatchEngine::new(
        BatchRequest {
            paths,
            password,
            mode,
        },
        config,
    );
    let pb = progress_bar()?;
    let sink = |event: BatchEvent| show_event(&pb, event);
    let summary = engine.run(&sink)?;

    if !summary.failures.is_empty() {
        eprintln!("Failed files:");
        for (path, message) in &summary.failures {
            eprintln!("  {}: {}", path.display(), message);
        }
    }
    Ok(summary)
}

/// Build the terminal progress bar. It counts in the batch's scaled unit and
/// is hidden automatically when stderr is not a terminal.
fn progress_bar() -> Result<ProgressBar> {
    let style = ProgressStyle::with_template("{bar:40} {percent:>3}% {msg}")
        .map_err(|e| {
            GfglockError::with_kind_and_source(
                ErrorCategory::Internal,
                ErrorKind::InternalInvariant,
                "invalid progress template",
                e,
            )
        })?
        .progress_chars("#>-");
    let pb = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
    pb.set_style(style);
    Ok(pb)
}

fn show_event(pb: &ProgressBar, event: BatchEvent) {
    match event {
        BatchEvent::Progress(p) => {
            pb.set_length(p.scale.scaled_total);
            pb.set_position(p.scaled_done);
            let eta = p
                .eta
                .map(|d| {
                    let about = if p.eta_calibrated { "" } else { "about " };
                    format!(", {}{} left", about, format_duration(d))
                })
                .unwrap_or_default();
            pb.set_message(format!(
                "files {}/{} ({} / {}){}",
                p.done_files,
                p.total_files,
                format_bytes(p.done_bytes),
                format_bytes(p.total_bytes),
                eta
            ));
        }
        BatchEvent::Status(message) => pb.suspend(|| println!("{}", message)),
        BatchEvent::Error(message) => pb.suspend(|| eprintln!("{}", message)),
        BatchEvent::Finished(_) => pb.finish_and_clear(),
        BatchEvent::FilesProgress { .. } | BatchEvent::FileChanged(_) => {}
    }
}

fn chunk_bytes(mib: Option<u64>) -> Result<u64> {
    match mib {
        None => Ok(DEFAULT_CHUNK_SIZE),
        Some(mib) => mib.checked_mul(MIB).ok_or_else(|| {
            GfglockError::with_kind(
                ErrorCategory::User,
                ErrorKind::InvalidArgument,
                format!("chunk size of {} MiB is too large", mib),
            )
        }),
    }
}

/// Turn the command line paths into an ordered list of absolute file
/// paths, walking directories in name order.
fn expand_paths(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        let path = std::path::absolute(path).map_err(|e| {
            GfglockError::io(format!("failed to resolve {}", path.display()), e)
        })?;
        if !path.is_dir() {
            files.push(path);
            continue;
        }
        for entry in WalkDir::new(&path).sort_by_file_name() {
            let entry = entry.map_err(|e| {
                GfglockError::with_kind_and_source(
                    ErrorCategory::User,
                    ErrorKind::Io,
                    format!("failed to list {}", path.display()),
                    e,
                )
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
    }
    Ok(files)
}

fn get_password_reader(use_stdin: bool, mode: Mode) -> Box<dyn PasswordReader> {
    if use_stdin {
        Box::new(ReaderPasswordReader::new(Box::new(io::stdin())))
    } else if mode == Mode::Encrypt {
        Box::new(TerminalPasswordReader::with_confirmation())
    } else {
        Box::new(TerminalPasswordReader::new())
    }
}
