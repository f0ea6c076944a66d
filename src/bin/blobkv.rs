//! Binary entry point for the blobkv command-line client.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use blobkv::{
    logging::init_logging, AppendPrependResult, BufferedSource, DeleteResult, ReaderSource,
    SetResult, Store, StoreOptions, SyncSetting,
};
use clap::{Args, Parser, Subcommand, ValueEnum};

const EXIT_NOT_FOUND: u8 = 2;
const EXIT_TOO_LARGE: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "blobkv",
    version,
    about = "Command-line client for blobkv databases",
    disable_help_subcommand = true
)]
struct Cli {
    #[command(flatten)]
    open: OpenArgs,

    #[arg(
        long,
        global = true,
        env = "BLOBKV_LOG",
        default_value = "warn",
        help = "Log filter directive (e.g. info, blobkv=trace)"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct OpenArgs {
    #[arg(
        long,
        global = true,
        env = "BLOBKV_CONFIG",
        value_name = "FILE",
        help = "TOML file with store options"
    )]
    config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Override page size (bytes) when creating a database"
    )]
    page_size: Option<u32>,

    #[arg(long, global = true, help = "Override cache size (pages)")]
    cache_pages: Option<usize>,

    #[arg(long, global = true, value_enum, help = "Commit durability override")]
    synchronous: Option<SynchronousArg>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SynchronousArg {
    Full,
    Off,
}

impl From<SynchronousArg> for SyncSetting {
    fn from(value: SynchronousArg) -> Self {
        match value {
            SynchronousArg::Full => SyncSetting::Full,
            SynchronousArg::Off => SyncSetting::Off,
        }
    }
}

#[derive(Args, Debug)]
struct PayloadArgs {
    #[arg(value_name = "DB")]
    db_path: PathBuf,

    #[arg(value_name = "KEY")]
    key: String,

    #[arg(
        value_name = "VALUE",
        required_unless_present = "file",
        conflicts_with = "file"
    )]
    value: Option<String>,

    #[arg(long, value_name = "PATH", help = "Read the payload from a file")]
    file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    #[command(about = "Print the value stored under a key")]
    Get {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(value_name = "KEY")]
        key: String,

        #[arg(long, help = "Also print the cas and timestamp to stderr")]
        show_version: bool,
    },

    #[command(about = "Store a value, creating the database if needed")]
    Set(PayloadArgs),

    #[command(about = "Add bytes after an existing value")]
    Append(PayloadArgs),

    #[command(about = "Add bytes before an existing value")]
    Prepend(PayloadArgs),

    #[command(about = "Remove a key")]
    Delete {
        #[arg(value_name = "DB")]
        db_path: PathBuf,

        #[arg(value_name = "KEY")]
        key: String,
    },

    #[command(about = "Print pager, tree and latch statistics")]
    Stats {
        #[arg(value_name = "DB")]
        db_path: PathBuf,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode, Box<dyn Error>> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;
    let options = build_store_options(&cli.open)?;

    let code = match cli.command {
        Command::Get {
            db_path,
            key,
            show_version,
        } => {
            let store = Store::open(&db_path, options)?;
            match store.get(key.as_bytes())? {
                Some(stored) => {
                    if show_version {
                        eprintln!(
                            "cas={} timestamp={}",
                            stored.castime.cas, stored.castime.timestamp
                        );
                    }
                    let mut out = io::stdout().lock();
                    out.write_all(&stored.value)?;
                    out.flush()?;
                    ExitCode::SUCCESS
                }
                None => not_found(&key),
            }
        }
        Command::Set(args) => {
            let store = Store::open_or_create(&args.db_path, options)?;
            let result = match payload(&args)? {
                Payload::Inline(source) => store.set(args.key.as_bytes(), source)?,
                Payload::File(source) => store.set(args.key.as_bytes(), source)?,
            };
            match result {
                SetResult::Stored => ExitCode::SUCCESS,
                SetResult::TooLarge => too_large(&args.key),
            }
        }
        Command::Append(args) => {
            let store = Store::open(&args.db_path, options)?;
            let result = match payload(&args)? {
                Payload::Inline(source) => store.append(args.key.as_bytes(), source)?,
                Payload::File(source) => store.append(args.key.as_bytes(), source)?,
            };
            report_append_prepend(&args.key, result)
        }
        Command::Prepend(args) => {
            let store = Store::open(&args.db_path, options)?;
            let result = match payload(&args)? {
                Payload::Inline(source) => store.prepend(args.key.as_bytes(), source)?,
                Payload::File(source) => store.prepend(args.key.as_bytes(), source)?,
            };
            report_append_prepend(&args.key, result)
        }
        Command::Delete { db_path, key } => {
            let store = Store::open(&db_path, options)?;
            match store.delete(key.as_bytes())? {
                DeleteResult::Deleted => ExitCode::SUCCESS,
                DeleteResult::NotFound => not_found(&key),
            }
        }
        Command::Stats { db_path } => {
            let store = Store::open(&db_path, options)?;
            println!("{}", store.stats());
            ExitCode::SUCCESS
        }
    };
    Ok(code)
}

fn build_store_options(args: &OpenArgs) -> Result<StoreOptions, Box<dyn Error>> {
    let mut options = match &args.config {
        Some(path) => StoreOptions::from_file(path)?,
        None => StoreOptions::default(),
    };
    if let Some(page_size) = args.page_size {
        options.page_size = page_size;
    }
    if let Some(cache_pages) = args.cache_pages {
        options.cache_pages = cache_pages;
    }
    if let Some(sync) = args.synchronous {
        options.synchronous = sync.into();
    }
    options.validate()?;
    Ok(options)
}

enum Payload {
    Inline(BufferedSource),
    File(ReaderSource<File>),
}

fn payload(args: &PayloadArgs) -> Result<Payload, Box<dyn Error>> {
    match (&args.value, &args.file) {
        (Some(value), _) => Ok(Payload::Inline(BufferedSource::from(
            value.as_bytes().to_vec(),
        ))),
        (None, Some(path)) => Ok(Payload::File(file_source(path)?)),
        (None, None) => Err("either VALUE or --file is required".into()),
    }
}

fn file_source(path: &Path) -> Result<ReaderSource<File>, Box<dyn Error>> {
    let file = File::open(path)?;
    let size = usize::try_from(file.metadata()?.len())?;
    Ok(ReaderSource::new(file, size))
}

fn report_append_prepend(key: &str, result: AppendPrependResult) -> ExitCode {
    match result {
        AppendPrependResult::Success => ExitCode::SUCCESS,
        AppendPrependResult::NotFound => not_found(key),
        AppendPrependResult::TooLarge => too_large(key),
    }
}

fn not_found(key: &str) -> ExitCode {
    eprintln!("key '{key}' not found");
    ExitCode::from(EXIT_NOT_FOUND)
}

fn too_large(key: &str) -> ExitCode {
    eprintln!("value for '{key}' would exceed the maximum value size");
    ExitCode::from(EXIT_TOO_LARGE)
}
