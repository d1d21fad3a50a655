use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use blobfs::storage::{LocalBlobStorage, UploadOptions};
use blobfs::{AdapterConfig, BlobFilesystemAdapter, FileAttributes, StorageAttributes};

const APP_NAME: &str = "blobfs";
const DEFAULT_CONTAINER: &str = "default";

#[derive(Parser, Debug)]
#[command(name = "blobfs")]
#[command(about = "Filesystem commands over a blob storage container")]
#[command(version)]
struct Cli {
    /// Config file path (default: <config dir>/blobfs/config.toml)
    #[arg(short, long, env = "BLOBFS_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the local blob store
    #[arg(long, env = "BLOBFS_ROOT")]
    root: Option<String>,

    /// Container to operate on
    #[arg(long, env = "BLOBFS_CONTAINER")]
    container: Option<String>,

    /// Root namespace prefix for every key
    #[arg(long, env = "BLOBFS_PREFIX")]
    prefix: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, env = "BLOBFS_VERBOSE")]
    verbose: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List a directory
    Ls {
        #[arg(default_value = "")]
        path: String,
        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },
    /// Write a file to stdout
    Cat { path: String },
    /// Upload a local file, or stdin when FILE is omitted
    Put {
        path: String,
        file: Option<PathBuf>,
        /// Content type (guessed when omitted)
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Delete a file
    Rm { path: String },
    /// Delete a directory and everything below it
    Rmdir { path: String },
    /// Create a directory
    Mkdir { path: String },
    /// Copy a file
    Cp { source: String, destination: String },
    /// Move a file
    Mv { source: String, destination: String },
    /// Show file attributes
    Stat { path: String },
}

/// Config file contents: adapter settings plus where the local store lives.
#[derive(Debug, Deserialize)]
struct CliConfig {
    storage_root: Option<String>,
    #[serde(flatten)]
    adapter: AdapterConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            storage_root: None,
            adapter: AdapterConfig::new(DEFAULT_CONTAINER),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "blobfs=debug"
    } else {
        "blobfs=info"
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = load_config(cli.config.as_deref())?;

    // CLI overrides config file
    if let Some(container) = cli.container {
        config.adapter.container = container;
    }
    if let Some(prefix) = cli.prefix {
        config.adapter.prefix = prefix;
    }
    config.adapter.validate()?;

    let storage_root = match cli.root.as_deref().or(config.storage_root.as_deref()) {
        Some(root) => expand_str_path(root)?,
        None => default_data_dir()?,
    };
    debug!(
        "Using container {} in {}",
        config.adapter.container,
        storage_root.display()
    );

    let client = Arc::new(LocalBlobStorage::new(storage_root));
    let adapter = BlobFilesystemAdapter::from_config(client, &config.adapter);

    run(&adapter, cli.command, cli.json).await
}

async fn run(adapter: &BlobFilesystemAdapter, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Ls { path, recursive } => {
            let mut entries = adapter.list_contents(&path, recursive);
            while let Some(entry) = entries.try_next().await? {
                print_entry(&entry, json)?;
            }
        }
        Command::Cat { path } => {
            let mut stream = adapter.read_stream(&path).await?;
            let mut stdout = tokio::io::stdout();
            while let Some(chunk) = stream.try_next().await? {
                stdout.write_all(&chunk).await?;
            }
            stdout.flush().await?;
        }
        Command::Put {
            path,
            file,
            content_type,
        } => {
            let mut options = UploadOptions::default();
            options.content_type = content_type;

            let attributes = match file {
                Some(file) => {
                    let handle = tokio::fs::File::open(&file)
                        .await
                        .with_context(|| format!("opening {}", file.display()))?;
                    adapter
                        .write_stream(&path, ReaderStream::new(handle), &options)
                        .await?
                }
                None => {
                    adapter
                        .write_stream(&path, ReaderStream::new(tokio::io::stdin()), &options)
                        .await?
                }
            };
            info!("Wrote {} ({} bytes)", attributes.path, attributes.file_size);
            print_file(&attributes, json)?;
        }
        Command::Rm { path } => adapter.delete(&path).await?,
        Command::Rmdir { path } => adapter.delete_directory(&path).await?,
        Command::Mkdir { path } => {
            let directory = adapter.create_directory(&path).await?;
            print_entry(&StorageAttributes::Directory(directory), json)?;
        }
        Command::Cp {
            source,
            destination,
        } => adapter.copy(&source, &destination).await?,
        Command::Mv {
            source,
            destination,
        } => adapter.move_file(&source, &destination).await?,
        Command::Stat { path } => {
            let attributes = adapter.metadata(&path).await?;
            print_file(&attributes, json)?;
        }
    }
    Ok(())
}

fn print_entry(entry: &StorageAttributes, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(entry)?);
        return Ok(());
    }
    match entry {
        StorageAttributes::File(file) => println!("{:>12}  {}", file.file_size, file.path),
        StorageAttributes::Directory(dir) => println!("{:>12}  {}/", "-", dir.path),
    }
    Ok(())
}

fn print_file(file: &FileAttributes, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(file)?);
        return Ok(());
    }
    let modified = chrono::DateTime::from_timestamp(file.last_modified, 0)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| file.last_modified.to_string());
    println!("path:          {}", file.path);
    println!("size:          {}", file.file_size);
    println!(
        "mime type:     {}",
        file.mime_type.as_deref().unwrap_or("-")
    );
    println!("last modified: {}", modified);
    Ok(())
}

fn load_config(explicit: Option<&Path>) -> Result<CliConfig> {
    let path = match explicit {
        Some(path) => expand_str_path(&path.to_string_lossy())?,
        None => {
            let path = default_config_dir()?.join("config.toml");
            if !path.exists() {
                debug!("No config file at {}, using defaults", path.display());
                return Ok(CliConfig::default());
            }
            path
        }
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
}

fn expand_str_path(text: &str) -> Result<PathBuf> {
    let expanded = shellexpand::full(text).context("expanding path")?;
    Ok(PathBuf::from(expanded.to_string()))
}

fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine configuration directory"))
}

fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_NAME))
        .ok_or_else(|| anyhow!("unable to determine data directory"))
}
