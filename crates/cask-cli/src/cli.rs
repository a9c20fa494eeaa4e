use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cask",
    about = "Content-addressable blob store with durable multi-digest metadata",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store root directory.
    #[arg(short = 's', long, global = true, default_value = ".")]
    pub store: String,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a new store
    Init(InitArgs),
    /// Add files (or stdin) to the store
    Add(AddArgs),
    /// Write a blob to stdout by its ni: URI
    Get(GetArgs),
    /// Remove an object (tombstone), or purge it entirely
    Rm(RmArgs),
    /// Show store statistics
    Stats(StatsArgs),
    /// List objects matching filters
    List(ListArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Algorithms to enable (default: all supported).
    #[arg(long, value_delimiter = ',')]
    pub algorithms: Vec<String>,
    /// Primary algorithm (default: sha-256).
    #[arg(long)]
    pub primary: Option<String>,
    /// Metadata engine memory budget, e.g. 64M.
    #[arg(long)]
    pub mapsize: Option<String>,
    /// Octal mode mask for created files and directories.
    #[arg(long)]
    pub umask: Option<String>,
}

#[derive(Args)]
pub struct AddArgs {
    /// Files to add; reads stdin when empty.
    pub paths: Vec<String>,
    /// Claimed media type.
    #[arg(short = 't', long = "type")]
    pub media_type: Option<String>,
    #[arg(long)]
    pub charset: Option<String>,
    #[arg(long)]
    pub language: Option<String>,
    #[arg(long)]
    pub encoding: Option<String>,
    /// Reject malformed tokens instead of dropping them.
    #[arg(long)]
    pub strict: bool,
    /// Keep the stored mtime when the object already exists.
    #[arg(long)]
    pub preserve: bool,
}

#[derive(Args)]
pub struct GetArgs {
    /// An ni: URI.
    pub uri: String,
}

#[derive(Args)]
pub struct RmArgs {
    /// ni: URIs or file paths.
    pub keys: Vec<String>,
    /// Purge the record and indexes too, not just the blob.
    #[arg(long)]
    pub forget: bool,
}

#[derive(Args)]
pub struct StatsArgs {}

#[derive(Args)]
pub struct ListArgs {
    /// Media types to match (repeatable).
    #[arg(short = 't', long = "type")]
    pub types: Vec<String>,
    /// Languages to match (repeatable).
    #[arg(long)]
    pub language: Vec<String>,
    /// Charsets to match (repeatable).
    #[arg(long)]
    pub charset: Vec<String>,
    /// Encodings to match (repeatable).
    #[arg(long)]
    pub encoding: Vec<String>,
    /// Minimum size in bytes.
    #[arg(long)]
    pub min_size: Option<u64>,
    /// Maximum size in bytes.
    #[arg(long)]
    pub max_size: Option<u64>,
    /// Only deleted (or expiring) objects.
    #[arg(long)]
    pub deleted: bool,
}
