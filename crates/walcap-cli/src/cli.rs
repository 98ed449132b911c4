use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "walcap")]
#[command(about = "Stream Postgres changes over logical replication")]
#[command(version)]
pub struct Cli {
    /// Environment to load (loads .env.{ENV} instead of .env)
    #[arg(short, long, global = true)]
    pub env: Option<String>,

    /// Path to walcap.toml config file
    #[arg(short, long, global = true, default_value = "walcap.toml")]
    pub config: PathBuf,

    /// Postgres connection string; overrides the config file
    #[arg(long, global = true, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the database is ready for replication
    Check,

    /// Print the server's current WAL position
    Lsn,

    /// Create the publication and replication slot
    Setup {
        /// Table to publish, as schema.table (repeatable; defaults to all tables)
        #[arg(long = "table")]
        tables: Vec<String>,
    },

    /// Stream changes to stdout as JSON lines
    Tail {
        /// File the consumed position is persisted to
        #[arg(long)]
        watermark_file: Option<PathBuf>,
    },
}
