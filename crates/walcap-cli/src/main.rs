use anyhow::Result;
use clap::Parser;
use tracing::debug;

mod cli;
mod commands;
mod config;
mod env;
mod watermark_file;

use cli::{Cli, Commands};
use config::WalcapConfig;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = env::load_dotenv_from_ancestors(cli.env.as_deref())?;

    // Logs go to stderr; stdout carries only command output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("walcap=info".parse()?),
        )
        .init();

    if let Some(path) = loaded {
        debug!(path = %path.display(), "Loaded environment file");
    }

    // DATABASE_URL may have come from the .env file loaded after parsing.
    let database_url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let config = WalcapConfig::load(&cli.config)?;
    let connection_string = config.postgres_connection_string(database_url.as_deref())?;

    match cli.command {
        Commands::Check => commands::cmd_check(config.postgres_opts(connection_string)).await,
        Commands::Lsn => commands::cmd_lsn(config.postgres_opts(connection_string)).await,
        Commands::Setup { tables } => commands::cmd_setup(&connection_string, &tables).await,
        Commands::Tail { watermark_file } => {
            let path = config.watermark_path(watermark_file);
            commands::cmd_tail(config.postgres_opts(connection_string), path).await
        }
    }
}
