use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use walcap_pg::PostgresOpts;

const DEFAULT_WATERMARK_PATH: &str = "walcap-watermark.json";

/// Configuration from walcap.toml. Every section is optional.
#[derive(Debug, Default, Deserialize)]
pub struct WalcapConfig {
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
    #[serde(default)]
    pub replication: ReplicationConfig,
    #[serde(default)]
    pub watermark: WatermarkConfig,
}

#[derive(Debug, Deserialize)]
pub struct PostgresConfig {
    pub connection_string: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReplicationConfig {
    pub read_timeout_secs: Option<u64>,
    pub commit_interval_secs: Option<u64>,
    #[serde(default)]
    pub refresh_catalog_on_relation_change: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct WatermarkConfig {
    pub path: Option<PathBuf>,
}

impl WalcapConfig {
    /// Load the config file, or the defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve environment variables in a string.
    /// Supports ${VAR_NAME} syntax.
    pub fn resolve_env(&self, s: &str) -> String {
        let mut result = s.to_string();

        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let value = std::env::var(var_name).unwrap_or_default();
                result = format!("{}{}{}", &result[..start], value, &result[start + end + 1..]);
            } else {
                break;
            }
        }

        result
    }

    /// The connection string, preferring the command-line value.
    pub fn postgres_connection_string(&self, cli_override: Option<&str>) -> Result<String> {
        if let Some(url) = cli_override {
            return Ok(url.to_string());
        }
        let Some(postgres) = &self.postgres else {
            anyhow::bail!(
                "No database configured.\n\n\
                Set DATABASE_URL, pass --database-url, or add to walcap.toml:\n\
                \n  \
                [postgres]\n  \
                connection_string = \"${{DATABASE_URL}}\""
            );
        };
        let resolved = self.resolve_env(&postgres.connection_string);
        if resolved.is_empty() {
            anyhow::bail!("postgres.connection_string resolved to an empty string");
        }
        Ok(resolved)
    }

    /// Session options for `connection_string`, without watermark callbacks.
    pub fn postgres_opts(&self, connection_string: String) -> PostgresOpts {
        let mut opts = PostgresOpts::new(connection_string);
        if let Some(secs) = self.replication.read_timeout_secs {
            opts.read_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.replication.commit_interval_secs {
            opts.commit_interval = Duration::from_secs(secs);
        }
        opts.refresh_catalog_on_relation_change = self.replication.refresh_catalog_on_relation_change;
        opts
    }

    pub fn watermark_path(&self, cli_override: Option<PathBuf>) -> PathBuf {
        cli_override
            .or_else(|| self.watermark.path.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WATERMARK_PATH))
    }
}
