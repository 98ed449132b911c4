use std::path::PathBuf;

use anyhow::{Context, Result};

/// Load `.env` (or `.env.{environment}`) from the current directory or the
/// nearest ancestor that has one.
///
/// Returns the loaded path, or `None` when there is no such file. Variables
/// already set in the process environment win.
pub fn load_dotenv_from_ancestors(environment: Option<&str>) -> Result<Option<PathBuf>> {
    let file_name = match environment {
        Some(env) => format!(".env.{}", env),
        None => ".env".to_string(),
    };
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    let mut current = cwd.as_path();
    loop {
        let env_path = current.join(&file_name);
        if env_path.exists() {
            dotenvy::from_path(&env_path)
                .with_context(|| format!("Failed to load {} from {}", file_name, env_path.display()))?;
            return Ok(Some(env_path));
        }

        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }

    if environment.is_some() {
        anyhow::bail!(
            "No {} file found.\n\nSearched from {} to filesystem root.",
            file_name,
            cwd.display()
        );
    }
    Ok(None)
}
