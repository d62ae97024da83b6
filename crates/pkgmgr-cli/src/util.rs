use std::path::Path;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Load a `.env` file without overriding variables already set.
pub fn load_env(path: Option<&Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = Path::new(".env");
            if !default.exists() {
                return Ok(());
            }
            default.to_path_buf()
        }
    };
    for item in dotenvy::from_path_iter(&path).with_context(|| format!("load {}", path.display()))? {
        let (key, val) = item?;
        if std::env::var_os(&key).is_none() {
            unsafe {
                std::env::set_var(&key, &val);
            }
        }
    }
    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (default `info`).
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}
