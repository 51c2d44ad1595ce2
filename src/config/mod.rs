// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a file (YAML or JSON)
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = parse_config(&contents, path)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let is_yaml = matches!(
        path.extension().and_then(|s| s.to_str()),
        Some("yaml") | Some("yml")
    );

    let config = if is_yaml {
        serde_yaml::from_str(contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(contents).context("Failed to parse JSON config")?
    };
    Ok(config)
}

pub const ENV_API_HOST: &str = "API_HOST";
pub const ENV_STARTING_PORT: &str = "STARTING_PORT";
pub const ENV_LOAD_BALANCER_PORT: &str = "LOAD_BALANCER_PORT";
pub const ENV_NUM_OF_SERVERS: &str = "NUM_OF_SERVERS";

/// Overlay the environment variables on `config`.
///
/// Unset variables keep the current value with a warning; unparsable ones
/// keep it with an error. `lookup` is usually `|k| std::env::var(k).ok()`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for name in [
        ENV_API_HOST,
        ENV_STARTING_PORT,
        ENV_LOAD_BALANCER_PORT,
        ENV_NUM_OF_SERVERS,
    ] {
        let value = match lookup(name).filter(|v| !v.is_empty()) {
            Some(value) => value,
            None => {
                tracing::warn!(var = name, "environment variable is not defined, keeping current value");
                continue;
            }
        };

        match name {
            ENV_API_HOST => config.api_host = value,
            ENV_STARTING_PORT => set_parsed(name, &value, &mut config.starting_port),
            ENV_LOAD_BALANCER_PORT => set_parsed(name, &value, &mut config.load_balancer_port),
            ENV_NUM_OF_SERVERS => set_parsed(name, &value, &mut config.num_of_servers),
            _ => {}
        }
    }
}

fn set_parsed<T>(name: &str, raw: &str, slot: &mut T)
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match raw.trim().parse() {
        Ok(v) => *slot = v,
        Err(err) => tracing::error!(var = name, value = raw, %err, "invalid value, keeping current"),
    }
}
