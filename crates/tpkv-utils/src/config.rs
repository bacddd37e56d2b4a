use std::fs;

use anyhow::{Context as _, Result};
use camino::Utf8Path;
use serde::de::DeserializeOwned;

/// Loads a TOML config file into any deserializable config type.
pub fn read_config_file<T>(path: &Utf8Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read config file {path}"))?;
    toml::from_str(&content).with_context(|| format!("failed to parse config file {path}"))
}
