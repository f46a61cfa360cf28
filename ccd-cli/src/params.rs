use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;

use ccd_storage::DriverParameters;

/// Load driver parameters from a TOML file
///
/// # Arguments
/// * `path` - Path to a file with top level keys such as `apikey` and `environment`
pub fn load_from_file(path: impl AsRef<Path>) -> Result<DriverParameters> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read driver config file {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse driver config file {}", path.display()))
}

/// Overrides a parameter when a value was given on the command line
pub fn set_override(params: &mut DriverParameters, key: &str, value: Option<impl Into<Value>>) {
    if let Some(value) = value {
        params.insert(key.to_string(), value.into());
    }
}
