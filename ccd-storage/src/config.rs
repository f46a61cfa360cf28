use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde_json::Value;

use crate::error::DriverError;

/// Generic driver parameters, as handed over by the host configuration
pub type DriverParameters = HashMap<String, Value>;

/// Page size used for diff-entries queries unless configured otherwise
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Deployment environment of the remote service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Prod,
    Stage,
}

impl Environment {
    /// Base URL of the content API for this environment
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Prod => "https://content-api.cloud.unity3d.com",
            Environment::Stage => "https://content-api-stg.cloud.unity3d.com",
        }
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prod" => Ok(Environment::Prod),
            "stage" => Ok(Environment::Stage),
            _ => Err(format!("Unknown environment: {}", s)),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Prod => f.write_str("prod"),
            Environment::Stage => f.write_str("stage"),
        }
    }
}

/// Validated driver configuration
#[derive(Clone)]
pub struct DriverConfig {
    pub api_key: String,
    pub environment: Environment,
    /// Scratch directory for staging artifacts
    pub root_directory: PathBuf,
    /// Entries requested per diff-entries page
    pub page_size: u32,
}

impl DriverConfig {
    /// Creates a configuration with default scratch directory and page size
    pub fn new(api_key: impl Into<String>, environment: Environment) -> Self {
        Self {
            api_key: api_key.into(),
            environment,
            root_directory: std::env::temp_dir().join("ccd"),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Parses and validates generic driver parameters
    ///
    /// # Arguments
    /// * `parameters` - map with `apikey` and `environment`, optionally
    ///   `rootdirectory` and `pagesize`
    pub fn from_parameters(parameters: &DriverParameters) -> Result<Self, DriverError> {
        let api_key = string_param(parameters, "apikey").ok_or_else(|| {
            DriverError::InvalidConfiguration("no api key parameter provided".to_string())
        })?;

        let environment = string_param(parameters, "environment").ok_or_else(|| {
            DriverError::InvalidConfiguration("no environment parameter provided".to_string())
        })?;
        let environment = environment.parse::<Environment>().map_err(|_| {
            DriverError::InvalidConfiguration("invalid environment parameter provided".to_string())
        })?;

        let mut config = Self::new(api_key, environment);

        if let Some(root) = string_param(parameters, "rootdirectory") {
            config.root_directory = PathBuf::from(root);
        }

        if let Some(page_size) = string_param(parameters, "pagesize") {
            config.page_size = page_size
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    DriverError::InvalidConfiguration(format!(
                        "invalid pagesize parameter provided: {}",
                        page_size
                    ))
                })?;
        }

        Ok(config)
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("api_key", &"<redacted>")
            .field("environment", &self.environment)
            .field("root_directory", &self.root_directory)
            .field("page_size", &self.page_size)
            .finish()
    }
}

/// Stringifies a parameter value, treating null and empty strings as missing
fn string_param(parameters: &DriverParameters, key: &str) -> Option<String> {
    let value = match parameters.get(key)? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}
