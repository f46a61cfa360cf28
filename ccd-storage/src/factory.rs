use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::ccd::{CcdDriver, DRIVER_NAME};
use crate::config::DriverParameters;
use crate::driver::StorageDriver;
use crate::error::DriverError;

/// Constructor building a driver from generic parameters
pub type DriverConstructor = fn(&DriverParameters) -> Result<Arc<dyn StorageDriver>, DriverError>;

/// Registry mapping driver names to their constructors
#[derive(Clone)]
pub struct DriverRegistry {
    constructors: HashMap<String, DriverConstructor>,
}

impl DriverRegistry {
    /// Creates a registry without any driver
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registers a constructor under `name`
    ///
    /// Names must be non-empty and unique within the registry.
    pub fn register(
        &mut self,
        name: &str,
        constructor: DriverConstructor,
    ) -> Result<(), DriverError> {
        if name.is_empty() {
            return Err(DriverError::InvalidConfiguration(
                "driver name must not be empty".to_string(),
            ));
        }
        if self.constructors.contains_key(name) {
            return Err(DriverError::InvalidConfiguration(format!(
                "driver already registered: {}",
                name
            )));
        }

        debug!(driver = name, "Registered storage driver");
        self.constructors.insert(name.to_string(), constructor);
        Ok(())
    }

    /// Constructs the driver registered under `name`
    pub fn create(
        &self,
        name: &str,
        parameters: &DriverParameters,
    ) -> Result<Arc<dyn StorageDriver>, DriverError> {
        let constructor = self.constructors.get(name).ok_or_else(|| {
            DriverError::InvalidConfiguration(format!("unknown storage driver: {}", name))
        })?;
        constructor(parameters)
    }

    /// Registered driver names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

impl Default for DriverRegistry {
    /// Registry with the `ccd` driver
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.constructors.insert(DRIVER_NAME.to_string(), create_ccd);
        registry
    }
}

fn create_ccd(parameters: &DriverParameters) -> Result<Arc<dyn StorageDriver>, DriverError> {
    Ok(Arc::new(CcdDriver::from_parameters(parameters)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing(_: &DriverParameters) -> Result<Arc<dyn StorageDriver>, DriverError> {
        Err(DriverError::InvalidConfiguration("nope".to_string()))
    }

    #[test]
    fn test_register_validation() {
        let mut registry = DriverRegistry::empty();
        assert!(registry.register("", failing).is_err());
        registry.register("custom", failing).unwrap();
        assert!(registry.register("custom", failing).is_err());
        assert_eq!(registry.names(), vec!["custom"]);
    }

    #[test]
    fn test_default_registry_has_ccd() {
        let registry = DriverRegistry::default();
        assert_eq!(registry.names(), vec![DRIVER_NAME]);

        let mut params = DriverParameters::new();
        params.insert("apikey".to_string(), "key".into());
        params.insert("environment".to_string(), "stage".into());
        let driver = registry.create(DRIVER_NAME, &params).unwrap();
        assert_eq!(driver.name(), "ccd");
    }

    #[test]
    fn test_create_rejects_unknown_names_and_bad_parameters() {
        let registry = DriverRegistry::default();
        let params = DriverParameters::new();

        match registry.create("s3", &params) {
            Err(DriverError::InvalidConfiguration(msg)) => {
                assert_eq!(msg, "unknown storage driver: s3")
            }
            _ => panic!("expected unknown driver error"),
        }
        assert!(matches!(
            registry.create(DRIVER_NAME, &params),
            Err(DriverError::InvalidConfiguration(_))
        ));
    }
}
