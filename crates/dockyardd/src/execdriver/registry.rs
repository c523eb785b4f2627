//! Name-keyed registry of execution backend factories.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    DriverContext, DriverError, EXECDRIVER_TARGET, LXC_DRIVER, LxcDriver, NATIVE_DRIVER,
    NativeDriver, SharedDriver,
};

/// Builds a backend instance for the daemon that selected it.
pub type DriverFactory =
    Box<dyn Fn(DriverContext) -> Result<SharedDriver, DriverError> + Send + Sync>;

/// Registry of every backend the binary knows about.
///
/// Registration is unconditional and happens before boot selects a backend
/// (see [`register_builtin_drivers`]);
/// [`DriverRegistry::select`] never mutates the registry.
#[derive(Default)]
pub struct DriverRegistry {
    factories: BTreeMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// Builds an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a backend factory under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::AlreadyRegistered`] when the name is taken; the
    /// existing factory stays bound.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), DriverError>
    where
        F: Fn(DriverContext) -> Result<SharedDriver, DriverError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(DriverError::AlreadyRegistered { name });
        }
        debug!(target: EXECDRIVER_TARGET, driver = %name, "registered execution backend");
        self.factories.insert(name, Box::new(factory));
        Ok(())
    }

    /// Whether a backend is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered backend names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Instantiates the backend registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DriverError::Unsupported`] for unknown names, or whatever
    /// the backend factory reports.
    pub fn select(&self, name: &str, context: DriverContext) -> Result<SharedDriver, DriverError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DriverError::Unsupported {
                name: name.to_owned(),
                available: self.names().join(", "),
            })?;
        let driver = factory(context)?;
        info!(target: EXECDRIVER_TARGET, driver = name, "execution backend selected");
        Ok(driver)
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DriverRegistry")
            .field("drivers", &self.names())
            .finish()
    }
}

/// Registers the `native` and `lxc` backends.
///
/// # Errors
///
/// Fails when either name is already taken.
pub fn register_builtin_drivers(registry: &mut DriverRegistry) -> Result<(), DriverError> {
    registry.register(NATIVE_DRIVER, |context| {
        Ok(Arc::new(NativeDriver::new(context)) as SharedDriver)
    })?;
    registry.register(LXC_DRIVER, |context| {
        Ok(Arc::new(LxcDriver::new(context)?) as SharedDriver)
    })
}
