//! Process-wide table of component drivers.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::component::{ComponentDev, ComponentDriver, DevCore};
use crate::config::CompConfig;
use crate::id::CompType;
use crate::irq::IrqLock;
use crate::ComponentError;

static GLOBAL: DriverRegistry = DriverRegistry::new();

/// Maps component types to their drivers.
///
/// Registration prepends, so a later driver for the same type shadows an
/// earlier one until it is unregistered. Every access runs inside an
/// [`IrqLock`] critical section and never blocks on driver code.
pub struct DriverRegistry {
    drivers: IrqLock<VecDeque<Arc<dyn ComponentDriver>>>,
}

impl DriverRegistry {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self {
            drivers: IrqLock::new(VecDeque::new()),
        }
    }

    /// The firmware-wide registry.
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Empties the registry.
    pub fn init(&self) {
        self.drivers.with(VecDeque::clear);
    }

    /// Adds a driver in front of any existing entry for its type.
    pub fn register(&self, driver: Arc<dyn ComponentDriver>) {
        tracing::info!(comp_type = %driver.comp_type(), name = driver.name(), "driver registered");
        self.drivers.with(|drivers| drivers.push_front(driver));
    }

    /// Removes the driver currently serving `comp_type`.
    pub fn unregister(&self, comp_type: CompType) -> Option<Arc<dyn ComponentDriver>> {
        let removed = self.drivers.with(|drivers| {
            let idx = drivers.iter().position(|d| d.comp_type() == comp_type)?;
            drivers.remove(idx)
        });
        if removed.is_some() {
            tracing::info!(%comp_type, "driver unregistered");
        }
        removed
    }

    /// Looks up the driver for `comp_type`.
    pub fn get(&self, comp_type: CompType) -> Option<Arc<dyn ComponentDriver>> {
        self.drivers.with(|drivers| {
            drivers
                .iter()
                .find(|d| d.comp_type() == comp_type)
                .map(Arc::clone)
        })
    }

    /// Number of registered drivers.
    pub fn len(&self) -> usize {
        self.drivers.with(|drivers| drivers.len())
    }

    /// Returns true if no driver is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a component from its descriptor.
    ///
    /// The new device starts in `Ready` with empty buffer lists.
    pub fn comp_new(&self, config: &CompConfig) -> Result<ComponentDev, ComponentError> {
        let Some(driver) = self.get(config.comp_type) else {
            tracing::error!(comp_type = %config.comp_type, "driver not found");
            return Err(ComponentError::DriverNotFound {
                comp_type: config.comp_type,
            });
        };

        if let Err(e) = config.validate() {
            tracing::error!(comp = %config.id, error = %e, "invalid component config");
            return Err(e);
        }

        tracing::info!(
            driver = driver.name(),
            comp_type = %config.comp_type,
            pipeline = config.pipeline_id,
            comp = %config.id,
            "comp new"
        );

        let ops = driver.create(config).map_err(|e| {
            tracing::error!(driver = driver.name(), error = %e, "unable to create component");
            e
        })?;

        Ok(ComponentDev::new(DevCore::new(config), ops))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DriverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRegistry")
            .field("drivers", &self.len())
            .finish()
    }
}
