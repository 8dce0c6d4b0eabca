//! Port type registry.

use crate::config::TriggerConfig;
use crate::device::{
    CedrusTrigger, DummyTrigger, KeyboardTrigger, LaunchScanTrigger, ParallelPortTrigger,
    SerialPortTrigger, TriggerDevice,
};
use crate::error::{Result, TriggerError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Builds a device from a trigger configuration.
pub type DeviceFactory =
    Arc<dyn Fn(&TriggerConfig) -> Result<Box<dyn TriggerDevice>> + Send + Sync>;

/// Maps lower-case port type names to device factories.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    factories: BTreeMap<String, DeviceFactory>,
}

impl DeviceRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in device.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("dummy", DummyTrigger::from_config);
        registry.register("serial", SerialPortTrigger::from_config);
        registry.register("parallel", ParallelPortTrigger::from_config);
        registry.register("keyboard", KeyboardTrigger::from_config);
        registry.register("launchscan", LaunchScanTrigger::from_config);
        registry.register("cedrus", CedrusTrigger::from_config);
        registry
    }

    /// Register (or replace) the factory for `port_type`.
    pub fn register<F>(&mut self, port_type: &str, factory: F)
    where
        F: Fn(&TriggerConfig) -> Result<Box<dyn TriggerDevice>> + Send + Sync + 'static,
    {
        let key = port_type.trim().to_lowercase();
        if self.factories.insert(key.clone(), Arc::new(factory)).is_some() {
            tracing::debug!("replaced trigger device factory '{key}'");
        }
    }

    pub fn contains(&self, port_type: &str) -> bool {
        self.factories.contains_key(&port_type.trim().to_lowercase())
    }

    /// Registered port types, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the device named by `config.port_type`.
    pub fn create(&self, config: &TriggerConfig) -> Result<Box<dyn TriggerDevice>> {
        let key = config.port_key();
        let factory = self
            .factories
            .get(&key)
            .ok_or_else(|| TriggerError::UnknownPortType(config.port_type.clone()))?;
        let device = factory(config)?;
        tracing::info!("created trigger {}: {}", key.to_uppercase(), device.describe());
        Ok(device)
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("port_types", &self.names())
            .finish()
    }
}
