use capstore_config::{Config, DeviceConfig};
use capstore_storage::{ColdLayout, HotTier, validate_absolute};
use std::sync::Arc;

/// One capture device with both of its tiers resolved.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub hot: HotTier,
    pub cold: ColdLayout,
    pub ram_size_mb: u64,
}
impl Device {
    pub fn from_config(device: &DeviceConfig, config: &Config) -> Self {
        // Paths were validated when the configuration was loaded; normalizing
        // again only strips redundant separators.
        let hot = device.hot_path();
        let cold = device.cold_path();
        Self {
            id: device.id.clone(),
            hot: HotTier::new(validate_absolute(&hot).unwrap_or(hot)),
            cold: ColdLayout::new(validate_absolute(&cold).unwrap_or(cold), config.utc_offset),
            ram_size_mb: config.ram_size_mb(device),
        }
    }
}

/// A consistent snapshot of the configuration and the devices derived from
/// it. One cycle of any component works against exactly one snapshot.
#[derive(Debug, Clone)]
pub struct Context {
    config: Arc<Config>,
    devices: Vec<Device>,
}
impl Context {
    pub fn new(config: Arc<Config>) -> Self {
        let devices = config.devices.iter().map(|d| Device::from_config(d, &config)).collect();
        Self { config, devices }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn device(&self, id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == id)
    }

    /// Restrict the snapshot to a single device, for one-shot commands.
    pub fn only(mut self, id: &str) -> Option<Self> {
        self.devices.retain(|d| d.id == id);
        (!self.devices.is_empty()).then_some(self)
    }
}
