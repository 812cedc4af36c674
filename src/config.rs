use anyhow::Result;
use bus_display_core::DeviceConfig;
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

pub const NAMESPACE: &str = "bus_display";
const CONFIG_KEY: &str = "config";

/// Device configuration persisted as a JSON blob in NVS.
pub struct ConfigStore {
    nvs: EspNvs<NvsDefault>,
}

impl ConfigStore {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, NAMESPACE, true)?;
        Ok(Self { nvs })
    }

    pub fn load_or_default(&mut self) -> DeviceConfig {
        match self.load() {
            Ok(Some(config)) => {
                log::info!("Loaded configuration from NVS");
                config
            }
            Ok(None) => {
                log::info!("No stored configuration, writing defaults");
                self.store_defaults()
            }
            Err(e) => {
                log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
                self.store_defaults()
            }
        }
    }

    pub fn save(&mut self, config: &DeviceConfig) -> Result<()> {
        let json = config.to_json()?;
        self.nvs.set_blob(CONFIG_KEY, &json)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }

    fn load(&self) -> Result<Option<DeviceConfig>> {
        let mut buf = vec![0u8; 2048];
        match self.nvs.get_blob(CONFIG_KEY, &mut buf)? {
            Some(data) => Ok(Some(DeviceConfig::from_json(data)?)),
            None => Ok(None),
        }
    }

    fn store_defaults(&mut self) -> DeviceConfig {
        let config = DeviceConfig::default();
        if let Err(e) = self.save(&config) {
            log::warn!("Failed to save default config to NVS: {:?}", e);
        }
        config
    }
}
