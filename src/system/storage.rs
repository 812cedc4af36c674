use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Result;
use bus_display_core::{CredentialError, CredentialStore, NetworkIdentity};
use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault};

use crate::config::NAMESPACE;

const SSID_KEY: &str = "wifi_ssid";
const PASSWORD_KEY: &str = "wifi_password";

/// Station credentials in NVS, one string per key.
pub struct NvsCredentialStore {
    nvs: Mutex<EspNvs<NvsDefault>>,
}

impl NvsCredentialStore {
    pub fn new(partition: EspDefaultNvsPartition) -> Result<Self> {
        let nvs = EspNvs::new(partition, NAMESPACE, true)?;
        Ok(Self {
            nvs: Mutex::new(nvs),
        })
    }

    fn nvs(&self) -> MutexGuard<'_, EspNvs<NvsDefault>> {
        self.nvs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn storage_error(e: impl std::fmt::Debug) -> CredentialError {
    CredentialError::Storage(format!("{:?}", e))
}

impl CredentialStore for NvsCredentialStore {
    fn save(&self, identity: &NetworkIdentity) -> Result<(), CredentialError> {
        let mut nvs = self.nvs();
        nvs.set_str(SSID_KEY, identity.ssid()).map_err(storage_error)?;
        nvs.set_str(PASSWORD_KEY, identity.password())
            .map_err(storage_error)?;
        log::info!("WiFi credentials saved for {}", identity.ssid());
        Ok(())
    }

    fn load(&self) -> Result<Option<NetworkIdentity>, CredentialError> {
        let nvs = self.nvs();
        let mut ssid_buf = [0u8; 33];
        let mut pass_buf = [0u8; 65];

        let ssid = match nvs.get_str(SSID_KEY, &mut ssid_buf).map_err(storage_error)? {
            Some(ssid) if !ssid.is_empty() => ssid.to_string(),
            _ => return Ok(None),
        };
        let password = nvs
            .get_str(PASSWORD_KEY, &mut pass_buf)
            .map_err(storage_error)?
            .unwrap_or_default()
            .to_string();

        NetworkIdentity::new(ssid, password).map(Some)
    }

    fn clear(&self) -> Result<(), CredentialError> {
        let mut nvs = self.nvs();
        nvs.remove(SSID_KEY).map_err(storage_error)?;
        nvs.remove(PASSWORD_KEY).map_err(storage_error)?;
        Ok(())
    }
}
