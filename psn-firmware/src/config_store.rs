//! `ConfigStore` over NVS, grounded on `esp-idf-svc`'s blob load/save
//! pattern (`EspNvs::get_blob`/`set_blob`) against
//! `psn_core::config::Configuration` and its own validation.

use esp_idf_svc::nvs::{EspDefaultNvsPartition, EspNvs};
use psn_core::capabilities::{ConfigStore, ConfigStoreError};
use psn_core::config::Configuration;

const CONFIG_NAMESPACE: &str = "psn";
const CONFIG_KEY: &str = "config";
const MAX_CONFIG_BLOB_BYTES: usize = 512;

pub struct NvsConfigStore {
    nvs_partition: EspDefaultNvsPartition,
}

impl NvsConfigStore {
    pub fn new(nvs_partition: EspDefaultNvsPartition) -> Self {
        Self { nvs_partition }
    }
}

impl ConfigStore for NvsConfigStore {
    fn load(&self) -> Result<Configuration, ConfigStoreError> {
        let nvs = EspNvs::new(self.nvs_partition.clone(), CONFIG_NAMESPACE, true)
            .map_err(|_| ConfigStoreError)?;

        let mut buf = [0u8; MAX_CONFIG_BLOB_BYTES];
        let size = nvs
            .get_blob(CONFIG_KEY, &mut buf)
            .map_err(|_| ConfigStoreError)?
            .ok_or(ConfigStoreError)?;

        let json = core::str::from_utf8(&buf[..size]).map_err(|_| ConfigStoreError)?;
        serde_json::from_str(json).map_err(|_| ConfigStoreError)
    }

    fn save(&mut self, config: &Configuration) -> Result<(), ConfigStoreError> {
        let mut nvs = EspNvs::new(self.nvs_partition.clone(), CONFIG_NAMESPACE, false)
            .map_err(|_| ConfigStoreError)?;

        let json = serde_json::to_vec(config).map_err(|_| ConfigStoreError)?;
        nvs.set_blob(CONFIG_KEY, &json).map_err(|_| ConfigStoreError)?;
        log::info!("configuration saved to NVS");
        Ok(())
    }
}
