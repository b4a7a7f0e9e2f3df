use anyhow::Result;
use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use ota_core::ServerConfig;
use serde::{Deserialize, Serialize};

const CONFIG_NAMESPACE: &str = "ota";
const CONFIG_KEY: &str = "config";
const MAX_CONFIG_SIZE: usize = 512;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // WiFi settings
    pub wifi_ssid: String,
    pub wifi_password: String,

    // mDNS hostname, advertised as <hostname>.local
    pub hostname: String,

    pub log_level: String,

    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        // Compiled-in credentials from wifi_config.h via build.rs
        Self {
            wifi_ssid: env!("WIFI_SSID").to_string(),
            wifi_password: env!("WIFI_PASSWORD").to_string(),
            hostname: "esp32-ota".to_string(),
            log_level: "info".to_string(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn save(&self, nvs: &EspNvsPartition<NvsDefault>) -> Result<()> {
        let mut store = EspNvs::new(nvs.clone(), CONFIG_NAMESPACE, true)?;
        let json = serde_json::to_vec(self)?;
        store.set_blob(CONFIG_KEY, &json)?;
        log::info!("Configuration saved to NVS");
        Ok(())
    }
}

pub fn load_or_default(nvs: &EspNvsPartition<NvsDefault>) -> Result<Config> {
    match load_from_nvs(nvs) {
        Ok(mut config) => {
            log::info!("Loaded configuration from NVS");

            // If NVS has empty WiFi credentials, use the compiled-in ones
            if config.wifi_ssid.is_empty() {
                let default_config = Config::default();
                log::warn!(
                    "NVS WiFi credentials empty, using compiled defaults: SSID='{}'",
                    default_config.wifi_ssid
                );
                config.wifi_ssid = default_config.wifi_ssid;
                config.wifi_password = default_config.wifi_password;
            }

            Ok(config)
        }
        Err(e) => {
            log::warn!("Failed to load config from NVS: {:?}, using defaults", e);
            let config = Config::default();

            if let Err(save_err) = config.save(nvs) {
                log::warn!("Failed to save default config to NVS: {:?}", save_err);
            }

            Ok(config)
        }
    }
}

fn load_from_nvs(nvs: &EspNvsPartition<NvsDefault>) -> Result<Config> {
    let store = EspNvs::new(nvs.clone(), CONFIG_NAMESPACE, true)?;

    let mut buf = vec![0u8; MAX_CONFIG_SIZE];
    let data = store
        .get_blob(CONFIG_KEY, &mut buf)?
        .ok_or_else(|| anyhow::anyhow!("Config not found in NVS"))?;

    Ok(serde_json::from_slice(data)?)
}
