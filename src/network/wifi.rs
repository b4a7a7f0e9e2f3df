use anyhow::{bail, Result};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs::EspDefaultNvsPartition,
    wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi},
};

pub struct WifiManager {
    wifi: BlockingWifi<EspWifi<'static>>,
    pub ssid: String,
}

impl WifiManager {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: String,
        password: String,
    ) -> Result<Self> {
        log::info!("Initializing WiFi for SSID: '{}'", ssid);

        if ssid.is_empty() {
            log::error!("WiFi SSID is empty! Check wifi_config.h");
            bail!("WiFi SSID cannot be empty");
        }

        let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;

        let cfg = Configuration::Client(ClientConfiguration {
            ssid: ssid
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid SSID format: {}", ssid))?,
            password: password
                .as_str()
                .try_into()
                .map_err(|_| anyhow::anyhow!("Invalid password format"))?,
            auth_method: if password.is_empty() {
                log::warn!("WiFi password is empty, using open network");
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        });
        esp_wifi.set_configuration(&cfg)?;

        let wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;
        Ok(Self { wifi, ssid })
    }

    pub fn connect(&mut self) -> Result<()> {
        log::info!("Starting WiFi...");
        self.wifi.start()?;

        // The scan can take several seconds; keep the task watchdog out of it
        unsafe {
            esp_idf_sys::esp_task_wdt_delete(std::ptr::null_mut());
        }
        let scan = self.wifi.scan();
        unsafe {
            if esp_idf_sys::esp_task_wdt_add(std::ptr::null_mut()) == esp_idf_sys::ESP_OK {
                esp_idf_sys::esp_task_wdt_reset();
            }
        }

        let Some(ap) = scan?.into_iter().find(|ap| ap.ssid.as_str() == self.ssid.as_str()) else {
            bail!("Network {} not found", self.ssid);
        };
        log::info!("Found network: {} (signal: {} dBm)", ap.ssid, ap.signal_strength);

        log::info!("Connecting to {}...", self.ssid);
        self.wifi.connect()?;

        log::info!("Waiting for DHCP...");
        unsafe { esp_idf_sys::esp_task_wdt_reset(); }
        self.wifi.wait_netif_up()?;
        unsafe { esp_idf_sys::esp_task_wdt_reset(); }

        // Power save drops long uploads
        unsafe {
            use esp_idf_sys::*;
            let result = esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_NONE);
            if result != ESP_OK {
                log::warn!("Failed to set WiFi power save mode: {:?}", result);
            }
        }

        Ok(())
    }

    pub fn get_ip(&self) -> Option<String> {
        self.wifi
            .wifi()
            .sta_netif()
            .get_ip_info()
            .ok()
            .map(|ip_info| format!("{}", ip_info.ip))
    }
}
