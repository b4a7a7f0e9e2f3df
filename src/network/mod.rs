pub mod wifi;

use anyhow::Result;
use esp_idf_hal::modem::Modem;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::mdns::EspMdns;
use esp_idf_svc::nvs::EspDefaultNvsPartition;

use self::wifi::WifiManager;

/// mDNS service type the host tool can browse for.
const OTA_SERVICE: &str = "_esp32-ota";

pub struct NetworkManager {
    wifi: WifiManager,
    _mdns: Option<EspMdns>,
}

impl NetworkManager {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
        ssid: String,
        password: String,
    ) -> Result<Self> {
        let wifi = WifiManager::new(modem, sys_loop, nvs, ssid, password)?;

        Ok(Self { wifi, _mdns: None })
    }

    /// Join the network, then advertise the OTA port over mDNS.
    pub fn connect(&mut self, hostname: &str, ota_port: u16) -> Result<()> {
        self.wifi.connect()?;
        log::info!("WiFi connected, IP: {:?}", self.wifi.get_ip());

        match self.start_mdns(hostname, ota_port) {
            Ok(_) => log::info!("mDNS service started: {}.local", hostname),
            Err(e) => log::warn!("Failed to start mDNS: {:?}", e),
        }

        Ok(())
    }

    fn start_mdns(&mut self, hostname: &str, ota_port: u16) -> Result<()> {
        let mut mdns = EspMdns::take()?;
        mdns.set_hostname(hostname)?;
        mdns.add_service(
            None,
            OTA_SERVICE,
            "_tcp",
            ota_port,
            &[("version", crate::version::CARGO_VERSION)],
        )?;

        self._mdns = Some(mdns);
        Ok(())
    }

    pub fn get_ip(&self) -> Option<String> {
        self.wifi.get_ip()
    }
}
