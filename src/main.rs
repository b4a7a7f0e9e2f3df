use anyhow::Result;
use esp_idf_hal::prelude::*;
use esp_idf_svc::{eventloop::EspSystemEventLoop, nvs::EspDefaultNvsPartition};
use esp_idf_sys as _; // Binstart
use log::{info, warn};
use ota_core::{transport, OtaServer, RegionInfo, Storage};

// Generate ESP-IDF app descriptor
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

mod config;
mod logging;
mod network;
mod ota;
mod system;
mod version;

use crate::network::NetworkManager;
use crate::ota::{EspPartitionStorage, EspRestart};

fn main() -> Result<()> {
    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();

    logging::init_logger().map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;

    info!("{}", version::version_info());
    info!("Free heap: {} bytes", unsafe { esp_idf_sys::esp_get_free_heap_size() });
    info!("Boot reason: {}", system::reset::get_reset_reason());
    if system::reset::was_abnormal_reset() {
        warn!("Previous run ended abnormally");
    }

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let config = config::load_or_default(&nvs)?;
    if !logging::set_max_level_from_str(&config.log_level) {
        warn!("Unknown log level '{}', keeping debug", config.log_level);
    }

    let mut storage = EspPartitionStorage::new();
    log_partitions(&mut storage);

    let mut network = NetworkManager::new(
        peripherals.modem,
        sys_loop,
        nvs,
        config.wifi_ssid.clone(),
        config.wifi_password.clone(),
    )?;
    network.connect(&config.hostname, config.server.port)?;

    let mut listener = transport::listen(config.server.port)?;
    let mut server: OtaServer<_, _> = OtaServer::new(storage, EspRestart, config.server.clone())?;
    info!(
        "OTA server ready at {}:{}",
        network.get_ip().unwrap_or_else(|| "<no ip>".to_string()),
        config.server.port
    );

    server.serve(&mut listener)
}

fn log_partitions(storage: &mut EspPartitionStorage) {
    let running = storage.running_partition();
    let boot = storage.current_boot_region();

    if let Some(running) = &running {
        info!(
            "Running partition '{}' subtype {} at offset 0x{:x}",
            running.label(),
            running.subtype(),
            running.offset()
        );
    }

    // Happens when the boot data was changed but not yet acted on, or is corrupt
    if let (Some(running), Some(boot)) = (running, boot) {
        if running.offset() != boot.offset() {
            warn!(
                "Configured boot partition at offset 0x{:x}, but running from offset 0x{:x}",
                boot.offset(),
                running.offset()
            );
        }
    }
}
