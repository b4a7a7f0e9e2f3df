use esp_idf_hal::delay::FreeRtos;
use ota_core::Restart;

/// Task delay plus `esp_restart`.
#[derive(Debug, Default)]
pub struct EspRestart;

impl Restart for EspRestart {
    fn delay_ms(&mut self, ms: u32) {
        FreeRtos::delay_ms(ms);
    }

    fn restart(&mut self) {
        log::info!("Restarting now");
        log::logger().flush();
        unsafe { esp_idf_sys::esp_restart() }
    }
}
