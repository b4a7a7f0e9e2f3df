// Centralized version information

// Cargo package version from Cargo.toml
pub const CARGO_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const APP_NAME: &str = "ESP32 OTA Server";

// Version info string for logging
pub fn version_info() -> String {
    format!("{} v{}", APP_NAME, CARGO_VERSION)
}
