use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    embuild::espidf::sysenv::output();

    println!("cargo:rerun-if-changed=wifi_config.h");

    // Compiled-in WiFi credentials, used when NVS holds none
    let wifi_config_path = "wifi_config.h";
    if Path::new(wifi_config_path).exists() {
        let contents = fs::read_to_string(wifi_config_path)?;

        if let Some(ssid) = define_value(&contents, "WIFI_SSID") {
            println!("cargo:rustc-env=WIFI_SSID={}", ssid);
        }
        if let Some(pass) = define_value(&contents, "WIFI_PASSWORD") {
            println!("cargo:rustc-env=WIFI_PASSWORD={}", pass);
        }
    } else {
        println!("cargo:rustc-env=WIFI_SSID=");
        println!("cargo:rustc-env=WIFI_PASSWORD=");
        println!("cargo:warning=wifi_config.h not found! Copy wifi_config.h.example to wifi_config.h and add your credentials.");
    }

    Ok(())
}

/// Quoted value of `#define NAME "value"`.
fn define_value<'a>(contents: &'a str, name: &str) -> Option<&'a str> {
    let directive = format!("#define {}", name);
    contents
        .lines()
        .find(|l| l.trim_start().starts_with(&directive))
        .and_then(|l| l.split('"').nth(1))
}
