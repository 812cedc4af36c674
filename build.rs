use std::fs;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    // Necessary for ESP-IDF
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }

    // Seed credentials for the first boot, never committed
    let wifi_config_path = "wifi_config.h";
    println!("cargo:rerun-if-changed={}", wifi_config_path);
    if Path::new(wifi_config_path).exists() {
        let contents = fs::read_to_string(wifi_config_path)?;

        let ssid = define_value(&contents, "WIFI_SSID").unwrap_or_default();
        let pass = define_value(&contents, "WIFI_PASSWORD").unwrap_or_default();
        println!("cargo:rustc-env=WIFI_SSID={}", ssid);
        println!("cargo:rustc-env=WIFI_PASSWORD={}", pass);
    } else {
        println!("cargo:rustc-env=WIFI_SSID=");
        println!("cargo:rustc-env=WIFI_PASSWORD=");
        println!("cargo:warning=wifi_config.h not found, the device will boot without a stored network");
    }

    Ok(())
}

fn define_value<'a>(contents: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!("#define {}", name);
    contents
        .lines()
        .find(|l| l.trim_start().starts_with(&needle))
        .and_then(|l| l.split('"').nth(1))
}
