// Centralized version information

// Firmware version reported to the update server, from Cargo.toml
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

// Version info string for logging
pub fn version_info() -> String {
    format!("Bus Display v{}", FIRMWARE_VERSION)
}
