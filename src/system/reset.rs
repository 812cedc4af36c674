use bus_display_core::platform::SystemControl;
use log::info;

/// Software restart through ESP-IDF. Used after a successful OTA.
pub struct EspSystem;

impl SystemControl for EspSystem {
    fn restart(&self) {
        info!("Restarting...");
        log::logger().flush();
        esp_idf_hal::reset::restart();
    }
}

/// Get the last reset reason as a string
pub fn get_reset_reason() -> &'static str {
    let reason = unsafe { esp_idf_sys::esp_reset_reason() };

    match reason {
        esp_idf_sys::esp_reset_reason_t_ESP_RST_POWERON => "Power-on",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_EXT => "External pin",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_SW => "Software reset",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_PANIC => "Panic",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_INT_WDT => "Interrupt watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_TASK_WDT => "Task watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_WDT => "Other watchdog",
        esp_idf_sys::esp_reset_reason_t_ESP_RST_BROWNOUT => "Brownout",
        _ => "Unknown",
    }
}
