mod logging;
mod version;

#[cfg(target_os = "espidf")]
mod config;
#[cfg(target_os = "espidf")]
mod hardware;
#[cfg(target_os = "espidf")]
mod network;
#[cfg(target_os = "espidf")]
mod ota;
#[cfg(target_os = "espidf")]
mod system;

// Generate ESP-IDF app descriptor
#[cfg(target_os = "espidf")]
#[allow(unexpected_cfgs)]
mod app_desc {
    esp_idf_sys::esp_app_desc!();
}

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use bus_display_core::{
        ConnectivityManager, CredentialStore, NetworkIdentity, ReconnectSupervisor,
        StatusSnapshot, UpdateOrchestrator, UpdatePlatform, UpdateScheduler,
    };
    use esp_idf_hal::gpio::OutputPin;
    use esp_idf_hal::peripherals::Peripherals;
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{info, warn};

    use crate::config::ConfigStore;
    use crate::hardware::{LedController, LedPins};
    use crate::network::{forward_link_events, start_api_server, EspHttpTransport, EspRadio};
    use crate::ota::OtaManager;
    use crate::system::{EspSystem, NvsCredentialStore};

    const STATUS_INTERVAL: Duration = Duration::from_secs(30);

    // Initialize ESP-IDF
    esp_idf_svc::sys::link_patches();
    logging::init_logger(log::LevelFilter::Info)?;

    info!("{} starting", version::version_info());
    info!("Boot reason: {}", system::reset::get_reset_reason());

    let peripherals = Peripherals::take()?;
    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;

    let mut config_store = ConfigStore::new(nvs.clone())?;
    let device_config = config_store.load_or_default();
    if !logging::set_max_level_from_str(&device_config.log_level) {
        warn!("Unknown log level '{}', keeping info", device_config.log_level);
    }

    // LEDs
    let pins = peripherals.pins;
    let leds = Arc::new(LedController::new(LedPins {
        clock: pins.gpio18.downgrade_output(),
        data: pins.gpio15.downgrade_output(),
        latch: pins.gpio5.downgrade_output(),
        reset: pins.gpio19.downgrade_output(),
        output_enable: pins.gpio2.downgrade_output(),
    })?);
    leds.clear();

    // Credentials, seeded from wifi_config.h on first boot
    let store: Arc<dyn CredentialStore> = Arc::new(NvsCredentialStore::new(nvs.clone())?);
    let seed_ssid = env!("WIFI_SSID");
    let seed_password = env!("WIFI_PASSWORD");
    if !seed_ssid.is_empty() && !store.has() {
        match NetworkIdentity::new(seed_ssid, seed_password) {
            Ok(identity) => {
                info!(
                    "Seeding WiFi credentials: SSID='{}', Password={}",
                    seed_ssid,
                    if seed_password.is_empty() { "<empty>" } else { "<set>" }
                );
                if let Err(e) = store.save(&identity) {
                    warn!("Failed to seed WiFi credentials: {}", e);
                }
            }
            Err(e) => warn!("Ignoring built-in WiFi credentials: {}", e),
        }
    }

    // WiFi: a failure here is fatal and restarts the device
    let radio = EspRadio::new(peripherals.modem, sys_loop.clone(), nvs)?;
    let link = Arc::new(ConnectivityManager::new(
        Box::new(radio),
        store.clone(),
        device_config.access_point.clone(),
    ));
    let _events = forward_link_events(&sys_loop, link.clone())?;
    link.initialize()?;
    link.begin_access_point()?;
    info!(
        "Connect to WiFi '{}' to configure the device",
        device_config.access_point.ssid
    );
    info!("Device MAC: {}", link.mac_address());

    let _supervisor = ReconnectSupervisor::spawn(link.clone(), store, device_config.retry)?;

    // OTA
    let mut flasher = OtaManager::new()?;
    flasher.mark_running_valid();
    if let Some(partition) = flasher.running_partition() {
        info!("Running from partition {}", partition);
    }
    let updater = Arc::new(UpdateOrchestrator::new(
        device_config.update.clone(),
        version::FIRMWARE_VERSION,
        link.clone(),
        UpdatePlatform {
            transport: Box::new(EspHttpTransport::new(device_config.update.user_agent.clone())),
            flasher: Box::new(flasher),
            indicator: leds,
            system: Arc::new(EspSystem),
        },
    ));
    let _scheduler = if device_config.auto_update {
        Some(UpdateScheduler::spawn(
            updater.clone(),
            device_config.update.check_interval,
        )?)
    } else {
        info!("Automatic update checks disabled");
        None
    };

    let _server = start_api_server(link.clone(), updater.clone())?;
    info!("System initialization complete!");

    loop {
        let snapshot = StatusSnapshot::capture(&link, &updater);
        info!(
            "Status - AP: {}, {}",
            if snapshot.access_point_active { "ON" } else { "OFF" },
            snapshot.summary()
        );
        std::thread::sleep(STATUS_INTERVAL);
    }
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    if logging::init_logger(log::LevelFilter::Info).is_ok() {
        log::error!(
            "{} only runs on ESP-IDF targets; use `cargo test -p bus-display-core` on the host",
            version::version_info()
        );
    }
}
