use std::sync::Arc;

use anyhow::Result;
use bus_display_core::{
    AccessPointConfig, ConnectivityManager, LinkEvent, NetworkIdentity, Radio, RadioError,
};
use esp_idf_hal::modem::Modem;
use esp_idf_svc::{
    eventloop::{EspSubscription, EspSystemEventLoop, System},
    netif::IpEvent,
    nvs::EspDefaultNvsPartition,
    wifi::{
        AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi,
        WifiEvent,
    },
};

/// ESP32 WiFi driver in mixed AP+STA mode.
pub struct EspRadio {
    wifi: EspWifi<'static>,
    client: ClientConfiguration,
    access_point: Option<AccessPointConfiguration>,
}

impl EspRadio {
    pub fn new(
        modem: Modem,
        sys_loop: EspSystemEventLoop,
        nvs: EspDefaultNvsPartition,
    ) -> Result<Self> {
        let wifi = EspWifi::new(modem, sys_loop, Some(nvs))?;
        Ok(Self {
            wifi,
            client: ClientConfiguration::default(),
            access_point: None,
        })
    }

    fn apply(&mut self, operation: &'static str) -> Result<(), RadioError> {
        let config = match &self.access_point {
            Some(ap) => Configuration::Mixed(self.client.clone(), ap.clone()),
            None => Configuration::Client(self.client.clone()),
        };
        self.wifi
            .set_configuration(&config)
            .map_err(|e| RadioError::new(operation, e))
    }
}

impl Radio for EspRadio {
    fn start(&mut self) -> Result<(), RadioError> {
        self.apply("esp_wifi_set_config")?;
        self.wifi
            .start()
            .map_err(|e| RadioError::new("esp_wifi_start", e))?;

        // Power save drops the link under HTTP load
        unsafe {
            use esp_idf_sys::*;
            let result = esp_wifi_set_ps(wifi_ps_type_t_WIFI_PS_NONE);
            if result != ESP_OK {
                log::warn!("Failed to set WiFi power save mode: {:?}", result);
            }
        }
        Ok(())
    }

    fn configure_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError> {
        let ssid = config
            .ssid
            .as_str()
            .try_into()
            .map_err(|_| RadioError::new("ap_config", "SSID too long"))?;
        self.access_point = Some(AccessPointConfiguration {
            ssid,
            channel: config.channel,
            auth_method: AuthMethod::None,
            max_connections: config.max_connections,
            ..Default::default()
        });
        self.apply("esp_wifi_set_config")
    }

    fn configure_station(&mut self, identity: &NetworkIdentity) -> Result<(), RadioError> {
        let ssid: heapless::String<32> = identity
            .ssid()
            .try_into()
            .map_err(|_| RadioError::new("sta_config", "SSID too long"))?;
        let password: heapless::String<64> = identity
            .password()
            .try_into()
            .map_err(|_| RadioError::new("sta_config", "password too long"))?;

        self.client = ClientConfiguration {
            ssid,
            password,
            auth_method: if identity.is_open() {
                AuthMethod::None
            } else {
                AuthMethod::WPA2Personal
            },
            ..Default::default()
        };
        self.apply("esp_wifi_set_config")
    }

    fn connect(&mut self) -> Result<(), RadioError> {
        self.wifi
            .connect()
            .map_err(|e| RadioError::new("esp_wifi_connect", e))
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        self.wifi
            .disconnect()
            .map_err(|e| RadioError::new("esp_wifi_disconnect", e))
    }

    fn mac_address(&self) -> Result<[u8; 6], RadioError> {
        self.wifi
            .sta_netif()
            .get_mac()
            .map_err(|e| RadioError::new("esp_wifi_get_mac", e))
    }
}

/// Driver event subscriptions. Dropping them stops forwarding.
pub struct LinkEventForwarder {
    _wifi: EspSubscription<'static, System>,
    _ip: EspSubscription<'static, System>,
}

/// Forward station driver events into the connectivity state machine.
pub fn forward_link_events(
    sys_loop: &EspSystemEventLoop,
    link: Arc<ConnectivityManager>,
) -> Result<LinkEventForwarder> {
    let wifi_link = link.clone();
    let wifi = sys_loop.subscribe::<WifiEvent, _>(move |event| match event {
        WifiEvent::StaConnected(_) => wifi_link.on_link_event(LinkEvent::StationUp),
        WifiEvent::StaDisconnected(info) => {
            wifi_link.on_link_event(LinkEvent::StationDown {
                reason: info.reason(),
            })
        }
        WifiEvent::ApStaConnected(_) => log::info!("Client connected to config AP"),
        WifiEvent::ApStaDisconnected(_) => log::info!("Client left config AP"),
        _ => {}
    })?;

    let ip = sys_loop.subscribe::<IpEvent, _>(move |event| {
        // Only the station interface runs a DHCP client
        if let IpEvent::DhcpIpAssigned(assignment) = event {
            link.on_link_event(LinkEvent::GotAddress(assignment.ip()));
        }
    })?;

    Ok(LinkEventForwarder {
        _wifi: wifi,
        _ip: ip,
    })
}
