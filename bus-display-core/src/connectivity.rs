//! Dual-role radio lifecycle: an always-on configuration access point next to
//! a station role driven as a small state machine.
//!
//! Link events from the platform event loop are fed in through
//! [`ConnectivityManager::on_link_event`]; interested components register a
//! [`LinkListener`] and receive typed signals instead of event-group bits.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::config::AccessPointConfig;
use crate::credentials::{CredentialError, CredentialStore, NetworkIdentity};
use crate::sync::lock;

/// How long after a self-initiated teardown a `StationDown` is taken to be
/// the driver's report of it.
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Edges of the station state machine. Everything else is unreachable.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Disconnected)
        )
    }

    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Asynchronous notifications from the radio driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Associated with the access point, no address yet.
    StationUp,
    /// Association lost or refused. `reason` is the driver's reason code.
    StationDown { reason: u16 },
    /// DHCP lease obtained.
    GotAddress(Ipv4Addr),
}

/// Outcome of a connection attempt, delivered to listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSignal {
    Connected,
    Failed,
}

/// Receiver of connection signals and state transitions.
pub trait LinkListener: Send {
    /// Returns `false` once the listener is gone; it is then unregistered.
    fn on_signal(&self, signal: LinkSignal) -> bool;

    fn on_transition(&self, _from: ConnectionState, _to: ConnectionState) {}
}

impl<T> LinkListener for Sender<T>
where
    T: From<LinkSignal> + Send,
{
    fn on_signal(&self, signal: LinkSignal) -> bool {
        self.send(T::from(signal)).is_ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{operation} failed: {detail}")]
pub struct RadioError {
    pub operation: &'static str,
    pub detail: String,
}

impl RadioError {
    pub fn new(operation: &'static str, detail: impl fmt::Display) -> Self {
        Self {
            operation,
            detail: detail.to_string(),
        }
    }
}

/// Platform radio driver. Calls are serialized by the manager.
pub trait Radio: Send {
    /// Bring up the network stack with both interfaces in AP+STA mode.
    fn start(&mut self) -> Result<(), RadioError>;

    fn configure_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError>;

    fn configure_station(&mut self, identity: &NetworkIdentity) -> Result<(), RadioError>;

    /// Issue an association request without waiting for it. The result
    /// arrives later as [`LinkEvent`]s.
    fn connect(&mut self) -> Result<(), RadioError>;

    fn disconnect(&mut self) -> Result<(), RadioError>;

    fn mac_address(&self) -> Result<[u8; 6], RadioError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectivityError {
    #[error("radio could not be started: {0}")]
    RadioUnavailable(RadioError),
    #[error("connectivity manager is not initialized")]
    NotInitialized,
    #[error("invalid network identity: {0}")]
    InvalidIdentity(CredentialError),
    #[error("credential storage failed: {0}")]
    Storage(CredentialError),
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// Copy of the connection half of the device status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub ip_address: Option<Ipv4Addr>,
    pub ssid: Option<String>,
    pub message: String,
    pub access_point_active: bool,
    pub failed_attempts: u32,
}

#[derive(Debug)]
struct Link {
    initialized: bool,
    state: ConnectionState,
    ip: Option<Ipv4Addr>,
    target: Option<NetworkIdentity>,
    message: String,
    access_point_active: bool,
    failed_attempts: u32,
    attempt: u64,
    // Armed when we tear the association down ourselves. The first
    // disconnect event inside the window is ours and not a failure.
    teardown_until: Option<Instant>,
    mac: Option<[u8; 6]>,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            initialized: false,
            state: ConnectionState::Disconnected,
            ip: None,
            target: None,
            message: "Not connected".to_string(),
            access_point_active: false,
            failed_attempts: 0,
            attempt: 0,
            teardown_until: None,
            mac: None,
        }
    }
}

pub struct ConnectivityManager {
    radio: Mutex<Box<dyn Radio>>,
    store: Arc<dyn CredentialStore>,
    access_point: AccessPointConfig,
    teardown_grace: Duration,
    link: Mutex<Link>,
    listeners: Mutex<Vec<Box<dyn LinkListener>>>,
}

impl ConnectivityManager {
    pub fn new(
        radio: Box<dyn Radio>,
        store: Arc<dyn CredentialStore>,
        access_point: AccessPointConfig,
    ) -> Self {
        Self {
            radio: Mutex::new(radio),
            store,
            access_point,
            teardown_grace: TEARDOWN_GRACE,
            link: Mutex::new(Link::default()),
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn with_teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    /// Start the network stack and both interfaces.
    ///
    /// A failure here is fatal: there is no recovery path short of a restart.
    pub fn initialize(&self) -> Result<(), ConnectivityError> {
        if lock(&self.link).initialized {
            return Ok(());
        }

        info!("Initializing WiFi manager");
        let mac = {
            let mut radio = lock(&self.radio);
            radio.start().map_err(ConnectivityError::RadioUnavailable)?;
            radio.mac_address().map_err(ConnectivityError::RadioUnavailable)?
        };

        let mut link = lock(&self.link);
        link.initialized = true;
        link.mac = Some(mac);
        info!("WiFi manager initialized, MAC {}", format_mac(&mac));
        Ok(())
    }

    /// Activate the open configuration access point. Calling it again is a no-op.
    pub fn begin_access_point(&self) -> Result<(), ConnectivityError> {
        {
            let link = lock(&self.link);
            if !link.initialized {
                return Err(ConnectivityError::NotInitialized);
            }
            if link.access_point_active {
                return Ok(());
            }
        }

        info!("Starting AP mode: {}", self.access_point.ssid);
        lock(&self.radio).configure_access_point(&self.access_point)?;
        lock(&self.link).access_point_active = true;
        info!("AP mode started successfully");
        Ok(())
    }

    /// Request a station connection and return without waiting for it.
    ///
    /// A newer request replaces an attempt still in flight. Repeating the
    /// request for the identity already being joined does not touch the radio.
    pub fn begin_station_connect(
        &self,
        identity: &NetworkIdentity,
        persist: bool,
    ) -> Result<(), ConnectivityError> {
        identity
            .validate()
            .map_err(ConnectivityError::InvalidIdentity)?;

        let (attempt, tear_down) = {
            let mut link = lock(&self.link);
            if !link.initialized {
                return Err(ConnectivityError::NotInitialized);
            }
            if link.state == ConnectionState::Connecting && link.target.as_ref() == Some(identity) {
                debug!("Already connecting to {}", identity.ssid());
                return Ok(());
            }

            let tear_down = link.state != ConnectionState::Disconnected;
            if link.state == ConnectionState::Connected {
                link.ip = None;
                self.transition(&mut link, ConnectionState::Disconnected);
            }
            if link.state == ConnectionState::Disconnected {
                self.transition(&mut link, ConnectionState::Connecting);
            }
            if tear_down {
                self.arm_teardown(&mut link);
            }
            link.target = Some(identity.clone());
            link.attempt += 1;
            link.message = format!("Connecting to {}...", identity.ssid());
            (link.attempt, tear_down)
        };

        if persist {
            if let Err(e) = self.store.save(identity) {
                warn!("Failed to save WiFi credentials: {}", e);
            }
        }

        info!("Connecting to WiFi: {}", identity.ssid());
        let result = {
            let mut radio = lock(&self.radio);
            if tear_down {
                if let Err(e) = radio.disconnect() {
                    debug!("Disconnect before reconfigure: {}", e);
                }
            }
            radio
                .configure_station(identity)
                .and_then(|_| radio.connect())
        };

        if let Err(e) = result {
            error!("WiFi connect request failed: {}", e);
            let mut link = lock(&self.link);
            if link.attempt == attempt && link.state == ConnectionState::Connecting {
                link.failed_attempts = link.failed_attempts.saturating_add(1);
                link.message = format!("Failed to connect to {}", identity.ssid());
                self.transition(&mut link, ConnectionState::Disconnected);
                self.signal(LinkSignal::Failed);
            }
            return Err(e.into());
        }

        Ok(())
    }

    /// Drop the station association. The access point stays up.
    pub fn disconnect_station(&self) -> Result<(), ConnectivityError> {
        {
            let mut link = lock(&self.link);
            if !link.initialized {
                return Err(ConnectivityError::NotInitialized);
            }
            if link.state == ConnectionState::Disconnected {
                return Ok(());
            }
            info!("Disconnecting from WiFi");
            link.ip = None;
            self.arm_teardown(&mut link);
            link.message = "Disconnected".to_string();
            self.transition(&mut link, ConnectionState::Disconnected);
        }

        lock(&self.radio).disconnect()?;
        Ok(())
    }

    /// Give up on an attempt that produced no outcome in time.
    ///
    /// Counts as a failed attempt and tears the association down so the next
    /// request reaches the radio. Returns `false` when nothing was pending.
    pub fn abandon_station_connect(&self) -> Result<bool, ConnectivityError> {
        {
            let mut link = lock(&self.link);
            if link.state != ConnectionState::Connecting {
                return Ok(false);
            }
            link.failed_attempts = link.failed_attempts.saturating_add(1);
            if let Some(ssid) = link.target.as_ref().map(|t| t.ssid().to_string()) {
                warn!("Connection to {} timed out", ssid);
                link.message = format!("Timed out connecting to {}", ssid);
            }
            self.arm_teardown(&mut link);
            self.transition(&mut link, ConnectionState::Disconnected);
        }

        lock(&self.radio).disconnect()?;
        Ok(true)
    }

    /// Erase the stored network and leave it.
    pub fn forget_station(&self) -> Result<(), ConnectivityError> {
        self.store.clear().map_err(ConnectivityError::Storage)?;
        self.disconnect_station()?;
        lock(&self.link).target = None;
        info!("Stored WiFi credentials cleared");
        Ok(())
    }

    /// Feed one driver event into the state machine.
    pub fn on_link_event(&self, event: LinkEvent) {
        let mut link = lock(&self.link);
        match event {
            LinkEvent::StationUp => {
                debug!("WiFi station associated");
            }
            LinkEvent::StationDown { reason } => {
                if let Some(until) = link.teardown_until.take() {
                    if Instant::now() < until {
                        debug!("Ignoring self-initiated disconnect (reason {})", reason);
                        return;
                    }
                }

                match link.state {
                    ConnectionState::Connecting => {
                        link.failed_attempts = link.failed_attempts.saturating_add(1);
                    }
                    ConnectionState::Connected => {}
                    ConnectionState::Disconnected => {
                        debug!("Disconnect event while idle (reason {})", reason);
                        return;
                    }
                }

                warn!("WiFi disconnected, reason: {}", reason);
                link.ip = None;
                if let Some(ssid) = link.target.as_ref().map(|t| t.ssid().to_string()) {
                    link.message = format!("Disconnected from {}", ssid);
                }
                self.transition(&mut link, ConnectionState::Disconnected);
                self.signal(LinkSignal::Failed);
            }
            LinkEvent::GotAddress(ip) => match link.state {
                ConnectionState::Connecting => {
                    info!("Got IP: {}", ip);
                    link.ip = Some(ip);
                    link.failed_attempts = 0;
                    link.teardown_until = None;
                    if let Some(ssid) = link.target.as_ref().map(|t| t.ssid().to_string()) {
                        link.message = format!("Connected to {}", ssid);
                    }
                    self.transition(&mut link, ConnectionState::Connected);
                    self.signal(LinkSignal::Connected);
                }
                ConnectionState::Connected => {
                    debug!("DHCP lease renewed: {}", ip);
                    link.ip = Some(ip);
                }
                ConnectionState::Disconnected => {
                    warn!("Ignoring address {} while disconnected", ip);
                }
            },
        }
    }

    pub fn add_listener(&self, listener: Box<dyn LinkListener>) {
        lock(&self.listeners).push(listener);
    }

    pub fn get_status(&self) -> LinkStatus {
        let link = lock(&self.link);
        LinkStatus {
            state: link.state,
            ip_address: link.ip,
            ssid: link.target.as_ref().map(|t| t.ssid().to_string()),
            message: link.message.clone(),
            access_point_active: link.access_point_active,
            failed_attempts: link.failed_attempts,
        }
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.link).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Station MAC as lower-case hex without separators.
    pub fn mac_address(&self) -> String {
        lock(&self.link)
            .mac
            .map(|mac| format_mac(&mac))
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn arm_teardown(&self, link: &mut Link) {
        link.teardown_until = Some(Instant::now() + self.teardown_grace);
    }

    fn transition(&self, link: &mut Link, next: ConnectionState) {
        let from = link.state;
        debug_assert!(
            from.can_transition_to(next),
            "illegal transition {} -> {}",
            from,
            next
        );
        link.state = next;
        debug!("Station state {} -> {}", from, next);
        for listener in lock(&self.listeners).iter() {
            listener.on_transition(from, next);
        }
    }

    fn signal(&self, signal: LinkSignal) {
        lock(&self.listeners).retain(|listener| listener.on_signal(signal));
    }
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter().map(|b| format!("{:02x}", b)).collect()
}
