use std::net::Ipv4Addr;

use serde::Serialize;

use crate::connectivity::{ConnectionState, ConnectivityManager, LinkStatus};
use crate::update::{UpdateOrchestrator, UpdateState, UpdateStatus};

/// Point-in-time view of connectivity and update state for the web UI and logs.
///
/// Each half is copied under its own lock, so the two halves may be a few
/// milliseconds apart but each is internally consistent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub connection_state: ConnectionState,
    pub ip_address: Option<Ipv4Addr>,
    pub ssid: Option<String>,
    pub connection_message: String,
    pub access_point_active: bool,
    pub failed_attempts: u32,
    pub firmware_version: String,
    pub update_state: UpdateState,
    pub last_check_message: String,
    pub update_in_progress: bool,
    pub update_progress: Option<u8>,
}

impl StatusSnapshot {
    pub fn capture(link: &ConnectivityManager, updater: &UpdateOrchestrator) -> Self {
        Self::from_parts(link.get_status(), updater.status())
    }

    pub fn from_parts(link: LinkStatus, update: UpdateStatus) -> Self {
        Self {
            connection_state: link.state,
            ip_address: link.ip_address,
            ssid: link.ssid,
            connection_message: link.message,
            access_point_active: link.access_point_active,
            failed_attempts: link.failed_attempts,
            firmware_version: update.current_version,
            update_state: update.state,
            last_check_message: update.last_message,
            update_in_progress: update.in_progress,
            update_progress: update.progress,
        }
    }

    /// One-line form for the periodic status log.
    pub fn summary(&self) -> String {
        let ip = self
            .ip_address
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!(
            "WiFi {} ({}) ip={} | fw v{} | OTA: {}",
            self.connection_state,
            self.connection_message,
            ip,
            self.firmware_version,
            self.last_check_message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::LinkEvent;
    use crate::tests::mocks::{connected_manager, manager, orchestrator, MockPlatform};

    #[test]
    fn test_initial_snapshot() {
        let (link, _, _) = manager();
        let platform = MockPlatform::default();
        let updater = orchestrator(link.clone(), &platform, "1.2.0");

        let snapshot = StatusSnapshot::capture(&link, &updater);
        assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
        assert_eq!(snapshot.ip_address, None);
        assert_eq!(snapshot.connection_message, "Not connected");
        assert_eq!(snapshot.firmware_version, "1.2.0");
        assert_eq!(snapshot.update_state, UpdateState::Idle);
        assert_eq!(snapshot.last_check_message, "Never checked");
        assert!(!snapshot.update_in_progress);
    }

    #[test]
    fn test_snapshot_follows_link() {
        let (link, _, _) = connected_manager();
        let platform = MockPlatform::default();
        platform
            .transport
            .respond(200, r#"{"app_version":"1.2.0","app_url":"u"}"#);
        let updater = orchestrator(link.clone(), &platform, "1.2.0");
        updater.check_for_update().unwrap();

        let snapshot = StatusSnapshot::capture(&link, &updater);
        assert_eq!(snapshot.connection_state, ConnectionState::Connected);
        assert_eq!(snapshot.ssid.as_deref(), Some("home"));
        assert!(snapshot.ip_address.is_some());
        assert_eq!(snapshot.last_check_message, "Firmware up to date (v1.2.0)");
        assert!(snapshot.summary().contains("CONNECTED"));

        link.on_link_event(LinkEvent::StationDown { reason: 200 });
        let snapshot = StatusSnapshot::capture(&link, &updater);
        assert_eq!(snapshot.connection_state, ConnectionState::Disconnected);
        assert_eq!(snapshot.ip_address, None);
        assert_eq!(snapshot.connection_message, "Disconnected from home");
    }

    #[test]
    fn test_snapshot_serializes() {
        let (link, _, _) = manager();
        let platform = MockPlatform::default();
        let updater = orchestrator(link.clone(), &platform, "1.2.0");
        let json = serde_json::to_value(StatusSnapshot::capture(&link, &updater)).unwrap();
        assert_eq!(json["connection_state"], "disconnected");
        assert_eq!(json["update_state"], "idle");
        assert_eq!(json["ip_address"], serde_json::Value::Null);
    }
}
