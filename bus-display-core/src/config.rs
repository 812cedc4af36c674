/// Configuration structures that can be tested independently
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed identity of the configuration access point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccessPointConfig {
    pub ssid: String,
    pub channel: u8,
    pub max_connections: u16,
}

impl Default for AccessPointConfig {
    fn default() -> Self {
        Self {
            ssid: "Bus-Display-LED".to_string(),
            channel: 1,
            max_connections: 4,
        }
    }
}

/// Timing of station reconnection attempts. Constant for the process lifetime.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// How long one attempt may take before it counts as failed.
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    /// Pause between a failed attempt and the next one.
    #[serde(with = "millis")]
    pub backoff_delay: Duration,
    /// How often the supervisor wakes to look at the link and its stop signal.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            backoff_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// How a manifest version is compared with the running firmware.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum VersionPolicy {
    /// Any version string different from the running one is installed.
    #[default]
    Differs,
    /// Only strictly greater semantic versions are installed. Strings that do
    /// not parse as semver fall back to `Differs`.
    Newer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateConfig {
    pub manifest_url: String,
    pub hardware: String,
    pub user_agent: String,
    pub version_policy: VersionPolicy,
    #[serde(with = "millis")]
    pub check_interval: Duration,
    #[serde(with = "millis")]
    pub manifest_timeout: Duration,
    #[serde(with = "millis")]
    pub download_timeout: Duration,
    /// Time given to log output and status pollers before the restart.
    #[serde(with = "millis")]
    pub restart_grace: Duration,
    /// How long the all-on error pattern stays lit after a failed install.
    #[serde(with = "millis")]
    pub error_display: Duration,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            manifest_url: "https://transport.trillet.be/api/update/versions".to_string(),
            hardware: "ESP32_WROOM".to_string(),
            user_agent: "ESP32-BusDisplay/1.0".to_string(),
            version_policy: VersionPolicy::Differs,
            check_interval: Duration::from_secs(60 * 60),
            manifest_timeout: Duration::from_secs(5),
            download_timeout: Duration::from_secs(60),
            restart_grace: Duration::from_secs(2),
            error_display: Duration::from_secs(3),
        }
    }
}

/// Everything the firmware persists about itself besides credentials.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    pub access_point: AccessPointConfig,
    pub retry: RetryPolicy,
    pub update: UpdateConfig,
    pub auto_update: bool,
    pub log_level: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            access_point: AccessPointConfig::default(),
            retry: RetryPolicy::default(),
            update: UpdateConfig::default(),
            auto_update: true,
            log_level: "info".to_string(),
        }
    }
}

impl DeviceConfig {
    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
