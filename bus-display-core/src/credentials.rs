//! Station credentials and the persistence contract they are stored through.

use std::fmt;
use std::sync::Mutex;

use crate::sync::lock;

pub const MAX_SSID_LEN: usize = 32;
pub const MAX_PASSWORD_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("ssid must not be empty")]
    EmptySsid,
    #[error("ssid is {0} bytes, limit is 32")]
    SsidTooLong(usize),
    #[error("password is {0} bytes, limit is 63")]
    PasswordTooLong(usize),
    #[error("credential storage failed: {0}")]
    Storage(String),
}

/// SSID and passphrase of the network the station role joins.
#[derive(Clone, PartialEq, Eq)]
pub struct NetworkIdentity {
    ssid: String,
    password: String,
}

impl NetworkIdentity {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Result<Self, CredentialError> {
        let identity = Self {
            ssid: ssid.into(),
            password: password.into(),
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Check the byte limits of the radio configuration.
    pub fn validate(&self) -> Result<(), CredentialError> {
        if self.ssid.is_empty() {
            return Err(CredentialError::EmptySsid);
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(CredentialError::SsidTooLong(self.ssid.len()));
        }
        if self.password.len() > MAX_PASSWORD_LEN {
            return Err(CredentialError::PasswordTooLong(self.password.len()));
        }
        Ok(())
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn is_open(&self) -> bool {
        self.password.is_empty()
    }
}

// Keep passphrases out of logs.
impl fmt::Debug for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkIdentity")
            .field("ssid", &self.ssid)
            .field("password", &if self.password.is_empty() { "<empty>" } else { "<set>" })
            .finish()
    }
}

/// Durable storage for a single station identity.
///
/// Implementations must tolerate interleaved calls from the config portal and
/// the reconnect supervisor. An empty store is a normal state, reported as
/// `Ok(None)` from [`CredentialStore::load`].
pub trait CredentialStore: Send + Sync {
    fn save(&self, identity: &NetworkIdentity) -> Result<(), CredentialError>;

    fn load(&self) -> Result<Option<NetworkIdentity>, CredentialError>;

    fn has(&self) -> bool {
        matches!(self.load(), Ok(Some(_)))
    }

    fn clear(&self) -> Result<(), CredentialError>;
}

/// Volatile store used on the host and as a fallback when NVS is unavailable.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<NetworkIdentity>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(identity: NetworkIdentity) -> Self {
        Self {
            slot: Mutex::new(Some(identity)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, identity: &NetworkIdentity) -> Result<(), CredentialError> {
        *lock(&self.slot) = Some(identity.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<NetworkIdentity>, CredentialError> {
        Ok(lock(&self.slot).clone())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        lock(&self.slot).take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_limits() {
        assert_eq!(NetworkIdentity::new("", "pw"), Err(CredentialError::EmptySsid));
        assert!(NetworkIdentity::new("a".repeat(32), "").is_ok());
        assert_eq!(
            NetworkIdentity::new("a".repeat(33), ""),
            Err(CredentialError::SsidTooLong(33))
        );
        assert!(NetworkIdentity::new("home", "p".repeat(63)).is_ok());
        assert_eq!(
            NetworkIdentity::new("home", "p".repeat(64)),
            Err(CredentialError::PasswordTooLong(64))
        );
    }

    #[test]
    fn test_debug_hides_password() {
        let identity = NetworkIdentity::new("home", "hunter22").unwrap();
        let printed = format!("{:?}", identity);
        assert!(printed.contains("home"));
        assert!(!printed.contains("hunter22"));
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryCredentialStore::new();
        assert!(!store.has());
        assert_eq!(store.load().unwrap(), None);

        let identity = NetworkIdentity::new("Caf\u{e9} Wi-Fi", "p\u{e4}ss w\u{f6}rd").unwrap();
        store.save(&identity).unwrap();
        assert!(store.has());
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.ssid().as_bytes(), identity.ssid().as_bytes());
        assert_eq!(loaded.password().as_bytes(), identity.password().as_bytes());

        store.clear().unwrap();
        assert!(!store.has());
    }
}
