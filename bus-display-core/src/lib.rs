//! Bus Display Core - hardware-independent connectivity and update logic
//!
//! This crate contains the state machines and background loops of the bus
//! display firmware. Everything that touches the radio, flash or HTTP stack
//! is reached through the traits in [`connectivity::Radio`] and
//! [`platform`], so the whole orchestration can be tested on the host.

pub mod config;
pub mod connectivity;
pub mod credentials;
pub mod platform;
pub mod status;
pub mod supervisor;
pub mod update;

mod sync;

#[cfg(test)]
mod tests;

pub use config::{AccessPointConfig, DeviceConfig, RetryPolicy, UpdateConfig, VersionPolicy};
pub use connectivity::{
    ConnectionState, ConnectivityError, ConnectivityManager, LinkEvent, LinkListener, LinkSignal,
    LinkStatus, Radio, RadioError,
};
pub use credentials::{CredentialError, CredentialStore, MemoryCredentialStore, NetworkIdentity};
pub use status::StatusSnapshot;
pub use supervisor::ReconnectSupervisor;
pub use update::{
    UpdateError, UpdateOrchestrator, UpdateOutcome, UpdatePlatform, UpdateScheduler, UpdateState,
    UpdateStatus, VersionDescriptor,
};
