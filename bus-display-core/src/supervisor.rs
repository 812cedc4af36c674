//! Background station reconnection.
//!
//! The supervisor wakes every poll interval. While the station is not
//! connected and credentials are stored, it starts one attempt at a time,
//! waits for the link to report success or failure, and backs off before the
//! next try. An attempt with no outcome by the connect timeout is abandoned so
//! the following one reaches the radio. It never gives up.

use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::connectivity::{ConnectionState, ConnectivityManager, LinkSignal};
use crate::credentials::CredentialStore;

const STACK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SupervisorEvent {
    Link(LinkSignal),
    Stop,
}

impl From<LinkSignal> for SupervisorEvent {
    fn from(signal: LinkSignal) -> Self {
        SupervisorEvent::Link(signal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    Connected,
    Failed,
    TimedOut,
    Stopped,
}

pub struct ReconnectSupervisor {
    control: Sender<SupervisorEvent>,
    handle: Option<JoinHandle<()>>,
}

impl ReconnectSupervisor {
    pub fn spawn(
        link: Arc<ConnectivityManager>,
        store: Arc<dyn CredentialStore>,
        policy: RetryPolicy,
    ) -> io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        link.add_listener(Box::new(tx.clone()));

        let handle = thread::Builder::new()
            .name("wifi_reconnect".to_string())
            .stack_size(STACK_SIZE)
            .spawn(move || {
                info!("WiFi reconnect task started");
                Worker {
                    link,
                    store,
                    policy,
                    events: rx,
                }
                .run();
                info!("WiFi reconnect task stopped");
            })?;

        Ok(Self {
            control: tx,
            handle: Some(handle),
        })
    }

    /// Ask the loop to exit and wait for it. Returns within one poll interval.
    pub fn stop(&mut self) {
        let _ = self.control.send(SupervisorEvent::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("WiFi reconnect task panicked");
            }
        }
    }
}

impl Drop for ReconnectSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    link: Arc<ConnectivityManager>,
    store: Arc<dyn CredentialStore>,
    policy: RetryPolicy,
    events: Receiver<SupervisorEvent>,
}

impl Worker {
    fn run(&self) {
        loop {
            if !self.idle(self.policy.poll_interval) {
                return;
            }
            if self.link.state() == ConnectionState::Connected {
                continue;
            }

            let identity = match self.store.load() {
                Ok(Some(identity)) => identity,
                Ok(None) => {
                    debug!("No stored WiFi credentials, waiting");
                    if !self.idle(self.policy.backoff_delay) {
                        return;
                    }
                    continue;
                }
                Err(e) => {
                    warn!("Could not read WiFi credentials: {}", e);
                    if !self.idle(self.policy.backoff_delay) {
                        return;
                    }
                    continue;
                }
            };

            // Signals from an earlier attempt must not decide this one.
            while let Ok(event) = self.events.try_recv() {
                if event == SupervisorEvent::Stop {
                    return;
                }
            }

            info!("Attempting to reconnect to {}", identity.ssid());
            let outcome = match self.link.begin_station_connect(&identity, false) {
                Ok(()) => self.await_outcome(self.policy.connect_timeout),
                Err(e) => {
                    warn!("Reconnect request failed: {}", e);
                    Attempt::Failed
                }
            };

            match outcome {
                Attempt::Connected => info!("Reconnected to {}", identity.ssid()),
                Attempt::Stopped => return,
                Attempt::Failed | Attempt::TimedOut => {
                    if outcome == Attempt::TimedOut {
                        if let Err(e) = self.link.abandon_station_connect() {
                            warn!("Could not abandon stalled attempt: {}", e);
                        }
                    }
                    warn!(
                        "Reconnect to {} {}, retrying in {:?}",
                        identity.ssid(),
                        if outcome == Attempt::Failed { "failed" } else { "timed out" },
                        self.policy.backoff_delay
                    );
                    if !self.idle(self.policy.backoff_delay) {
                        return;
                    }
                }
            }
        }
    }

    /// Sleep for `duration` unless a stop arrives. Returns false on stop.
    fn idle(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            match self.events.recv_timeout(remaining) {
                Ok(SupervisorEvent::Stop) | Err(RecvTimeoutError::Disconnected) => return false,
                Ok(SupervisorEvent::Link(_)) => {}
                Err(RecvTimeoutError::Timeout) => return true,
            }
        }
    }

    fn await_outcome(&self, timeout: Duration) -> Attempt {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.settle();
            }
            match self.events.recv_timeout(remaining) {
                Ok(SupervisorEvent::Link(LinkSignal::Connected)) => return Attempt::Connected,
                Ok(SupervisorEvent::Link(LinkSignal::Failed)) => return Attempt::Failed,
                Ok(SupervisorEvent::Stop) | Err(RecvTimeoutError::Disconnected) => {
                    return Attempt::Stopped
                }
                Err(RecvTimeoutError::Timeout) => return self.settle(),
            }
        }
    }

    fn settle(&self) -> Attempt {
        if self.link.is_connected() {
            Attempt::Connected
        } else {
            Attempt::TimedOut
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::LinkEvent;
    use crate::credentials::{MemoryCredentialStore, NetworkIdentity};
    use crate::tests::mocks::{manager, RadioCall};
    use std::net::Ipv4Addr;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            connect_timeout: Duration::from_millis(200),
            backoff_delay: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_no_credentials_never_connects() {
        let (link, radio, store) = manager();
        let mut supervisor =
            ReconnectSupervisor::spawn(link.clone(), store.clone(), fast_policy()).unwrap();
        thread::sleep(Duration::from_millis(150));
        supervisor.stop();

        assert!(!store.has());
        assert_eq!(radio.count(|c| matches!(c, RadioCall::Connect)), 0);
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_reconnects_with_stored_identity() {
        let (link, radio, store) = manager();
        store
            .save(&NetworkIdentity::new("home", "secret-pass").unwrap())
            .unwrap();
        let _supervisor =
            ReconnectSupervisor::spawn(link.clone(), store.clone(), fast_policy()).unwrap();

        assert!(wait_for(|| radio.count(|c| matches!(c, RadioCall::Connect)) == 1));
        assert!(radio.calls().contains(&RadioCall::Station("home".into())));
        link.on_link_event(LinkEvent::GotAddress(Ipv4Addr::new(192, 168, 4, 20)));
        assert!(link.is_connected());

        thread::sleep(Duration::from_millis(100));
        assert_eq!(radio.count(|c| matches!(c, RadioCall::Connect)), 1);
    }

    #[test]
    fn test_failed_attempt_is_retried() {
        let (link, radio, store) = manager();
        store
            .save(&NetworkIdentity::new("home", "secret-pass").unwrap())
            .unwrap();
        let _supervisor =
            ReconnectSupervisor::spawn(link.clone(), store.clone(), fast_policy()).unwrap();

        assert!(wait_for(|| link.state() == ConnectionState::Connecting));
        link.on_link_event(LinkEvent::StationDown { reason: 201 });
        assert_eq!(link.state(), ConnectionState::Disconnected);

        assert!(wait_for(|| radio.count(|c| matches!(c, RadioCall::Connect)) >= 2));
    }

    #[test]
    fn test_timed_out_attempt_is_retried() {
        let (link, radio, store) = manager();
        store
            .save(&NetworkIdentity::new("home", "secret-pass").unwrap())
            .unwrap();
        let _supervisor =
            ReconnectSupervisor::spawn(link.clone(), store.clone(), fast_policy()).unwrap();

        // The driver never answers the first attempt.
        assert!(wait_for(|| radio.count(|c| matches!(c, RadioCall::Connect)) == 1));
        let policy = fast_policy();
        thread::sleep(policy.connect_timeout / 2);
        assert_eq!(radio.count(|c| matches!(c, RadioCall::Connect)), 1);

        assert!(wait_for(|| radio.count(|c| matches!(c, RadioCall::Connect)) >= 2));
        assert!(radio.count(|c| matches!(c, RadioCall::Disconnect)) >= 1);
        assert!(link.get_status().failed_attempts >= 1);
    }

    #[test]
    fn test_stop_is_prompt() {
        let (link, _, _) = manager();
        let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
        let policy = RetryPolicy {
            connect_timeout: Duration::from_secs(15),
            backoff_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(1),
        };
        let mut supervisor = ReconnectSupervisor::spawn(link, store, policy).unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        supervisor.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
