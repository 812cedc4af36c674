use std::io;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, info, warn};

use super::error::{NetworkError, StateError, UpdateError};
use super::orchestrator::{UpdateOrchestrator, UpdateOutcome};
use super::TASK_STACK_SIZE;

/// Background thread that runs an update check on a fixed interval.
///
/// The first check happens one interval after start. Dropping the scheduler
/// stops the thread and waits for it.
pub struct UpdateScheduler {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl UpdateScheduler {
    pub fn spawn(updater: Arc<UpdateOrchestrator>, interval: Duration) -> io::Result<Self> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("ota_check".to_string())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || {
                info!("OTA check task started (interval {:?})", interval);
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    match updater.check_for_update() {
                        Ok(UpdateOutcome::UpToDate { .. }) => {}
                        Ok(UpdateOutcome::Installed { version, .. }) => {
                            info!("Installed firmware {}", version);
                        }
                        Err(UpdateError::State(StateError::Busy)) => {
                            debug!("Skipping scheduled check, update already running");
                        }
                        Err(UpdateError::Network(NetworkError::NotConnected)) => {
                            debug!("Skipping scheduled check, no WiFi connection");
                        }
                        Err(e) => warn!("Scheduled update check failed: {}", e),
                    }
                }
                info!("OTA check task stopped");
            })?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("OTA check task panicked");
            }
        }
    }
}

impl Drop for UpdateScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
