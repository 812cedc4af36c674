// Update orchestrator - check, download, flash and restart
//
// OTA flow:
// 1. Claim the in-progress flag and require a connected station
// 2. POST hardware tag + MAC to the manifest endpoint
// 3. Compare the published version with the running one
// 4. Stream the image into the inactive partition
// 5. Verify, switch boot partition, restart after a grace period

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::error::{FlashError, NetworkError, StateError, TransportError, UpdateError};
use super::manifest::{is_newer, ManifestRequest, VersionDescriptor};
use super::TASK_STACK_SIZE;
use crate::config::UpdateConfig;
use crate::connectivity::ConnectivityManager;
use crate::platform::{FirmwareFlasher, FirmwareTransport, StatusIndicator, SystemControl};
use crate::sync::lock;

const CHUNK_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateState {
    Idle,
    Checking,
    Downloading,
    Applying,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    UpToDate { version: String },
    /// Image written and selected for boot; the restart has been issued.
    Installed { version: String, bytes: usize },
}

/// Copy of the update half of the device status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateStatus {
    pub state: UpdateState,
    pub current_version: String,
    pub last_message: String,
    /// Terminal state of the most recent install attempt.
    pub last_outcome: Option<UpdateState>,
    pub target_version: Option<String>,
    pub bytes_written: usize,
    pub progress: Option<u8>,
    pub in_progress: bool,
}

/// Platform capabilities the pipeline drives.
pub struct UpdatePlatform {
    pub transport: Box<dyn FirmwareTransport>,
    pub flasher: Box<dyn FirmwareFlasher>,
    pub indicator: Arc<dyn StatusIndicator>,
    pub system: Arc<dyn SystemControl>,
}

#[derive(Debug)]
struct Progress {
    state: UpdateState,
    last_message: String,
    last_outcome: Option<UpdateState>,
    target_version: Option<String>,
    bytes_written: usize,
    progress: Option<u8>,
}

/// Holder of the system-wide in-progress flag. Released on drop.
pub(crate) struct JobGuard {
    flag: Arc<AtomicBool>,
}

impl JobGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: Arc::clone(flag) })
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub struct UpdateOrchestrator {
    config: UpdateConfig,
    current_version: String,
    link: Arc<ConnectivityManager>,
    transport: Box<dyn FirmwareTransport>,
    flasher: Mutex<Box<dyn FirmwareFlasher>>,
    indicator: Arc<dyn StatusIndicator>,
    system: Arc<dyn SystemControl>,
    in_progress: Arc<AtomicBool>,
    progress: Mutex<Progress>,
}

impl UpdateOrchestrator {
    pub fn new(
        config: UpdateConfig,
        current_version: impl Into<String>,
        link: Arc<ConnectivityManager>,
        platform: UpdatePlatform,
    ) -> Self {
        let current_version = current_version.into();
        info!("Current firmware version: {}", current_version);
        Self {
            config,
            current_version,
            link,
            transport: platform.transport,
            flasher: Mutex::new(platform.flasher),
            indicator: platform.indicator,
            system: platform.system,
            in_progress: Arc::new(AtomicBool::new(false)),
            progress: Mutex::new(Progress {
                state: UpdateState::Idle,
                last_message: "Never checked".to_string(),
                last_outcome: None,
                target_version: None,
                bytes_written: 0,
                progress: None,
            }),
        }
    }

    /// Run the whole pipeline on the calling thread.
    ///
    /// This can block for tens of seconds during download and flash writes.
    /// A second caller while a job runs gets `StateError::Busy` immediately.
    pub fn check_for_update(&self) -> Result<UpdateOutcome, UpdateError> {
        let job = self.claim()?;
        self.run(job)
    }

    /// Start an on-demand check on its own short-lived thread.
    ///
    /// Busy and no-connectivity rejections are returned before the thread is
    /// spawned, so callers can report them synchronously.
    pub fn spawn_check(self: &Arc<Self>) -> Result<JoinHandle<()>, UpdateError> {
        let job = self.claim()?;
        let this = Arc::clone(self);
        thread::Builder::new()
            .name("manual_ota_check".to_string())
            .stack_size(TASK_STACK_SIZE)
            .spawn(move || {
                if let Err(e) = this.run(job) {
                    debug!("Manual update check ended with: {}", e);
                }
            })
            .map_err(|e| UpdateError::Spawn(e.to_string()))
    }

    pub fn status(&self) -> UpdateStatus {
        let progress = lock(&self.progress);
        UpdateStatus {
            state: progress.state,
            current_version: self.current_version.clone(),
            last_message: progress.last_message.clone(),
            last_outcome: progress.last_outcome,
            target_version: progress.target_version.clone(),
            bytes_written: progress.bytes_written,
            progress: progress.progress,
            in_progress: self.in_progress.load(Ordering::Acquire),
        }
    }

    pub fn state(&self) -> UpdateState {
        lock(&self.progress).state
    }

    pub fn is_update_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn current_version(&self) -> &str {
        &self.current_version
    }

    pub fn last_check_message(&self) -> String {
        lock(&self.progress).last_message.clone()
    }

    fn claim(&self) -> Result<JobGuard, UpdateError> {
        let job = JobGuard::acquire(&self.in_progress).ok_or_else(|| {
            warn!("Update already in progress");
            UpdateError::from(StateError::Busy)
        })?;

        if !self.link.is_connected() {
            warn!("Cannot check for updates - no internet connection");
            lock(&self.progress).last_message = "No internet connection".to_string();
            return Err(NetworkError::NotConnected.into());
        }

        Ok(job)
    }

    fn run(&self, _job: JobGuard) -> Result<UpdateOutcome, UpdateError> {
        let result = self.pipeline();
        // Back to Idle before the guard releases the flag.
        let mut progress = lock(&self.progress);
        progress.state = UpdateState::Idle;
        progress.progress = None;
        result
    }

    fn pipeline(&self) -> Result<UpdateOutcome, UpdateError> {
        {
            let mut progress = lock(&self.progress);
            progress.state = UpdateState::Checking;
            progress.last_message = "Checking for updates...".to_string();
            progress.target_version = None;
            progress.bytes_written = 0;
            progress.progress = None;
        }
        info!("Checking for firmware updates...");

        let descriptor = self.fetch_manifest().map_err(|e| {
            error!("Update check failed: {}", e);
            lock(&self.progress).last_message = e.check_message();
            e
        })?;

        info!(
            "Server version: {}, Current version: {}",
            descriptor.version, self.current_version
        );

        if !is_newer(
            self.config.version_policy,
            &descriptor.version,
            &self.current_version,
        ) {
            info!("Firmware is up to date");
            lock(&self.progress).last_message =
                format!("Firmware up to date (v{})", self.current_version);
            return Ok(UpdateOutcome::UpToDate {
                version: self.current_version.clone(),
            });
        }

        info!("New firmware available: {}", descriptor.version);
        {
            let mut progress = lock(&self.progress);
            progress.state = UpdateState::Downloading;
            progress.target_version = Some(descriptor.version.clone());
            progress.last_message = format!("Updating to v{}", descriptor.version);
        }

        match self.install(&descriptor) {
            Ok(bytes) => {
                info!(
                    "OTA update completed successfully ({} bytes), restarting...",
                    bytes
                );
                {
                    let mut progress = lock(&self.progress);
                    progress.state = UpdateState::Succeeded;
                    progress.last_outcome = Some(UpdateState::Succeeded);
                    progress.last_message = "Update successful - restarting...".to_string();
                }
                self.indicator.clear();
                thread::sleep(self.config.restart_grace);
                self.system.restart();
                Ok(UpdateOutcome::Installed {
                    version: descriptor.version,
                    bytes,
                })
            }
            Err(e) => {
                error!("OTA update failed: {}", e);
                {
                    let mut progress = lock(&self.progress);
                    progress.state = UpdateState::Failed;
                    progress.last_outcome = Some(UpdateState::Failed);
                    progress.last_message = format!("Update failed: {}", e);
                }
                self.indicator.show_error();
                thread::sleep(self.config.error_display);
                self.indicator.clear();
                Err(e)
            }
        }
    }

    fn fetch_manifest(&self) -> Result<VersionDescriptor, UpdateError> {
        let mac = self.link.mac_address();
        let body = serde_json::to_string(&ManifestRequest {
            hardware: &self.config.hardware,
            mac: &mac,
        })
        .map_err(|e| UpdateError::Parse(e.to_string()))?;

        info!("Preparing OTA request - MAC: {}, Hardware: {}", mac, self.config.hardware);
        let response = self.transport.post_json(
            &self.config.manifest_url,
            &body,
            self.config.manifest_timeout,
        )?;

        if response.status != 200 {
            return Err(UpdateError::Server {
                status: response.status,
            });
        }
        VersionDescriptor::parse(&response.body)
    }

    /// Stream the image into the inactive partition and select it for boot.
    fn install(&self, descriptor: &VersionDescriptor) -> Result<usize, UpdateError> {
        info!("Starting OTA update from: {}", descriptor.download_url);
        let mut stream = self
            .transport
            .open_image(&descriptor.download_url, self.config.download_timeout)?;
        if stream.status() != 200 {
            return Err(UpdateError::Server {
                status: stream.status(),
            });
        }

        let expected_len = stream.content_length().filter(|len| *len > 0);
        let mut flasher = lock(&self.flasher);
        let mut writer = flasher.begin(expected_len)?;

        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut written = 0usize;
        let mut logged_decile = 0u8;

        loop {
            let read = match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) => {
                    writer.abort();
                    return Err(e.into());
                }
            };
            if let Err(e) = writer.write(&buf[..read]) {
                writer.abort();
                return Err(e.into());
            }
            hasher.update(&buf[..read]);
            written += read;

            let percent = expected_len.map(|len| ((written.min(len) * 100) / len) as u8);
            {
                let mut progress = lock(&self.progress);
                progress.bytes_written = written;
                progress.progress = percent;
                if let Some(percent) = percent {
                    progress.last_message =
                        format!("Downloading v{}: {}%", descriptor.version, percent);
                }
            }
            if let (Some(percent), Some(len)) = (percent, expected_len) {
                if percent / 10 > logged_decile {
                    logged_decile = percent / 10;
                    info!("OTA progress: {}% ({}/{})", percent, written, len);
                }
            }
        }

        if written == 0 {
            writer.abort();
            return Err(FlashError::EmptyImage.into());
        }
        if let Some(len) = expected_len {
            if written != len {
                writer.abort();
                return Err(TransportError::Io(format!(
                    "image truncated at {} of {} bytes",
                    written, len
                ))
                .into());
            }
        }
        if let Some(expected) = descriptor.sha256.as_deref() {
            let actual = to_hex(&hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                writer.abort();
                return Err(FlashError::ChecksumMismatch {
                    expected: expected.to_string(),
                    actual,
                }
                .into());
            }
        }

        {
            let mut progress = lock(&self.progress);
            progress.state = UpdateState::Applying;
            progress.last_message = format!("Applying v{}", descriptor.version);
        }
        writer.complete()?;
        Ok(written)
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
