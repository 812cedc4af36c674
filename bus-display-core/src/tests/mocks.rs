//! Test doubles for the radio, HTTP, flash, LED and reset seams.

use std::net::Ipv4Addr;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{AccessPointConfig, UpdateConfig};
use crate::connectivity::{
    ConnectionState, ConnectivityManager, LinkEvent, LinkListener, LinkSignal, Radio, RadioError,
};
use crate::credentials::{CredentialStore, MemoryCredentialStore, NetworkIdentity};
use crate::platform::{
    FirmwareFlasher, FirmwareTransport, FirmwareWriter, HttpResponse, ImageStream,
    StatusIndicator, SystemControl,
};
use crate::sync::lock;
use crate::update::{FlashError, TransportError, UpdateOrchestrator, UpdatePlatform};

pub const MANIFEST_URL: &str = "https://updates.test/api/update/versions";

/// Reports on the sender when reached, then waits on the receiver.
pub type Gate = (Sender<()>, Receiver<()>);

fn pass(gate: Option<Gate>) {
    if let Some((entered, release)) = gate {
        let _ = entered.send(());
        let _ = release.recv();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioCall {
    Start,
    AccessPoint(String),
    Station(String),
    Connect,
    Disconnect,
}

#[derive(Default)]
struct RadioState {
    calls: Vec<RadioCall>,
    fail_start: bool,
    fail_connect: bool,
}

#[derive(Clone, Default)]
pub struct MockRadio {
    state: Arc<Mutex<RadioState>>,
}

impl MockRadio {
    pub fn fail_start(&self, fail: bool) {
        lock(&self.state).fail_start = fail;
    }

    pub fn fail_connect(&self, fail: bool) {
        lock(&self.state).fail_connect = fail;
    }

    pub fn calls(&self) -> Vec<RadioCall> {
        lock(&self.state).calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&RadioCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|c| predicate(c)).count()
    }
}

impl Radio for MockRadio {
    fn start(&mut self) -> Result<(), RadioError> {
        let mut state = lock(&self.state);
        if state.fail_start {
            return Err(RadioError::new("esp_wifi_start", "ESP_ERR_NO_MEM"));
        }
        state.calls.push(RadioCall::Start);
        Ok(())
    }

    fn configure_access_point(&mut self, config: &AccessPointConfig) -> Result<(), RadioError> {
        lock(&self.state)
            .calls
            .push(RadioCall::AccessPoint(config.ssid.clone()));
        Ok(())
    }

    fn configure_station(&mut self, identity: &NetworkIdentity) -> Result<(), RadioError> {
        lock(&self.state)
            .calls
            .push(RadioCall::Station(identity.ssid().to_string()));
        Ok(())
    }

    fn connect(&mut self) -> Result<(), RadioError> {
        let mut state = lock(&self.state);
        if state.fail_connect {
            return Err(RadioError::new("esp_wifi_connect", "ESP_ERR_WIFI_CONN"));
        }
        state.calls.push(RadioCall::Connect);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), RadioError> {
        lock(&self.state).calls.push(RadioCall::Disconnect);
        Ok(())
    }

    fn mac_address(&self) -> Result<[u8; 6], RadioError> {
        Ok([0x24, 0x0a, 0xc4, 0x12, 0xab, 0xcd])
    }
}

#[derive(Default)]
struct Recorded {
    signals: Vec<LinkSignal>,
    transitions: Vec<(ConnectionState, ConnectionState)>,
}

#[derive(Clone, Default)]
pub struct RecordingListener {
    recorded: Arc<Mutex<Recorded>>,
}

impl RecordingListener {
    pub fn signals(&self) -> Vec<LinkSignal> {
        lock(&self.recorded).signals.clone()
    }

    pub fn transitions(&self) -> Vec<(ConnectionState, ConnectionState)> {
        lock(&self.recorded).transitions.clone()
    }
}

impl LinkListener for RecordingListener {
    fn on_signal(&self, signal: LinkSignal) -> bool {
        lock(&self.recorded).signals.push(signal);
        true
    }

    fn on_transition(&self, from: ConnectionState, to: ConnectionState) {
        lock(&self.recorded).transitions.push((from, to));
    }
}

/// Initialized manager with nothing stored and no station attempt.
pub fn manager() -> (Arc<ConnectivityManager>, MockRadio, Arc<MemoryCredentialStore>) {
    let radio = MockRadio::default();
    let store = Arc::new(MemoryCredentialStore::new());
    let link = Arc::new(ConnectivityManager::new(
        Box::new(radio.clone()),
        store.clone(),
        AccessPointConfig::default(),
    ));
    link.initialize().unwrap();
    (link, radio, store)
}

/// Manager joined to "home" with the credentials stored.
pub fn connected_manager() -> (Arc<ConnectivityManager>, MockRadio, Arc<MemoryCredentialStore>) {
    let (link, radio, store) = manager();
    let home = NetworkIdentity::new("home", "secret-pass").unwrap();
    link.begin_station_connect(&home, true).unwrap();
    link.on_link_event(LinkEvent::StationUp);
    link.on_link_event(LinkEvent::GotAddress(Ipv4Addr::new(192, 168, 1, 50)));
    assert!(link.is_connected());
    (link, radio, store)
}

enum PostScript {
    Respond(HttpResponse),
    Fail(TransportError),
}

struct ImageScript {
    status: u16,
    data: Vec<u8>,
    content_length: Option<usize>,
}

#[derive(Default)]
struct TransportState {
    posts: Vec<(String, String)>,
    post: Option<PostScript>,
    image: Option<ImageScript>,
    gate: Option<Gate>,
}

/// Scripted HTTP transport. Every POST gets the same answer.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<TransportState>>,
}

impl MockTransport {
    pub fn respond(&self, status: u16, body: &str) {
        lock(&self.state).post = Some(PostScript::Respond(HttpResponse {
            status,
            body: body.as_bytes().to_vec(),
        }));
    }

    pub fn fail_post(&self, error: TransportError) {
        lock(&self.state).post = Some(PostScript::Fail(error));
    }

    pub fn serve_image(&self, status: u16, data: Vec<u8>, with_length: bool) {
        let content_length = with_length.then_some(data.len());
        lock(&self.state).image = Some(ImageScript {
            status,
            data,
            content_length,
        });
    }

    /// Serve fewer bytes than the advertised Content-Length.
    pub fn serve_truncated_image(&self, data: Vec<u8>, content_length: usize) {
        lock(&self.state).image = Some(ImageScript {
            status: 200,
            data,
            content_length: Some(content_length),
        });
    }

    /// Make the next POST report on `entered` and wait for `release`.
    pub fn block_posts(&self, entered: Sender<()>, release: Receiver<()>) {
        lock(&self.state).gate = Some((entered, release));
    }

    pub fn posts(&self) -> Vec<(String, String)> {
        lock(&self.state).posts.clone()
    }
}

impl FirmwareTransport for MockTransport {
    fn post_json(
        &self,
        url: &str,
        body: &str,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let gate = {
            let mut state = lock(&self.state);
            state.posts.push((url.to_string(), body.to_string()));
            state.gate.take()
        };
        pass(gate);

        match &lock(&self.state).post {
            Some(PostScript::Respond(response)) => Ok(response.clone()),
            Some(PostScript::Fail(error)) => Err(error.clone()),
            None => Err(TransportError::Connect("no route to host".to_string())),
        }
    }

    fn open_image(
        &self,
        _url: &str,
        _timeout: Duration,
    ) -> Result<Box<dyn ImageStream + '_>, TransportError> {
        let state = lock(&self.state);
        let image = state
            .image
            .as_ref()
            .ok_or_else(|| TransportError::Connect("no image scripted".to_string()))?;
        Ok(Box::new(MockStream {
            status: image.status,
            content_length: image.content_length,
            data: image.data.clone(),
            offset: 0,
        }))
    }
}

struct MockStream {
    status: u16,
    content_length: Option<usize>,
    data: Vec<u8>,
    offset: usize,
}

impl ImageStream for MockStream {
    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let remaining = &self.data[self.offset..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.offset += n;
        Ok(n)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashCall {
    Begin(Option<usize>),
    Complete,
    Abort,
}

#[derive(Default)]
struct FlashState {
    calls: Vec<FlashCall>,
    written: Vec<u8>,
    fail_write_at: Option<usize>,
    fail_complete: bool,
    writes: usize,
    write_gate: Option<Gate>,
    complete_gate: Option<Gate>,
}

#[derive(Clone, Default)]
pub struct MockFlasher {
    state: Arc<Mutex<FlashState>>,
}

impl MockFlasher {
    /// Fail the write with this zero-based index.
    pub fn fail_write_at(&self, index: usize) {
        lock(&self.state).fail_write_at = Some(index);
    }

    pub fn fail_complete(&self) {
        lock(&self.state).fail_complete = true;
    }

    /// Hold the next chunk write until released.
    pub fn block_writes(&self, entered: Sender<()>, release: Receiver<()>) {
        lock(&self.state).write_gate = Some((entered, release));
    }

    /// Hold the final verify-and-switch step until released.
    pub fn block_complete(&self, entered: Sender<()>, release: Receiver<()>) {
        lock(&self.state).complete_gate = Some((entered, release));
    }

    pub fn calls(&self) -> Vec<FlashCall> {
        lock(&self.state).calls.clone()
    }

    pub fn written(&self) -> Vec<u8> {
        lock(&self.state).written.clone()
    }
}

impl FirmwareFlasher for MockFlasher {
    fn begin(
        &mut self,
        size_hint: Option<usize>,
    ) -> Result<Box<dyn FirmwareWriter + '_>, FlashError> {
        let mut state = lock(&self.state);
        state.calls.push(FlashCall::Begin(size_hint));
        state.written.clear();
        state.writes = 0;
        Ok(Box::new(MockWriter {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MockWriter {
    state: Arc<Mutex<FlashState>>,
}

impl FirmwareWriter for MockWriter {
    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
        let gate = lock(&self.state).write_gate.take();
        pass(gate);

        let mut state = lock(&self.state);
        if state.fail_write_at == Some(state.writes) {
            return Err(FlashError::Write("ESP_ERR_FLASH_OP_FAIL".to_string()));
        }
        state.writes += 1;
        state.written.extend_from_slice(chunk);
        Ok(())
    }

    fn complete(self: Box<Self>) -> Result<(), FlashError> {
        let gate = lock(&self.state).complete_gate.take();
        pass(gate);

        let mut state = lock(&self.state);
        if state.fail_complete {
            state.calls.push(FlashCall::Abort);
            return Err(FlashError::Verify("ESP_ERR_OTA_VALIDATE_FAILED".to_string()));
        }
        state.calls.push(FlashCall::Complete);
        Ok(())
    }

    fn abort(self: Box<Self>) {
        lock(&self.state).calls.push(FlashCall::Abort);
    }
}

#[derive(Clone, Default)]
pub struct MockIndicator {
    patterns: Arc<Mutex<Vec<&'static str>>>,
    error_gate: Arc<Mutex<Option<Gate>>>,
}

impl MockIndicator {
    pub fn patterns(&self) -> Vec<&'static str> {
        lock(&self.patterns).clone()
    }

    /// Hold the next error display until released.
    pub fn block_errors(&self, entered: Sender<()>, release: Receiver<()>) {
        *lock(&self.error_gate) = Some((entered, release));
    }
}

impl StatusIndicator for MockIndicator {
    fn show_error(&self) {
        lock(&self.patterns).push("error");
        let gate = lock(&self.error_gate).take();
        pass(gate);
    }

    fn clear(&self) {
        lock(&self.patterns).push("clear");
    }
}

#[derive(Clone, Default)]
pub struct MockSystem {
    restarts: Arc<Mutex<usize>>,
}

impl MockSystem {
    pub fn restarts(&self) -> usize {
        *lock(&self.restarts)
    }
}

impl SystemControl for MockSystem {
    fn restart(&self) {
        *lock(&self.restarts) += 1;
    }
}

/// Handles onto the doubles given to an orchestrator.
#[derive(Clone, Default)]
pub struct MockPlatform {
    pub transport: MockTransport,
    pub flasher: MockFlasher,
    pub indicator: MockIndicator,
    pub system: MockSystem,
}

impl MockPlatform {
    pub fn build(&self) -> UpdatePlatform {
        UpdatePlatform {
            transport: Box::new(self.transport.clone()),
            flasher: Box::new(self.flasher.clone()),
            indicator: Arc::new(self.indicator.clone()),
            system: Arc::new(self.system.clone()),
        }
    }
}

pub fn test_update_config() -> UpdateConfig {
    UpdateConfig {
        manifest_url: MANIFEST_URL.to_string(),
        restart_grace: Duration::ZERO,
        error_display: Duration::ZERO,
        ..UpdateConfig::default()
    }
}

pub fn orchestrator(
    link: Arc<ConnectivityManager>,
    platform: &MockPlatform,
    version: &str,
) -> UpdateOrchestrator {
    UpdateOrchestrator::new(test_update_config(), version, link, platform.build())
}

#[test]
fn test_memory_store_via_trait_object() {
    let store: Arc<dyn CredentialStore> = Arc::new(MemoryCredentialStore::new());
    assert!(!store.has());
    store
        .save(&NetworkIdentity::new("depot", "").unwrap())
        .unwrap();
    assert_eq!(store.load().unwrap().unwrap().ssid(), "depot");
}
