use std::sync::Arc;

use anyhow::Result;
use bus_display_core::update::{NetworkError, StateError};
use bus_display_core::{
    ConnectivityManager, NetworkIdentity, StatusSnapshot, UpdateError, UpdateOrchestrator,
};
use esp_idf_svc::http::server::{Configuration, EspHttpConnection, EspHttpServer, Method, Request};
use esp_idf_svc::io::{Read, Write};
use serde::Deserialize;

const MAX_BODY_SIZE: usize = 256;

type HandlerResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Deserialize)]
struct WifiRequest {
    ssid: String,
    #[serde(default)]
    password: String,
}

fn send_json(
    req: Request<&mut EspHttpConnection<'_>>,
    status: u16,
    value: &serde_json::Value,
) -> HandlerResult {
    let json = serde_json::to_string(value)?;
    let mut response = req.into_response(status, None, &[("Content-Type", "application/json")])?;
    response.write_all(json.as_bytes())?;
    Ok(())
}

fn read_body(req: &mut Request<&mut EspHttpConnection<'_>>) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let mut body = Vec::new();
    let mut buf = [0u8; 64];
    loop {
        let bytes_read = req.read(&mut buf)?;
        if bytes_read == 0 {
            break;
        }
        if body.len() + bytes_read > MAX_BODY_SIZE {
            return Err("request body too large".into());
        }
        body.extend_from_slice(&buf[..bytes_read]);
    }
    Ok(body)
}

/// Start the JSON status API on port 80 and register its routes.
pub fn start_api_server(
    link: Arc<ConnectivityManager>,
    updater: Arc<UpdateOrchestrator>,
) -> Result<EspHttpServer<'static>> {
    let config = Configuration {
        stack_size: 8192,
        max_uri_handlers: 8,
        ..Default::default()
    };
    let mut server = EspHttpServer::new(&config)?;

    // GET /api/status
    let status_link = link.clone();
    let status_updater = updater.clone();
    server.fn_handler("/api/status", Method::Get, move |req| {
        let snapshot = StatusSnapshot::capture(&status_link, &status_updater);
        send_json(req, 200, &serde_json::to_value(&snapshot)?)
    })?;

    // POST /api/update/check
    server.fn_handler("/api/update/check", Method::Post, move |req| {
        match updater.spawn_check() {
            Ok(_) => send_json(req, 202, &serde_json::json!({ "started": true })),
            Err(e) => {
                let status = match e {
                    UpdateError::State(StateError::Busy) => 409,
                    UpdateError::Network(NetworkError::NotConnected) => 503,
                    _ => 500,
                };
                send_json(
                    req,
                    status,
                    &serde_json::json!({ "started": false, "error": e.check_message() }),
                )
            }
        }
    })?;

    // POST /api/wifi {"ssid": "...", "password": "..."}
    let wifi_link = link.clone();
    server.fn_handler("/api/wifi", Method::Post, move |mut req| {
        let body = read_body(&mut req)?;
        let request: WifiRequest = match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(e) => {
                return send_json(req, 400, &serde_json::json!({ "error": e.to_string() }));
            }
        };
        let identity = match NetworkIdentity::new(request.ssid, request.password) {
            Ok(identity) => identity,
            Err(e) => {
                return send_json(req, 400, &serde_json::json!({ "error": e.to_string() }));
            }
        };

        log::info!("WiFi credentials received for {}", identity.ssid());
        match wifi_link.begin_station_connect(&identity, true) {
            Ok(()) => send_json(
                req,
                202,
                &serde_json::json!({ "connecting": identity.ssid() }),
            ),
            Err(e) => send_json(req, 500, &serde_json::json!({ "error": e.to_string() })),
        }
    })?;

    // DELETE /api/wifi
    server.fn_handler("/api/wifi", Method::Delete, move |req| {
        match link.forget_station() {
            Ok(()) => send_json(req, 200, &serde_json::json!({ "forgotten": true })),
            Err(e) => send_json(req, 500, &serde_json::json!({ "error": e.to_string() })),
        }
    })?;

    log::info!("Status API listening on port 80");
    Ok(server)
}
