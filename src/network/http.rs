use std::time::Duration;

use bus_display_core::platform::{FirmwareTransport, HttpResponse, ImageStream};
use bus_display_core::update::TransportError;
use embedded_svc::http::Method;
use esp_idf_svc::http::client::{Configuration as HttpConfig, EspHttpConnection};
use esp_idf_svc::io::{Read, Write};

const BUFFER_SIZE: usize = 4096;
const MAX_MANIFEST_SIZE: usize = 4096;

/// HTTPS client for the update server. One connection per request.
pub struct EspHttpTransport {
    user_agent: String,
}

impl EspHttpTransport {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
        }
    }

    fn connect(&self, timeout: Duration) -> Result<EspHttpConnection, TransportError> {
        let config = HttpConfig {
            buffer_size: Some(BUFFER_SIZE),
            buffer_size_tx: Some(1024),
            timeout: Some(timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        EspHttpConnection::new(&config).map_err(|e| TransportError::Connect(e.to_string()))
    }
}

fn io_error(e: impl std::fmt::Display) -> TransportError {
    TransportError::Io(e.to_string())
}

impl FirmwareTransport for EspHttpTransport {
    fn post_json(
        &self,
        url: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let mut conn = self.connect(timeout)?;
        let content_length = body.len().to_string();
        let headers = [
            ("Content-Type", "application/json"),
            ("Content-Length", content_length.as_str()),
            ("User-Agent", self.user_agent.as_str()),
        ];

        conn.initiate_request(Method::Post, url, &headers)
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        conn.write_all(body.as_bytes()).map_err(io_error)?;
        conn.initiate_response().map_err(io_error)?;

        let status = conn.status();
        let response = HttpResponse::collect(status, MAX_MANIFEST_SIZE, |buf| {
            conn.read(buf).map_err(io_error)
        })?;

        log::debug!(
            "POST {} -> HTTP {} ({} bytes)",
            url,
            status,
            response.body.len()
        );
        Ok(response)
    }

    fn open_image(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Box<dyn ImageStream + '_>, TransportError> {
        let mut conn = self.connect(timeout)?;
        let headers = [("User-Agent", self.user_agent.as_str())];
        conn.initiate_request(Method::Get, url, &headers)
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        conn.initiate_response().map_err(io_error)?;

        let status = conn.status();
        let content_length = conn
            .header("Content-Length")
            .and_then(|len| len.parse::<usize>().ok());
        Ok(Box::new(EspImageStream {
            conn,
            status,
            content_length,
        }))
    }
}

struct EspImageStream {
    conn: EspHttpConnection,
    status: u16,
    content_length: Option<usize>,
}

impl ImageStream for EspImageStream {
    fn status(&self) -> u16 {
        self.status
    }

    fn content_length(&self) -> Option<usize> {
        self.content_length
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.conn.read(buf).map_err(io_error)
    }
}
