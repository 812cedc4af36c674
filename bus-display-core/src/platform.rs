//! Seams to the platform layer used by the update pipeline.
//!
//! The ESP-IDF firmware implements these with the HTTP client, the OTA
//! partition API, the LED shift register and the system reset call.

use std::time::Duration;

use crate::update::error::{FlashError, TransportError};

/// Complete response to a small request such as the version manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Drain a response body with `read` until it returns `Ok(0)`.
    ///
    /// Only a 200 body is read, up to `limit` bytes. Any other status is
    /// returned with an empty body so error pages of any size surface as
    /// the status code.
    pub fn collect(
        status: u16,
        limit: usize,
        mut read: impl FnMut(&mut [u8]) -> Result<usize, TransportError>,
    ) -> Result<Self, TransportError> {
        let mut body = Vec::new();
        if status != 200 {
            return Ok(Self { status, body });
        }

        let mut buf = [0u8; 512];
        loop {
            let bytes_read = read(&mut buf)?;
            if bytes_read == 0 {
                break;
            }
            if body.len() + bytes_read > limit {
                return Err(TransportError::Io(format!(
                    "response larger than {} bytes",
                    limit
                )));
            }
            body.extend_from_slice(&buf[..bytes_read]);
        }
        Ok(Self { status, body })
    }
}

/// Body of a firmware download, read in chunks.
pub trait ImageStream {
    fn status(&self) -> u16;

    fn content_length(&self) -> Option<usize>;

    /// Read the next chunk. `Ok(0)` marks the end of the image.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

pub trait FirmwareTransport: Send + Sync {
    fn post_json(
        &self,
        url: &str,
        body: &str,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;

    /// Single-pass GET of a firmware image. There is no resume support.
    fn open_image(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Box<dyn ImageStream + '_>, TransportError>;
}

/// Writer for the inactive firmware partition.
pub trait FirmwareFlasher: Send {
    /// Open the next update partition for writing.
    fn begin(
        &mut self,
        size_hint: Option<usize>,
    ) -> Result<Box<dyn FirmwareWriter + '_>, FlashError>;
}

pub trait FirmwareWriter {
    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError>;

    /// Verify the written image and mark it as the next boot partition.
    fn complete(self: Box<Self>) -> Result<(), FlashError>;

    /// Discard the partial image. The running firmware stays the boot target.
    fn abort(self: Box<Self>);
}

/// The LED display as seen by the update pipeline.
pub trait StatusIndicator: Send + Sync {
    fn show_error(&self);

    fn clear(&self);
}

pub trait SystemControl: Send + Sync {
    /// Reboot the device. On hardware this does not return.
    fn restart(&self);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &[u8]) -> impl FnMut(&mut [u8]) -> Result<usize, TransportError> + '_ {
        let mut offset = 0;
        move |buf: &mut [u8]| {
            let n = (data.len() - offset).min(buf.len()).min(100);
            buf[..n].copy_from_slice(&data[offset..offset + n]);
            offset += n;
            Ok(n)
        }
    }

    #[test]
    fn test_collect_ok_body() {
        let body = br#"{"app_version":"1.3.0","app_url":"u"}"#;
        let response = HttpResponse::collect(200, 4096, reader(body)).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, body.to_vec());
    }

    #[test]
    fn test_large_error_page_keeps_status() {
        let page = vec![b'<'; 5 * 1024];
        let mut source = reader(&page);
        let mut reads = 0;
        let response = HttpResponse::collect(503, 4096, |buf| {
            reads += 1;
            source(buf)
        })
        .unwrap();
        assert_eq!(response.status, 503);
        assert!(response.body.is_empty());
        assert_eq!(reads, 0);
    }

    #[test]
    fn test_oversized_ok_body_is_rejected() {
        let body = vec![b'x'; 5000];
        assert!(matches!(
            HttpResponse::collect(200, 4096, reader(&body)),
            Err(TransportError::Io(_))
        ));
    }

    #[test]
    fn test_read_error_propagates() {
        let result = HttpResponse::collect(200, 4096, |_| {
            Err(TransportError::Io("connection reset".to_string()))
        });
        assert_eq!(
            result,
            Err(TransportError::Io("connection reset".to_string()))
        );
    }
}
