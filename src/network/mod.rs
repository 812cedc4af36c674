pub mod api;
pub mod http;
pub mod wifi;

pub use api::start_api_server;
pub use http::EspHttpTransport;
pub use wifi::{forward_link_events, EspRadio, LinkEventForwarder};
