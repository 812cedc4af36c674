// OTA (Over-The-Air) update module
//
// The check/download/apply pipeline lives in bus_display_core; this module
// only provides the partition writer.

pub mod manager;

pub use manager::OtaManager;
