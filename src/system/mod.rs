pub mod reset;
pub mod storage;

pub use reset::EspSystem;
pub use storage::NvsCredentialStore;
