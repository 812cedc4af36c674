pub mod leds;

pub use leds::{LedController, LedPins};
