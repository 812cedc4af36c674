// 16-bit shift register driving the bus display LEDs

use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use bus_display_core::platform::StatusIndicator;
use esp_idf_hal::delay::Ets;
use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};

const PULSE_DELAY_US: u32 = 100;

// All LEDs on
pub const ERROR_PATTERN: u16 = 0xFFFF;

pub struct LedPins {
    pub clock: AnyOutputPin,
    pub data: AnyOutputPin,
    pub latch: AnyOutputPin,
    pub reset: AnyOutputPin,
    pub output_enable: AnyOutputPin,
}

struct ShiftRegister {
    clock: PinDriver<'static, AnyOutputPin, Output>,
    data: PinDriver<'static, AnyOutputPin, Output>,
    latch: PinDriver<'static, AnyOutputPin, Output>,
    _reset: PinDriver<'static, AnyOutputPin, Output>,
    _output_enable: PinDriver<'static, AnyOutputPin, Output>,
}

fn pulse(pin: &mut PinDriver<'static, AnyOutputPin, Output>) -> Result<()> {
    Ets::delay_us(PULSE_DELAY_US);
    pin.set_high()?;
    Ets::delay_us(PULSE_DELAY_US * 2);
    pin.set_low()?;
    Ets::delay_us(PULSE_DELAY_US);
    Ok(())
}

impl ShiftRegister {
    // Bits go out LSB first
    fn feed(&mut self, value: u16) -> Result<()> {
        for i in 0..16 {
            if (value >> i) & 1 == 1 {
                self.data.set_high()?;
            } else {
                self.data.set_low()?;
            }
            pulse(&mut self.clock)?;
        }
        self.data.set_low()?;
        pulse(&mut self.latch)
    }
}

pub struct LedController {
    register: Mutex<ShiftRegister>,
}

impl LedController {
    pub fn new(pins: LedPins) -> Result<Self> {
        log::info!("Initializing LED controller pins");
        let mut output_enable = PinDriver::output(pins.output_enable)?;
        let mut latch = PinDriver::output(pins.latch)?;
        let mut clock = PinDriver::output(pins.clock)?;
        let mut data = PinDriver::output(pins.data)?;
        let mut reset = PinDriver::output(pins.reset)?;

        // Outputs off while the register is cleared
        output_enable.set_high()?;
        latch.set_low()?;
        clock.set_low()?;
        data.set_low()?;

        pulse(&mut reset)?;
        reset.set_high()?;
        pulse(&mut latch)?;

        output_enable.set_low()?;
        log::info!("LED controller initialized successfully");

        Ok(Self {
            register: Mutex::new(ShiftRegister {
                clock,
                data,
                latch,
                _reset: reset,
                _output_enable: output_enable,
            }),
        })
    }

    pub fn set_pattern(&self, pattern: u16) {
        let mut register = self.register.lock().unwrap_or_else(PoisonError::into_inner);
        match register.feed(pattern) {
            Ok(()) => log::debug!("Set LEDs with pattern: 0x{:04X}", pattern),
            Err(e) => log::error!("Failed to set LED pattern: {:?}", e),
        }
    }

    pub fn clear(&self) {
        self.set_pattern(0);
    }
}

impl StatusIndicator for LedController {
    fn show_error(&self) {
        self.set_pattern(ERROR_PATTERN);
    }

    fn clear(&self) {
        LedController::clear(self);
    }
}
