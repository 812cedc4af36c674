// OTA Manager - writes firmware images using the ESP-IDF OTA API

use bus_display_core::platform::{FirmwareFlasher, FirmwareWriter};
use bus_display_core::update::FlashError;
use esp_idf_svc::io::Write;
use esp_idf_svc::ota::{EspOta, EspOtaUpdate};

pub struct OtaManager {
    ota: EspOta,
    partition_size: usize,
}

impl OtaManager {
    pub fn new() -> Result<Self, FlashError> {
        let update_partition =
            unsafe { esp_idf_sys::esp_ota_get_next_update_partition(core::ptr::null()) };
        if update_partition.is_null() {
            return Err(FlashError::NoUpdatePartition);
        }
        let partition_size = unsafe { (*update_partition).size } as usize;
        log::info!("OTA update partition found (size: {} bytes)", partition_size);

        let ota = EspOta::new().map_err(|e| FlashError::Begin(e.to_string()))?;
        Ok(Self { ota, partition_size })
    }

    /// Confirm the running image so the bootloader does not roll it back.
    pub fn mark_running_valid(&mut self) {
        if let Err(e) = self.ota.mark_running_slot_valid() {
            log::warn!("Failed to mark running firmware valid: {:?}", e);
        }
    }

    pub fn running_partition(&self) -> Option<String> {
        self.ota
            .get_running_slot()
            .ok()
            .map(|slot| slot.label.to_string())
    }
}

impl FirmwareFlasher for OtaManager {
    fn begin(
        &mut self,
        size_hint: Option<usize>,
    ) -> Result<Box<dyn FirmwareWriter + '_>, FlashError> {
        if let Some(size) = size_hint {
            if size > self.partition_size {
                return Err(FlashError::Begin(format!(
                    "image of {} bytes exceeds partition of {}",
                    size, self.partition_size
                )));
            }
        }

        let update = self
            .ota
            .initiate_update()
            .map_err(|e| FlashError::Begin(e.to_string()))?;
        log::info!("OTA partition opened for writing");
        Ok(Box::new(OtaWriter { update }))
    }
}

struct OtaWriter<'a> {
    update: EspOtaUpdate<'a>,
}

impl FirmwareWriter for OtaWriter<'_> {
    fn write(&mut self, chunk: &[u8]) -> Result<(), FlashError> {
        self.update
            .write_all(chunk)
            .map_err(|e| FlashError::Write(e.to_string()))
    }

    fn complete(self: Box<Self>) -> Result<(), FlashError> {
        // Verifies the image and sets it as the boot partition
        self.update
            .complete()
            .map_err(|e| FlashError::Verify(e.to_string()))
    }

    fn abort(self: Box<Self>) {
        if let Err(e) = self.update.abort() {
            log::warn!("Failed to abort OTA update: {:?}", e);
        }
    }
}
