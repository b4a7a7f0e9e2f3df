// Partition storage - esp_ota_* / esp_partition_* behind the ota-core Storage trait

use core::ffi::{c_void, CStr};
use core::ptr;
use esp_idf_sys::{
    esp_err_t, esp_ota_abort, esp_ota_begin, esp_ota_end, esp_ota_get_boot_partition,
    esp_ota_get_next_update_partition, esp_ota_get_running_partition, esp_ota_handle_t,
    esp_ota_set_boot_partition, esp_ota_write, esp_partition_find_first,
    esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_APP_FACTORY, esp_partition_t,
    esp_partition_type_t_ESP_PARTITION_TYPE_APP, ESP_OK, OTA_SIZE_UNKNOWN,
};
use ota_core::{RegionInfo, Storage, StorageError, StorageOp};

/// Entry of the flash partition table.
///
/// Entries are loaded once by ESP-IDF and never freed, so the pointer stays
/// valid for the life of the program.
#[derive(Debug, Clone, Copy)]
pub struct Partition(*const esp_partition_t);

impl Partition {
    fn from_raw(raw: *const esp_partition_t) -> Option<Self> {
        if raw.is_null() {
            None
        } else {
            Some(Self(raw))
        }
    }

    fn entry(&self) -> &esp_partition_t {
        unsafe { &*self.0 }
    }
}

impl RegionInfo for Partition {
    fn label(&self) -> &str {
        let label = unsafe { CStr::from_ptr(self.entry().label.as_ptr()) };
        label.to_str().unwrap_or("<invalid>")
    }

    fn subtype(&self) -> u32 {
        self.entry().subtype as u32
    }

    fn offset(&self) -> u32 {
        self.entry().address
    }

    fn size(&self) -> u32 {
        self.entry().size
    }
}

/// Open `esp_ota_begin` handle.
#[derive(Debug)]
pub struct OtaWrite {
    handle: esp_ota_handle_t,
}

#[derive(Debug, Default)]
pub struct EspPartitionStorage;

impl EspPartitionStorage {
    pub fn new() -> Self {
        Self
    }

    /// Partition the current firmware was loaded from.
    pub fn running_partition(&self) -> Option<Partition> {
        Partition::from_raw(unsafe { esp_ota_get_running_partition() })
    }
}

fn check(op: StorageOp, code: esp_err_t) -> Result<(), StorageError> {
    if code == ESP_OK {
        Ok(())
    } else {
        Err(StorageError::new(op, code))
    }
}

impl Storage for EspPartitionStorage {
    type Region = Partition;
    type Session = OtaWrite;

    fn next_update_region(&mut self) -> Option<Partition> {
        Partition::from_raw(unsafe { esp_ota_get_next_update_partition(ptr::null()) })
    }

    fn factory_region(&mut self) -> Option<Partition> {
        Partition::from_raw(unsafe {
            esp_partition_find_first(
                esp_partition_type_t_ESP_PARTITION_TYPE_APP,
                esp_partition_subtype_t_ESP_PARTITION_SUBTYPE_APP_FACTORY,
                ptr::null(),
            )
        })
    }

    fn current_boot_region(&mut self) -> Option<Partition> {
        Partition::from_raw(unsafe { esp_ota_get_boot_partition() })
    }

    fn begin_write(
        &mut self,
        region: &Partition,
        size_hint: Option<usize>,
    ) -> Result<OtaWrite, StorageError> {
        let image_size = size_hint.unwrap_or(OTA_SIZE_UNKNOWN as usize);
        let mut handle: esp_ota_handle_t = 0;
        let result = unsafe { esp_ota_begin(region.0, image_size as _, &mut handle as *mut _) };
        check(StorageOp::Begin, result)?;
        Ok(OtaWrite { handle })
    }

    fn write_chunk(&mut self, session: &mut OtaWrite, bytes: &[u8]) -> Result<(), StorageError> {
        let result = unsafe {
            esp_ota_write(
                session.handle,
                bytes.as_ptr() as *const c_void,
                bytes.len() as _,
            )
        };
        check(StorageOp::Write, result)
    }

    fn finalize_write(&mut self, session: OtaWrite) -> Result<(), StorageError> {
        // esp_ota_end releases the handle whether or not validation passes
        check(StorageOp::Finalize, unsafe { esp_ota_end(session.handle) })
    }

    fn abort_write(&mut self, session: OtaWrite) -> Result<(), StorageError> {
        check(StorageOp::Abort, unsafe { esp_ota_abort(session.handle) })
    }

    fn select_boot_region(&mut self, region: &Partition) -> Result<(), StorageError> {
        check(StorageOp::SelectBoot, unsafe { esp_ota_set_boot_partition(region.0) })
    }
}
