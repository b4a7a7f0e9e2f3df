//! Write-session bookkeeping for firmware uploads.

use crate::error::StorageError;
use crate::storage::{RegionInfo, Storage};

/// An open image write against the update region.
///
/// Consumed by [`UpdateWriter::commit`] or [`UpdateWriter::abort`], so the
/// underlying session is ended exactly once.
pub struct UpdateWriter<S: Storage> {
    session: S::Session,
    written: usize,
}

impl<S: Storage> UpdateWriter<S> {
    pub fn begin(storage: &mut S, region: &S::Region) -> Result<Self, StorageError> {
        log::info!(
            "Writing to partition subtype {} at offset 0x{:x}",
            region.subtype(),
            region.offset()
        );
        let session = storage.begin_write(region, None)?;
        Ok(Self { session, written: 0 })
    }

    pub fn write(&mut self, storage: &mut S, bytes: &[u8]) -> Result<(), StorageError> {
        if bytes.is_empty() {
            return Ok(());
        }
        storage.write_chunk(&mut self.session, bytes)?;
        self.written += bytes.len();
        Ok(())
    }

    pub fn bytes_written(&self) -> usize {
        self.written
    }

    /// Finalize the image, then make `region` the next boot target.
    pub fn commit(self, storage: &mut S, region: &S::Region) -> Result<usize, StorageError> {
        log::info!("Binary transferred finished: {} bytes", self.written);
        storage.finalize_write(self.session)?;
        storage.select_boot_region(region)?;
        Ok(self.written)
    }

    /// Best effort: a failure is logged and otherwise ignored.
    pub fn abort(self, storage: &mut S) {
        log::warn!("Aborting firmware write after {} bytes", self.written);
        if let Err(e) = storage.abort_write(self.session) {
            log::error!("OTA abort failed: {e}");
        }
    }
}
