//! Persistent storage interface used by the OTA server.

use crate::error::{SetupError, StorageError};

/// Informational view of a storage region, used for logging and replies.
pub trait RegionInfo {
    fn label(&self) -> &str;
    fn subtype(&self) -> u32;
    fn offset(&self) -> u32;
    fn size(&self) -> u32;
}

/// Region lookup, sequential image writes and boot selection.
///
/// A write session is opened by [`Storage::begin_write`] and must end with
/// exactly one of [`Storage::finalize_write`] or [`Storage::abort_write`].
/// Both consume the session, even when they fail.
pub trait Storage {
    type Region: RegionInfo;
    type Session;

    fn next_update_region(&mut self) -> Option<Self::Region>;
    fn factory_region(&mut self) -> Option<Self::Region>;
    fn current_boot_region(&mut self) -> Option<Self::Region>;

    /// `size_hint` of `None` means the image size is not known up front.
    fn begin_write(
        &mut self,
        region: &Self::Region,
        size_hint: Option<usize>,
    ) -> Result<Self::Session, StorageError>;
    fn write_chunk(&mut self, session: &mut Self::Session, bytes: &[u8]) -> Result<(), StorageError>;
    fn finalize_write(&mut self, session: Self::Session) -> Result<(), StorageError>;
    fn abort_write(&mut self, session: Self::Session) -> Result<(), StorageError>;

    fn select_boot_region(&mut self, region: &Self::Region) -> Result<(), StorageError>;
}

/// The two regions the server can make bootable.
#[derive(Debug, Clone)]
pub struct Regions<R> {
    pub update: R,
    pub factory: R,
}

impl<R: RegionInfo> Regions<R> {
    pub fn discover<S: Storage<Region = R>>(storage: &mut S) -> Result<Self, SetupError> {
        let update = storage.next_update_region().ok_or(SetupError::NoUpdateRegion)?;
        let factory = storage.factory_region().ok_or(SetupError::NoFactoryRegion)?;
        log::info!(
            "Update partition '{}' subtype {} at offset 0x{:x} ({} bytes)",
            update.label(),
            update.subtype(),
            update.offset(),
            update.size()
        );
        log::info!(
            "Factory partition '{}' at offset 0x{:x}",
            factory.label(),
            factory.offset()
        );
        Ok(Self { update, factory })
    }
}
