//! Contract for non-volatile storage backends.
//!
//! The storage queue that uses this lives outside the network manager;
//! only the abstraction is defined here, next to the CAN hardware
//! abstraction it mirrors.

/// A block-addressed storage backend.
pub trait StoragePlugin: Send {
    /// Persist `data` under `id`, replacing any previous contents.
    /// Returns false when the backend could not complete the write.
    fn write(&mut self, id: u64, data: &[u8]) -> bool;

    /// Read the contents stored under `id` into `data`. Returns false when
    /// nothing is stored under `id` or the backend failed.
    fn read(&mut self, id: u64, data: &mut Vec<u8>) -> bool;
}
