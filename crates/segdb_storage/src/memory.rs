//! In-memory log store.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;

/// A log store held entirely in memory.
///
/// Used by tests that exercise log replay without touching the file
/// system, e.g. feeding a hand-corrupted log to the WAL reader.
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    data: RwLock<Vec<u8>>,
}

impl InMemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that already holds `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(data),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        let end = start.saturating_add(len);

        if offset > size || end > data.len() {
            return Err(StorageError::ReadPastEnd { offset, len, size });
        }

        Ok(data[start..end].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> StorageResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut data = self.data.write();
        let size = data.len() as u64;
        if new_size > size {
            return Err(StorageError::TruncateBeyondEnd {
                requested: new_size,
                size,
            });
        }
        // new_size <= len, so it fits in usize
        data.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_returns_offsets() {
        let mut log = InMemoryBackend::new();
        assert_eq!(log.append(b"abc").unwrap(), 0);
        assert_eq!(log.append(b"de").unwrap(), 3);
        assert_eq!(log.size().unwrap(), 5);
    }

    #[test]
    fn read_past_end_fails() {
        let log = InMemoryBackend::with_data(b"hello".to_vec());
        assert!(matches!(
            log.read_at(3, 10),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(matches!(
            log.read_at(10, 0),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }

    #[test]
    fn read_all_returns_everything() {
        let mut log = InMemoryBackend::new();
        log.append(b"one").unwrap();
        log.append(b"two").unwrap();
        assert_eq!(log.read_all().unwrap(), b"onetwo");
    }

    #[test]
    fn truncate_cuts_tail() {
        let mut log = InMemoryBackend::with_data(b"record+torn".to_vec());
        log.truncate(6).unwrap();
        assert_eq!(log.data(), b"record");
    }

    #[test]
    fn truncate_cannot_grow() {
        let mut log = InMemoryBackend::with_data(b"abc".to_vec());
        assert!(matches!(
            log.truncate(10),
            Err(StorageError::TruncateBeyondEnd {
                requested: 10,
                size: 3
            })
        ));
    }
}
