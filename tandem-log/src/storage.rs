//! Storage backend interface and the in-memory backend.

use std::fmt;

use bytes::Bytes;
use error_stack::Report;

/// One appended record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub seq: u64,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Writes must arrive in dense, strictly increasing sequence order.
    OutOfOrder { expected: u64, got: u64 },
    /// The backend failed to read or persist.
    Backend,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder { expected, got } => {
                write!(f, "out of order write: expected seq {expected}, got {got}")
            }
            Self::Backend => f.write_str("storage backend failure"),
        }
    }
}

impl std::error::Error for StorageError {}

/// Append-only record store.
///
/// Append is the only mutation. A durable backend must persist a write
/// before returning `Ok`; reads must preserve append order.
pub trait StorageBackend: Send + 'static {
    /// Append one entry. The entry's `seq` must be exactly one past the
    /// latest stored entry (or 0 on an empty store).
    ///
    /// # Errors
    ///
    /// [`StorageError::OutOfOrder`] for gaps or rewrites,
    /// [`StorageError::Backend`] for I/O failure.
    fn write(&mut self, entry: &LogEntry) -> Result<(), Report<StorageError>>;

    /// The most recently appended entry, if any.
    ///
    /// # Errors
    ///
    /// [`StorageError::Backend`] for I/O failure.
    fn latest(&self) -> Result<Option<LogEntry>, Report<StorageError>>;

    /// All entries with `seq >= from` (everything for `None`), in order.
    ///
    /// # Errors
    ///
    /// [`StorageError::Backend`] for I/O failure.
    fn all(&self, from: Option<u64>) -> Result<Vec<LogEntry>, Report<StorageError>>;
}

/// Volatile in-process backend for tests and simulation.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Vec<LogEntry>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl StorageBackend for MemoryBackend {
    fn write(&mut self, entry: &LogEntry) -> Result<(), Report<StorageError>> {
        let expected = self.entries.len() as u64;
        if entry.seq != expected {
            return Err(Report::new(StorageError::OutOfOrder {
                expected,
                got: entry.seq,
            }));
        }
        self.entries.push(entry.clone());
        Ok(())
    }

    fn latest(&self) -> Result<Option<LogEntry>, Report<StorageError>> {
        Ok(self.entries.last().cloned())
    }

    fn all(&self, from: Option<u64>) -> Result<Vec<LogEntry>, Report<StorageError>> {
        let from = from.unwrap_or(0);
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.seq >= from)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(seq: u64, value: &'static [u8]) -> LogEntry {
        LogEntry {
            seq,
            value: Bytes::from_static(value),
        }
    }

    #[test]
    fn empty_backend_reads_empty() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.latest().unwrap(), None);
        assert!(backend.all(None).unwrap().is_empty());
    }

    #[test]
    fn writes_preserve_order() {
        let mut backend = MemoryBackend::new();
        backend.write(&entry(0, b"a")).unwrap();
        backend.write(&entry(1, b"b")).unwrap();
        backend.write(&entry(2, b"c")).unwrap();

        assert_eq!(backend.latest().unwrap(), Some(entry(2, b"c")));
        assert_eq!(
            backend.all(None).unwrap(),
            [entry(0, b"a"), entry(1, b"b"), entry(2, b"c")]
        );
        assert_eq!(
            backend.all(Some(1)).unwrap(),
            [entry(1, b"b"), entry(2, b"c")]
        );
        assert!(backend.all(Some(3)).unwrap().is_empty());
    }

    #[test]
    fn gaps_and_rewrites_are_rejected() {
        let mut backend = MemoryBackend::new();
        backend.write(&entry(0, b"a")).unwrap();

        let gap = backend.write(&entry(2, b"c")).unwrap_err();
        assert!(matches!(
            gap.current_context(),
            StorageError::OutOfOrder {
                expected: 1,
                got: 2
            }
        ));

        let rewrite = backend.write(&entry(0, b"again")).unwrap_err();
        assert!(matches!(
            rewrite.current_context(),
            StorageError::OutOfOrder { .. }
        ));
    }

    #[test]
    fn reads_are_repeatable() {
        let mut backend = MemoryBackend::new();
        backend.write(&entry(0, b"a")).unwrap();
        backend.write(&entry(1, b"b")).unwrap();
        assert_eq!(backend.all(Some(1)).unwrap(), backend.all(Some(1)).unwrap());
    }
}
