//! Fixed-capacity ring of write commands.
//!
//! Each slot holds at most one [`CommandEntry`]. Appending to a full ring
//! overwrites the oldest slot and hands the evicted entry back to the caller.
//! Index arithmetic stays private to [`CircularBuffer`]; callers only see
//! entries in oldest-to-newest order.

use std::io;

use bytes::Bytes;
use thiserror::Error;

/// Number of write commands the device keeps before evicting the oldest one.
pub const AESDCHAR_MAX_WRITE_OPERATIONS_SUPPORTED: usize = 10;

/// One complete write command, terminator included.
///
/// Entries are immutable once stored. The length is always the length of the
/// underlying bytes, so the two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    bytes: Bytes,
}

impl CommandEntry {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Reasons a command index / offset pair does not name a stored byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SeekError {
    #[error("command {write_cmd} out of range ({available} commands stored)")]
    CommandOutOfRange { write_cmd: usize, available: usize },
    #[error("offset {write_cmd_offset} out of range for command {write_cmd} ({len} bytes)")]
    OffsetOutOfRange {
        write_cmd: usize,
        write_cmd_offset: usize,
        len: usize,
    },
}

impl From<SeekError> for io::Error {
    fn from(err: SeekError) -> Self {
        io::Error::new(io::ErrorKind::InvalidInput, err)
    }
}

/// Ring buffer of the last `N` write commands.
///
/// `in_offs` is the slot the next append overwrites. The oldest entry sits
/// `len` slots behind it, which is `in_offs` itself once the ring is full.
#[derive(Debug, Clone)]
pub struct CircularBuffer<const N: usize = AESDCHAR_MAX_WRITE_OPERATIONS_SUPPORTED> {
    entries: [Option<CommandEntry>; N],
    in_offs: usize,
    len: usize,
}

impl<const N: usize> Default for CircularBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CircularBuffer<N> {
    const NONZERO_CAPACITY: () = assert!(N > 0, "circular buffer needs at least one slot");

    /// Creates an empty ring.
    pub fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::NONZERO_CAPACITY;
        Self {
            entries: std::array::from_fn(|_| None),
            in_offs: 0,
            len: 0,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == N
    }

    /// Stores `bytes` as the newest entry.
    ///
    /// Returns the entry that was overwritten when the ring was already full.
    pub fn append(&mut self, bytes: impl Into<Bytes>) -> Option<CommandEntry> {
        let evicted = self.entries[self.in_offs].replace(CommandEntry::new(bytes));
        self.in_offs = (self.in_offs + 1) % N;
        if self.len < N {
            self.len += 1;
        }
        evicted
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &CommandEntry> + '_ {
        let out_offs = self.out_offs();
        (0..self.len).filter_map(move |i| self.entries[(out_offs + i) % N].as_ref())
    }

    /// Sum of the lengths of every stored entry.
    pub fn total_size(&self) -> usize {
        self.iter().map(CommandEntry::len).sum()
    }

    /// Finds the entry holding byte `offset` of the concatenated log.
    ///
    /// Returns the entry and the offset inside it, or `None` once `offset`
    /// reaches [`total_size`](Self::total_size).
    pub fn find_entry_for_offset(&self, offset: usize) -> Option<(&CommandEntry, usize)> {
        let mut remaining = offset;
        for entry in self.iter() {
            if remaining < entry.len() {
                return Some((entry, remaining));
            }
            remaining -= entry.len();
        }
        None
    }

    /// Translates `(write_cmd, write_cmd_offset)` into an absolute byte offset.
    ///
    /// Both values must name an existing byte; nothing is clamped.
    pub fn resolve_command_index(
        &self,
        write_cmd: usize,
        write_cmd_offset: usize,
    ) -> Result<usize, SeekError> {
        if write_cmd >= self.len {
            return Err(SeekError::CommandOutOfRange {
                write_cmd,
                available: self.len,
            });
        }

        let mut base = 0;
        for (index, entry) in self.iter().enumerate() {
            if index < write_cmd {
                base += entry.len();
                continue;
            }
            if write_cmd_offset >= entry.len() {
                return Err(SeekError::OffsetOutOfRange {
                    write_cmd,
                    write_cmd_offset,
                    len: entry.len(),
                });
            }
            return Ok(base + write_cmd_offset);
        }

        Err(SeekError::CommandOutOfRange {
            write_cmd,
            available: self.len,
        })
    }

    fn out_offs(&self) -> usize {
        (self.in_offs + N - self.len) % N
    }
}
