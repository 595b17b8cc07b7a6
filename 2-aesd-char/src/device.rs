//! In-process model of the `aesdchar` character device.
//!
//! [`AesdDevice`] is the shared device state: the command ring plus the bytes
//! of a write that has not seen its terminator yet. Every operation takes the
//! device lock for its whole duration. [`DeviceFile`] is one open file
//! description with its own position, the way each `open()` of `/dev/aesdchar`
//! gets its own `f_pos`.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::{debug, trace};

use crate::buffer::{CircularBuffer, SeekError};

/// ioctl type number shared with the kernel driver.
pub const AESDCHAR_IOC_MAGIC: u8 = 0x16;
/// ioctl sequence number of `AESDCHAR_IOCSEEKTO`.
pub const AESDCHAR_IOCSEEKTO_NR: u8 = 1;

/// Argument of the `AESDCHAR_IOCSEEKTO` ioctl.
///
/// Laid out like `struct aesd_seekto` so the same value can be handed to the
/// kernel driver.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeekTo {
    /// Zero-based index of the command, oldest first.
    pub write_cmd: u32,
    /// Zero-based byte offset inside that command.
    pub write_cmd_offset: u32,
}

impl SeekTo {
    pub fn new(write_cmd: u32, write_cmd_offset: u32) -> Self {
        Self {
            write_cmd,
            write_cmd_offset,
        }
    }
}

#[derive(Default)]
struct DeviceState {
    buffer: CircularBuffer,
    pending: Vec<u8>,
}

/// Shared state behind every [`DeviceFile`].
#[derive(Default)]
pub struct AesdDevice {
    state: Mutex<DeviceState>,
}

impl AesdDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the device at position 0.
    pub fn open(self: &Arc<Self>) -> DeviceFile {
        trace!("open");
        DeviceFile {
            device: Arc::clone(self),
            pos: 0,
        }
    }

    /// Bytes of every stored command, oldest first.
    ///
    /// A pending write without its terminator is not part of the contents.
    pub fn contents(&self) -> Vec<u8> {
        let state = self.lock();
        let mut out = Vec::with_capacity(state.buffer.total_size());
        for entry in state.buffer.iter() {
            out.extend_from_slice(entry.as_bytes());
        }
        out
    }

    /// Number of stored commands.
    pub fn command_count(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn total_size(&self) -> usize {
        self.lock().buffer.total_size()
    }

    // Operations never leave the ring half-updated, so a poisoned lock still
    // guards consistent state.
    fn lock(&self) -> MutexGuard<'_, DeviceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One open handle on an [`AesdDevice`].
pub struct DeviceFile {
    device: Arc<AesdDevice>,
    pos: u64,
}

impl DeviceFile {
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// `AESDCHAR_IOCSEEKTO`: moves the position to byte `write_cmd_offset` of
    /// command `write_cmd`.
    ///
    /// On error the position is left where it was.
    pub fn seek_to(&mut self, seek: SeekTo) -> Result<u64, SeekError> {
        let state = self.device.lock();
        let absolute = state
            .buffer
            .resolve_command_index(seek.write_cmd as usize, seek.write_cmd_offset as usize)?;
        self.pos = absolute as u64;
        debug!(
            write_cmd = seek.write_cmd,
            write_cmd_offset = seek.write_cmd_offset,
            pos = self.pos,
            "seek to command"
        );
        Ok(self.pos)
    }
}

impl Read for DeviceFile {
    /// Copies bytes from the current position, stopping at the end of the
    /// entry that holds it.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        trace!(count = buf.len(), pos = self.pos, "read");
        let state = self.device.lock();
        let Ok(pos) = usize::try_from(self.pos) else {
            return Ok(0);
        };
        let Some((entry, offset)) = state.buffer.find_entry_for_offset(pos) else {
            return Ok(0);
        };

        let available = &entry.as_bytes()[offset..];
        let count = available.len().min(buf.len());
        buf[..count].copy_from_slice(&available[..count]);
        self.pos += count as u64;
        Ok(count)
    }
}

impl Write for DeviceFile {
    /// Buffers `buf` and stores one command for every terminator it completes.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        trace!(count = buf.len(), pos = self.pos, "write");
        let mut state = self.device.lock();
        state
            .pending
            .try_reserve(buf.len())
            .map_err(|_| io::Error::from(io::ErrorKind::OutOfMemory))?;

        // Only the bytes written now can hold a terminator the pending buffer
        // has not seen yet.
        let mut scan_from = state.pending.len();
        state.pending.extend_from_slice(buf);
        while let Some(found) = state.pending[scan_from..].iter().position(|&b| b == b'\n') {
            let end = scan_from + found + 1;
            let rest = state.pending.split_off(end);
            let record = mem::replace(&mut state.pending, rest);
            if let Some(evicted) = state.buffer.append(Bytes::from(record)) {
                debug!(len = evicted.len(), "evicted oldest command");
            }
            scan_from = 0;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for DeviceFile {
    /// `llseek` over the concatenated commands. Positions before 0 or past the
    /// end of the stored data are rejected.
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let total = self.device.lock().buffer.total_size() as u64;
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => total.checked_add_signed(delta),
        };

        match target {
            Some(target) if target <= total => {
                self.pos = target;
                Ok(target)
            }
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("seek outside of 0..={total}"),
            )),
        }
    }
}
