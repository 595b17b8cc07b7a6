//! Bounded log of newline-terminated write commands.
//!
//! The log keeps the most recent [`AESDCHAR_MAX_WRITE_OPERATIONS_SUPPORTED`]
//! commands and addresses them two ways: as one flat byte stream, or by
//! command index plus an offset inside that command.
//!
//! - [`buffer`] holds the ring itself: [`CommandEntry`] records, eviction of the
//!   oldest entry, and both addressing schemes.
//! - [`device`] models the character device on top of the ring: shared state
//!   behind one lock, per-open file positions, partial-write buffering, `llseek`
//!   through [`std::io::Seek`] and the `AESDCHAR_IOCSEEKTO` ioctl.

pub mod buffer;
pub mod device;

pub use buffer::{AESDCHAR_MAX_WRITE_OPERATIONS_SUPPORTED, CircularBuffer, CommandEntry, SeekError};
pub use device::{AESDCHAR_IOC_MAGIC, AESDCHAR_IOCSEEKTO_NR, AesdDevice, DeviceFile, SeekTo};
