//! Where the command log physically lives.
//!
//! The server never touches the ring directly. It opens a file-like handle on
//! a [`StoreBackend`], writes records into it, repositions it and reads it back,
//! exactly as it would with `/dev/aesdchar`. [`RingBackend`] serves those calls
//! from an in-process [`AesdDevice`]; [`DeviceBackend`] forwards them to a real
//! device node (or any file) through the file system.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aesd_char::{AesdDevice, DeviceFile, SeekTo};
use tracing::{debug, info};

/// Which kind of store is behind a [`StoreBackend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The ring lives in this process.
    InProcess,
    /// The ring lives behind a device node managed elsewhere.
    Device,
}

/// The `AESDCHAR_IOCSEEKTO` operation on an open handle.
pub trait CommandSeek {
    /// Moves the handle to byte `write_cmd_offset` of command `write_cmd` and
    /// returns the new absolute position.
    fn seek_to_command(&mut self, seek: SeekTo) -> io::Result<u64>;
}

impl CommandSeek for DeviceFile {
    fn seek_to_command(&mut self, seek: SeekTo) -> io::Result<u64> {
        Ok(self.seek_to(seek)?)
    }
}

mod ioctl {
    use aesd_char::{AESDCHAR_IOC_MAGIC, AESDCHAR_IOCSEEKTO_NR, SeekTo};

    nix::ioctl_readwrite!(aesdchar_iocseekto, AESDCHAR_IOC_MAGIC, AESDCHAR_IOCSEEKTO_NR, SeekTo);
}

impl CommandSeek for File {
    fn seek_to_command(&mut self, seek: SeekTo) -> io::Result<u64> {
        let mut arg = seek;
        // SAFETY: the descriptor stays open for the duration of the call and
        // `arg` is a live `#[repr(C)]` value of the type the request encodes.
        let result = unsafe { ioctl::aesdchar_iocseekto(self.as_raw_fd(), &mut arg) };
        result.map_err(io::Error::from)?;
        self.stream_position()
    }
}

/// Storage for the command log.
///
/// Callers serialize every use of a backend themselves; implementations do not
/// need to lock across calls.
pub trait StoreBackend: Send + 'static {
    type Handle: Read + Write + Seek + CommandSeek + Send;

    fn kind(&self) -> BackendKind;

    /// Opens a handle positioned at the start of the log.
    fn open(&mut self) -> io::Result<Self::Handle>;

    /// Called after every successful append.
    fn after_append(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Releases whatever the backend created. Called once at shutdown.
    fn teardown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// In-process ring, optionally mirrored into a data file.
pub struct RingBackend {
    device: Arc<AesdDevice>,
    data_file: Option<PathBuf>,
}

impl RingBackend {
    pub fn new() -> Self {
        Self {
            device: Arc::new(AesdDevice::new()),
            data_file: None,
        }
    }

    /// Rewrites `path` with the ring contents after every append and removes
    /// it on teardown.
    pub fn with_data_file(path: impl Into<PathBuf>) -> Self {
        Self {
            data_file: Some(path.into()),
            ..Self::new()
        }
    }

    pub fn device(&self) -> &Arc<AesdDevice> {
        &self.device
    }

    pub fn data_file(&self) -> Option<&Path> {
        self.data_file.as_deref()
    }
}

impl Default for RingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for RingBackend {
    type Handle = DeviceFile;

    fn kind(&self) -> BackendKind {
        BackendKind::InProcess
    }

    fn open(&mut self) -> io::Result<DeviceFile> {
        Ok(self.device.open())
    }

    fn after_append(&mut self) -> io::Result<()> {
        if let Some(path) = &self.data_file {
            fs::write(path, self.device.contents())?;
        }
        Ok(())
    }

    fn teardown(&mut self) -> io::Result<()> {
        let Some(path) = &self.data_file else {
            return Ok(());
        };
        match fs::remove_file(path) {
            Ok(()) => {
                info!(path = %path.display(), "removed data file");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }
}

/// A device node such as `/dev/aesdchar`, opened fresh for every operation.
///
/// The node owns eviction and record boundaries. A regular file also works:
/// it grows without bound and rejects seek commands.
pub struct DeviceBackend {
    path: PathBuf,
    create: bool,
}

impl DeviceBackend {
    /// Opening fails with `NotFound` while the node does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            create: false,
        }
    }

    /// Like [`DeviceBackend::new`], but a missing path is created as a regular
    /// file.
    pub fn with_create(path: impl Into<PathBuf>) -> Self {
        Self {
            create: true,
            ..Self::new(path)
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreBackend for DeviceBackend {
    type Handle = File;

    fn kind(&self) -> BackendKind {
        BackendKind::Device
    }

    fn open(&mut self) -> io::Result<File> {
        debug!(path = %self.path.display(), "opening device");
        OpenOptions::new()
            .read(true)
            .append(true)
            .create(self.create)
            .open(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::SeekFrom;

    use super::*;

    fn read_from_start<H: Read + Seek>(handle: &mut H) -> Vec<u8> {
        handle.seek(SeekFrom::Start(0)).expect("rewind");
        let mut out = Vec::new();
        handle.read_to_end(&mut out).expect("read");
        out
    }

    #[test]
    fn ring_backend_mirrors_and_removes_data_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("aesdsocketdata");
        let mut backend = RingBackend::with_data_file(&path);
        assert_eq!(backend.kind(), BackendKind::InProcess);

        let mut handle = backend.open().expect("open");
        handle.write_all(b"one\n").expect("write");
        backend.after_append().expect("mirror");
        assert_eq!(fs::read(&path).expect("data file"), b"one\n");

        backend.teardown().expect("teardown");
        assert!(!path.exists());
        backend.teardown().expect("second teardown is a no-op");
    }

    #[test]
    fn ring_backend_seeks_by_command() {
        let mut backend = RingBackend::new();
        let mut handle = backend.open().expect("open");
        handle.write_all(b"aa\nbbb\n").expect("write");

        let mut reader = backend.open().expect("open");
        assert_eq!(reader.seek_to_command(SeekTo::new(1, 1)).expect("seek"), 4);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).expect("read");
        assert_eq!(rest, b"bb\n");
    }

    #[test]
    fn device_backend_on_regular_file_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("device");
        let mut backend = DeviceBackend::with_create(&path);
        assert_eq!(backend.kind(), BackendKind::Device);

        backend.open().expect("open").write_all(b"a\n").expect("write");
        let mut handle = backend.open().expect("open");
        handle.write_all(b"b\n").expect("write");
        assert_eq!(read_from_start(&mut handle), b"a\nb\n");

        backend.teardown().expect("teardown");
        assert!(path.exists(), "device contents are not ours to remove");
    }

    #[test]
    fn device_backend_seek_on_regular_file_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut backend = DeviceBackend::with_create(dir.path().join("device"));
        let mut handle = backend.open().expect("open");
        handle.write_all(b"a\n").expect("write");

        assert!(handle.seek_to_command(SeekTo::new(0, 0)).is_err());
    }

    #[test]
    fn device_backend_does_not_create_a_missing_node() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("aesdchar");
        let mut backend = DeviceBackend::new(&path);

        let err = backend.open().expect_err("node is missing");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!path.exists());
    }
}
