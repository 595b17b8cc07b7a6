//! The one shared object every connection and the marker producer append to.

use std::io::{self, Read, Seek, SeekFrom, Write};

use aesd_char::SeekTo;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::{BackendKind, CommandSeek, StoreBackend};

/// Size of the chunks streamed back to clients.
const CHUNK_SIZE: usize = 1024;

/// A [`StoreBackend`] behind the log-wide lock.
///
/// Every operation below is one critical section. Echoes are streamed while
/// the lock is held, so a reader never sees a record appended after it started
/// or only part of one.
pub struct CommandLog<B> {
    kind: BackendKind,
    backend: Mutex<B>,
}

impl<B: StoreBackend> CommandLog<B> {
    pub fn new(backend: B) -> Self {
        Self {
            kind: backend.kind(),
            backend: Mutex::new(backend),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Stores one complete record.
    pub async fn append(&self, record: &[u8]) -> io::Result<()> {
        let mut backend = self.backend.lock().await;
        append_locked(&mut *backend, record)?;
        Ok(())
    }

    /// Stores `record`, then streams the whole log to `sink`.
    ///
    /// Returns the number of bytes streamed.
    pub async fn append_and_echo<W>(&self, record: &[u8], sink: &mut W) -> io::Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut backend = self.backend.lock().await;
        let mut handle = append_locked(&mut *backend, record)?;
        handle.seek(SeekFrom::Start(0))?;
        stream_to(&mut handle, sink).await
    }

    /// Streams the log to `sink` starting at the byte `seek` names.
    ///
    /// Returns `Ok(None)` without writing anything when the backend rejects
    /// the position.
    pub async fn seek_and_stream<W>(&self, seek: SeekTo, sink: &mut W) -> io::Result<Option<u64>>
    where
        W: AsyncWrite + Unpin,
    {
        let mut backend = self.backend.lock().await;
        let mut handle = backend.open()?;
        if let Err(err) = handle.seek_to_command(seek) {
            debug!(
                write_cmd = seek.write_cmd,
                write_cmd_offset = seek.write_cmd_offset,
                error = %err,
                "seek rejected"
            );
            return Ok(None);
        }
        stream_to(&mut handle, sink).await.map(Some)
    }

    /// Copy of the whole log.
    pub async fn snapshot(&self) -> io::Result<Vec<u8>> {
        let mut backend = self.backend.lock().await;
        let mut handle = backend.open()?;
        handle.seek(SeekFrom::Start(0))?;
        let mut contents = Vec::new();
        handle.read_to_end(&mut contents)?;
        Ok(contents)
    }

    pub async fn teardown(&self) -> io::Result<()> {
        self.backend.lock().await.teardown()
    }
}

fn append_locked<B: StoreBackend>(backend: &mut B, record: &[u8]) -> io::Result<B::Handle> {
    let mut handle = backend.open()?;
    handle.write_all(record)?;
    handle.flush()?;
    if let Err(err) = backend.after_append() {
        warn!(error = %err, "failed to mirror log after append");
    }
    Ok(handle)
}

async fn stream_to<R, W>(source: &mut R, sink: &mut W) -> io::Result<u64>
where
    R: Read,
    W: AsyncWrite + Unpin,
{
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut sent = 0u64;
    loop {
        let count = match source.read(&mut chunk) {
            Ok(0) => break,
            Ok(count) => count,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        sink.write_all(&chunk[..count]).await?;
        sent += count as u64;
    }
    sink.flush().await?;
    Ok(sent)
}
