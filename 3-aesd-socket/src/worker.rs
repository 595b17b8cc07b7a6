use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    select,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, info, warn};

use crate::{
    backend::StoreBackend,
    command_log::CommandLog,
    protocol::{RecordCodec, Request},
};

/// Serves one accepted connection until the peer closes it, an I/O error
/// occurs, or `cancel` fires.
///
/// A received record is always stored in full. Cancellation while its
/// response is being sent cuts that response short, so a peer that stops
/// reading cannot hold the log lock past shutdown.
pub async fn handle_connection<B: StoreBackend>(
    stream: TcpStream,
    peer: SocketAddr,
    log: Arc<CommandLog<B>>,
    cancel: CancellationToken,
    max_record_len: usize,
) -> Result<()> {
    info!("Accepted connection from {}", peer.ip());
    let (reader, mut writer) = stream.into_split();

    let result = serve_records(reader, &mut writer, &log, &cancel, max_record_len).await;

    // Closing our side also releases a peer that is still waiting on us.
    if let Err(err) = writer.shutdown().await {
        debug!(%peer, error = ?err, "failed to shut down connection");
    }
    info!("Closed connection from {}", peer.ip());
    result
}

/// Reads records from `reader` and answers each one on `writer`.
pub async fn serve_records<B, R, W>(
    reader: R,
    writer: &mut W,
    log: &CommandLog<B>,
    cancel: &CancellationToken,
    max_record_len: usize,
) -> Result<()>
where
    B: StoreBackend,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut records = FramedRead::new(reader, RecordCodec::with_max_length(max_record_len));

    loop {
        let next = select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("connection cancelled");
                return Ok(());
            }
            next = records.next() => next,
        };

        let record = match next {
            Some(record) => record.context("failed to receive record")?,
            None => return Ok(()),
        };
        select! {
            biased;
            result = handle_record(log, record, writer) => result?,
            _ = cancel.cancelled() => {
                debug!("connection cancelled while responding");
                return Ok(());
            }
        }
    }
}

async fn handle_record<B, W>(log: &CommandLog<B>, record: Bytes, writer: &mut W) -> Result<()>
where
    B: StoreBackend,
    W: AsyncWrite + Unpin,
{
    match Request::parse(record) {
        Request::Append(record) => {
            log.append_and_echo(&record, writer)
                .await
                .context("failed to append and echo record")?;
        }
        Request::Seek(seek) => {
            let streamed = log
                .seek_and_stream(seek, writer)
                .await
                .context("failed to stream from seek position")?;
            if streamed.is_none() {
                warn!(
                    write_cmd = seek.write_cmd,
                    write_cmd_offset = seek.write_cmd_offset,
                    "ignoring seek outside of the log"
                );
            }
        }
        Request::Ignored => debug!("ignoring malformed seek command"),
    }
    Ok(())
}
