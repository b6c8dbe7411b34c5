//! Dedicated writer task for outbound frames.
//!
//! Every producer (unary call tasks, stream observers) sends encoded frames
//! through an mpsc channel to one task that owns the write half.
//!
//! ```text
//! Unary task 1 ─┐
//! WireObserver ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► AsyncWrite
//! Unary task N ─┘
//! ```
//!
//! The task batches whatever frames are ready and flushes once per batch.
//! A full channel makes senders wait, up to `send_timeout`.
//! [`WriterHandle::close`] stops the task even while other handles are still
//! alive, after writing what was already queued.

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{BridgeError, Result};
use crate::protocol::{Header, Outbound, HEADER_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default time a sender waits for room in the channel.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written.
#[derive(Debug)]
pub struct OutboundFrame {
    pub header: [u8; HEADER_SIZE],
    pub payload: Bytes,
}

impl OutboundFrame {
    /// Frame `payload` under `kind`. Fails if the payload is too large for
    /// the length field.
    #[inline]
    pub fn new(kind: u8, payload: Bytes) -> Result<Self> {
        Ok(Self {
            header: Header::for_payload(kind, payload.len())?.encode(),
            payload,
        })
    }

    /// Encode a message into a frame.
    pub fn encode(message: &Outbound) -> Result<Self> {
        Self::new(message.kind(), message.encode_payload()?)
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for the frame queue.
    pub channel_capacity: usize,
    /// How long a send may wait for room in the queue.
    pub send_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task.
///
/// This is cheaply cloneable and can be shared across tasks.
#[derive(Clone, Debug)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    send_timeout: Duration,
    closing: CancellationToken,
}

impl WriterHandle {
    /// Send a frame, waiting at most `send_timeout` for queue space.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        match tokio::time::timeout(self.send_timeout, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(BridgeError::ConnectionClosed),
            Err(_) => Err(BridgeError::SendTimeout),
        }
    }

    /// Encode and send a message.
    pub async fn send_message(&self, message: &Outbound) -> Result<()> {
        self.send(OutboundFrame::encode(message)?).await
    }

    /// Stop the writer task for every handle.
    ///
    /// Frames already queued are still written; later sends fail with
    /// [`BridgeError::ConnectionClosed`].
    pub fn close(&self) {
        self.closing.cancel();
    }

    /// Whether the writer task has stopped accepting frames.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly once every [`WriterHandle`] is dropped or one of
/// them calls [`WriterHandle::close`], and with an error when a write fails.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let closing = CancellationToken::new();
    let handle = WriterHandle {
        tx,
        send_timeout: config.send_timeout,
        closing: closing.clone(),
    };

    let task = tokio::spawn(writer_loop(rx, writer, closing));

    (handle, task)
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    closing: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);

    loop {
        let received = tokio::select! {
            biased;
            n = rx.recv_many(&mut batch, MAX_BATCH_SIZE) => n,
            _ = closing.cancelled(), if !rx.is_closed() => {
                // Refuse new frames; recv_many keeps yielding the queued ones.
                rx.close();
                continue;
            }
        };
        if received == 0 {
            break;
        }

        if let Err(err) = write_batch(&mut writer, &batch).await {
            tracing::error!("writer task stopping: {}", err);
            return Err(err);
        }
        batch.clear();
    }

    let _ = writer.shutdown().await;
    Ok(())
}

/// Write a batch of frames with vectored writes, then flush once.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let total: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut done = 0;

    while done < total {
        let n = writer.write_vectored(&unwritten_slices(batch, done)).await?;
        if n == 0 {
            return Err(BridgeError::Io(std::io::ErrorKind::WriteZero.into()));
        }
        done += n;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering everything after the first `skip_bytes` of the batch.
fn unwritten_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.header[..], &frame.payload[..]] {
            let end = offset + part.len();
            if !part.is_empty() && skip_bytes < end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&part[start..]));
            }
            offset = end;
        }
    }

    slices
}
