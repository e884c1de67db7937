//! Agent read loop.
//!
//! Drives a [`FramedRead`] backed by [`CommandCodec`] over the controller
//! stream. The frame buffer belongs to one session and is dropped with it,
//! so a partial line is never carried across a reconnect. Each decoded
//! command is handed to the sink in arrival order.

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{Command, CommandCodec};
use crate::AppError;

/// Why a read loop returned.
#[derive(Debug)]
pub enum SessionEnd {
    /// The controller closed the stream.
    StreamClosed,
    /// The stream failed or carried an oversized line.
    Failed(AppError),
    /// The agent is stopping.
    Cancelled,
}

/// Read commands from `stream` until it ends, fails, or `cancel` fires.
///
/// Malformed and blank lines are dropped inside the codec and never end the
/// session. A line over `max_line_bytes` does, since the rest of the stream
/// can no longer be trusted to be in sync.
pub async fn run_reader<R, F>(
    stream: R,
    max_line_bytes: usize,
    cancel: &CancellationToken,
    mut on_command: F,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
    F: FnMut(Command),
{
    let mut framed = FramedRead::new(stream, CommandCodec::new(max_line_bytes));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("reader: cancellation received, stopping");
                return SessionEnd::Cancelled;
            }

            item = framed.next() => match item {
                None => {
                    debug!("reader: controller closed the stream");
                    return SessionEnd::StreamClosed;
                }
                Some(Ok(command)) => on_command(command),
                Some(Err(err)) => {
                    warn!(%err, "reader: stream error, ending session");
                    return SessionEnd::Failed(err);
                }
            },
        }
    }
}
