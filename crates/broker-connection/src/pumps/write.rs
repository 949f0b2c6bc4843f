//! Outbound side of the STOMP link.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use gnbwatch_protocol::stomp::{Command, StompFrame};

/// Anything queued for the broker.
#[derive(Debug)]
pub(crate) enum Outbound {
    Frame(StompFrame),
    /// Bare EOL keeping the session alive.
    Heartbeat,
    /// WebSocket-level reply to a broker ping.
    Pong(tungstenite::Bytes),
}

impl Outbound {
    fn into_message(self) -> tungstenite::Message {
        match self {
            Outbound::Frame(frame) => {
                let text = String::from_utf8_lossy(&frame.encode()).into_owned();
                tungstenite::Message::Text(text.into())
            }
            Outbound::Heartbeat => tungstenite::Message::Text("\n".into()),
            Outbound::Pong(data) => tungstenite::Message::Pong(data),
        }
    }
}

/// Encodes queued frames onto the socket, one frame per WebSocket message.
///
/// The queue is drained ahead of `cancel`. DISCONNECT is the last frame a
/// session sends, so the pump stops right after writing it. The socket is
/// closed on every exit.
pub(crate) async fn write_pump<S>(
    mut sink: S,
    mut queue: mpsc::Receiver<Outbound>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut frames = 0u64;
    let mut beats = 0u64;

    loop {
        let next = tokio::select! {
            biased;
            next = queue.recv() => next,
            _ = cancel.cancelled() => None,
        };
        let Some(outbound) = next else { break };

        let last = match &outbound {
            Outbound::Frame(frame) => {
                trace!(command = %frame.command, "sending frame");
                frames += 1;
                frame.command == Command::Disconnect
            }
            Outbound::Heartbeat => {
                beats += 1;
                false
            }
            Outbound::Pong(_) => false,
        };
        if let Err(e) = sink.send(outbound.into_message()).await {
            error!("STOMP write failed: {e}");
            break;
        }
        if last {
            break;
        }
    }

    debug!(frames, heartbeats = beats, "write pump stopped");
    let _ = sink.send(tungstenite::Message::Close(None)).await;
}
