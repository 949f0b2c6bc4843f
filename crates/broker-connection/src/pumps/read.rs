//! WebSocket read pump, decodes STOMP frames and dispatches them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use gnbwatch_protocol::stomp::{self, Command, Inbound};

use super::write::Outbound;
use crate::client::{DisconnectSlot, Subscriptions};

/// Silence tolerated before the link is declared dead, in multiples of the
/// negotiated incoming heart-beat.
const HEARTBEAT_GRACE_FACTOR: u32 = 3;

/// Reads frames from the WebSocket and dispatches MESSAGE frames to their
/// subscription callback.
///
/// When the broker promised heart-beats, any inbound traffic resets a read
/// deadline; if it expires the link is considered dead. On an exit that was
/// not requested through `cancel`, the disconnect callback fires.
pub(crate) async fn read_pump<S>(
    mut read: S,
    subscriptions: Subscriptions,
    on_disconnect: DisconnectSlot,
    connected: Arc<AtomicBool>,
    incoming: Option<Duration>,
    write_tx: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let grace = incoming.map(|d| d * HEARTBEAT_GRACE_FACTOR);
    let deadline = tokio::time::sleep(grace.unwrap_or(Duration::from_secs(3600)));
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline, if grace.is_some() => {
                warn!("no traffic from broker within heart-beat window, closing");
                break;
            }

            msg = read.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("WebSocket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                };
                if let Some(grace) = grace {
                    deadline.as_mut().reset(tokio::time::Instant::now() + grace);
                }

                let keep_going = match msg {
                    tungstenite::Message::Text(text) => {
                        dispatch(text.as_bytes(), &subscriptions).await
                    }
                    tungstenite::Message::Binary(bytes) => dispatch(&bytes, &subscriptions).await,
                    tungstenite::Message::Ping(data) => {
                        trace!("received ping, sending pong");
                        let _ = write_tx.send(Outbound::Pong(data)).await;
                        true
                    }
                    tungstenite::Message::Close(frame) => {
                        debug!(?frame, "received close frame");
                        false
                    }
                    _ => true,
                };
                if !keep_going {
                    break;
                }
            }
        }
    }

    connected.store(false, Ordering::Release);
    if !cancel.is_cancelled()
        && let Some(cb) = on_disconnect.lock().await.as_ref()
    {
        cb();
    }
}

/// Handles one WebSocket payload. Returns `false` when the session is over.
async fn dispatch(data: &[u8], subscriptions: &Subscriptions) -> bool {
    let frame = match stomp::decode(data) {
        Ok(Inbound::Heartbeat) => {
            trace!("heart-beat");
            return true;
        }
        Ok(Inbound::Frame(frame)) => frame,
        Err(e) => {
            warn!("dropping undecodable frame: {e}");
            return true;
        }
    };

    match frame.command {
        Command::Message => {
            let Some(id) = frame.get_header("subscription").map(str::to_string) else {
                warn!("MESSAGE without subscription header, dropping");
                return true;
            };
            let subs = subscriptions.lock().await;
            match subs.get(&id) {
                Some(cb) => cb(frame),
                None => warn!(subscription = %id, "MESSAGE for unknown subscription, dropping"),
            }
            true
        }
        Command::Receipt => {
            debug!(receipt = frame.get_header("receipt-id"), "receipt");
            true
        }
        Command::Error => {
            let message = frame
                .get_header("message")
                .map(str::to_string)
                .unwrap_or_else(|| frame.body_text());
            warn!(%message, "broker sent ERROR, session closed");
            false
        }
        other => {
            debug!(command = %other, "ignoring frame");
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use futures_util::stream;
    use gnbwatch_protocol::StompFrame;
    use tokio::sync::Mutex;

    use crate::types::MessageCallback;

    type Msg = Result<tungstenite::Message, tungstenite::Error>;

    fn text(frame: StompFrame) -> Msg {
        Ok(tungstenite::Message::Text(
            String::from_utf8(frame.encode()).unwrap().into(),
        ))
    }

    fn message(subscription: &str, body: &str) -> Msg {
        text(
            StompFrame::new(Command::Message)
                .header("subscription", subscription)
                .header("destination", "/topic/t.d.gnb.telemetry")
                .body(body.as_bytes().to_vec()),
        )
    }

    fn disconnect_flag() -> (DisconnectSlot, Arc<AtomicBool>) {
        let fired = Arc::new(AtomicBool::new(false));
        let f = fired.clone();
        let slot: DisconnectSlot = Arc::new(Mutex::new(Some(Box::new(move || {
            f.store(true, Ordering::SeqCst);
        }))));
        (slot, fired)
    }

    fn recording(into: Arc<std::sync::Mutex<Vec<String>>>) -> MessageCallback {
        Box::new(move |frame: StompFrame| into.lock().unwrap().push(frame.body_text()))
    }

    #[tokio::test]
    async fn routes_messages_by_subscription() {
        let got_a = Arc::new(std::sync::Mutex::new(Vec::new()));
        let got_b = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut map: HashMap<String, MessageCallback> = HashMap::new();
        map.insert("sub-0".into(), recording(got_a.clone()));
        map.insert("sub-1".into(), recording(got_b.clone()));
        let subscriptions: Subscriptions = Arc::new(Mutex::new(map));

        let (on_disconnect, _) = disconnect_flag();
        let (write_tx, _write_rx) = mpsc::channel(16);
        let read = stream::iter(vec![
            message("sub-0", "one"),
            Ok(tungstenite::Message::Text("\n".into())),
            message("sub-1", "two"),
            message("sub-9", "lost"),
            message("sub-0", "three"),
        ]);

        read_pump(
            read,
            subscriptions,
            on_disconnect,
            Arc::new(AtomicBool::new(true)),
            None,
            write_tx,
            CancellationToken::new(),
        )
        .await;

        assert_eq!(*got_a.lock().unwrap(), vec!["one", "three"]);
        assert_eq!(*got_b.lock().unwrap(), vec!["two"]);
    }

    #[tokio::test]
    async fn oversized_content_length_is_dropped() {
        let got = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut map: HashMap<String, MessageCallback> = HashMap::new();
        map.insert("sub-0".into(), recording(got.clone()));
        let (on_disconnect, fired) = disconnect_flag();
        let connected = Arc::new(AtomicBool::new(true));
        let (write_tx, _write_rx) = mpsc::channel(16);

        let oversized = format!(
            "MESSAGE\nsubscription:sub-0\ncontent-length:{}\n\n{{}}\0",
            usize::MAX
        );
        let read = Box::pin(
            stream::iter(vec![
                message("sub-0", "before"),
                Ok(tungstenite::Message::Text(oversized.into())),
                message("sub-0", "after"),
            ])
            .chain(stream::pending()),
        );
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(read_pump(
            read,
            Arc::new(Mutex::new(map)),
            on_disconnect,
            connected.clone(),
            None,
            write_tx,
            cancel.clone(),
        ));

        tokio::time::timeout(Duration::from_secs(2), async {
            while got.lock().unwrap().len() < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("frames after the bad one are delivered");
        assert!(connected.load(Ordering::SeqCst));
        assert!(!pump.is_finished());

        cancel.cancel();
        pump.await.expect("pump must not panic");
        assert_eq!(*got.lock().unwrap(), vec!["before", "after"]);
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stream_end_fires_disconnect() {
        let (on_disconnect, fired) = disconnect_flag();
        let connected = Arc::new(AtomicBool::new(true));
        let (write_tx, _write_rx) = mpsc::channel(16);

        read_pump(
            stream::empty::<Msg>(),
            Arc::new(Mutex::new(HashMap::new())),
            on_disconnect,
            connected.clone(),
            None,
            write_tx,
            CancellationToken::new(),
        )
        .await;

        assert!(fired.load(Ordering::SeqCst));
        assert!(!connected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn error_frame_ends_session() {
        let (on_disconnect, fired) = disconnect_flag();
        let (write_tx, _write_rx) = mpsc::channel(16);
        let read = Box::pin(
            stream::iter(vec![text(
                StompFrame::new(Command::Error).header("message", "token expired"),
            )])
            .chain(stream::pending()),
        );

        read_pump(
            read,
            Arc::new(Mutex::new(HashMap::new())),
            on_disconnect,
            Arc::new(AtomicBool::new(true)),
            None,
            write_tx,
            CancellationToken::new(),
        )
        .await;

        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_does_not_fire_disconnect() {
        let (on_disconnect, fired) = disconnect_flag();
        let connected = Arc::new(AtomicBool::new(true));
        let (write_tx, _write_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        cancel.cancel();

        read_pump(
            stream::pending::<Msg>(),
            Arc::new(Mutex::new(HashMap::new())),
            on_disconnect,
            connected.clone(),
            Some(Duration::from_secs(10)),
            write_tx,
            cancel,
        )
        .await;

        assert!(!fired.load(Ordering::SeqCst));
        assert!(!connected.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn answers_ping_with_pong() {
        let (on_disconnect, _) = disconnect_flag();
        let (write_tx, mut write_rx) = mpsc::channel(16);
        let read = stream::iter(vec![Ok(tungstenite::Message::Ping(vec![1, 2].into()))]);

        read_pump(
            read,
            Arc::new(Mutex::new(HashMap::new())),
            on_disconnect,
            Arc::new(AtomicBool::new(true)),
            None,
            write_tx,
            CancellationToken::new(),
        )
        .await;

        let reply = write_rx.recv().await.unwrap();
        assert!(matches!(reply, Outbound::Pong(d) if d == vec![1u8, 2]));
    }

    #[tokio::test]
    async fn silence_past_heartbeat_window_disconnects() {
        tokio::time::pause();
        let (on_disconnect, fired) = disconnect_flag();
        let (write_tx, _write_rx) = mpsc::channel(16);

        read_pump(
            stream::pending::<Msg>(),
            Arc::new(Mutex::new(HashMap::new())),
            on_disconnect,
            Arc::new(AtomicBool::new(true)),
            Some(Duration::from_secs(10)),
            write_tx,
            CancellationToken::new(),
        )
        .await;

        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn heartbeats_keep_the_link_alive() {
        tokio::time::pause();
        let (on_disconnect, fired) = disconnect_flag();
        let (write_tx, _write_rx) = mpsc::channel(16);

        // One heart-beat every 20s against a 30s window.
        let beats = stream::unfold(0u32, |n| async move {
            if n == 3 {
                return None;
            }
            tokio::time::sleep(Duration::from_secs(20)).await;
            Some((Ok(tungstenite::Message::Text("\n".into())), n + 1))
        });
        let read = Box::pin(beats.chain(stream::pending()));

        let started = tokio::time::Instant::now();
        read_pump(
            read,
            Arc::new(Mutex::new(HashMap::new())),
            on_disconnect,
            Arc::new(AtomicBool::new(true)),
            Some(Duration::from_secs(10)),
            write_tx,
            CancellationToken::new(),
        )
        .await;

        // 3 beats at 20s each, then 30s of silence.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(90) && elapsed < Duration::from_secs(91));
        assert!(fired.load(Ordering::SeqCst));
    }
}
