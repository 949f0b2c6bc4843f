//! STOMP client over a WebSocket connection to the broker.
//!
//! One read pump dispatches MESSAGE frames to subscription callbacks, one
//! write pump serialises outbound frames, and an optional heart-beat pump
//! keeps the link alive at the negotiated interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gnbwatch_protocol::constants::STOMP_MAX_FRAME_SIZE;
use gnbwatch_protocol::{Command, StompError, StompFrame};

use crate::handshake::{Negotiated, perform_handshake};
use crate::pumps::write::Outbound;
use crate::types::{DisconnectCallback, MessageCallback};

/// Time allowed for the pumps to finish once the client is closed.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Errors from the broker connection.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("STOMP error: {0}")]
    Stomp(#[from] StompError),

    #[error("broker rejected the session: {0}")]
    Rejected(String),

    #[error("unexpected {0} frame during handshake")]
    UnexpectedFrame(Command),

    #[error("handshake timed out")]
    Timeout,

    #[error("connection closed")]
    Closed,

    #[error("connection attempt cancelled")]
    Cancelled,

    #[error("gave up after {attempts} connection attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<BrokerError> },
}

impl BrokerError {
    /// Whether another connection attempt could succeed.
    ///
    /// A malformed broker address never will, and a broker that answered
    /// CONNECT with ERROR would reject the same credentials again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            BrokerError::Ws(tungstenite::Error::Url(_))
                | BrokerError::Rejected(_)
                | BrokerError::Cancelled
                | BrokerError::Closed
                | BrokerError::RetriesExhausted { .. }
        )
    }
}

/// Subscription id → callback.
pub(crate) type Subscriptions = Arc<Mutex<HashMap<String, MessageCallback>>>;

/// Shared slot for the connection-lost callback.
pub(crate) type DisconnectSlot = Arc<Mutex<Option<DisconnectCallback>>>;

/// A live STOMP session with the broker.
pub struct StompClient {
    write_tx: mpsc::Sender<Outbound>,
    subscriptions: Subscriptions,
    on_disconnect: DisconnectSlot,
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    next_subscription: AtomicU64,
    negotiated: Negotiated,
    read_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    write_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    heartbeat_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl StompClient {
    /// Opens the WebSocket, performs the STOMP CONNECT handshake and starts
    /// the pumps.
    ///
    /// `headers` are sent with CONNECT, typically the bearer
    /// `Authorization` header.
    pub async fn connect(
        url: &str,
        headers: &[(String, String)],
        heartbeat: Duration,
    ) -> Result<Self, BrokerError> {
        let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
        ws_config.max_message_size = Some(STOMP_MAX_FRAME_SIZE);
        ws_config.max_frame_size = Some(STOMP_MAX_FRAME_SIZE);
        let (ws_stream, _) =
            tokio_tungstenite::connect_async_with_config(url, Some(ws_config), false).await?;
        let (write, mut read) = ws_stream.split();

        let (write_tx, write_rx) = mpsc::channel::<Outbound>(256);
        let cancel = CancellationToken::new();

        let write_handle = {
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::write::write_pump(write, write_rx, cancel))
        };

        let negotiated =
            match perform_handshake(&write_tx, &mut read, url, headers, heartbeat).await {
                Ok(n) => n,
                Err(e) => {
                    cancel.cancel();
                    return Err(e);
                }
            };
        info!(
            version = %negotiated.version,
            outgoing_ms = negotiated.outgoing.map(|d| d.as_millis() as u64),
            incoming_ms = negotiated.incoming.map(|d| d.as_millis() as u64),
            "STOMP session established"
        );

        let subscriptions: Subscriptions = Arc::new(Mutex::new(HashMap::new()));
        let on_disconnect: DisconnectSlot = Arc::new(Mutex::new(None));
        let connected = Arc::new(AtomicBool::new(true));

        let read_handle = {
            let subscriptions = subscriptions.clone();
            let on_disconnect = on_disconnect.clone();
            let connected = connected.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::read::read_pump(
                read,
                subscriptions,
                on_disconnect,
                connected,
                negotiated.incoming,
                write_tx,
                cancel,
            ))
        };

        let heartbeat_handle = negotiated.outgoing.map(|period| {
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(crate::pumps::heartbeat::heartbeat_pump(
                write_tx, period, cancel,
            ))
        });

        Ok(Self {
            write_tx,
            subscriptions,
            on_disconnect,
            connected,
            closed: AtomicBool::new(false),
            next_subscription: AtomicU64::new(0),
            negotiated,
            read_handle: std::sync::Mutex::new(Some(read_handle)),
            write_handle: std::sync::Mutex::new(Some(write_handle)),
            heartbeat_handle,
            cancel,
        })
    }

    /// Subscribes to `destination` and routes its messages to `on_message`.
    ///
    /// Returns the subscription id.
    pub async fn subscribe(
        &self,
        destination: &str,
        headers: &[(String, String)],
        on_message: MessageCallback,
    ) -> Result<String, BrokerError> {
        if !self.is_connected() {
            return Err(BrokerError::Closed);
        }
        let id = format!(
            "sub-{}",
            self.next_subscription.fetch_add(1, Ordering::Relaxed)
        );
        // Register first so no MESSAGE for this id can slip past.
        self.subscriptions
            .lock()
            .await
            .insert(id.clone(), on_message);

        let frame = StompFrame::new(Command::Subscribe)
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "auto")
            .headers(headers);
        if let Err(e) = self.send(frame).await {
            self.subscriptions.lock().await.remove(&id);
            return Err(e);
        }
        debug!(subscription = %id, destination, "subscribed");
        Ok(id)
    }

    /// Sets the callback fired when the link drops unexpectedly.
    pub async fn set_disconnect_callback(&self, cb: DisconnectCallback) {
        *self.on_disconnect.lock().await = Some(cb);
    }

    /// Whether the link is up and has not been closed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.closed.load(Ordering::Acquire)
    }

    /// Parameters agreed with the broker during CONNECT.
    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    async fn send(&self, frame: StompFrame) -> Result<(), BrokerError> {
        self.write_tx
            .send(Outbound::Frame(frame))
            .await
            .map_err(|_| BrokerError::Closed)
    }

    /// Sends DISCONNECT and stops the pumps.
    ///
    /// Idempotent. Returns once the read pump has exited, so no callback is
    /// running or will run afterwards.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.connected.store(false, Ordering::Release);

        // Best effort: the broker may already be gone.
        let receipt = uuid::Uuid::new_v4().to_string();
        let disconnect = StompFrame::new(Command::Disconnect).header("receipt", receipt);
        let _ = self.send(disconnect).await;
        self.cancel.cancel();

        let read = take_handle(&self.read_handle);
        let write = take_handle(&self.write_handle);
        for (name, handle) in [("read", read), ("write", write)] {
            let Some(mut handle) = handle else { continue };
            if tokio::time::timeout(CLOSE_GRACE, &mut handle).await.is_err() {
                warn!(pump = name, "pump did not stop in time, aborting");
                handle.abort();
            }
        }
        debug!("STOMP client closed");
    }
}

fn take_handle(slot: &std::sync::Mutex<Option<JoinHandle<()>>>) -> Option<JoinHandle<()>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner).take()
}

impl Drop for StompClient {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(h) = take_handle(&self.read_handle) {
            h.abort();
        }
        if let Some(h) = take_handle(&self.write_handle) {
            h.abort();
        }
        if let Some(h) = &self.heartbeat_handle {
            h.abort();
        }
    }
}
