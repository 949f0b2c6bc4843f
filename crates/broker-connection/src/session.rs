//! Broker session: connect with retry, subscribe, disconnect.
//!
//! [`BrokerSession`] is generic over a [`Connector`] so the retry loop can be
//! driven against a scripted transport in tests. [`WsConnector`] is the real
//! STOMP-over-WebSocket transport.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use gnbwatch_protocol::constants::STOMP_HEARTBEAT;

use crate::client::{BrokerError, StompClient};
use crate::types::{DisconnectCallback, MessageCallback, RetryPolicy};

/// A boxed future returned by transport trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An established broker connection.
pub trait Connection: Send + Sync + 'static {
    /// Subscribes to `destination`; returns the subscription id.
    fn subscribe<'a>(
        &'a self,
        destination: &'a str,
        headers: &'a [(String, String)],
        on_message: MessageCallback,
    ) -> BoxFuture<'a, Result<String, BrokerError>>;

    /// Sets the callback fired when the link drops without a local close.
    fn set_disconnect_callback(&self, cb: DisconnectCallback) -> BoxFuture<'_, ()>;

    /// Closes the connection. Must be idempotent and must not fail.
    fn close(&self) -> BoxFuture<'_, ()>;

    fn is_connected(&self) -> bool;
}

/// Opens connections to a broker.
pub trait Connector: Send + Sync + 'static {
    type Connection: Connection;

    /// Makes a single connection attempt.
    fn connect<'a>(
        &'a self,
        url: &'a str,
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<Self::Connection, BrokerError>>;
}

impl Connection for StompClient {
    fn subscribe<'a>(
        &'a self,
        destination: &'a str,
        headers: &'a [(String, String)],
        on_message: MessageCallback,
    ) -> BoxFuture<'a, Result<String, BrokerError>> {
        Box::pin(StompClient::subscribe(self, destination, headers, on_message))
    }

    fn set_disconnect_callback(&self, cb: DisconnectCallback) -> BoxFuture<'_, ()> {
        Box::pin(StompClient::set_disconnect_callback(self, cb))
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(StompClient::close(self))
    }

    fn is_connected(&self) -> bool {
        StompClient::is_connected(self)
    }
}

/// STOMP over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    /// Heart-beat interval offered in CONNECT; zero disables heart-beats.
    pub heartbeat: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self {
            heartbeat: STOMP_HEARTBEAT,
        }
    }
}

impl Connector for WsConnector {
    type Connection = StompClient;

    fn connect<'a>(
        &'a self,
        url: &'a str,
        headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<StompClient, BrokerError>> {
        Box::pin(StompClient::connect(url, headers, self.heartbeat))
    }
}

/// Bearer authorization header sent with CONNECT and SUBSCRIBE.
pub fn auth_headers(access_token: &str) -> Vec<(String, String)> {
    vec![("Authorization".into(), format!("Bearer {access_token}"))]
}

/// One pub/sub connection to the broker.
pub struct BrokerSession<C: Connector> {
    connector: C,
    url: String,
    headers: Vec<(String, String)>,
    retry: RetryPolicy,
    connection: Mutex<Option<Arc<C::Connection>>>,
    attempts: AtomicU32,
    closed: AtomicBool,
}

impl<C: Connector> BrokerSession<C> {
    pub fn new(
        connector: C,
        url: impl Into<String>,
        headers: Vec<(String, String)>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            connector,
            url: url.into(),
            headers,
            retry,
            connection: Mutex::new(None),
            attempts: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Connects, retrying failed attempts according to the retry policy.
    ///
    /// Returns [`BrokerError::Cancelled`] if `cancel` fires or the session is
    /// disconnected while attempts are in progress.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), BrokerError> {
        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() || self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::Cancelled);
            }
            attempt = attempt.saturating_add(1);
            self.attempts.store(attempt, Ordering::Relaxed);
            debug!(url = %self.url, attempt, "connecting to broker");

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
                r = self.connector.connect(&self.url, &self.headers) => r,
            };

            let err = match result {
                Ok(conn) => return self.install(Arc::new(conn), attempt).await,
                Err(e) => e,
            };

            if !err.is_retryable() {
                warn!(attempt, error = %err, "broker connection failed, not retrying");
                return Err(err);
            }
            if !self.retry.allows_retry_after(attempt) {
                warn!(attempt, error = %err, "broker connection failed, giving up");
                return Err(BrokerError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                attempt,
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "broker connection failed, retrying"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Err(BrokerError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn install(&self, conn: Arc<C::Connection>, attempt: u32) -> Result<(), BrokerError> {
        {
            let mut slot = self.connection.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.closed.load(Ordering::Acquire) {
                *slot = Some(conn);
                info!(attempt, "connected to broker");
                return Ok(());
            }
        }
        // Disconnected while the attempt was in flight.
        conn.close().await;
        Err(BrokerError::Cancelled)
    }

    fn current(&self) -> Option<Arc<C::Connection>> {
        self.connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Subscribes `on_message` to `topic` using the session's auth headers.
    pub async fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<String, BrokerError> {
        let conn = self.current().ok_or(BrokerError::Closed)?;
        conn.subscribe(topic, &self.headers, on_message).await
    }

    /// Registers the callback fired when the link drops unexpectedly.
    pub async fn on_connection_lost(&self, cb: DisconnectCallback) -> Result<(), BrokerError> {
        let conn = self.current().ok_or(BrokerError::Closed)?;
        conn.set_disconnect_callback(cb).await;
        Ok(())
    }

    /// Closes the connection. Idempotent, safe before any connect, never fails.
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let conn = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(conn) = conn {
            conn.close().await;
            info!("disconnected from broker");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current().is_some_and(|c| c.is_connected())
    }

    /// Number of connection attempts made by the last [`connect`](Self::connect).
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBroker, FakeConnector};
    use crate::types::Backoff;

    fn session(broker: &Arc<FakeBroker>, retry: RetryPolicy) -> BrokerSession<FakeConnector> {
        BrokerSession::new(
            FakeConnector(broker.clone()),
            "ws://broker.test/ws",
            auth_headers("tok"),
            retry,
        )
    }

    #[test]
    fn auth_headers_are_bearer() {
        assert_eq!(
            auth_headers("abc"),
            vec![("Authorization".to_string(), "Bearer abc".to_string())]
        );
    }

    #[tokio::test]
    async fn retries_until_success_at_fixed_interval() {
        tokio::time::pause();
        let broker = FakeBroker::failing(4);
        let session = session(&broker, RetryPolicy::default());

        session.connect(&CancellationToken::new()).await.unwrap();

        assert!(session.is_connected());
        assert_eq!(session.attempts(), 5);
        let calls = broker.calls();
        assert_eq!(calls.len(), 5);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(500));
        }
    }

    #[tokio::test]
    async fn bounded_retry_gives_up() {
        tokio::time::pause();
        let broker = FakeBroker::failing(u32::MAX);
        let retry = RetryPolicy {
            max_attempts: Some(3),
            ..RetryPolicy::default()
        };
        let session = session(&broker, retry);

        let err = session.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BrokerError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(broker.calls().len(), 3);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn rejected_connect_fails_without_retrying() {
        tokio::time::pause();
        let broker = FakeBroker::rejecting("invalid token");
        let session = session(&broker, RetryPolicy::default());

        let started = tokio::time::Instant::now();
        let err = session.connect(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, BrokerError::Rejected(ref m) if m == "invalid token"));
        assert_eq!(broker.calls().len(), 1);
        assert_eq!(session.attempts(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn exponential_backoff_still_connects() {
        tokio::time::pause();
        let broker = FakeBroker::failing(2);
        let retry = RetryPolicy {
            interval: Duration::from_millis(100),
            max_attempts: None,
            backoff: Backoff::Exponential {
                factor: 2.0,
                max: Duration::from_secs(1),
            },
        };
        let session = session(&broker, retry);
        session.connect(&CancellationToken::new()).await.unwrap();
        assert_eq!(broker.calls().len(), 3);
    }

    #[tokio::test]
    async fn cancel_stops_retrying() {
        tokio::time::pause();
        let broker = FakeBroker::failing(u32::MAX);
        let session = Arc::new(session(&broker, RetryPolicy::unbounded(Duration::from_millis(500))));
        let cancel = CancellationToken::new();

        let s = session.clone();
        let c = cancel.clone();
        let handle = tokio::spawn(async move { s.connect(&c).await });

        tokio::time::sleep(Duration::from_millis(1600)).await;
        cancel.cancel();
        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled));
        assert!(broker.calls().len() >= 3);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent_and_safe_before_connect() {
        let broker = FakeBroker::failing(0);
        let session = session(&broker, RetryPolicy::default());
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(broker.closes(), 0);

        // A disconnected session does not connect again.
        let err = session.connect(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, BrokerError::Cancelled));
    }

    #[tokio::test]
    async fn disconnect_closes_once() {
        let broker = FakeBroker::failing(0);
        let session = session(&broker, RetryPolicy::default());
        session.connect(&CancellationToken::new()).await.unwrap();

        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(broker.closes(), 1);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn subscribe_uses_session_headers() {
        let broker = FakeBroker::failing(0);
        let session = session(&broker, RetryPolicy::default());
        session.connect(&CancellationToken::new()).await.unwrap();

        let id = session
            .subscribe("/topic/t1.m1.gnb.telemetry", Box::new(|_| {}))
            .await
            .unwrap();
        assert_eq!(id, "sub-0");
        assert_eq!(
            broker.subscriptions(),
            vec![("/topic/t1.m1.gnb.telemetry".to_string(), auth_headers("tok"))]
        );
    }

    #[tokio::test]
    async fn subscribe_before_connect_fails() {
        let broker = FakeBroker::failing(0);
        let session = session(&broker, RetryPolicy::default());
        let err = session.subscribe("/topic/x", Box::new(|_| {})).await.unwrap_err();
        assert!(matches!(err, BrokerError::Closed));
    }
}
