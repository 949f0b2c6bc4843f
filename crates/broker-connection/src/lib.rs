//! Broker connection for the telemetry subscriber.
//!
//! Provides a STOMP-over-WebSocket client, a retrying broker session and the
//! subscription worker that buffers telemetry and owns the shutdown/export
//! sequence.

pub mod client;
pub mod handshake;
pub mod lifecycle;
mod pumps;
pub mod session;
#[cfg(test)]
mod testing;
pub mod types;
pub mod worker;

pub use client::{BrokerError, StompClient};
pub use lifecycle::Lifecycle;
pub use session::{BoxFuture, BrokerSession, Connection, Connector, WsConnector, auth_headers};
pub use types::{Backoff, DisconnectCallback, MessageCallback, RetryPolicy};
pub use worker::{ShutdownReport, SubscriptionWorker, WorkerConfig, WorkerError, on_frame};
