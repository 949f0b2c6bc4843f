//! Scripted in-memory broker used by the session and worker tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use tokio::time::Instant;

use gnbwatch_protocol::{Command, StompFrame};

use crate::client::BrokerError;
use crate::session::{BoxFuture, Connection, Connector};
use crate::types::{DisconnectCallback, MessageCallback};

/// Fails the first `failures` connect calls, then accepts.
#[derive(Default)]
pub(crate) struct FakeBroker {
    failures: u32,
    rejection: Option<String>,
    calls: Mutex<Vec<Instant>>,
    subscriptions: Mutex<Vec<(String, Vec<(String, String)>)>>,
    callbacks: Mutex<Vec<MessageCallback>>,
    on_disconnect: Mutex<Option<DisconnectCallback>>,
    connected: AtomicBool,
    closes: AtomicU32,
}

impl FakeBroker {
    pub(crate) fn failing(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            ..Self::default()
        })
    }

    /// Answers every CONNECT with an ERROR frame carrying `message`.
    pub(crate) fn rejecting(message: &str) -> Arc<Self> {
        Arc::new(Self {
            rejection: Some(message.to_string()),
            ..Self::default()
        })
    }

    pub(crate) fn calls(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn subscriptions(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub(crate) fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }

    /// Delivers a MESSAGE with `body` to every subscriber.
    pub(crate) fn deliver(&self, body: &str) {
        let frame = StompFrame::new(Command::Message)
            .header("subscription", "sub-0")
            .body(body.as_bytes().to_vec());
        for cb in self.callbacks.lock().unwrap().iter() {
            cb(frame.clone());
        }
    }

    /// Simulates the broker dropping the link.
    pub(crate) fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(cb) = self.on_disconnect.lock().unwrap().as_ref() {
            cb();
        }
    }
}

pub(crate) struct FakeConnector(pub(crate) Arc<FakeBroker>);

pub(crate) struct FakeConnection(Arc<FakeBroker>);

impl Connector for FakeConnector {
    type Connection = FakeConnection;

    fn connect<'a>(
        &'a self,
        _url: &'a str,
        _headers: &'a [(String, String)],
    ) -> BoxFuture<'a, Result<FakeConnection, BrokerError>> {
        Box::pin(async move {
            let n = {
                let mut calls = self.0.calls.lock().unwrap();
                calls.push(Instant::now());
                calls.len() as u32
            };
            if let Some(message) = &self.0.rejection {
                return Err(BrokerError::Rejected(message.clone()));
            }
            if n <= self.0.failures {
                let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
                return Err(BrokerError::Ws(io.into()));
            }
            self.0.connected.store(true, Ordering::SeqCst);
            Ok(FakeConnection(self.0.clone()))
        })
    }
}

impl Connection for FakeConnection {
    fn subscribe<'a>(
        &'a self,
        destination: &'a str,
        headers: &'a [(String, String)],
        on_message: MessageCallback,
    ) -> BoxFuture<'a, Result<String, BrokerError>> {
        Box::pin(async move {
            let mut subs = self.0.subscriptions.lock().unwrap();
            let id = format!("sub-{}", subs.len());
            subs.push((destination.to_string(), headers.to_vec()));
            self.0.callbacks.lock().unwrap().push(on_message);
            Ok(id)
        })
    }

    fn set_disconnect_callback(&self, cb: DisconnectCallback) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            *self.0.on_disconnect.lock().unwrap() = Some(cb);
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            self.0.connected.store(false, Ordering::SeqCst);
        })
    }

    fn is_connected(&self) -> bool {
        self.0.connected.load(Ordering::SeqCst)
    }
}
