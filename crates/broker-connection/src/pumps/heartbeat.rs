//! Outgoing STOMP heart-beats.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::write::Outbound;

/// Sends a bare EOL every `period` so the broker keeps the session open.
pub(crate) async fn heartbeat_pump(
    write_tx: mpsc::Sender<Outbound>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                if write_tx.send(Outbound::Heartbeat).await.is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn heartbeat_pump_stops_on_cancel() {
        let (tx, _rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            heartbeat_pump(tx, Duration::from_secs(10), c).await;
        });

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");
    }

    #[tokio::test]
    async fn heartbeat_pump_sends_eol_each_period() {
        tokio::time::pause();
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let c = cancel.clone();
        let handle = tokio::spawn(heartbeat_pump(tx, Duration::from_secs(10), c));

        for _ in 0..2 {
            assert!(matches!(rx.recv().await, Some(Outbound::Heartbeat)));
        }
        cancel.cancel();
        handle.await.unwrap();
    }
}
