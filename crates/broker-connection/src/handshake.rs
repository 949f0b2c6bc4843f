//! STOMP CONNECT handshake and heart-beat negotiation.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tracing::trace;

use gnbwatch_protocol::constants::{STOMP_HANDSHAKE_TIMEOUT, STOMP_VERSION};
use gnbwatch_protocol::stomp::{self, Command, Inbound, StompFrame};

use crate::client::BrokerError;
use crate::pumps::write::Outbound;

/// Session parameters agreed in the CONNECTED frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    pub version: String,
    /// Interval at which we must send heart-beats, if any.
    pub outgoing: Option<Duration>,
    /// Interval at which the broker promised to send, if any.
    pub incoming: Option<Duration>,
}

/// Builds the CONNECT frame.
pub fn connect_frame(host: &str, headers: &[(String, String)], heartbeat: Duration) -> StompFrame {
    let hb = heartbeat.as_millis();
    StompFrame::new(Command::Connect)
        .header("accept-version", STOMP_VERSION)
        .header("host", host)
        .header("heart-beat", format!("{hb},{hb}"))
        .headers(headers)
}

/// Applies the STOMP heart-beat rules to our offer and the broker's reply.
pub fn negotiate(heartbeat: Duration, connected: &StompFrame) -> Negotiated {
    let ours = heartbeat.as_millis() as u64;
    let (sx, sy) = connected
        .get_header("heart-beat")
        .and_then(|v| {
            let (a, b) = v.split_once(',')?;
            Some((a.trim().parse::<u64>().ok()?, b.trim().parse::<u64>().ok()?))
        })
        .unwrap_or((0, 0));

    let agree = |theirs: u64| (ours > 0 && theirs > 0).then(|| Duration::from_millis(ours.max(theirs)));

    Negotiated {
        version: connected.get_header("version").unwrap_or("1.0").to_string(),
        outgoing: agree(sy),
        incoming: agree(sx),
    }
}

/// Host name sent in the CONNECT `host` header.
fn host_of(url: &str) -> String {
    url.parse::<tungstenite::http::Uri>()
        .ok()
        .and_then(|u| u.host().map(str::to_string))
        .unwrap_or_else(|| "/".into())
}

/// Sends CONNECT and waits for CONNECTED.
pub(crate) async fn perform_handshake<S>(
    write_tx: &mpsc::Sender<Outbound>,
    read: &mut S,
    url: &str,
    headers: &[(String, String)],
    heartbeat: Duration,
) -> Result<Negotiated, BrokerError>
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let frame = connect_frame(&host_of(url), headers, heartbeat);
    write_tx
        .send(Outbound::Frame(frame))
        .await
        .map_err(|_| BrokerError::Closed)?;

    let reply = tokio::time::timeout(STOMP_HANDSHAKE_TIMEOUT, next_frame(read))
        .await
        .map_err(|_| BrokerError::Timeout)??;

    match reply.command {
        Command::Connected => Ok(negotiate(heartbeat, &reply)),
        Command::Error => {
            let message = reply
                .get_header("message")
                .map(str::to_string)
                .unwrap_or_else(|| reply.body_text());
            Err(BrokerError::Rejected(message))
        }
        other => Err(BrokerError::UnexpectedFrame(other)),
    }
}

/// Reads until the first complete frame, skipping heart-beats.
async fn next_frame<S>(read: &mut S) -> Result<StompFrame, BrokerError>
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        let data = match read.next().await {
            Some(Ok(tungstenite::Message::Text(text))) => text.as_bytes().to_vec(),
            Some(Ok(tungstenite::Message::Binary(bytes))) => bytes.to_vec(),
            Some(Ok(tungstenite::Message::Close(_))) | None => return Err(BrokerError::Closed),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        };
        match stomp::decode(&data)? {
            Inbound::Heartbeat => trace!("heart-beat during handshake"),
            Inbound::Frame(frame) => return Ok(frame),
        }
    }
}
