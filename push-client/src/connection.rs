//! STOMP handshake: TCP connect, CONNECT/CONNECTED, heart-beat negotiation
//! and the three topic subscriptions.

use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::config::PushConfig;
use crate::error::PushError;
use crate::frame::Command;
use crate::frame::StompCodec;
use crate::frame::StompFrame;
use crate::frame::StompItem;
use crate::inbound::Topic;

pub(crate) type Transport = Framed<TcpStream, StompCodec>;

/// Negotiated heart-beat timings for one connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Heartbeat {
    /// How often we must send something.
    pub send_every: Option<Duration>,
    /// How long the broker may stay silent before the connection is dead.
    pub read_deadline: Option<Duration>,
}

/// Combine our `heart-beat` wish with the broker's answer (`sx,sy` in ms).
pub fn negotiate_heartbeat(
    client_send: Duration,
    client_receive: Duration,
    server_header: Option<&str>,
) -> Heartbeat {
    let (server_send, server_receive) = server_header
        .and_then(|raw| raw.split_once(','))
        .and_then(|(sx, sy)| Some((sx.trim().parse::<u64>().ok()?, sy.trim().parse::<u64>().ok()?)))
        .map(|(sx, sy)| (Duration::from_millis(sx), Duration::from_millis(sy)))
        .unwrap_or_default();

    let send_every = (!client_send.is_zero() && !server_receive.is_zero())
        .then(|| client_send.max(server_receive));
    let read_deadline = (!client_receive.is_zero() && !server_send.is_zero())
        .then(|| client_receive.max(server_send) * 2);
    Heartbeat {
        send_every,
        read_deadline,
    }
}

pub(crate) struct Established {
    pub transport: Transport,
    pub heartbeat: Heartbeat,
}

pub(crate) async fn open(config: &PushConfig, token: &str) -> Result<Established, PushError> {
    let stream = timeout(config.connect_timeout, TcpStream::connect(&config.address))
        .await
        .map_err(|_| PushError::Timeout(config.connect_timeout))?
        .map_err(|source| PushError::Connect {
            address: config.address.clone(),
            source,
        })?;
    if let Err(err) = stream.set_nodelay(true) {
        debug!("set_nodelay failed: {err}");
    }

    let mut transport = Framed::new(stream, StompCodec::new(config.max_frame_len));
    let connect = StompFrame::new(Command::Connect)
        .header("accept-version", "1.2")
        .header("host", config.host_header())
        .header(
            "heart-beat",
            format!(
                "{},{}",
                config.heartbeat_send.as_millis(),
                config.heartbeat_receive.as_millis()
            ),
        )
        .header("Authorization", format!("Bearer {token}"));
    transport.send(StompItem::Frame(connect)).await?;

    let connected = timeout(config.connect_timeout, await_connected(&mut transport))
        .await
        .map_err(|_| PushError::Timeout(config.connect_timeout))??;
    let heartbeat = negotiate_heartbeat(
        config.heartbeat_send,
        config.heartbeat_receive,
        connected.get("heart-beat"),
    );
    debug!(
        server = connected.get("server").unwrap_or("unknown"),
        ?heartbeat,
        "push broker accepted connection"
    );

    for topic in Topic::ALL {
        let subscribe = StompFrame::new(Command::Subscribe)
            .header("id", topic.subscription_id())
            .header("destination", config.destination(topic))
            .header("ack", "auto");
        transport.send(StompItem::Frame(subscribe)).await?;
    }

    Ok(Established {
        transport,
        heartbeat,
    })
}

async fn await_connected(transport: &mut Transport) -> Result<StompFrame, PushError> {
    while let Some(item) = transport.next().await {
        let frame = match item? {
            StompItem::Heartbeat => continue,
            StompItem::Frame(frame) => frame,
        };
        return match frame.command {
            Command::Connected => Ok(frame),
            Command::Error => Err(PushError::Rejected(error_text(&frame))),
            other => Err(PushError::Protocol(format!("expected CONNECTED, got {other}"))),
        };
    }
    Err(PushError::Closed)
}

/// Human-readable reason carried by an ERROR frame.
pub(crate) fn error_text(frame: &StompFrame) -> String {
    frame
        .get("message")
        .map(str::to_string)
        .or_else(|| {
            frame
                .body_text()
                .map(str::trim)
                .filter(|body| !body.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "unspecified broker error".to_string())
}
