#![allow(clippy::unwrap_used, clippy::expect_used)]
//! In-process STOMP broker for push client tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use beacon_push_client::frame::Command;
use beacon_push_client::frame::StompCodec;
use beacon_push_client::frame::StompFrame;
use beacon_push_client::frame::StompItem;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

/// Token the broker refuses with an ERROR frame.
pub const REJECTED_TOKEN: &str = "bad-token";

enum Control {
    Send(StompItem),
    Close,
}

#[derive(Default)]
struct Shared {
    /// CONNECT frames received, in order.
    connects: Mutex<Vec<StompFrame>>,
    /// Every frame received after CONNECT, in order.
    frames: Mutex<Vec<StompFrame>>,
    sessions: Mutex<Vec<mpsc::UnboundedSender<Control>>>,
}

pub struct MockBroker {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept_task: JoinHandle<()>,
}

impl MockBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shared = Arc::new(Shared::default());
        let accept_shared = Arc::clone(&shared);
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&accept_shared)));
            }
        });
        Self {
            addr,
            shared,
            accept_task,
        }
    }

    pub fn address(&self) -> String {
        self.addr.to_string()
    }

    /// Number of CONNECT handshakes seen.
    pub fn connection_count(&self) -> usize {
        self.shared.connects.lock().unwrap().len()
    }

    pub fn connect_frames(&self) -> Vec<StompFrame> {
        self.shared.connects.lock().unwrap().clone()
    }

    pub fn received(&self, command: Command) -> Vec<StompFrame> {
        self.shared
            .frames
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.command == command)
            .cloned()
            .collect()
    }

    /// `(id, destination)` of every SUBSCRIBE received.
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        self.received(Command::Subscribe)
            .into_iter()
            .map(|f| {
                (
                    f.get("id").unwrap_or_default().to_string(),
                    f.get("destination").unwrap_or_default().to_string(),
                )
            })
            .collect()
    }

    /// Deliver a MESSAGE on `subscription` to the newest session.
    pub fn send_message(&self, subscription: &str, body: &str) {
        let frame = StompFrame::new(Command::Message)
            .header("subscription", subscription)
            .header("destination", format!("/mock/{subscription}"))
            .header("message-id", format!("m-{}", body.len()))
            .header("content-type", "application/json")
            .with_body(body.to_string());
        self.send_raw(StompItem::Frame(frame));
    }

    pub fn send_raw(&self, item: StompItem) {
        let sessions = self.shared.sessions.lock().unwrap();
        let session = sessions.last().expect("no client session");
        let _ = session.send(Control::Send(item));
    }

    /// Drop every open connection without a DISCONNECT.
    pub fn drop_connections(&self) {
        for session in self.shared.sessions.lock().unwrap().drain(..) {
            let _ = session.send(Control::Close);
        }
    }

    /// Stop accepting and drop open connections. The port then refuses
    /// connections.
    pub fn shutdown(&self) {
        self.accept_task.abort();
        self.drop_connections();
    }
}

impl Drop for MockBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let mut framed = Framed::new(stream, StompCodec::default());

    let connect = loop {
        match framed.next().await {
            Some(Ok(StompItem::Frame(frame))) => break frame,
            Some(Ok(StompItem::Heartbeat)) => continue,
            _ => return,
        }
    };
    shared.connects.lock().unwrap().push(connect.clone());

    if connect.get("Authorization") == Some(&format!("Bearer {REJECTED_TOKEN}")[..]) {
        let error = StompFrame::new(Command::Error)
            .header("message", "invalid token")
            .with_body("authentication failed");
        let _ = framed.send(StompItem::Frame(error)).await;
        return;
    }

    let connected = StompFrame::new(Command::Connected)
        .header("version", "1.2")
        .header("heart-beat", "0,0")
        .header("server", "mock-broker/1.0");
    if framed.send(StompItem::Frame(connected)).await.is_err() {
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    shared.sessions.lock().unwrap().push(tx);

    loop {
        tokio::select! {
            incoming = framed.next() => match incoming {
                Some(Ok(StompItem::Frame(frame))) => {
                    let done = frame.command == Command::Disconnect;
                    shared.frames.lock().unwrap().push(frame);
                    if done {
                        return;
                    }
                }
                Some(Ok(StompItem::Heartbeat)) => {}
                _ => return,
            },
            control = rx.recv() => match control {
                Some(Control::Send(item)) => {
                    if framed.send(item).await.is_err() {
                        return;
                    }
                }
                Some(Control::Close) | None => return,
            },
        }
    }
}

/// An address nothing listens on.
pub async fn refused_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
