//! Connection manager: one live STOMP session at a time, bounded
//! fixed-delay reconnect, inbound dispatch to the listener registry.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::time::Duration;

use backon::BackoffBuilder;
use backon::ConstantBackoff;
use backon::ConstantBuilder;
use beacon_protocol::ConnectionState;
use futures::SinkExt;
use futures::StreamExt;
use futures::stream::SplitSink;
use futures::stream::SplitStream;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::Interval;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use crate::config::PushConfig;
use crate::connection;
use crate::connection::Established;
use crate::connection::Transport;
use crate::error::PushError;
use crate::frame::Command;
use crate::frame::StompFrame;
use crate::frame::StompItem;
use crate::inbound::InboundError;
use crate::inbound::Topic;
use crate::inbound::decode_message;
use crate::registry::ListenerRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 64;
const OUTBOUND_CHANNEL_CAPACITY: usize = 32;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Connection status changes, for surfacing to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    Connected,
    Disconnected,
    /// A connect attempt failed or a live connection dropped.
    ConnectionError(String),
    Reconnecting {
        attempt: usize,
        max_attempts: usize,
        delay: Duration,
    },
    /// Retries are used up; only an explicit `connect` starts over.
    ReconnectExhausted { attempts: usize },
    /// An inbound frame was dropped as unreadable.
    FrameRejected(String),
}

/// Handle to the push connection. Clones share the same connection.
#[derive(Clone, Debug)]
pub struct PushClient {
    inner: Arc<Inner>,
}

struct Inner {
    config: PushConfig,
    registry: ListenerRegistry,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<PushEvent>,
    control: Mutex<Control>,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushClient")
            .field("address", &self.config.address)
            .field("state", &*self.state_tx.borrow())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Control {
    /// Bumped by `disconnect` and by every new live session. Work started
    /// under an older generation must not touch current state.
    generation: u64,
    token: Option<String>,
    live: Option<LiveSession>,
    reconnect_timer: Option<JoinHandle<()>>,
    backoff: Option<ConstantBackoff>,
    attempts: usize,
    exhausted: bool,
}

struct LiveSession {
    generation: u64,
    cancel: CancellationToken,
    outbound: mpsc::Sender<StompItem>,
    tasks: Vec<JoinHandle<()>>,
}

impl PushClient {
    pub fn new(config: PushConfig) -> Self {
        Self::with_registry(config, ListenerRegistry::new())
    }

    pub fn with_registry(config: PushConfig, registry: ListenerRegistry) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                state_tx,
                events_tx,
                control: Mutex::new(Control::default()),
            }),
        }
    }

    pub fn config(&self) -> &PushConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.inner.registry
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PushEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Reconnect attempts scheduled since the last successful connect.
    pub fn reconnect_attempts(&self) -> usize {
        self.inner.lock_control().attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.inner.lock_control().exhausted
    }

    /// Open the connection and subscribe to the three topics.
    ///
    /// A no-op while already connecting or connected. On failure the state
    /// returns to `Disconnected`, a reconnect is scheduled and the error is
    /// returned. Calling this after retries were exhausted starts a fresh
    /// retry budget.
    pub async fn connect(&self, token: &str) -> Result<(), PushError> {
        let generation = {
            let mut control = self.inner.lock_control();
            let state = self.state();
            if state != ConnectionState::Disconnected {
                debug!(%state, "connect ignored");
                return Ok(());
            }
            if let Some(timer) = control.reconnect_timer.take() {
                timer.abort();
            }
            if control.exhausted {
                control.exhausted = false;
                control.backoff = None;
                control.attempts = 0;
            }
            control.token = Some(token.to_string());
            self.inner.set_state(ConnectionState::Connecting);
            control.generation
        };

        info!(address = %self.inner.config.address, "connecting to push broker");
        let result = connection::open(&self.inner.config, token).await;

        let mut control = self.inner.lock_control();
        if control.generation != generation {
            debug!("push handshake finished after disconnect; dropping it");
            return Err(PushError::Aborted);
        }
        match result {
            Ok(established) => {
                control.generation += 1;
                control.attempts = 0;
                control.backoff = None;
                let live = spawn_session(&self.inner, established, control.generation);
                control.live = Some(live);
                self.inner.set_state(ConnectionState::Connected);
                drop(control);
                info!(address = %self.inner.config.address, "push connection established");
                self.inner.emit(PushEvent::Connected);
                Ok(())
            }
            Err(err) => {
                self.inner.set_state(ConnectionState::Disconnected);
                warn!("push connect failed: {err}");
                self.inner.emit(PushEvent::ConnectionError(err.to_string()));
                self.inner.schedule_reconnect(&mut control);
                Err(err)
            }
        }
    }

    /// Connect unless connected, connecting, waiting on a reconnect timer,
    /// or out of retries. Meant for a periodic health check.
    pub async fn ensure_connected(&self, token: &str) -> Result<(), PushError> {
        {
            let control = self.inner.lock_control();
            if control.exhausted
                || control.reconnect_timer.is_some()
                || self.state() != ConnectionState::Disconnected
            {
                return Ok(());
            }
        }
        debug!("health check found push connection down");
        self.connect(token).await
    }

    /// Cancel any pending reconnect and close the live connection.
    /// Safe to call in any state.
    pub async fn disconnect(&self) {
        let (previous, live) = {
            let mut control = self.inner.lock_control();
            control.generation += 1;
            if let Some(timer) = control.reconnect_timer.take() {
                timer.abort();
            }
            control.backoff = None;
            control.attempts = 0;
            control.exhausted = false;
            control.token = None;
            let previous = self.inner.state_tx.send_replace(ConnectionState::Disconnected);
            (previous, control.live.take())
        };

        if let Some(live) = live {
            if live
                .outbound
                .try_send(StompItem::Frame(StompFrame::new(Command::Disconnect)))
                .is_err()
            {
                debug!("writer gone before DISCONNECT could be queued");
            }
            live.cancel.cancel();
            for task in live.tasks {
                let abort = task.abort_handle();
                if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                    abort.abort();
                }
            }
        }

        if previous != ConnectionState::Disconnected {
            info!("push connection closed");
            self.inner.emit(PushEvent::Disconnected);
        }
    }
}

impl Inner {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: PushEvent) {
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    fn schedule_reconnect(self: &Arc<Self>, control: &mut Control) {
        if control.reconnect_timer.is_some() {
            return;
        }
        let max_attempts = self.config.max_reconnect_attempts;
        let backoff = control.backoff.get_or_insert_with(|| {
            ConstantBuilder::default()
                .with_delay(self.config.reconnect_delay)
                .with_max_times(max_attempts)
                .build()
        });

        let Some(delay) = backoff.next() else {
            control.exhausted = true;
            error!(
                attempts = control.attempts,
                "giving up on push broker; reconnect attempts exhausted"
            );
            self.emit(PushEvent::ReconnectExhausted {
                attempts: control.attempts,
            });
            return;
        };

        control.attempts += 1;
        let attempt = control.attempts;
        info!(attempt, max_attempts, ?delay, "scheduling push reconnect");
        self.emit(PushEvent::Reconnecting {
            attempt,
            max_attempts,
            delay,
        });

        let generation = control.generation;
        let weak = Arc::downgrade(self);
        control.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let token = {
                let mut control = inner.lock_control();
                if control.generation != generation {
                    return;
                }
                control.reconnect_timer = None;
                control.token.clone()
            };
            let Some(token) = token else {
                return;
            };
            let client = PushClient { inner };
            if let Err(err) = client.connect(&token).await {
                debug!(attempt, "reconnect attempt failed: {err}");
            }
        }));
    }

    fn connection_lost(self: &Arc<Self>, generation: u64, reason: String) {
        let mut control = self.lock_control();
        let Some(live) = control
            .live
            .take_if(|live| live.generation == generation)
        else {
            return;
        };
        live.cancel.cancel();
        self.set_state(ConnectionState::Disconnected);
        warn!("push connection lost: {reason}");
        self.emit(PushEvent::ConnectionError(reason));
        self.schedule_reconnect(&mut control);
    }

    fn handle_frame(&self, frame: StompFrame) -> Result<(), String> {
        match frame.command {
            Command::Message => {
                self.handle_message(&frame);
                Ok(())
            }
            Command::Error => Err(format!(
                "broker error: {}",
                connection::error_text(&frame)
            )),
            Command::Receipt => {
                debug!(receipt = frame.get("receipt-id"), "receipt");
                Ok(())
            }
            other => {
                debug!(command = %other, "ignoring unexpected frame");
                Ok(())
            }
        }
    }

    fn handle_message(&self, frame: &StompFrame) {
        let subscription = frame.get("subscription").unwrap_or_default();
        let Some(topic) = Topic::from_subscription_id(subscription) else {
            let err = InboundError::UnknownSubscription(subscription.to_string());
            warn!(subscription, "dropping push message: {err}");
            self.emit(PushEvent::FrameRejected(err.to_string()));
            return;
        };
        match decode_message(topic, &frame.body) {
            Ok(message) => {
                debug!(%topic, category = %message.category, "push message");
                self.registry.dispatch(&message);
            }
            Err(err) => {
                warn!(%topic, "dropping malformed push message: {err}");
                self.emit(PushEvent::FrameRejected(err.to_string()));
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let control = self
            .control
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(timer) = control.reconnect_timer.take() {
            timer.abort();
        }
        if let Some(live) = control.live.take() {
            live.cancel.cancel();
        }
    }
}

fn spawn_session(inner: &Arc<Inner>, established: Established, generation: u64) -> LiveSession {
    let Established {
        transport,
        heartbeat,
    } = established;
    let (sink, stream) = transport.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_CAPACITY);
    let cancel = CancellationToken::new();

    let writer = tokio::spawn(write_loop(
        Arc::downgrade(inner),
        sink,
        outbound_rx,
        heartbeat.send_every,
        cancel.clone(),
        generation,
    ));
    let reader = tokio::spawn(read_loop(
        Arc::downgrade(inner),
        stream,
        heartbeat.read_deadline,
        cancel.clone(),
        generation,
    ));

    LiveSession {
        generation,
        cancel,
        outbound: outbound_tx,
        tasks: vec![reader, writer],
    }
}

async fn read_loop(
    inner: Weak<Inner>,
    mut stream: SplitStream<Transport>,
    read_deadline: Option<Duration>,
    cancel: CancellationToken,
    generation: u64,
) {
    let reason = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = next_item(&mut stream, read_deadline) => next,
        };
        match next {
            Ok(StompItem::Heartbeat) => trace!("heart-beat from broker"),
            Ok(StompItem::Frame(frame)) => {
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                if let Err(reason) = inner.handle_frame(frame) {
                    break reason;
                }
            }
            Err(reason) => break reason,
        }
    };
    if let Some(inner) = inner.upgrade() {
        inner.connection_lost(generation, reason);
    }
}

async fn next_item(
    stream: &mut SplitStream<Transport>,
    read_deadline: Option<Duration>,
) -> Result<StompItem, String> {
    let next = match read_deadline {
        Some(deadline) => tokio::time::timeout(deadline, stream.next())
            .await
            .map_err(|_| format!("no traffic from broker for {deadline:?}"))?,
        None => stream.next().await,
    };
    match next {
        Some(Ok(item)) => Ok(item),
        Some(Err(err)) => Err(err.to_string()),
        None => Err(PushError::Closed.to_string()),
    }
}

async fn write_loop(
    inner: Weak<Inner>,
    mut sink: SplitSink<Transport, StompItem>,
    mut outbound: mpsc::Receiver<StompItem>,
    send_every: Option<Duration>,
    cancel: CancellationToken,
    generation: u64,
) {
    let mut ticker = send_every.map(|period| {
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let result = loop {
        let item = tokio::select! {
            biased;
            item = outbound.recv() => match item {
                Some(item) => item,
                None => break Ok(()),
            },
            _ = tick(&mut ticker) => StompItem::Heartbeat,
            _ = cancel.cancelled() => break Ok(()),
        };
        if let Err(err) = sink.send(item).await {
            break Err(err);
        }
    };

    if let Err(err) = sink.close().await {
        trace!("closing push sink: {err}");
    }
    if let Err(err) = result
        && let Some(inner) = inner.upgrade()
    {
        inner.connection_lost(generation, err.to_string());
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
