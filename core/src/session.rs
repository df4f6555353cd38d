//! One authenticated user's notification session: REST client, store and
//! push connection wired together, plus the periodic health check.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use beacon_backend_client::ApiError;
use beacon_backend_client::HttpNotificationApi;
use beacon_backend_client::NotificationApi;
use beacon_push_client::EventCategory;
use beacon_push_client::ListenerHandle;
use beacon_push_client::ListenerRegistry;
use beacon_push_client::PushClient;
use beacon_push_client::PushEvent;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::sync::DropGuard;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config_loader::BeaconConfig;
use crate::config_loader::SessionSettings;
use crate::status::StatusMessage;
use crate::store::NotificationStore;
use crate::store::StoreError;

const STATUS_CHANNEL_CAPACITY: usize = 64;

#[derive(Clone)]
pub struct Credentials {
    pub token: String,
    pub user_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct NotificationSession {
    store: Arc<NotificationStore>,
    push: PushClient,
    listeners: Vec<ListenerHandle>,
    status_tx: broadcast::Sender<StatusMessage>,
    tasks: Vec<JoinHandle<()>>,
    /// Stops the background tasks when the session goes away.
    cancel: DropGuard,
}

impl NotificationSession {
    /// Build the HTTP API client and push client from `config`, then start.
    pub async fn start(
        config: &BeaconConfig,
        credentials: Credentials,
    ) -> Result<Self, SessionError> {
        let api = HttpNotificationApi::new(&config.api, credentials.token.clone())?;
        let push = PushClient::new(config.push.clone());
        Ok(Self::start_with(Arc::new(api), push, &config.session, credentials).await)
    }

    /// Register the store's listeners, connect, load the first page and
    /// start the health check. Connect and load failures are reported as
    /// status messages; the session still starts and keeps retrying.
    pub async fn start_with(
        api: Arc<dyn NotificationApi>,
        push: PushClient,
        settings: &SessionSettings,
        credentials: Credentials,
    ) -> Self {
        let Credentials { token, user_id } = credentials;
        let store = Arc::new(NotificationStore::new(api, user_id));
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let listeners = register_listeners(&store, push.registry(), &status_tx);
        let mut tasks = vec![spawn_status_relay(
            push.subscribe_events(),
            status_tx.clone(),
            cancel.clone(),
        )];

        if let Err(err) = push.connect(&token).await {
            warn!("initial push connect failed: {err}");
        }
        if let Err(err) = store.fetch_page(0, settings.page_size).await {
            warn!("initial notification load failed: {err}");
            let _ = status_tx.send(StatusMessage::from_store_error(&err));
        }

        tasks.push(spawn_health_check(
            push.clone(),
            token,
            settings.health_check_interval,
            cancel.clone(),
        ));
        info!(user = %store.user_id(), "notification session started");

        Self {
            store,
            push,
            listeners,
            status_tx,
            tasks,
            cancel: cancel.drop_guard(),
        }
    }

    pub fn store(&self) -> &Arc<NotificationStore> {
        &self.store
    }

    pub fn push(&self) -> &PushClient {
        &self.push
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusMessage> {
        self.status_tx.subscribe()
    }

    /// Surface a failed store operation to status subscribers.
    pub fn report(&self, err: &StoreError) -> StatusMessage {
        let message = StatusMessage::from_store_error(err);
        let _ = self.status_tx.send(message.clone());
        message
    }

    /// Logout: stop background work, close the push connection, drop the
    /// store's listeners and clear the store.
    pub async fn shutdown(self) {
        let Self {
            store,
            push,
            listeners,
            tasks,
            cancel,
            ..
        } = self;

        drop(cancel);
        for task in tasks {
            if let Err(err) = task.await {
                debug!("session task ended abnormally: {err}");
            }
        }
        push.disconnect().await;
        for handle in listeners {
            push.registry().remove_listener(handle);
        }
        store.clear();
        info!(user = %store.user_id(), "notification session closed");
    }
}

fn register_listeners(
    store: &Arc<NotificationStore>,
    registry: &ListenerRegistry,
    status_tx: &broadcast::Sender<StatusMessage>,
) -> Vec<ListenerHandle> {
    let push_store = Arc::clone(store);
    let on_push = registry.add_listener(EventCategory::All, move |message| {
        if let Some(notification) = message.notification() {
            push_store.handle_push(notification.clone());
        }
    });

    // The pushed count is only a hint: a mismatch triggers a refresh from
    // the server instead of overwriting the counter.
    let count_store = Arc::clone(store);
    let status_tx = status_tx.clone();
    let refresh_pending = Arc::new(AtomicBool::new(false));
    let on_count = registry.add_listener(EventCategory::UnreadCount, move |message| {
        let Some(server_count) = message.unread_count() else {
            return;
        };
        let local_count = count_store.unread_count();
        if server_count == local_count || refresh_pending.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(server_count, local_count, "unread count drifted; refreshing");

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime to refresh unread notifications on");
            refresh_pending.store(false, Ordering::SeqCst);
            return;
        };
        let store = Arc::clone(&count_store);
        let status_tx = status_tx.clone();
        let pending = Arc::clone(&refresh_pending);
        runtime.spawn(async move {
            if let Err(err) = store.fetch_unread().await {
                warn!("unread refresh failed: {err}");
                let _ = status_tx.send(StatusMessage::from_store_error(&err));
            }
            pending.store(false, Ordering::SeqCst);
        });
    });

    vec![on_push, on_count]
}

fn spawn_status_relay(
    mut events: broadcast::Receiver<PushEvent>,
    status_tx: broadcast::Sender<StatusMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => {
                    if let Some(message) = StatusMessage::from_push_event(&event) {
                        let _ = status_tx.send(message);
                    }
                }
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "status relay lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_health_check(
    push: PushClient,
    token: String,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = push.ensure_connected(&token).await {
                        debug!("health check reconnect failed: {err}");
                    }
                }
            }
        }
    })
}
