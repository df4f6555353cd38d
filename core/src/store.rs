//! In-memory notification store reconciled from page fetches, unread
//! fetches and live pushes.
//!
//! The store never mutates ahead of the server: every operation that talks
//! to the API applies its local change only after the call succeeded. After
//! each completed mutation the unread counter equals the number of records
//! with `read == false`.

use std::cmp::Reverse;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use beacon_backend_client::ApiError;
use beacon_backend_client::NotificationApi;
use beacon_protocol::InvalidPush;
use beacon_protocol::NotificationRecord;
use beacon_protocol::PageInfo;
use beacon_protocol::PushNotification;
use chrono::Utc;
use strum_macros::Display;
use tokio::sync::watch;
use tracing::debug;
use tracing::warn;

/// The store operation a failed request belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StoreAction {
    #[strum(serialize = "load notifications")]
    FetchPage,
    #[strum(serialize = "load unread notifications")]
    FetchUnread,
    #[strum(serialize = "mark as read")]
    MarkAsRead,
    #[strum(serialize = "mark all as read")]
    MarkAllAsRead,
    #[strum(serialize = "delete notification")]
    Delete,
    #[strum(serialize = "delete notifications")]
    DeleteBatch,
}

/// A request failed; the store was left unchanged.
#[derive(Debug, thiserror::Error)]
#[error("failed to {action}: {source}")]
pub struct StoreError {
    pub action: StoreAction,
    #[source]
    pub source: ApiError,
}

impl StoreError {
    fn wrap(action: StoreAction) -> impl FnOnce(ApiError) -> StoreError {
        move |source| StoreError { action, source }
    }
}

/// Whether a fetch result was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied { records: usize },
    /// A newer refresh already landed, or the store was cleared meanwhile.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Inserted,
    /// Same id was already present; the old copy was replaced.
    Replaced,
    Rejected(InvalidPush),
}

/// Cheap view of the store for change notification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSummary {
    pub total: usize,
    pub unread_count: u64,
    pub loading: bool,
}

#[derive(Default)]
struct StoreState {
    /// Newest first.
    notifications: Vec<NotificationRecord>,
    unread_count: u64,
    in_flight: usize,
    page: Option<PageInfo>,
    /// Sequence number of the newest refresh applied (or of the last clear).
    applied_seq: u64,
}

impl StoreState {
    fn recompute(&mut self) {
        self.unread_count = self
            .notifications
            .iter()
            .filter(|r| r.is_unread())
            .count() as u64;
    }

    fn summary(&self) -> StoreSummary {
        StoreSummary {
            total: self.notifications.len(),
            unread_count: self.unread_count,
            loading: self.in_flight > 0,
        }
    }
}

pub struct NotificationStore {
    api: Arc<dyn NotificationApi>,
    user_id: String,
    state: Mutex<StoreState>,
    refresh_seq: AtomicU64,
    summary_tx: watch::Sender<StoreSummary>,
}

impl std::fmt::Debug for NotificationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationStore")
            .field("user_id", &self.user_id)
            .field("summary", &self.summary())
            .finish_non_exhaustive()
    }
}

/// Marks a refresh as in flight until dropped.
struct Loading<'a> {
    store: &'a NotificationStore,
}

impl Drop for Loading<'_> {
    fn drop(&mut self) {
        let mut state = self.store.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        self.store.publish(&state);
    }
}

impl NotificationStore {
    pub fn new(api: Arc<dyn NotificationApi>, user_id: impl Into<String>) -> Self {
        let (summary_tx, _) = watch::channel(StoreSummary::default());
        Self {
            api,
            user_id: user_id.into(),
            state: Mutex::new(StoreState::default()),
            refresh_seq: AtomicU64::new(0),
            summary_tx,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &StoreState) {
        self.summary_tx.send_replace(state.summary());
    }

    fn begin_refresh(&self) -> (u64, Loading<'_>) {
        let seq = self.refresh_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.lock();
        state.in_flight += 1;
        self.publish(&state);
        (seq, Loading { store: self })
    }

    /// Snapshot of the records, newest first.
    pub fn notifications(&self) -> Vec<NotificationRecord> {
        self.lock().notifications.clone()
    }

    pub fn get(&self, id: &str) -> Option<NotificationRecord> {
        self.lock().notifications.iter().find(|r| r.id == id).cloned()
    }

    pub fn unread_count(&self) -> u64 {
        self.lock().unread_count
    }

    pub fn is_loading(&self) -> bool {
        self.lock().in_flight > 0
    }

    /// Paging metadata of the last applied page fetch.
    pub fn page_info(&self) -> Option<PageInfo> {
        self.lock().page
    }

    pub fn summary(&self) -> StoreSummary {
        self.lock().summary()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSummary> {
        self.summary_tx.subscribe()
    }

    /// Replace the collection with one page from the server.
    pub async fn fetch_page(&self, page: u32, size: u32) -> Result<FetchOutcome, StoreError> {
        let (seq, _loading) = self.begin_refresh();
        let fetched = self
            .api
            .fetch_page(&self.user_id, page, size)
            .await
            .map_err(StoreError::wrap(StoreAction::FetchPage))?;

        let mut state = self.lock();
        if seq <= state.applied_seq {
            debug!(seq, applied = state.applied_seq, "discarding stale page");
            return Ok(FetchOutcome::Superseded);
        }
        let (info, records) = fetched.into_parts();
        state.applied_seq = seq;
        state.page = Some(info);
        state.notifications = records;
        state.recompute();
        self.publish(&state);
        Ok(FetchOutcome::Applied {
            records: state.notifications.len(),
        })
    }

    /// Refresh unread records while keeping the locally known read ones.
    ///
    /// Local unread records the server no longer reports as unread are
    /// dropped; the server's copy wins when an id appears on both sides.
    pub async fn fetch_unread(&self) -> Result<FetchOutcome, StoreError> {
        let (seq, _loading) = self.begin_refresh();
        let fetched = self
            .api
            .fetch_unread(&self.user_id)
            .await
            .map_err(StoreError::wrap(StoreAction::FetchUnread))?;

        let mut state = self.lock();
        if seq <= state.applied_seq {
            debug!(seq, applied = state.applied_seq, "discarding stale unread list");
            return Ok(FetchOutcome::Superseded);
        }
        let records = fetched.len();
        let fetched_ids: HashSet<String> = fetched.iter().map(|r| r.id.clone()).collect();
        let read_history = std::mem::take(&mut state.notifications)
            .into_iter()
            .filter(|r| r.read && !fetched_ids.contains(&r.id));
        let mut merged: Vec<NotificationRecord> = fetched.into_iter().chain(read_history).collect();
        merged.sort_by_key(|r| Reverse(r.created_at));

        state.applied_seq = seq;
        state.notifications = merged;
        state.recompute();
        self.publish(&state);
        Ok(FetchOutcome::Applied { records })
    }

    /// Apply a live push. Invalid pushes are logged and dropped.
    pub fn handle_push(&self, push: PushNotification) -> PushOutcome {
        let record = match push.into_record(Utc::now()) {
            Ok(record) => record,
            Err(reason) => {
                warn!("dropping pushed notification: {reason}");
                return PushOutcome::Rejected(reason);
            }
        };

        let mut state = self.lock();
        let outcome = match state.notifications.iter().position(|r| r.id == record.id) {
            Some(index) => {
                debug!(id = %record.id, "push redelivered; replacing");
                state.notifications.remove(index);
                state.notifications.insert(0, record);
                state.recompute();
                PushOutcome::Replaced
            }
            None => {
                let unread = record.is_unread();
                state.notifications.insert(0, record);
                if unread {
                    state.unread_count += 1;
                }
                PushOutcome::Inserted
            }
        };
        self.publish(&state);
        outcome
    }

    pub async fn mark_as_read(&self, id: &str) -> Result<(), StoreError> {
        self.api
            .mark_as_read(id)
            .await
            .map_err(StoreError::wrap(StoreAction::MarkAsRead))?;

        let mut state = self.lock();
        if let Some(record) = state.notifications.iter_mut().find(|r| r.id == id) {
            record.read = true;
        }
        state.recompute();
        self.publish(&state);
        Ok(())
    }

    /// Mark everything read. Returns how many ids were sent to the server;
    /// with nothing unread server-side no mark-read request is made.
    /// Records pushed while the requests are in flight stay unread.
    pub async fn mark_all_as_read(&self) -> Result<usize, StoreError> {
        let known: HashSet<String> = self
            .lock()
            .notifications
            .iter()
            .map(|r| r.id.clone())
            .collect();
        let unread = self
            .api
            .fetch_unread(&self.user_id)
            .await
            .map_err(StoreError::wrap(StoreAction::MarkAllAsRead))?;
        let ids: Vec<String> = unread.into_iter().map(|r| r.id).collect();
        if !ids.is_empty() {
            self.api
                .mark_batch_read(&ids)
                .await
                .map_err(StoreError::wrap(StoreAction::MarkAllAsRead))?;
        }

        let mut state = self.lock();
        for record in &mut state.notifications {
            if known.contains(&record.id) || ids.contains(&record.id) {
                record.read = true;
            }
        }
        state.recompute();
        self.publish(&state);
        Ok(ids.len())
    }

    pub async fn delete_notification(&self, id: &str) -> Result<(), StoreError> {
        self.api
            .delete(id)
            .await
            .map_err(StoreError::wrap(StoreAction::Delete))?;

        let mut state = self.lock();
        state.notifications.retain(|r| r.id != id);
        state.recompute();
        self.publish(&state);
        Ok(())
    }

    /// Delete several records in one request. Returns how many local
    /// records were removed.
    pub async fn delete_notifications(&self, ids: &[String]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.api
            .delete_batch(ids)
            .await
            .map_err(StoreError::wrap(StoreAction::DeleteBatch))?;

        let doomed: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let mut state = self.lock();
        let before = state.notifications.len();
        state.notifications.retain(|r| !doomed.contains(r.id.as_str()));
        let removed = before - state.notifications.len();
        state.recompute();
        self.publish(&state);
        Ok(removed)
    }

    /// Forget everything, e.g. on logout. Fetches still in flight are
    /// discarded when they complete.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.notifications.clear();
        state.page = None;
        state.applied_seq = self.refresh_seq.load(Ordering::SeqCst);
        state.recompute();
        self.publish(&state);
    }
}
