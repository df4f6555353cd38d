
use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use beacon_backend_client::ApiError;
use beacon_backend_client::ApiResult;
use beacon_backend_client::NotificationApi;
use beacon_core::NotificationStore;
use beacon_protocol::NotificationRecord;
use beacon_protocol::Page;
use chrono::TimeZone;
use chrono::Utc;

/// Server-side record created `minute` minutes past noon on a fixed day.
pub(crate) fn record(id: &str, read: bool, minute: u32) -> NotificationRecord {
    NotificationRecord {
        id: id.to_string(),
        title: format!("title {id}"),
        content: format!("content {id}"),
        category: Default::default(),
        priority: Default::default(),
        metadata: Default::default(),
        read,
        created_at: Utc.with_ymd_and_hms(2025, 5, 1, 12, minute, 0).unwrap(),
    }
}

pub(crate) fn ids(records: &[NotificationRecord]) -> Vec<String> {
    records.iter().map(|r| r.id.clone()).collect()
}

/// The counter always matches a recount of the collection.
pub(crate) fn assert_invariant(store: &NotificationStore) {
    let unread = store
        .notifications()
        .iter()
        .filter(|r| !r.read)
        .count() as u64;
    assert_eq!(store.unread_count(), unread, "unread counter drifted");
}

#[derive(Default)]
struct FakeState {
    /// Newest first, as the backend returns them.
    records: Vec<NotificationRecord>,
    failing: HashSet<&'static str>,
    page_delays: HashMap<u32, Duration>,
    unread_delay: Option<Duration>,
    calls: Vec<String>,
}

/// In-memory stand-in for the notification REST API.
#[derive(Default)]
pub(crate) struct FakeApi {
    state: Mutex<FakeState>,
}

impl FakeApi {
    pub(crate) fn with_records(records: Vec<NotificationRecord>) -> Arc<Self> {
        let api = Self::default();
        api.state.lock().unwrap().records = records;
        Arc::new(api)
    }

    /// Make every call to `operation` fail with a 500.
    pub(crate) fn fail(&self, operation: &'static str) {
        self.state.lock().unwrap().failing.insert(operation);
    }

    pub(crate) fn delay_page(&self, page: u32, delay: Duration) {
        self.state.lock().unwrap().page_delays.insert(page, delay);
    }

    pub(crate) fn delay_unread(&self, delay: Duration) {
        self.state.lock().unwrap().unread_delay = Some(delay);
    }

    pub(crate) fn set_records(&self, records: Vec<NotificationRecord>) {
        self.state.lock().unwrap().records = records;
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn calls_to(&self, operation: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c == operation || c.starts_with(&format!("{operation}:")))
            .collect()
    }

    fn begin(&self, operation: &'static str, detail: String) -> ApiResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(if detail.is_empty() {
            operation.to_string()
        } else {
            format!("{operation}:{detail}")
        });
        if state.failing.contains(operation) {
            return Err(ApiError::ApiResponse {
                status: 500,
                message: format!("{operation} unavailable"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationApi for FakeApi {
    async fn fetch_page(
        &self,
        _user_id: &str,
        page: u32,
        size: u32,
    ) -> ApiResult<Page<NotificationRecord>> {
        self.begin("fetch_page", format!("{page}/{size}"))?;
        let delay = self.state.lock().unwrap().page_delays.get(&page).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        let total = state.records.len();
        let start = (page * size) as usize;
        let content: Vec<_> = state
            .records
            .iter()
            .skip(start)
            .take(size as usize)
            .cloned()
            .collect();
        let total_pages = total.div_ceil(size.max(1) as usize) as u32;
        Ok(Page {
            number_of_elements: content.len() as u32,
            empty: content.is_empty(),
            content,
            total_elements: total as u64,
            total_pages,
            number: page,
            size,
            first: page == 0,
            last: page + 1 >= total_pages,
        })
    }

    async fn fetch_unread(&self, _user_id: &str) -> ApiResult<Vec<NotificationRecord>> {
        self.begin("fetch_unread", String::new())?;
        let delay = self.state.lock().unwrap().unread_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        Ok(state.records.iter().filter(|r| !r.read).cloned().collect())
    }

    async fn unread_count(&self, _user_id: &str) -> ApiResult<u64> {
        self.begin("unread_count", String::new())?;
        let state = self.state.lock().unwrap();
        Ok(state.records.iter().filter(|r| !r.read).count() as u64)
    }

    async fn mark_as_read(&self, id: &str) -> ApiResult<()> {
        self.begin("mark_as_read", id.to_string())?;
        let mut state = self.state.lock().unwrap();
        if let Some(record) = state.records.iter_mut().find(|r| r.id == id) {
            record.read = true;
        }
        Ok(())
    }

    async fn mark_batch_read(&self, ids: &[String]) -> ApiResult<()> {
        self.begin("mark_batch_read", ids.join(","))?;
        let mut state = self.state.lock().unwrap();
        for record in state.records.iter_mut().filter(|r| ids.contains(&r.id)) {
            record.read = true;
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> ApiResult<()> {
        self.begin("delete", id.to_string())?;
        self.state.lock().unwrap().records.retain(|r| r.id != id);
        Ok(())
    }

    async fn delete_batch(&self, ids: &[String]) -> ApiResult<()> {
        self.begin("delete_batch", ids.join(","))?;
        self.state
            .lock()
            .unwrap()
            .records
            .retain(|r| !ids.contains(&r.id));
        Ok(())
    }
}
