//! Category-keyed listener fan-out.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use tracing::error;

use crate::inbound::EventCategory;
use crate::inbound::PushMessage;

type Listener = Arc<dyn Fn(&PushMessage) + Send + Sync>;

/// Returned by [`ListenerRegistry::add_listener`]; hand it back to remove
/// that one callback. Not `Clone`, so a callback can only be removed once.
#[derive(Debug, PartialEq, Eq, Hash)]
#[must_use = "dropping the handle makes the listener impossible to remove"]
pub struct ListenerHandle {
    category: EventCategory,
    id: u64,
}

impl ListenerHandle {
    pub fn category(&self) -> EventCategory {
        self.category
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub invoked: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    by_category: HashMap<EventCategory, Vec<(u64, Listener)>>,
}

#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Listeners>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let listeners = self.lock();
        let counts: HashMap<_, _> = listeners
            .by_category
            .iter()
            .map(|(category, entries)| (*category, entries.len()))
            .collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &counts)
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Callbacks never run under this lock.
    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_listener<F>(&self, category: EventCategory, callback: F) -> ListenerHandle
    where
        F: Fn(&PushMessage) + Send + Sync + 'static,
    {
        let mut listeners = self.lock();
        let id = listeners.next_id;
        listeners.next_id += 1;
        listeners
            .by_category
            .entry(category)
            .or_default()
            .push((id, Arc::new(callback)));
        ListenerHandle { category, id }
    }

    /// Returns `false` if the listener was already gone.
    pub fn remove_listener(&self, handle: ListenerHandle) -> bool {
        let mut listeners = self.lock();
        let Some(entries) = listeners.by_category.get_mut(&handle.category) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(id, _)| *id != handle.id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            listeners.by_category.remove(&handle.category);
        }
        removed
    }

    pub fn listener_count(&self, category: EventCategory) -> usize {
        self.lock()
            .by_category
            .get(&category)
            .map_or(0, Vec::len)
    }

    /// Invoke the listeners for `message.category` in registration order,
    /// then the `All` listeners. A panicking listener is logged and skipped.
    pub fn dispatch(&self, message: &PushMessage) -> DispatchReport {
        let targets: Vec<Listener> = {
            let listeners = self.lock();
            let specific = listeners.by_category.get(&message.category);
            let wildcard = (message.category != EventCategory::All)
                .then(|| listeners.by_category.get(&EventCategory::All))
                .flatten();
            specific
                .into_iter()
                .chain(wildcard)
                .flatten()
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };

        let mut report = DispatchReport::default();
        for listener in targets {
            report.invoked += 1;
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(message))) {
                report.failed += 1;
                error!(
                    category = %message.category,
                    "push listener panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
        report
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
