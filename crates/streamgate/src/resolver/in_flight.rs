use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Notify, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Resolution;

pub(super) type Registry = DashMap<String, Arc<InFlightState>>;

/// Shared state of one resolution that any number of callers attached to.
pub(super) struct InFlightState {
    result: OnceCell<Resolution>,
    notify: Notify,
    attached: AtomicUsize,
    token: CancellationToken,
}

impl InFlightState {
    pub(super) fn new() -> Self {
        Self {
            result: OnceCell::new(),
            notify: Notify::new(),
            attached: AtomicUsize::new(0),
            token: CancellationToken::new(),
        }
    }

    pub(super) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(super) fn set_result(&self, result: Resolution) {
        let _ = self.result.set(result);
        self.notify.notify_waiters();
    }

    pub(super) async fn wait(&self) -> Resolution {
        loop {
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            let notified = self.notify.notified();
            if let Some(result) = self.result.get() {
                return result.clone();
            }

            notified.await;
        }
    }

    fn attach(&self) {
        self.attached.fetch_add(1, Ordering::AcqRel);
    }

    /// Returns true when the last attached caller left.
    fn detach(&self) -> bool {
        self.attached.fetch_sub(1, Ordering::AcqRel) == 1
    }

    pub(super) fn attached(&self) -> usize {
        self.attached.load(Ordering::Acquire)
    }
}

/// Find the live entry for `identifier` or register a new one, and attach
/// the caller to it.
///
/// Returns the entry and whether it was newly created. Attaching happens
/// under the registry shard lock so it cannot race with the last caller
/// detaching.
pub(super) fn get_or_create(registry: &Registry, identifier: &str) -> (Arc<InFlightState>, bool) {
    match registry.entry(identifier.to_string()) {
        Entry::Occupied(mut entry) => {
            if entry.get().token.is_cancelled() {
                let state = Arc::new(InFlightState::new());
                state.attach();
                entry.insert(Arc::clone(&state));
                (state, true)
            } else {
                let state = Arc::clone(entry.get());
                state.attach();
                (state, false)
            }
        }
        Entry::Vacant(entry) => {
            let state = Arc::new(InFlightState::new());
            state.attach();
            entry.insert(Arc::clone(&state));
            (state, true)
        }
    }
}

/// Remove `state` from the registry if it is still the registered entry.
pub(super) fn remove(registry: &Registry, identifier: &str, state: &Arc<InFlightState>) {
    registry.remove_if(identifier, |_, current| Arc::ptr_eq(current, state));
}

struct Attachment {
    identifier: String,
    state: Arc<InFlightState>,
    registry: Arc<Registry>,
    token: CancellationToken,
    detached: AtomicBool,
}

impl Attachment {
    fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return;
        }

        let last = match self.registry.entry(self.identifier.clone()) {
            Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), &self.state) => {
                let last = self.state.detach();
                if last {
                    entry.remove();
                }
                last
            }
            _ => self.state.detach(),
        };

        if last && self.state.result.get().is_none() {
            debug!(identifier = %self.identifier, "Last caller detached, cancelling resolution");
            self.state.token.cancel();
        }
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.detach();
    }
}

/// Cancels one caller's interest in a resolution.
///
/// The shared work behind it keeps running while other callers remain
/// attached. Clones share the same attachment; dropping every clone (and
/// the owning handle) detaches as well.
#[derive(Clone)]
pub struct CancelHandle {
    attachment: Arc<Attachment>,
}

impl CancelHandle {
    pub(super) fn new(identifier: &str, state: Arc<InFlightState>, registry: Arc<Registry>) -> Self {
        Self {
            attachment: Arc::new(Attachment {
                identifier: identifier.to_string(),
                state,
                registry,
                token: CancellationToken::new(),
                detached: AtomicBool::new(false),
            }),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.attachment.identifier
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.attachment.token.cancel();
        self.attachment.detach();
    }

    pub fn is_cancelled(&self) -> bool {
        self.attachment.token.is_cancelled()
    }

    pub(super) fn token(&self) -> &CancellationToken {
        &self.attachment.token
    }

    pub(super) fn state(&self) -> &Arc<InFlightState> {
        &self.attachment.state
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("identifier", &self.attachment.identifier)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
