//! Single-slot session registry.
//!
//! Tracks at most one live [`PortSession`] so that a new connect attempt can
//! evict a stale predecessor, which otherwise tends to keep the physical port
//! locked and make reopening fail. The registry is an explicit object owned by
//! the application shell, not process-global state; it holds only a reference
//! for eviction and never operates on the device itself.

use crate::session::PortSession;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

/// Process-wide single-slot reference to the active session.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    slot: Mutex<Option<Arc<PortSession>>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` as the active one, evicting any predecessor.
    ///
    /// The evicted session is disconnected fire-and-forget on a spawned task,
    /// its teardown errors swallowed, so the caller can chain onto the
    /// returned session immediately. Must be called within a Tokio runtime.
    pub fn replace(&self, session: Arc<PortSession>) -> Arc<PortSession> {
        let previous = self.slot.lock().replace(Arc::clone(&session));
        if let Some(stale) = previous {
            debug!("evicting previous session from the registry");
            tokio::spawn(async move {
                if let Err(e) = stale.disconnect().await {
                    warn!(error = %e, "ignoring teardown failure from evicted session");
                }
            });
        }
        session
    }

    /// The currently registered session, if any.
    pub fn active(&self) -> Option<Arc<PortSession>> {
        self.slot.lock().clone()
    }

    /// Clear the slot if it still holds `session`.
    ///
    /// Called after a session fully disconnects; returns whether the slot was
    /// cleared.
    pub fn release(&self, session: &Arc<PortSession>) -> bool {
        let mut slot = self.slot.lock();
        if slot.as_ref().is_some_and(|s| Arc::ptr_eq(s, session)) {
            *slot = None;
            true
        } else {
            false
        }
    }
}
