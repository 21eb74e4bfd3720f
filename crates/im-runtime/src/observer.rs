//! Observer registration and dispatch.
//!
//! The registry holds only weak handles; the application owns its observers.
//! Dispatch works on a snapshot taken under a short read lock. Each
//! registration has a gate that callbacks pass through, so `deregister`
//! returns only once no callback for that observer is running on another
//! thread, and an observer may still deregister itself (or others) from
//! inside a callback.

use std::{
    iter,
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, Weak,
        atomic::{AtomicU64, Ordering},
    },
    thread::{self, ThreadId},
};

use im_core::{Capabilities, ConversationEvent, ConversationId, LifecycleEvent};
use tracing::trace;

/// Application target for lifecycle and conversation notifications.
///
/// Only kinds listed in [`SessionObserver::capabilities`] are delivered.
pub trait SessionObserver: Send + Sync {
    /// Kinds this observer handles, read once at registration.
    fn capabilities(&self) -> Capabilities {
        Capabilities::lifecycle()
    }

    fn on_lifecycle(&self, event: &LifecycleEvent) {
        let _ = event;
    }

    fn on_conversation_event(&self, conversation_id: &ConversationId, event: &ConversationEvent) {
        let _ = (conversation_id, event);
    }
}

/// Stable identity of one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

#[derive(Debug, Default)]
struct GateState {
    revoked: bool,
    in_flight: Vec<ThreadId>,
}

/// Tracks callbacks in progress for one registration.
#[derive(Debug, Default)]
struct Gate {
    state: Mutex<GateState>,
    idle: Condvar,
}

impl Gate {
    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `None` once the registration was revoked.
    fn enter(&self) -> Option<InFlight<'_>> {
        let mut state = self.lock();
        if state.revoked {
            return None;
        }
        state.in_flight.push(thread::current().id());
        Some(InFlight { gate: self })
    }

    /// Refuse further callbacks and wait for those running on other threads.
    fn revoke(&self) {
        let current = thread::current().id();
        let mut state = self.lock();
        state.revoked = true;
        while state.in_flight.iter().any(|id| *id != current) {
            state = self
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct InFlight<'a> {
    gate: &'a Gate,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let current = thread::current().id();
        let mut state = self.gate.lock();
        if let Some(index) = state.in_flight.iter().position(|id| *id == current) {
            state.in_flight.swap_remove(index);
        }
        drop(state);
        self.gate.idle.notify_all();
    }
}

#[derive(Clone)]
struct Registration {
    id: ObserverId,
    capabilities: Capabilities,
    observer: Weak<dyn SessionObserver>,
    gate: Arc<Gate>,
}

#[derive(Default)]
pub struct ObserverRegistry {
    entries: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub fn register<O>(&self, observer: &Arc<O>) -> ObserverId
    where
        O: SessionObserver + 'static,
    {
        let capabilities = observer.capabilities();
        self.register_with(observer, capabilities)
    }

    /// Register with an explicit capability set instead of the observer's own.
    pub fn register_with<O>(&self, observer: &Arc<O>, capabilities: Capabilities) -> ObserverId
    where
        O: SessionObserver + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let observer: Weak<O> = Arc::downgrade(observer);
        let observer: Weak<dyn SessionObserver> = observer;
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration {
                id,
                capabilities,
                observer,
                gate: Arc::default(),
            });
        id
    }

    /// Remove a registration. Returns `false` if it was already gone.
    ///
    /// Blocks until callbacks for this observer running on other threads
    /// have returned. Two observers that deregister each other from
    /// callbacks running concurrently on different threads would wait on
    /// each other; a session dispatches from a single task, so that cannot
    /// happen through [`crate::Session`].
    pub fn deregister(&self, id: ObserverId) -> bool {
        let gate = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let index = entries.iter().position(|entry| entry.id == id);
            index.map(|index| entries.remove(index).gate)
        };
        match gate {
            Some(gate) => {
                gate.revoke();
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: ObserverId) -> bool {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|entry| entry.id == id)
    }

    /// Number of registrations whose observer is still alive.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|entry| entry.observer.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver a lifecycle event, then its legacy alias, to every observer
    /// that declared the matching kind.
    pub fn dispatch_lifecycle(&self, event: &LifecycleEvent) {
        let alias = event.legacy_alias();
        self.deliver(|capabilities, gate, observer| {
            for candidate in iter::once(event).chain(alias.as_ref()) {
                if !capabilities.contains(candidate.kind()) {
                    continue;
                }
                let Some(_in_flight) = gate.enter() else {
                    return;
                };
                observer.on_lifecycle(candidate);
            }
        });
    }

    pub fn dispatch_conversation(&self, conversation_id: &ConversationId, event: &ConversationEvent) {
        let alias = event.legacy_alias();
        self.deliver(|capabilities, gate, observer| {
            for candidate in iter::once(event).chain(alias.as_ref()) {
                if !capabilities.contains(candidate.kind()) {
                    continue;
                }
                let Some(_in_flight) = gate.enter() else {
                    return;
                };
                observer.on_conversation_event(conversation_id, candidate);
            }
        });
    }

    fn deliver<F>(&self, mut invoke: F)
    where
        F: FnMut(Capabilities, &Gate, &dyn SessionObserver),
    {
        let snapshot = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut dead = Vec::new();
        for registration in snapshot {
            let Some(observer) = registration.observer.upgrade() else {
                dead.push(registration.id);
                continue;
            };
            invoke(
                registration.capabilities,
                &registration.gate,
                observer.as_ref(),
            );
        }

        if !dead.is_empty() {
            trace!(count = dead.len(), "pruning dropped observers");
            self.entries
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|entry| !dead.contains(&entry.id));
        }
    }
}
