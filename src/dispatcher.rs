//! Container event dispatch
//!
//! Events are queued by the caller and published from the worker pool, so
//! emitting an event never blocks on subscribers. A single drain job runs at a
//! time, which keeps delivery in dispatch order.

use crate::module::{Module, ModuleId};
use crate::worker::WorkerPool;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use strum_macros::Display;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerEventKind {
    Creating,
    Created,
    Failure,
    Destroying,
    Destroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerEvent {
    pub id: Uuid,
    pub kind: ContainerEventKind,
    pub module_id: ModuleId,
    pub module: String,
    pub timestamp: DateTime<Utc>,
    pub cause: Option<String>,
}

impl ContainerEvent {
    pub fn new(kind: ContainerEventKind, module: &dyn Module) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            module_id: module.id(),
            module: module.symbolic_name().to_string(),
            timestamp: Utc::now(),
            cause: None,
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }
}

#[derive(Default)]
struct Queue {
    events: VecDeque<ContainerEvent>,
    draining: bool,
}

struct Inner {
    sender: broadcast::Sender<ContainerEvent>,
    last: DashMap<ModuleId, ContainerEvent>,
    queue: Mutex<Queue>,
    pool: WorkerPool,
    closed: AtomicBool,
}

impl Inner {
    fn drain(&self) {
        loop {
            let event = {
                let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
                match queue.events.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };
            tracing::trace!(module = %event.module, kind = %event.kind, "Publishing container event");
            // a destroyed container has no state left to report
            if event.kind == ContainerEventKind::Destroyed {
                self.last.remove(&event.module_id);
            } else {
                self.last.insert(event.module_id, event.clone());
            }
            // no subscribers is fine
            let _ = self.sender.send(event);
        }
    }
}

/// Delivers container lifecycle events asynchronously on the shared pool.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl EventDispatcher {
    pub fn new(pool: WorkerPool, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                sender,
                last: DashMap::new(),
                queue: Mutex::new(Queue::default()),
                pool,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Queue an event for delivery. Returns `false` if it was dropped because
    /// the dispatcher or its pool is closed.
    pub fn dispatch(&self, event: ContainerEvent) -> bool {
        if self.is_closed() {
            tracing::debug!(module = %event.module, kind = %event.kind, "Dispatcher closed, dropping event");
            return false;
        }

        let mut queue = self.inner.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.events.push_back(event);
        if queue.draining {
            return true;
        }
        queue.draining = true;

        let inner = Arc::clone(&self.inner);
        if let Err(e) = self.inner.pool.spawn(move || inner.drain()) {
            let dropped = queue.events.len();
            queue.events.clear();
            queue.draining = false;
            tracing::debug!("Dropping {} container event(s): {}", dropped, e);
            return false;
        }
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ContainerEvent> {
        self.inner.sender.subscribe()
    }

    /// Most recent event delivered for a module whose container has not been
    /// destroyed yet.
    pub fn last_event(&self, module_id: ModuleId) -> Option<ContainerEvent> {
        self.inner.last.get(&module_id).map(|e| e.value().clone())
    }

    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("Event dispatcher closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}
