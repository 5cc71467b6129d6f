// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Per-agent observer sets.
//!
//! Notification is sequential per agent: the runner awaits each observer's
//! completion before the next event, which is what keeps per-agent message
//! ordering intact all the way to the sockets.  An observer that returns an
//! error is logged and the remaining observers still run.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

use herd_model::{AgentId, Result};

use crate::events::RunnerEvent;

/// Consumer of runner events.  The returned `Result` is the completion
/// signal used for sequencing and back-pressure.
#[async_trait]
pub trait AgentObserver: Send + Sync {
    async fn on_event(&self, event: RunnerEvent) -> Result<()>;
}

/// The observer registry every runner owns.
#[derive(Default)]
pub struct ObserverSet {
    observers: Mutex<HashMap<AgentId, Vec<Arc<dyn AgentObserver>>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, agent_id: AgentId, observer: Arc<dyn AgentObserver>) {
        self.observers
            .lock()
            .await
            .entry(agent_id)
            .or_default()
            .push(observer);
    }

    /// Remove one observer, matched by `Arc` identity.
    pub async fn unsubscribe(&self, agent_id: AgentId, observer: &Arc<dyn AgentObserver>) {
        let mut observers = self.observers.lock().await;
        if let Some(list) = observers.get_mut(&agent_id) {
            list.retain(|o| !Arc::ptr_eq(o, observer));
            if list.is_empty() {
                observers.remove(&agent_id);
            }
        }
    }

    /// Drop every observer for the agent (runner entry teardown).
    pub async fn clear(&self, agent_id: AgentId) {
        self.observers.lock().await.remove(&agent_id);
    }

    pub async fn count(&self, agent_id: AgentId) -> usize {
        self.observers
            .lock()
            .await
            .get(&agent_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Deliver one event to every observer of its agent, sequentially.
    /// Observer failures are logged, never propagated to siblings.
    pub async fn notify(&self, event: RunnerEvent) {
        let agent_id = event.agent_id();
        let list = self
            .observers
            .lock()
            .await
            .get(&agent_id)
            .cloned()
            .unwrap_or_default();
        for observer in list {
            if let Err(e) = observer.on_event(event.clone()).await {
                warn!(agent = %agent_id, "observer failed: {e}");
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use herd_model::{Error, MessageType, NewMessage};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        seen: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AgentObserver for Counting {
        async fn on_event(&self, _event: RunnerEvent) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Backend("observer exploded".into()))
            } else {
                Ok(())
            }
        }
    }

    fn observer(fail: bool) -> Arc<Counting> {
        Arc::new(Counting {
            seen: AtomicUsize::new(0),
            fail,
        })
    }

    fn event(agent_id: AgentId) -> RunnerEvent {
        RunnerEvent::Message(NewMessage::text(agent_id, MessageType::Assistant, "x"))
    }

    #[tokio::test]
    async fn notify_reaches_all_observers() {
        let set = ObserverSet::new();
        let id = AgentId::new();
        let a = observer(false);
        let b = observer(false);
        set.subscribe(id, a.clone()).await;
        set.subscribe(id, b.clone()).await;

        set.notify(event(id)).await;
        assert_eq!(a.seen.load(Ordering::SeqCst), 1);
        assert_eq!(b.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_observer_does_not_abort_siblings() {
        let set = ObserverSet::new();
        let id = AgentId::new();
        let bad = observer(true);
        let good = observer(false);
        set.subscribe(id, bad.clone()).await;
        set.subscribe(id, good.clone()).await;

        set.notify(event(id)).await;
        assert_eq!(good.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_matches_by_identity() {
        let set = ObserverSet::new();
        let id = AgentId::new();
        let a = observer(false);
        let b = observer(false);
        set.subscribe(id, a.clone()).await;
        set.subscribe(id, b.clone()).await;

        let a_dyn: Arc<dyn AgentObserver> = a.clone();
        set.unsubscribe(id, &a_dyn).await;
        assert_eq!(set.count(id).await, 1);

        set.notify(event(id)).await;
        assert_eq!(a.seen.load(Ordering::SeqCst), 0);
        assert_eq!(b.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn notify_without_observers_is_a_no_op() {
        let set = ObserverSet::new();
        set.notify(event(AgentId::new())).await;
    }

    #[tokio::test]
    async fn events_do_not_cross_agents() {
        let set = ObserverSet::new();
        let a_id = AgentId::new();
        let b_id = AgentId::new();
        let a = observer(false);
        set.subscribe(a_id, a.clone()).await;

        set.notify(event(b_id)).await;
        assert_eq!(a.seen.load(Ordering::SeqCst), 0);
    }
}
