// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! The global launch queue.
//!
//! One worker task dequeues and executes launches strictly one at a time,
//! in arrival order across all callers.  Serialization is what makes the
//! instruction handler safe: concurrent launches would corrupt each
//! other's file backups.
//!
//! Cancellation is a per-request flag checked at dequeue time.  A request
//! that has already been handed to the executor runs to completion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{info, warn};

use async_trait::async_trait;
use herd_model::{Agent, Error, LaunchRequest, RequestId, Result};

/// Executes one dequeued launch.  Implemented by the orchestrator's launch
/// context.
#[async_trait]
pub trait LaunchExecutor: Send + Sync {
    async fn execute(&self, request: LaunchRequest) -> Result<Agent>;
}

struct QueuedLaunch {
    request: LaunchRequest,
    cancelled: Arc<AtomicBool>,
    reply: oneshot::Sender<Result<Agent>>,
}

/// FIFO queue with a single worker.
pub struct LaunchQueue {
    tx: mpsc::Sender<QueuedLaunch>,
    pending: Arc<Mutex<HashMap<RequestId, Arc<AtomicBool>>>>,
    depth: Arc<AtomicUsize>,
    in_flight: Arc<Mutex<Option<RequestId>>>,
}

impl LaunchQueue {
    pub fn new(executor: Arc<dyn LaunchExecutor>) -> Self {
        // Deep enough that enqueue never blocks in practice; launches drain
        // at CLI-startup speed, not request speed.
        let (tx, mut rx) = mpsc::channel::<QueuedLaunch>(256);
        let pending: Arc<Mutex<HashMap<RequestId, Arc<AtomicBool>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let depth = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(Mutex::new(None));

        let worker_pending = pending.clone();
        let worker_depth = depth.clone();
        let worker_in_flight = in_flight.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let request_id = job.request.id;
                // Mark in-flight before leaving the pending map so a racing
                // cancel always finds the request in one of the two.
                *worker_in_flight.lock().await = Some(request_id);
                worker_pending.lock().await.remove(&request_id);
                worker_depth.fetch_sub(1, Ordering::SeqCst);

                if job.cancelled.load(Ordering::SeqCst) {
                    info!(request = %request_id, "cancelled before start");
                    *worker_in_flight.lock().await = None;
                    let _ = job.reply.send(Err(Error::Cancelled(request_id)));
                    continue;
                }

                let result = executor.execute(job.request).await;
                *worker_in_flight.lock().await = None;

                if let Err(e) = &result {
                    warn!(request = %request_id, "launch failed: {e}");
                }
                // A dropped receiver means the caller went away; the launch
                // itself already happened.
                let _ = job.reply.send(result);
            }
        });

        Self {
            tx,
            pending,
            depth,
            in_flight,
        }
    }

    /// Enqueue and wait for the launch to run.  Resolution order equals
    /// arrival order.
    pub async fn enqueue(&self, request: LaunchRequest) -> Result<Agent> {
        let request_id = request.id;
        let cancelled = Arc::new(AtomicBool::new(false));
        let (reply_tx, reply_rx) = oneshot::channel();

        self.pending
            .lock()
            .await
            .insert(request_id, cancelled.clone());
        self.depth.fetch_add(1, Ordering::SeqCst);

        let job = QueuedLaunch {
            request,
            cancelled,
            reply: reply_tx,
        };
        if self.tx.send(job).await.is_err() {
            self.pending.lock().await.remove(&request_id);
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::Backend("launch queue worker is gone".into()));
        }

        reply_rx
            .await
            .unwrap_or_else(|_| Err(Error::Backend("launch queue worker is gone".into())))
    }

    /// Number of requests waiting (not counting one in flight).
    pub fn queue_length(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Cancel a pending request.  Returns `true` when the request was still
    /// pending and is now cancelled, `false` when it is already in flight
    /// (no effect).  Unknown ids are [`Error::NotFound`].
    pub async fn cancel(&self, request_id: RequestId) -> Result<bool> {
        if let Some(flag) = self.pending.lock().await.get(&request_id) {
            flag.store(true, Ordering::SeqCst);
            return Ok(true);
        }
        if *self.in_flight.lock().await == Some(request_id) {
            return Ok(false);
        }
        Err(Error::NotFound(format!("launch request {request_id}")))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use herd_model::{AgentConfig, AgentId, AgentType};
    use std::time::Duration;
    use tokio::sync::Mutex as TokioMutex;

    /// Executor that records the order it sees requests in and can be made
    /// arbitrarily slow.
    struct SlowExecutor {
        seen: TokioMutex<Vec<RequestId>>,
        delay_ms: u64,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    impl SlowExecutor {
        fn new(delay_ms: u64) -> Arc<Self> {
            Arc::new(Self {
                seen: TokioMutex::new(Vec::new()),
                delay_ms,
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl LaunchExecutor for SlowExecutor {
        async fn execute(&self, request: LaunchRequest) -> Result<Agent> {
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().await.push(request.id);
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok(Agent::new(
                AgentId::new(),
                request.agent_type,
                request.prompt,
                request.config,
            ))
        }
    }

    fn request() -> LaunchRequest {
        LaunchRequest::new(AgentType::Synthetic, "go", AgentConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn launches_run_one_at_a_time_in_fifo_order() {
        let executor = SlowExecutor::new(20);
        let queue = Arc::new(LaunchQueue::new(executor.clone()));

        let requests: Vec<LaunchRequest> = (0..4).map(|_| request()).collect();
        let expected: Vec<RequestId> = requests.iter().map(|r| r.id).collect();

        let mut handles = Vec::new();
        for req in requests {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move { queue.enqueue(req).await }));
            // Give each enqueue a moment so arrival order is deterministic.
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*executor.seen.lock().await, expected);
        assert_eq!(
            executor.max_concurrent.load(Ordering::SeqCst),
            1,
            "at most one launch may be in flight"
        );
    }

    #[tokio::test]
    async fn cancel_pending_request_fails_its_enqueue() {
        let executor = SlowExecutor::new(100);
        let queue = Arc::new(LaunchQueue::new(executor.clone()));

        // First request occupies the worker.
        let blocker = request();
        let q = queue.clone();
        let blocker_handle = tokio::spawn(async move { q.enqueue(blocker).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Second request is still pending; cancel it.
        let victim = request();
        let victim_id = victim.id;
        let q = queue.clone();
        let victim_handle = tokio::spawn(async move { q.enqueue(victim).await });
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(queue.cancel(victim_id).await.unwrap());

        let err = victim_handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Cancelled(id) if id == victim_id));
        blocker_handle.await.unwrap().unwrap();

        // The victim never reached the executor.
        assert!(!executor.seen.lock().await.contains(&victim_id));
    }

    #[tokio::test]
    async fn cancel_in_flight_request_has_no_effect() {
        let executor = SlowExecutor::new(100);
        let queue = Arc::new(LaunchQueue::new(executor.clone()));

        let req = request();
        let id = req.id;
        let q = queue.clone();
        let handle = tokio::spawn(async move { q.enqueue(req).await });
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!queue.cancel(id).await.unwrap(), "in-flight: no effect");
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancel_unknown_request_is_not_found() {
        let queue = LaunchQueue::new(SlowExecutor::new(1));
        assert!(matches!(
            queue.cancel(RequestId::new()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn queue_length_tracks_pending_requests() {
        let executor = SlowExecutor::new(80);
        let queue = Arc::new(LaunchQueue::new(executor));
        assert_eq!(queue.queue_length(), 0);

        let mut handles = Vec::new();
        for _ in 0..3 {
            let q = queue.clone();
            let req = request();
            handles.push(tokio::spawn(async move { q.enqueue(req).await }));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // One dequeued and in flight, two still pending.
        assert_eq!(queue.queue_length(), 2);
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(queue.queue_length(), 0);
    }
}
