//! Correlation hub
//!
//! In-memory registry of connected tunnel agents and of callers waiting for a
//! reply. A dispatched request is broadcast to every registered agent and the
//! first response carrying its correlation ID wins.
//!
//! The agent registry and the pending-reply registry are locked independently
//! and never together. Neither lock is held across an await point.

use backstream_common::constants::AGENT_QUEUE_CAPACITY;
use backstream_common::{Request, Response, Result, TunnelError};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type RequestSender = mpsc::Sender<Arc<Request>>;

struct AgentEntry {
    generation: u64,
    queue: RequestSender,
    closed: Arc<AtomicBool>,
}

impl AgentEntry {
    /// Mark the queue closed; the owner sees no further requests, queued or not
    fn close(self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Registry of live agents and in-flight requests
pub struct Hub {
    agents: Mutex<HashMap<String, AgentEntry>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Response>>>,
    queue_capacity: usize,
    generations: AtomicU64,
}

/// Inbound queue of a registered agent, owned by the connection serving it
#[derive(Debug)]
pub struct AgentQueue {
    agent_id: String,
    generation: u64,
    receiver: mpsc::Receiver<Arc<Request>>,
    closed: Arc<AtomicBool>,
}

impl AgentQueue {
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Wait for the next request. Returns `None` once the registration is gone.
    pub async fn recv(&mut self) -> Option<Arc<Request>> {
        if self.is_closed() {
            return None;
        }
        let request = self.receiver.recv().await;
        if self.is_closed() {
            return None;
        }
        request
    }

    /// Take a queued request without waiting
    pub fn try_recv(&mut self) -> Option<Arc<Request>> {
        if self.is_closed() {
            return None;
        }
        self.receiver.try_recv().ok()
    }

    /// Closes the receiver and drops whatever is still queued once unregistered
    fn is_closed(&mut self) -> bool {
        if !self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
        true
    }
}

/// Removes an unanswered pending-reply slot when the waiting caller goes away
struct PendingSlot<'a> {
    hub: &'a Hub,
    id: String,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        if lock(&self.hub.pending).remove(&self.id).is_some() {
            debug!(request_id = %self.id, "released unanswered pending reply");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(AGENT_QUEUE_CAPACITY)
    }
}

impl Hub {
    /// Create a hub whose per-agent queues hold `queue_capacity` requests
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
            generations: AtomicU64::new(0),
        }
    }

    /// Register an agent and hand back its inbound queue.
    ///
    /// An existing registration under the same ID is replaced and its queue closed.
    pub fn register_agent(&self, agent_id: impl Into<String>) -> AgentQueue {
        let agent_id = agent_id.into();
        let (queue, receiver) = mpsc::channel(self.queue_capacity);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let closed = Arc::new(AtomicBool::new(false));

        let entry = AgentEntry {
            generation,
            queue,
            closed: Arc::clone(&closed),
        };
        let previous = lock(&self.agents).insert(agent_id.clone(), entry);
        if let Some(previous) = previous {
            previous.close();
            warn!(agent_id = %agent_id, "replaced existing agent registration");
        }

        AgentQueue {
            agent_id,
            generation,
            receiver,
            closed,
        }
    }

    /// Remove an agent by ID, closing its queue and dropping anything still
    /// queued. Unknown IDs are ignored.
    pub fn unregister_agent(&self, agent_id: &str) {
        let removed = lock(&self.agents).remove(agent_id);
        if let Some(entry) = removed {
            entry.close();
            debug!(agent_id = %agent_id, "agent unregistered");
        }
    }

    /// Tear down the registration that produced `queue`.
    ///
    /// Only removes the registry entry if it still belongs to this queue, so a
    /// replaced connection cannot evict its successor. Queued requests are dropped.
    pub fn leave(&self, mut queue: AgentQueue) {
        {
            let mut agents = lock(&self.agents);
            if let Entry::Occupied(entry) = agents.entry(queue.agent_id.clone())
                && entry.get().generation == queue.generation
            {
                entry.remove().close();
                debug!(agent_id = %queue.agent_id, "agent unregistered");
            }
        }

        queue.receiver.close();
    }

    /// Broadcast a request to every agent and wait for the first matching response.
    ///
    /// Fails with [`TunnelError::NoClient`] when no agent is registered, without
    /// leaving a pending reply behind. There is no built-in timeout: dropping the
    /// returned future releases the pending reply.
    pub async fn dispatch(&self, request: Request) -> Result<Response> {
        let targets: Vec<(String, RequestSender)> = lock(&self.agents)
            .iter()
            .map(|(id, entry)| (id.clone(), entry.queue.clone()))
            .collect();

        if targets.is_empty() {
            return Err(TunnelError::NoClient);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let slot = {
            let mut pending = lock(&self.pending);
            match pending.entry(request.id.clone()) {
                Entry::Occupied(_) => {
                    return Err(TunnelError::InternalError(format!(
                        "Duplicate correlation ID: {}",
                        request.id
                    )));
                }
                Entry::Vacant(entry) => {
                    entry.insert(reply_tx);
                }
            }
            PendingSlot {
                hub: self,
                id: request.id.clone(),
            }
        };

        let request = Arc::new(request);
        let mut delivered = 0usize;
        let mut busy = 0usize;

        for (agent_id, queue) in targets {
            match queue.try_send(Arc::clone(&request)) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    busy += 1;
                    warn!(agent_id = %agent_id, request_id = %request.id, "agent queue full, request dropped for this agent");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(agent_id = %agent_id, "agent queue closed during broadcast");
                }
            }
        }

        if delivered == 0 {
            return Err(if busy > 0 {
                TunnelError::AgentsBusy
            } else {
                TunnelError::NoClient
            });
        }

        debug!(request_id = %request.id, agents = delivered, "broadcast request");

        let response = reply_rx
            .await
            .map_err(|_| TunnelError::InternalError("pending reply slot dropped".to_string()))?;
        drop(slot);

        Ok(response)
    }

    /// Deliver a response to the caller waiting on its correlation ID.
    ///
    /// Returns false when nobody is waiting (late, duplicate or unknown ID); the
    /// response is discarded.
    pub fn complete_reply(&self, response: Response) -> bool {
        let Some(reply_tx) = lock(&self.pending).remove(&response.id) else {
            debug!(request_id = %response.id, "discarding response without a pending request");
            return false;
        };

        let request_id = response.id.clone();
        if reply_tx.send(response).is_err() {
            debug!(request_id = %request_id, "caller went away before the response arrived");
        }
        true
    }

    /// Number of registered agents
    pub fn agent_count(&self) -> usize {
        lock(&self.agents).len()
    }

    /// Whether an agent is registered under `agent_id`
    pub fn has_agent(&self, agent_id: &str) -> bool {
        lock(&self.agents).contains_key(agent_id)
    }

    /// Number of callers waiting for a response
    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}
