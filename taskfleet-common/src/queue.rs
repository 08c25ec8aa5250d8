//! Partitioned task queues over an external store with blocking list
//! semantics (Redis lists in production, an in-memory implementation for
//! tests).

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

/// Total number of task partitions in the fleet. Fixed for the fleet's
/// lifetime; producers and workers must agree on it.
pub const PARTITION_COUNT: u32 = 256;

/// Queue key holding a partition's pending task ids.
pub fn partition_queue(partition: u32) -> String {
    format!("tasks:{partition}")
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("queue store ended the blocking pop without a payload")]
    EmptyPop,
}

/// Minimal capability the fleet needs from the queue store: an atomic
/// blocking left-pop across an ordered list of queues, and the producer-side
/// append.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Block until any of `queues` is non-empty and pop its head, returning
    /// `(queue name, payload)`. Blocks without a server-side timeout; callers
    /// cancel by dropping the future.
    async fn blocking_pop(&self, queues: &[String]) -> Result<(String, String), QueueError>;

    /// Append `payload` to the tail of `queue`.
    async fn push(&self, queue: &str, payload: &str) -> Result<(), QueueError>;
}

pub struct RedisQueue {
    client: redis::Client,
}

impl RedisQueue {
    pub fn new(url: &str) -> Result<Self, QueueError> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    async fn blocking_pop(&self, queues: &[String]) -> Result<(String, String), QueueError> {
        // Dedicated connection per call: BLPOP stalls its connection for the
        // duration, and an abandoned pop must not leave a response in flight
        // on a connection that would be reused.
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let popped: Option<(String, String)> = conn.blpop(queues, 0.0).await?;
        popped.ok_or(QueueError::EmptyPop)
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<(), QueueError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.rpush(queue, payload).await?;
        Ok(())
    }
}

/// In-memory `TaskQueue` for tests: FIFO per queue, wakeups on push.
#[derive(Default)]
pub struct InMemoryQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    pushed: Notify,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, queue: &str) -> usize {
        self.queues
            .lock()
            .await
            .get(queue)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    async fn try_pop(&self, queues: &[String]) -> Option<(String, String)> {
        let mut guard = self.queues.lock().await;
        for name in queues {
            if let Some(payload) = guard.get_mut(name).and_then(|q| q.pop_front()) {
                return Some((name.clone(), payload));
            }
        }
        None
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    async fn blocking_pop(&self, queues: &[String]) -> Result<(String, String), QueueError> {
        loop {
            // Register for the wakeup before checking, so a push racing the
            // check cannot be missed.
            let pushed = self.pushed.notified();
            if let Some(hit) = self.try_pop(queues).await {
                return Ok(hit);
            }
            pushed.await;
        }
    }

    async fn push(&self, queue: &str, payload: &str) -> Result<(), QueueError> {
        self.queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.to_string());
        self.pushed.notify_waiters();
        Ok(())
    }
}
