//! Topic-scoped bounded worker pools.
//!
//! Each registered topic owns an independent semaphore of fixed width, so a
//! flood of `product` pages cannot starve `shop` work. `submit` never blocks:
//! it admits the task (or refuses it with an error) and spawns it onto the
//! runtime, where it waits for one of the topic's permits.
//!
//! # Concurrency Model
//!
//! - At most `concurrency` tasks of one topic run at the same time
//! - Up to `max_blocking_tasks` more may wait for a permit; beyond that
//!   `submit` returns [`PoolError::Saturated`]
//! - A panicking task is caught at the pool boundary and reported as
//!   [`TaskOutcome::Panicked`]; the permit is released and the pool keeps going

mod error;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dashmap::DashMap;
use futures_util::FutureExt;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

pub use error::PoolError;

/// Minimum allowed width of a topic.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed width of a topic.
pub const MAX_CONCURRENCY: usize = 1000;

/// Default width of a topic.
pub const DEFAULT_TOPIC_CONCURRENCY: usize = 20;

/// Default number of tasks allowed to wait for a permit, per topic.
pub const DEFAULT_MAX_BLOCKING_TASKS: usize = 1000;

/// Topic for shop-level work.
pub const TOPIC_SHOP: &str = "shop";

/// Topic for product page work.
pub const TOPIC_PRODUCT: &str = "product";

/// How a submitted task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    /// The task ran to completion.
    Completed(T),
    /// The task panicked; carries the panic message.
    Panicked(String),
    /// The task never ran (its topic was closed first) or was aborted.
    Cancelled,
}

impl<T> TaskOutcome<T> {
    /// Returns the completed value, if any.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Panicked(_) | Self::Cancelled => None,
        }
    }
}

/// Handle to a submitted task.
#[derive(Debug)]
pub struct TaskHandle<T> {
    topic: String,
    inner: JoinHandle<TaskOutcome<T>>,
}

impl<T> TaskHandle<T> {
    /// Returns the topic the task was submitted to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the task to finish.
    pub async fn wait(self) -> TaskOutcome<T> {
        match self.inner.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => TaskOutcome::Panicked(panic_message(&*e.into_panic())),
            Err(_) => TaskOutcome::Cancelled,
        }
    }
}

#[derive(Debug)]
struct TopicPool {
    name: String,
    semaphore: Arc<Semaphore>,
    concurrency: usize,
    limit: Option<usize>,
    pending: AtomicUsize,
    idle: Notify,
}

impl TopicPool {
    fn admit(&self) -> Result<(), PoolError> {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match self.limit {
                Some(limit) if n >= limit => None,
                _ => Some(n + 1),
            })
            .map(|_| ())
            .map_err(|_| PoolError::Saturated {
                topic: self.name.clone(),
                limit: self.limit.unwrap_or(usize::MAX),
            })
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Decrements the topic's pending count when a task finishes, however it finishes.
struct PendingGuard(Arc<TopicPool>);

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// A set of named, independently bounded executors.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug)]
pub struct TopicWorkerPool {
    topics: DashMap<String, Arc<TopicPool>>,
    max_blocking_tasks: usize,
    released: AtomicBool,
}

impl Default for TopicWorkerPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_BLOCKING_TASKS)
    }
}

impl TopicWorkerPool {
    /// Creates an empty pool. `max_blocking_tasks == 0` means no queue limit.
    #[must_use]
    pub fn new(max_blocking_tasks: usize) -> Self {
        Self {
            topics: DashMap::new(),
            max_blocking_tasks,
            released: AtomicBool::new(false),
        }
    }

    /// Registers `topic` with `concurrency` workers.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::DuplicateTopic`] if the topic exists,
    /// [`PoolError::InvalidConcurrency`] for a width outside
    /// `MIN_CONCURRENCY..=MAX_CONCURRENCY`, or [`PoolError::Released`].
    pub fn register_topic(&self, topic: &str, concurrency: usize) -> Result<(), PoolError> {
        if self.is_released() {
            return Err(PoolError::Released);
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(PoolError::InvalidConcurrency {
                topic: topic.to_string(),
                value: concurrency,
            });
        }

        let limit = (self.max_blocking_tasks > 0).then(|| concurrency + self.max_blocking_tasks);
        match self.topics.entry(topic.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(PoolError::DuplicateTopic {
                topic: topic.to_string(),
            }),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Arc::new(TopicPool {
                    name: topic.to_string(),
                    semaphore: Arc::new(Semaphore::new(concurrency)),
                    concurrency,
                    limit,
                    pending: AtomicUsize::new(0),
                    idle: Notify::new(),
                }));
                info!(topic, concurrency, "registered topic");
                Ok(())
            }
        }
    }

    /// Returns true if `topic` is registered.
    #[must_use]
    pub fn has_topic(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Returns the width of `topic`, if registered.
    #[must_use]
    pub fn concurrency(&self, topic: &str) -> Option<usize> {
        self.topics.get(topic).map(|pool| pool.concurrency)
    }

    /// Returns the number of running plus queued tasks of `topic`.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map_or(0, |pool| pool.pending.load(Ordering::SeqCst))
    }

    /// Returns true once [`release`](Self::release) has been called.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Admits `task` for execution on `topic`.
    ///
    /// The task is not run if this returns an error.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownTopic`], [`PoolError::Saturated`] or
    /// [`PoolError::Released`].
    #[instrument(level = "debug", skip(self, task))]
    pub fn submit<F, T>(&self, topic: &str, task: F) -> Result<TaskHandle<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_released() {
            return Err(PoolError::Released);
        }
        // Clone the Arc so the map shard lock is released before spawning.
        let pool = self
            .topics
            .get(topic)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PoolError::UnknownTopic {
                topic: topic.to_string(),
            })?;

        if let Err(e) = pool.admit() {
            warn!(topic, error = %e, "task rejected");
            return Err(e);
        }

        let guard = PendingGuard(Arc::clone(&pool));
        let semaphore = Arc::clone(&pool.semaphore);
        let topic_name = pool.name.clone();

        let inner = tokio::spawn(async move {
            let _guard = guard;
            let Ok(_permit) = semaphore.acquire_owned().await else {
                debug!(topic = %topic_name, "topic closed before task started");
                return TaskOutcome::Cancelled;
            };
            match AssertUnwindSafe(task).catch_unwind().await {
                Ok(value) => TaskOutcome::Completed(value),
                Err(payload) => {
                    let message = panic_message(&*payload);
                    error!(topic = %topic_name, panic = %message, "task panicked");
                    TaskOutcome::Panicked(message)
                }
            }
        });

        debug!(topic, "task submitted");
        Ok(TaskHandle {
            topic: topic.to_string(),
            inner,
        })
    }

    /// Unregisters `topic` after letting its admitted tasks finish.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::UnknownTopic`] if the topic is not registered.
    pub async fn close_topic(&self, topic: &str) -> Result<(), PoolError> {
        let (_, pool) = self
            .topics
            .remove(topic)
            .ok_or_else(|| PoolError::UnknownTopic {
                topic: topic.to_string(),
            })?;
        pool.wait_idle().await;
        pool.semaphore.close();
        info!(topic, "closed topic");
        Ok(())
    }

    /// Drains every topic and refuses all further work.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Released`] if the pool was already released.
    pub async fn release(&self) -> Result<(), PoolError> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(PoolError::Released);
        }
        let names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, pool)) = self.topics.remove(&name) {
                pool.wait_idle().await;
                pool.semaphore.close();
                info!(topic = %name, "released topic");
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
