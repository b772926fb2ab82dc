//! Error types for the topic worker pool.

use thiserror::Error;

use super::{MAX_CONCURRENCY, MIN_CONCURRENCY};

/// Errors returned synchronously by [`TopicWorkerPool`](super::TopicWorkerPool).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// A task was submitted to (or a close requested for) a topic nobody registered.
    #[error("unknown topic: {topic}")]
    UnknownTopic {
        /// The requested topic.
        topic: String,
    },

    /// The topic is already registered.
    #[error("topic {topic} already registered")]
    DuplicateTopic {
        /// The duplicated topic.
        topic: String,
    },

    /// Requested width is outside the accepted range.
    #[error(
        "invalid concurrency {value} for topic {topic}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The topic being registered.
        topic: String,
        /// The rejected width.
        value: usize,
    },

    /// The topic already holds as many running and queued tasks as it accepts.
    #[error("topic {topic} is saturated ({limit} tasks running or queued)")]
    Saturated {
        /// The saturated topic.
        topic: String,
        /// Running plus queued task limit.
        limit: usize,
    },

    /// The pool was released; it accepts no further work.
    #[error("worker pool has been released")]
    Released,
}
