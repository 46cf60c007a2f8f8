//! SQS job queue for recording jobs.
//!
//! This crate provides:
//! - Recording job descriptors parsed from queue payloads
//! - A `MessageQueue` seam (long-poll receive, delete by receipt handle)
//! - The SQS-backed implementation used in production

pub mod error;
pub mod job;
pub mod queue;

pub use error::{QueueError, QueueResult};
pub use job::JobDescriptor;
pub use queue::{MessageQueue, QueueConfig, QueueMessage, SqsQueue, MAX_RECEIVE_BATCH, VISIBILITY_TIMEOUT};
