//! Queue module - job store and bounded-concurrency job queue

pub mod job_queue;
pub mod job_store;

pub use job_queue::{JobQueue, QueueConfig, QueueStats, SubmittedGeneration};
pub use job_store::{JobCounts, JobStatus, JobStore, MemoryJobStore, QueueJob};
