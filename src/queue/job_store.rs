//! Storage for queued generation jobs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::Side;
use crate::provider::GenerationOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One image worth of work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub id: Uuid,
    pub request_id: Uuid,
    pub organization_id: Uuid,
    pub options: GenerationOptions,
    pub side: Side,
    pub index: u32,
    pub retry_count: u32,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl QueueJob {
    pub fn new(request_id: Uuid, organization_id: Uuid, options: GenerationOptions, added_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            request_id,
            organization_id,
            side: options.side,
            index: options.index,
            options,
            retry_count: 0,
            status: JobStatus::Pending,
            last_error: None,
            added_at,
        }
    }
}

/// Job counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, job: QueueJob) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<QueueJob>;

    async fn get_status(&self, id: Uuid) -> Result<Option<JobStatus>>;

    /// Claim the oldest pending job, moving it to `Processing`
    async fn scan_pending(&self) -> Result<Option<QueueJob>>;

    /// Overwrite a job in place, keeping its queue position
    async fn update(&self, job: QueueJob) -> Result<()>;

    /// Put a job back at the tail of the pending rotation
    async fn requeue(&self, job: QueueJob) -> Result<()>;

    /// Whether any job of the request is still pending or processing
    async fn has_outstanding(&self, request_id: Uuid) -> Result<bool>;

    async fn list_for_request(&self, request_id: Uuid) -> Result<Vec<QueueJob>>;

    /// Remove finished jobs added before `before`, returning how many
    async fn sweep(&self, before: DateTime<Utc>) -> Result<usize>;

    async fn counts(&self) -> Result<JobCounts>;
}

#[derive(Default)]
struct Slots {
    jobs: HashMap<Uuid, (u64, QueueJob)>,
    next_seq: u64,
}

impl Slots {
    fn seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }
}

/// Process-local job store
#[derive(Default)]
pub struct MemoryJobStore {
    slots: Mutex<Slots>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: QueueJob) -> Result<()> {
        let mut slots = self.slots.lock();
        let seq = slots.seq();
        slots.jobs.insert(job.id, (seq, job));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<QueueJob> {
        self.slots
            .lock()
            .jobs
            .get(&id)
            .map(|(_, job)| job.clone())
            .ok_or_else(|| AppError::NotFound(format!("job {}", id)))
    }

    async fn get_status(&self, id: Uuid) -> Result<Option<JobStatus>> {
        Ok(self.slots.lock().jobs.get(&id).map(|(_, job)| job.status))
    }

    async fn scan_pending(&self) -> Result<Option<QueueJob>> {
        let mut slots = self.slots.lock();
        let next = slots
            .jobs
            .values_mut()
            .filter(|(_, job)| job.status == JobStatus::Pending)
            .min_by_key(|(seq, _)| *seq);

        Ok(next.map(|(_, job)| {
            job.status = JobStatus::Processing;
            job.clone()
        }))
    }

    async fn update(&self, job: QueueJob) -> Result<()> {
        let mut slots = self.slots.lock();
        let slot = slots
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| AppError::NotFound(format!("job {}", job.id)))?;
        slot.1 = job;
        Ok(())
    }

    async fn requeue(&self, mut job: QueueJob) -> Result<()> {
        let mut slots = self.slots.lock();
        if !slots.jobs.contains_key(&job.id) {
            return Err(AppError::NotFound(format!("job {}", job.id)));
        }
        job.status = JobStatus::Pending;
        let seq = slots.seq();
        slots.jobs.insert(job.id, (seq, job));
        Ok(())
    }

    async fn has_outstanding(&self, request_id: Uuid) -> Result<bool> {
        Ok(self
            .slots
            .lock()
            .jobs
            .values()
            .any(|(_, job)| job.request_id == request_id && !job.status.is_terminal()))
    }

    async fn list_for_request(&self, request_id: Uuid) -> Result<Vec<QueueJob>> {
        let mut jobs: Vec<QueueJob> = self
            .slots
            .lock()
            .jobs
            .values()
            .filter(|(_, job)| job.request_id == request_id)
            .map(|(_, job)| job.clone())
            .collect();
        jobs.sort_by_key(|job| (job.side, job.index));
        Ok(jobs)
    }

    async fn sweep(&self, before: DateTime<Utc>) -> Result<usize> {
        let mut slots = self.slots.lock();
        let initial = slots.jobs.len();
        slots
            .jobs
            .retain(|_, (_, job)| !(job.status.is_terminal() && job.added_at < before));
        Ok(initial - slots.jobs.len())
    }

    async fn counts(&self) -> Result<JobCounts> {
        let slots = self.slots.lock();
        let mut counts = JobCounts::default();
        for (_, job) in slots.jobs.values() {
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}
