//! Bounded-concurrency job queue for asynchronous generation
//!
//! A request is split into one job per image. Jobs are claimed while fewer
//! than `concurrency` are in flight, run through the fallback dispatcher,
//! and returned to the pending rotation on failure until `max_retries` is
//! spent. When the last job of a request settles, the request status is
//! reconciled by counting the images actually produced.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::QueueSettings;
use crate::error::{AppError, Result};
use crate::gateway::FallbackDispatcher;
use crate::generation::GenerationPlanner;
use crate::ledger::{CreditLedger, Reservation, TransactionMeta, TransactionType};
use crate::models::{GeneratedImage, GenerationInput, GenerationRequest, GenerationStatus, Side};
use crate::queue::job_store::{JobCounts, JobStatus, JobStore, QueueJob};
use crate::store::GenerationStore;

/// Configuration for the job queue
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of jobs in flight
    pub concurrency: usize,
    /// Requeues allowed per job before it is marked failed
    pub max_retries: u32,
    /// How long finished jobs are kept before a sweep removes them
    pub retention: Duration,
    /// Scheduler tick when no completion wakes it first
    pub tick_interval: Duration,
    /// Reserve credits on submit and settle them on completion
    pub metered: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::from(&QueueSettings::default())
    }
}

impl From<&QueueSettings> for QueueConfig {
    fn from(settings: &QueueSettings) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            max_retries: settings.max_retries,
            retention: Duration::from_secs(settings.retention_secs),
            tick_interval: Duration::from_millis(settings.tick_interval_ms),
            metered: settings.metered,
        }
    }
}

/// Handle returned to the caller of [`JobQueue::submit`]
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedGeneration {
    pub request_id: Uuid,
    pub job_ids: Vec<Uuid>,
    pub reserved_credits: i64,
}

/// Queue statistics
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    #[serde(flatten)]
    pub jobs: JobCounts,
    pub active: usize,
    pub concurrency: usize,
}

pub struct JobQueue {
    planner: Arc<GenerationPlanner>,
    dispatcher: Arc<FallbackDispatcher>,
    ledger: Arc<CreditLedger>,
    generations: Arc<dyn GenerationStore>,
    jobs: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    active: AtomicUsize,
    wake: Notify,
    reservations: Mutex<HashMap<Uuid, Reservation>>,
}

impl JobQueue {
    pub fn new(
        planner: Arc<GenerationPlanner>,
        dispatcher: Arc<FallbackDispatcher>,
        ledger: Arc<CreditLedger>,
        generations: Arc<dyn GenerationStore>,
        jobs: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Self {
        Self {
            planner,
            dispatcher,
            ledger,
            generations,
            jobs,
            clock,
            config,
            active: AtomicUsize::new(0),
            wake: Notify::new(),
            reservations: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Validate a request, record it as processing and enqueue one job per image
    pub async fn submit(&self, input: GenerationInput) -> Result<SubmittedGeneration> {
        let plan = self.planner.plan(&input).await?;
        let org = input.organization_id;

        let request = GenerationRequest::from_input(&input, GenerationStatus::Processing);
        let request_id = request.id;

        let reservation = if self.config.metered {
            Some(
                self.ledger
                    .reserve(
                        org,
                        plan.total_cost(),
                        TransactionType::Generation,
                        TransactionMeta::note(format!("Queued generation of {} images", input.total()))
                            .with_reference("generation_request", request_id),
                    )
                    .await?,
            )
        } else {
            None
        };

        if let Err(e) = self.generations.create_request(request).await {
            if let Some(reservation) = reservation {
                if let Err(release_err) = self.ledger.release(reservation).await {
                    error!(request_id = %request_id, error = %release_err, "Failed to release reservation");
                }
            }
            return Err(e);
        }

        let reserved_credits = reservation.as_ref().map_or(0, |r| r.amount);
        if let Some(reservation) = reservation {
            self.reservations.lock().insert(request_id, reservation);
        }

        let now = self.clock.now();
        let mut job_ids = Vec::with_capacity(input.total() as usize);
        for (side, count) in plan.sides() {
            for index in 0..count {
                let job = QueueJob::new(request_id, org, plan.options(side, index)?, now);
                job_ids.push(job.id);
                self.jobs.enqueue(job).await?;
            }
        }

        info!(
            organization_id = %org,
            request_id = %request_id,
            jobs = job_ids.len(),
            reserved_credits = reserved_credits,
            "Generation queued"
        );
        self.wake.notify_one();

        Ok(SubmittedGeneration {
            request_id,
            job_ids,
            reserved_credits,
        })
    }

    /// Claim a pending job if a concurrency slot is free
    async fn try_claim(&self) -> Result<Option<QueueJob>> {
        let limit = self.config.concurrency;
        if self
            .active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < limit).then_some(n + 1))
            .is_err()
        {
            return Ok(None);
        }

        match self.jobs.scan_pending().await {
            Ok(Some(job)) => {
                debug!(job_id = %job.id, request_id = %job.request_id, retry = job.retry_count, "Job claimed");
                Ok(Some(job))
            }
            Ok(None) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok(None)
            }
            Err(e) => {
                self.active.fetch_sub(1, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Claim every job the free slots allow
    async fn claim_batch(&self) -> Vec<QueueJob> {
        let mut claimed = Vec::new();
        loop {
            match self.try_claim().await {
                Ok(Some(job)) => claimed.push(job),
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "Failed to scan for pending jobs");
                    break;
                }
            }
        }
        claimed
    }

    /// One deterministic scheduling pass: claim up to the free slots and run
    /// those jobs to completion. Returns how many jobs ran.
    pub async fn step(&self) -> usize {
        let claimed = self.claim_batch().await;
        let count = claimed.len();
        futures::future::join_all(claimed.into_iter().map(|job| self.process(job))).await;
        count
    }

    /// Step until no pending job remains
    pub async fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.step().await;
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }

    /// Spawn the scheduler loop. It ticks on `tick_interval` and whenever a
    /// job is submitted or finishes.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        info!(
            concurrency = queue.config.concurrency,
            tick_ms = queue.config.tick_interval.as_millis() as u64,
            "Started job queue scheduler"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(queue.config.tick_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = queue.wake.notified() => {}
                }

                for job in queue.claim_batch().await {
                    let worker = Arc::clone(&queue);
                    tokio::spawn(async move {
                        worker.process(job).await;
                    });
                }
            }
        })
    }

    async fn process(&self, mut job: QueueJob) {
        let result = match self.dispatcher.dispatch(job.organization_id, &job.options).await {
            Ok(outcome) => {
                self.generations
                    .add_image(GeneratedImage::new(job.request_id, job.side, job.index, outcome.image_url))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                job.status = JobStatus::Completed;
                if let Err(e) = self.jobs.update(job.clone()).await {
                    error!(job_id = %job.id, error = %e, "Failed to mark job completed");
                }
                self.active.fetch_sub(1, Ordering::SeqCst);
                debug!(job_id = %job.id, request_id = %job.request_id, "Job completed");
                self.check_completion(job.request_id).await;
            }
            Err(e) if job.retry_count < self.config.max_retries => {
                job.retry_count += 1;
                job.last_error = Some(e.to_string());
                warn!(
                    job_id = %job.id,
                    request_id = %job.request_id,
                    retry = job.retry_count,
                    max_retries = self.config.max_retries,
                    error = %e,
                    "Job failed, requeueing"
                );
                if let Err(e) = self.jobs.requeue(job.clone()).await {
                    error!(job_id = %job.id, error = %e, "Failed to requeue job");
                }
                self.active.fetch_sub(1, Ordering::SeqCst);
            }
            Err(e) => {
                job.status = JobStatus::Failed;
                job.last_error = Some(e.to_string());
                warn!(job_id = %job.id, request_id = %job.request_id, error = %e, "Job failed permanently");
                if let Err(e) = self.jobs.update(job.clone()).await {
                    error!(job_id = %job.id, error = %e, "Failed to mark job failed");
                }
                let message = format!(
                    "Failed to generate {} image {} after {} attempts: {}",
                    job.side,
                    job.index + 1,
                    job.retry_count + 1,
                    e
                );
                if let Err(e) = self.generations.set_side_error(job.request_id, job.side, message).await {
                    error!(request_id = %job.request_id, error = %e, "Failed to record side error");
                }
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.check_completion(job.request_id).await;
            }
        }

        self.wake.notify_one();
    }

    /// Finalize the request once none of its jobs are pending or processing
    async fn check_completion(&self, request_id: Uuid) {
        match self.jobs.has_outstanding(request_id).await {
            Ok(false) => {}
            Ok(true) => return,
            Err(e) => {
                error!(request_id = %request_id, error = %e, "Failed to check outstanding jobs");
                return;
            }
        }

        if let Err(e) = self.finalize(request_id).await {
            error!(request_id = %request_id, error = %e, "Failed to finalize request");
        }
    }

    async fn finalize(&self, request_id: Uuid) -> Result<GenerationRequest> {
        let request = self.generations.get_request(request_id).await?;
        let images = self.generations.list_images(request_id).await?;
        let produced = images.len() as u64;
        let expected = request.expected_images();
        let credits = produced as i64 * self.planner.pricing().tokens_per_image(request.quality_mode);

        let status = if produced == expected {
            GenerationStatus::Done
        } else {
            for side in [Side::Front, Side::Back] {
                let requested = match side {
                    Side::Front => request.front_count,
                    Side::Back => request.back_count,
                };
                let made = images.iter().filter(|i| i.side == side).count() as u32;
                let has_error = match side {
                    Side::Front => request.front_error.is_some(),
                    Side::Back => request.back_error.is_some(),
                };
                if made < requested && !has_error {
                    self.generations
                        .set_side_error(
                            request_id,
                            side,
                            format!("Generated {} of {} {} images", made, requested, side),
                        )
                        .await?;
                }
            }
            GenerationStatus::Error
        };

        let reservation = self.reservations.lock().remove(&request_id);
        if let Some(reservation) = reservation {
            if produced == 0 {
                self.ledger.release(reservation).await?;
            } else {
                self.ledger.settle(reservation, credits).await?;
            }
        }

        let request = self.generations.finalize(request_id, status, credits).await?;
        info!(
            request_id = %request_id,
            produced = produced,
            expected = expected,
            credits = credits,
            status = ?status,
            "Queued generation finalized"
        );
        Ok(request)
    }

    /// Remove finished jobs older than the retention window
    pub async fn sweep(&self) -> Result<usize> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .map_err(|e| AppError::Internal(format!("Invalid retention: {}", e)))?;
        let removed = self.jobs.sweep(self.clock.now() - retention).await?;
        if removed > 0 {
            info!(removed = removed, "Swept finished jobs");
        }
        Ok(removed)
    }

    pub async fn job_status(&self, job_id: Uuid) -> Result<JobStatus> {
        self.jobs
            .get_status(job_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("job {}", job_id)))
    }

    pub async fn jobs_for(&self, request_id: Uuid) -> Result<Vec<QueueJob>> {
        self.jobs.list_for_request(request_id).await
    }

    pub fn active_jobs(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub async fn stats(&self) -> Result<QueueStats> {
        Ok(QueueStats {
            jobs: self.jobs.counts().await?,
            active: self.active_jobs(),
            concurrency: self.config.concurrency,
        })
    }
}
