//! Runs queued jobs through the guide pipeline.
//!
//! A run is atomic at the job level: the job either ends in `review` with the
//! guide attached, or in `failed` with the error message and the product's
//! guide status reset.

use crate::error::QueueError;
use crate::generate::GuidePipeline;
use crate::job::{Job, JobQueue, JobStatus, TransitionMetadata};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

pub struct Orchestrator {
    queue: Arc<JobQueue>,
    pipeline: Arc<GuidePipeline>,
}

impl Orchestrator {
    pub fn new(queue: Arc<JobQueue>, pipeline: Arc<GuidePipeline>) -> Self {
        Self { queue, pipeline }
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Process one job and return its final state.
    ///
    /// `Err` means the queue refused to start the job (unknown job, job not
    /// `queued`) or could not record the failure. Once the job is
    /// `processing`, every error is recorded on the job as `failed`.
    pub async fn run_job(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.queue
            .transition(job_id, JobStatus::Processing, None)
            .await?;

        if let Err(message) = self.execute(job_id).await {
            error!("Job {} failed: {}", job_id, message);
            self.queue
                .transition(
                    job_id,
                    JobStatus::Failed,
                    Some(TransitionMetadata::error(message)),
                )
                .await?;
        }
        self.queue.get(job_id).await
    }

    /// Everything between `processing` and `review`.
    async fn execute(&self, job_id: Uuid) -> Result<(), String> {
        let job = self.queue.get(job_id).await.map_err(|e| e.to_string())?;
        let product = self
            .queue
            .catalog()
            .get_product(&job.product_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| QueueError::ProductNotFound(job.product_id.clone()).to_string())?;

        let pdf_url = job
            .pdf_url
            .clone()
            .or(product.assembly_source_url)
            .unwrap_or_default();
        let guide = self
            .pipeline
            .generate(&job.product_id, &product.name, &pdf_url)
            .await
            .map_err(|e| e.to_string())?;

        info!(
            "Job {}: {} steps, confidence {:.2}, ready for review",
            job_id,
            guide.steps.len(),
            guide.overall_confidence
        );
        self.queue
            .complete(job_id, guide)
            .await
            .map(|_| ())
            .map_err(|e| format!("could not store the generated guide: {e}"))
    }

    /// Run the next queued job, if any.
    pub async fn run_next(&self) -> Result<Option<Job>, QueueError> {
        match self.queue.next_queued().await? {
            Some(job) => self.run_job(job.id).await.map(Some),
            None => Ok(None),
        }
    }
}
