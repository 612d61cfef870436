//! The admin-facing job queue.
//!
//! Every mutation loads the job, applies the change through
//! [`Job::transition_to`], writes it back, and then moves the product's
//! guide status along with [`GuideStatus::for_job`].

use super::store::{Catalog, JobStore};
use super::{
    GuideStatus, Job, JobPriority, JobStatus, StatusTransition, TransitionMetadata, TriggerSource,
};
use crate::error::QueueError;
use crate::model::GeneratedGuide;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

const CANCELLED_MESSAGE: &str = "Cancelled by operator";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchOutcome {
    Queued { job_id: Uuid },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchEnqueueResult {
    pub product_id: String,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<String, usize>,
    pub by_trigger: BTreeMap<String, usize>,
    /// Mean confidence over jobs that produced a guide.
    pub average_confidence: Option<f64>,
    pub completed_today: usize,
    pub failed_today: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub priority: Option<JobPriority>,
    pub triggered_by: Option<TriggerSource>,
    pub product_id: Option<String>,
}

impl JobFilter {
    fn matches(&self, job: &Job) -> bool {
        self.status.is_none_or(|s| job.status == s)
            && self.priority.is_none_or(|p| job.priority == p)
            && self.triggered_by.is_none_or(|t| job.triggered_by == t)
            && self.product_id.as_deref().is_none_or(|p| job.product_id == p)
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub page: usize,
    pub per_page: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    Priority,
    Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSort {
    pub field: SortField,
    pub descending: bool,
}

impl Default for JobSort {
    /// Newest first.
    fn default() -> Self {
        Self {
            field: SortField::CreatedAt,
            descending: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    /// Matching jobs before pagination.
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

pub struct JobQueue {
    jobs: Arc<dyn JobStore>,
    catalog: Arc<dyn Catalog>,
}

impl JobQueue {
    pub fn new(jobs: Arc<dyn JobStore>, catalog: Arc<dyn Catalog>) -> Self {
        Self { jobs, catalog }
    }

    pub fn catalog(&self) -> &Arc<dyn Catalog> {
        &self.catalog
    }

    pub async fn get(&self, job_id: Uuid) -> Result<Job, QueueError> {
        self.jobs
            .get(job_id)
            .await?
            .ok_or_else(|| QueueError::JobNotFound(job_id.to_string()))
    }

    /// Queue a generation job for one product.
    pub async fn enqueue(
        &self,
        product_id: &str,
        priority: JobPriority,
        triggered_by: TriggerSource,
    ) -> Result<Uuid, QueueError> {
        let product = self
            .catalog
            .get_product(product_id)
            .await?
            .ok_or_else(|| QueueError::ProductNotFound(product_id.to_string()))?;
        let pdf_url = product
            .assembly_source_url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| QueueError::NoAssemblyPdf(product_id.to_string()))?;

        if let Some(active) = self
            .jobs
            .list()
            .await?
            .into_iter()
            .find(|j| j.product_id == product_id && j.status.is_active())
        {
            return Err(QueueError::ActiveJobExists {
                product_id: product_id.to_string(),
                job_id: active.id.to_string(),
            });
        }

        let job = Job::new(product_id, priority, triggered_by, Some(pdf_url));
        let id = job.id;
        self.jobs.insert(job).await?;
        self.catalog
            .set_guide_status(product_id, GuideStatus::Queued)
            .await?;
        info!("Queued job {} for product {} ({})", id, product_id, priority.as_str());
        Ok(id)
    }

    /// Enqueue each product independently. Rejections become `Skipped`;
    /// storage failures abort the batch.
    pub async fn batch_enqueue(
        &self,
        product_ids: &[String],
        priority: JobPriority,
        triggered_by: TriggerSource,
    ) -> Result<Vec<BatchEnqueueResult>, QueueError> {
        let mut results = Vec::with_capacity(product_ids.len());
        for product_id in product_ids {
            let outcome = match self.enqueue(product_id, priority, triggered_by).await {
                Ok(job_id) => BatchOutcome::Queued { job_id },
                Err(QueueError::Storage(e)) => return Err(QueueError::Storage(e)),
                Err(e) => BatchOutcome::Skipped {
                    reason: e.to_string(),
                },
            };
            results.push(BatchEnqueueResult {
                product_id: product_id.clone(),
                outcome,
            });
        }
        let queued = results
            .iter()
            .filter(|r| matches!(r.outcome, BatchOutcome::Queued { .. }))
            .count();
        info!("Batch enqueue: {} queued, {} skipped", queued, results.len() - queued);
        Ok(results)
    }

    /// Validated status change that also updates the product's guide status.
    pub async fn transition(
        &self,
        job_id: Uuid,
        to: JobStatus,
        metadata: Option<TransitionMetadata>,
    ) -> Result<StatusTransition, QueueError> {
        self.apply(job_id, to, metadata.as_ref(), |_| {}).await
    }

    /// Store a finished guide on its job and move the job to `review`.
    pub async fn complete(
        &self,
        job_id: Uuid,
        guide: GeneratedGuide,
    ) -> Result<StatusTransition, QueueError> {
        let product_id = self.get(job_id).await?.product_id;
        self.catalog.save_guide(&product_id, &guide).await?;
        self.apply(job_id, JobStatus::Review, None, move |job| {
            job.primary_model = Some(guide.metadata.primary_model.clone());
            job.secondary_model = guide.metadata.secondary_model.clone();
            job.confidence_score = Some(guide.overall_confidence);
            job.quality_flags = guide.quality_flags.clone();
            job.raw_output = Some(guide);
        })
        .await
    }

    /// Stop a job that has not reached review.
    pub async fn cancel(&self, job_id: Uuid) -> Result<StatusTransition, QueueError> {
        let job = self.get(job_id).await?;
        if !matches!(job.status, JobStatus::Queued | JobStatus::Processing) {
            return Err(QueueError::InvalidTransition {
                from: job.status,
                to: JobStatus::Failed,
            });
        }
        let meta = TransitionMetadata::error(CANCELLED_MESSAGE);
        self.apply(job_id, JobStatus::Failed, Some(&meta), |_| {}).await
    }

    /// Put a failed job back in the queue with its previous output cleared.
    pub async fn requeue(&self, job_id: Uuid) -> Result<StatusTransition, QueueError> {
        self.apply(job_id, JobStatus::Queued, None, Job::clear_output)
            .await
    }

    /// Highest priority first, oldest first within a priority.
    pub async fn next_queued(&self) -> Result<Option<Job>, QueueError> {
        Ok(self
            .jobs
            .list()
            .await?
            .into_iter()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.created_at.cmp(&b.created_at))
            }))
    }

    pub async fn queue_stats(&self) -> Result<QueueStats, QueueError> {
        let jobs = self.jobs.list().await?;
        Ok(stats_for_day(&jobs, Utc::now().date_naive()))
    }

    pub async fn list_queue_jobs(
        &self,
        filter: &JobFilter,
        pagination: Pagination,
        sort: JobSort,
    ) -> Result<JobPage, QueueError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .list()
            .await?
            .into_iter()
            .filter(|j| filter.matches(j))
            .collect();
        jobs.sort_by(|a, b| {
            let ord = compare(a, b, sort.field).then(a.id.cmp(&b.id));
            if sort.descending {
                ord.reverse()
            } else {
                ord
            }
        });

        let total = jobs.len();
        let page = pagination.page.max(1);
        let per_page = pagination.per_page.max(1);
        let jobs = jobs
            .into_iter()
            .skip((page - 1) * per_page)
            .take(per_page)
            .collect();
        Ok(JobPage {
            jobs,
            total,
            page,
            per_page,
        })
    }

    async fn apply<F>(
        &self,
        job_id: Uuid,
        to: JobStatus,
        metadata: Option<&TransitionMetadata>,
        edit: F,
    ) -> Result<StatusTransition, QueueError>
    where
        F: FnOnce(&mut Job) + Send,
    {
        let mut job = self.get(job_id).await?;
        if !job.status.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                from: job.status,
                to,
            });
        }
        edit(&mut job);
        let transition = job.transition_to(to, metadata)?;
        self.jobs.update(&job).await?;
        self.catalog
            .set_guide_status(&job.product_id, GuideStatus::for_job(to))
            .await?;
        debug!("Job {}: {} → {}", job_id, transition.from, transition.to);
        Ok(transition)
    }
}

fn compare(a: &Job, b: &Job, field: SortField) -> Ordering {
    match field {
        SortField::CreatedAt => a.created_at.cmp(&b.created_at),
        SortField::UpdatedAt => a.updated_at.cmp(&b.updated_at),
        SortField::Priority => a.priority.cmp(&b.priority),
        SortField::Confidence => a
            .confidence_score
            .unwrap_or(-1.0)
            .total_cmp(&b.confidence_score.unwrap_or(-1.0)),
    }
}

/// Aggregate counters; "today" is the UTC date `day`.
pub(crate) fn stats_for_day(jobs: &[Job], day: NaiveDate) -> QueueStats {
    let mut by_status: BTreeMap<String, usize> = JobStatus::ALL
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    let mut by_priority = BTreeMap::new();
    let mut by_trigger = BTreeMap::new();
    let mut confidence_sum = 0.0;
    let mut confidence_n = 0usize;
    let mut completed_today = 0;
    let mut failed_today = 0;

    for job in jobs {
        *by_status.entry(job.status.as_str().to_string()).or_insert(0) += 1;
        *by_priority.entry(job.priority.as_str().to_string()).or_insert(0) += 1;
        *by_trigger
            .entry(job.triggered_by.as_str().to_string())
            .or_insert(0) += 1;
        if let Some(c) = job.confidence_score {
            confidence_sum += c;
            confidence_n += 1;
        }
        if job.completed_at.is_some_and(|t| t.date_naive() == day) {
            match job.status {
                JobStatus::Review | JobStatus::Approved => completed_today += 1,
                JobStatus::Failed => failed_today += 1,
                _ => {}
            }
        }
    }

    QueueStats {
        total: jobs.len(),
        by_status,
        by_priority,
        by_trigger,
        average_confidence: (confidence_n > 0).then(|| confidence_sum / confidence_n as f64),
        completed_today,
        failed_today,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn job(status: JobStatus, confidence: Option<f64>) -> Job {
        let mut j = Job::new("p", JobPriority::Normal, TriggerSource::Manual, None);
        j.status = status;
        j.confidence_score = confidence;
        if !matches!(status, JobStatus::Queued | JobStatus::Processing) {
            j.completed_at = Some(Utc::now());
        }
        j
    }

    #[test]
    fn stats_count_today_only() {
        let mut old = job(JobStatus::Failed, None);
        old.completed_at = Some(Utc::now() - Duration::days(2));
        let jobs = vec![
            job(JobStatus::Queued, None),
            job(JobStatus::Review, Some(0.8)),
            job(JobStatus::Approved, Some(0.9)),
            job(JobStatus::Failed, None),
            old,
        ];
        let stats = stats_for_day(&jobs, Utc::now().date_naive());
        assert_eq!(stats.total, 5);
        assert_eq!(stats.by_status["failed"], 2);
        assert_eq!(stats.by_status["processing"], 0);
        assert_eq!(stats.by_priority["normal"], 5);
        assert_eq!(stats.completed_today, 2);
        assert_eq!(stats.failed_today, 1);
        let avg = stats.average_confidence.unwrap();
        assert!((avg - 0.85).abs() < 1e-9);
    }

    #[test]
    fn empty_stats_have_no_average() {
        let stats = stats_for_day(&[], Utc::now().date_naive());
        assert_eq!(stats.total, 0);
        assert!(stats.average_confidence.is_none());
    }

    #[test]
    fn filter_matches_every_set_field() {
        let j = job(JobStatus::Queued, None);
        assert!(JobFilter::default().matches(&j));
        let f = JobFilter {
            status: Some(JobStatus::Queued),
            product_id: Some("p".into()),
            ..JobFilter::default()
        };
        assert!(f.matches(&j));
        let f = JobFilter {
            priority: Some(JobPriority::Urgent),
            ..JobFilter::default()
        };
        assert!(!f.matches(&j));
    }

    #[test]
    fn batch_outcome_serialises_flat() {
        let r = BatchEnqueueResult {
            product_id: "p".into(),
            outcome: BatchOutcome::Skipped {
                reason: "no pdf".into(),
            },
        };
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["outcome"], "skipped");
        assert_eq!(v["reason"], "no pdf");
    }
}
