//! Guide-generation jobs and their lifecycle.
//!
//! ```text
//! queued ──▶ processing ──▶ review ──▶ approved
//!    │            │            │
//!    └────────────┴────────────┴──▶ failed ──▶ queued (requeue)
//! ```
//!
//! Every status change goes through [`Job::transition_to`], which rejects
//! anything not drawn above and returns a [`StatusTransition`] record.

pub mod queue;
pub mod store;

use crate::error::QueueError;
use crate::model::{GeneratedGuide, QualityFlag};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use queue::{
    BatchEnqueueResult, BatchOutcome, JobFilter, JobPage, JobQueue, JobSort, Pagination,
    QueueStats, SortField,
};
pub use store::{Catalog, InMemoryCatalog, InMemoryJobStore, JobStore, Product};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Review,
    Approved,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 5] = [
        JobStatus::Queued,
        JobStatus::Processing,
        JobStatus::Review,
        JobStatus::Approved,
        JobStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Review => "review",
            JobStatus::Approved => "approved",
            JobStatus::Failed => "failed",
        }
    }

    pub fn can_transition_to(self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Queued, Processing)
                | (Processing, Review)
                | (Review, Approved)
                | (Queued, Failed)
                | (Processing, Failed)
                | (Review, Failed)
                | (Failed, Queued)
        )
    }

    /// Blocks another job for the same product.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Processing | JobStatus::Review)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl JobPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            JobPriority::Low => "low",
            JobPriority::Normal => "normal",
            JobPriority::High => "high",
            JobPriority::Urgent => "urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Manual,
    Batch,
    Scheduled,
    ProductCreated,
}

impl TriggerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerSource::Manual => "manual",
            TriggerSource::Batch => "batch",
            TriggerSource::Scheduled => "scheduled",
            TriggerSource::ProductCreated => "product_created",
        }
    }
}

/// Guide status shown on the product record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideStatus {
    #[default]
    None,
    Queued,
    Generating,
    InReview,
    Published,
}

impl GuideStatus {
    /// Product status that follows a job entering `status`.
    ///
    /// A failed job resets the product so it can be queued again.
    pub fn for_job(status: JobStatus) -> Self {
        match status {
            JobStatus::Queued => GuideStatus::Queued,
            JobStatus::Processing => GuideStatus::Generating,
            JobStatus::Review => GuideStatus::InReview,
            JobStatus::Approved => GuideStatus::Published,
            JobStatus::Failed => GuideStatus::None,
        }
    }
}

/// Optional details attached to a transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransitionMetadata {
    pub error_message: Option<String>,
    pub reviewer: Option<String>,
    pub review_notes: Option<String>,
}

impl TransitionMetadata {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewMetadata {
    pub reviewer: Option<String>,
    pub notes: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
}

/// Record of one accepted status change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub job_id: Uuid,
    pub from: JobStatus,
    pub to: JobStatus,
    pub transitioned_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub product_id: String,
    pub status: JobStatus,
    pub priority: JobPriority,
    pub triggered_by: TriggerSource,
    pub pdf_url: Option<String>,
    pub primary_model: Option<String>,
    pub secondary_model: Option<String>,
    pub raw_output: Option<GeneratedGuide>,
    pub confidence_score: Option<f64>,
    pub quality_flags: Vec<QualityFlag>,
    pub error_message: Option<String>,
    pub review: ReviewMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        product_id: impl Into<String>,
        priority: JobPriority,
        triggered_by: TriggerSource,
        pdf_url: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            product_id: product_id.into(),
            status: JobStatus::Queued,
            priority,
            triggered_by,
            pdf_url,
            primary_model: None,
            secondary_model: None,
            raw_output: None,
            confidence_score: None,
            quality_flags: Vec::new(),
            error_message: None,
            review: ReviewMetadata::default(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply a validated status change.
    pub fn transition_to(
        &mut self,
        to: JobStatus,
        metadata: Option<&TransitionMetadata>,
    ) -> Result<StatusTransition, QueueError> {
        if !self.status.can_transition_to(to) {
            return Err(QueueError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        let now = Utc::now();
        let transition = StatusTransition {
            job_id: self.id,
            from: self.status,
            to,
            transitioned_at: now,
        };
        self.status = to;
        self.updated_at = now;

        match to {
            JobStatus::Queued => {
                self.started_at = None;
                self.completed_at = None;
                self.error_message = None;
            }
            JobStatus::Processing => self.started_at = Some(now),
            JobStatus::Review | JobStatus::Failed => self.completed_at = Some(now),
            JobStatus::Approved => self.review.reviewed_at = Some(now),
        }

        if let Some(meta) = metadata {
            if let Some(e) = &meta.error_message {
                self.error_message = Some(e.clone());
            }
            if let Some(r) = &meta.reviewer {
                self.review.reviewer = Some(r.clone());
            }
            if let Some(n) = &meta.review_notes {
                self.review.notes = Some(n.clone());
            }
        }
        Ok(transition)
    }

    /// Drop generated output ahead of a requeue.
    pub fn clear_output(&mut self) {
        self.raw_output = None;
        self.confidence_score = None;
        self.quality_flags.clear();
        self.secondary_model = None;
    }
}
