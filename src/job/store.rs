//! Persistence seams for jobs and the product catalog.
//!
//! The real job table and catalog live outside this crate; the queue and the
//! orchestrator only see these traits. The in-memory implementations back the
//! CLI and the tests.

use super::{GuideStatus, Job};
use crate::error::QueueError;
use crate::model::GeneratedGuide;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// The slice of a catalog product the pipeline cares about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    /// `source_url` of the product's assembly document, if it has one.
    pub assembly_source_url: Option<String>,
    pub page_count: Option<usize>,
    pub guide_status: GuideStatus,
    pub guide: Option<GeneratedGuide>,
}

impl Product {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            assembly_source_url: None,
            page_count: None,
            guide_status: GuideStatus::None,
            guide: None,
        }
    }

    pub fn with_assembly_pdf(mut self, url: impl Into<String>) -> Self {
        self.assembly_source_url = Some(url.into());
        self
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: Job) -> Result<(), QueueError>;
    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError>;
    /// Replace a stored job. Fails with `JobNotFound` if it was never inserted.
    async fn update(&self, job: &Job) -> Result<(), QueueError>;
    async fn list(&self) -> Result<Vec<Job>, QueueError>;
}

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_product(&self, id: &str) -> Result<Option<Product>, QueueError>;
    async fn set_guide_status(&self, id: &str, status: GuideStatus) -> Result<(), QueueError>;
    async fn save_guide(&self, id: &str, guide: &GeneratedGuide) -> Result<(), QueueError>;
}

#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), QueueError> {
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn update(&self, job: &Job) -> Result<(), QueueError> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(QueueError::JobNotFound(job.id.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<Job>, QueueError> {
        Ok(self.jobs.read().await.values().cloned().collect())
    }
}

#[derive(Default)]
pub struct InMemoryCatalog {
    products: RwLock<HashMap<String, Product>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, product: Product) {
        self.products
            .write()
            .await
            .insert(product.id.clone(), product);
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_product(&self, id: &str) -> Result<Option<Product>, QueueError> {
        Ok(self.products.read().await.get(id).cloned())
    }

    async fn set_guide_status(&self, id: &str, status: GuideStatus) -> Result<(), QueueError> {
        let mut products = self.products.write().await;
        let product = products
            .get_mut(id)
            .ok_or_else(|| QueueError::ProductNotFound(id.to_string()))?;
        product.guide_status = status;
        Ok(())
    }

    async fn save_guide(&self, id: &str, guide: &GeneratedGuide) -> Result<(), QueueError> {
        let mut products = self.products.write().await;
        let product = products
            .get_mut(id)
            .ok_or_else(|| QueueError::ProductNotFound(id.to_string()))?;
        product.guide = Some(guide.clone());
        Ok(())
    }
}
