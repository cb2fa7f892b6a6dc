//! Persistence seams.
//!
//! `AttributeStore` holds every keyed, replaceable record set the pipeline produces;
//! `DealSource` is the read-only CRM/profile collaborator. `PgStore` backs both in
//! production, `MemoryStore` in dev runs without `DATABASE_URL` and in tests.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::attribute::FinalAttribute;
use crate::models::deal::{ContentHashes, DealRecord, FitSummary, JobContext};
use crate::models::overrides::AttributeOverride;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Which pipeline stage a persisted row set belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Extraction,
    Categorization,
    Refinement,
    RoleRelevance,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Extraction => "extraction",
            StageKind::Categorization => "categorization",
            StageKind::Refinement => "refinement",
            StageKind::RoleRelevance => "role_relevance",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait AttributeStore: Send + Sync {
    async fn upsert_job_context(&self, ctx: &JobContext) -> Result<(), StoreError>;
    async fn load_job_context(&self, deal_id: &str) -> Result<Option<JobContext>, StoreError>;

    /// Replaces the row set of one stage for one `jd_hash`.
    async fn save_stage_rows(
        &self,
        jd_hash: &str,
        stage: StageKind,
        rows: Value,
    ) -> Result<(), StoreError>;
    async fn load_stage_rows(
        &self,
        jd_hash: &str,
        stage: StageKind,
    ) -> Result<Option<Value>, StoreError>;

    /// Atomically swaps the deal's final attribute set. Readers see the old set or the
    /// new set, never a mix or an empty gap.
    async fn replace_final_attributes(
        &self,
        deal_id: &str,
        rows: &[FinalAttribute],
    ) -> Result<(), StoreError>;
    /// Rows ordered by `final_rank`.
    async fn load_final_attributes(&self, deal_id: &str) -> Result<Vec<FinalAttribute>, StoreError>;

    async fn upsert_fit_summary(&self, deal_id: &str, summary: &FitSummary) -> Result<(), StoreError>;
    async fn load_fit_summary(&self, deal_id: &str) -> Result<Option<FitSummary>, StoreError>;

    /// Upserts keyed by (deal_id, attribute_name, jd_hash, profile_hash).
    async fn upsert_override(&self, entry: &AttributeOverride) -> Result<(), StoreError>;
    /// Returns whether a row was deleted.
    async fn delete_override(
        &self,
        deal_id: &str,
        attribute_name: &str,
        hashes: &ContentHashes,
    ) -> Result<bool, StoreError>;
    /// Deletes every override of the deal regardless of hashes.
    async fn delete_overrides(&self, deal_id: &str) -> Result<u64, StoreError>;
    /// All overrides of the deal, stale ones included.
    async fn load_overrides(&self, deal_id: &str) -> Result<Vec<AttributeOverride>, StoreError>;
}

#[async_trait]
pub trait DealSource: Send + Sync {
    async fn load_deal(&self, deal_id: &str) -> Result<Option<DealRecord>, StoreError>;
}

/// Typed wrapper over `save_stage_rows`.
pub async fn save_stage<T: Serialize + Sync>(
    store: &dyn AttributeStore,
    jd_hash: &str,
    stage: StageKind,
    rows: &[T],
) -> Result<(), StoreError> {
    let value = serde_json::to_value(rows)?;
    store.save_stage_rows(jd_hash, stage, value).await
}

/// Typed wrapper over `load_stage_rows`.
pub async fn load_stage<T: DeserializeOwned>(
    store: &dyn AttributeStore,
    jd_hash: &str,
    stage: StageKind,
) -> Result<Option<Vec<T>>, StoreError> {
    match store.load_stage_rows(jd_hash, stage).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Current content hashes of a deal: the stored job context's `jd_hash` and the
/// `profile_hash` of the last summary computed against that same job text.
pub async fn current_hashes(
    store: &dyn AttributeStore,
    deal_id: &str,
) -> Result<Option<ContentHashes>, StoreError> {
    let Some(ctx) = store.load_job_context(deal_id).await? else {
        return Ok(None);
    };
    let Some(summary) = store.load_fit_summary(deal_id).await? else {
        return Ok(None);
    };
    if summary.jd_hash != ctx.jd_hash {
        return Ok(None);
    }
    Ok(Some(summary.hashes()))
}
