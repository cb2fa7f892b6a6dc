use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{AttributeStore, DealSource, StageKind, StoreError};
use crate::models::attribute::FinalAttribute;
use crate::models::deal::{ContentHashes, DealRecord, FitSummary, JobContext};
use crate::models::overrides::AttributeOverride;

type OverrideKey = (String, String, String, String);

#[derive(Default)]
struct MemoryState {
    deals: HashMap<String, DealRecord>,
    job_contexts: HashMap<String, JobContext>,
    stage_rows: HashMap<(String, StageKind), Value>,
    final_attributes: HashMap<String, Vec<FinalAttribute>>,
    fit_summaries: HashMap<String, FitSummary>,
    overrides: HashMap<OverrideKey, AttributeOverride>,
}

/// Process-local store. Each method takes the lock once, so every write is atomic.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    #[cfg(test)]
    fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds or replaces a CRM/profile record.
    #[cfg(test)]
    pub async fn insert_deal(&self, record: DealRecord) {
        self.state
            .write()
            .await
            .deals
            .insert(record.deal_id.clone(), record);
    }

    #[cfg(test)]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.writes_disabled() {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    #[cfg(test)]
    fn writes_disabled(&self) -> bool {
        self.fail_writes.load(std::sync::atomic::Ordering::SeqCst)
    }

    #[cfg(not(test))]
    fn writes_disabled(&self) -> bool {
        false
    }
}

#[async_trait]
impl AttributeStore for MemoryStore {
    async fn upsert_job_context(&self, ctx: &JobContext) -> Result<(), StoreError> {
        self.check_writable()?;
        self.state
            .write()
            .await
            .job_contexts
            .insert(ctx.deal_id.clone(), ctx.clone());
        Ok(())
    }

    async fn load_job_context(&self, deal_id: &str) -> Result<Option<JobContext>, StoreError> {
        Ok(self.state.read().await.job_contexts.get(deal_id).cloned())
    }

    async fn save_stage_rows(
        &self,
        jd_hash: &str,
        stage: StageKind,
        rows: Value,
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        self.state
            .write()
            .await
            .stage_rows
            .insert((jd_hash.to_string(), stage), rows);
        Ok(())
    }

    async fn load_stage_rows(
        &self,
        jd_hash: &str,
        stage: StageKind,
    ) -> Result<Option<Value>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .stage_rows
            .get(&(jd_hash.to_string(), stage))
            .cloned())
    }

    async fn replace_final_attributes(
        &self,
        deal_id: &str,
        rows: &[FinalAttribute],
    ) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut sorted = rows.to_vec();
        sorted.sort_by_key(|a| a.final_rank);
        self.state
            .write()
            .await
            .final_attributes
            .insert(deal_id.to_string(), sorted);
        Ok(())
    }

    async fn load_final_attributes(&self, deal_id: &str) -> Result<Vec<FinalAttribute>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .final_attributes
            .get(deal_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_fit_summary(&self, deal_id: &str, summary: &FitSummary) -> Result<(), StoreError> {
        self.check_writable()?;
        self.state
            .write()
            .await
            .fit_summaries
            .insert(deal_id.to_string(), summary.clone());
        Ok(())
    }

    async fn load_fit_summary(&self, deal_id: &str) -> Result<Option<FitSummary>, StoreError> {
        Ok(self.state.read().await.fit_summaries.get(deal_id).cloned())
    }

    async fn upsert_override(&self, entry: &AttributeOverride) -> Result<(), StoreError> {
        self.check_writable()?;
        let key = (
            entry.deal_id.clone(),
            entry.attribute_name.clone(),
            entry.jd_hash.clone(),
            entry.profile_hash.clone(),
        );
        self.state.write().await.overrides.insert(key, entry.clone());
        Ok(())
    }

    async fn delete_override(
        &self,
        deal_id: &str,
        attribute_name: &str,
        hashes: &ContentHashes,
    ) -> Result<bool, StoreError> {
        self.check_writable()?;
        let key = (
            deal_id.to_string(),
            attribute_name.to_string(),
            hashes.jd_hash.clone(),
            hashes.profile_hash.clone(),
        );
        Ok(self.state.write().await.overrides.remove(&key).is_some())
    }

    async fn delete_overrides(&self, deal_id: &str) -> Result<u64, StoreError> {
        self.check_writable()?;
        let mut state = self.state.write().await;
        let before = state.overrides.len();
        state.overrides.retain(|(d, _, _, _), _| d != deal_id);
        Ok((before - state.overrides.len()) as u64)
    }

    async fn load_overrides(&self, deal_id: &str) -> Result<Vec<AttributeOverride>, StoreError> {
        let state = self.state.read().await;
        let mut rows: Vec<AttributeOverride> = state
            .overrides
            .values()
            .filter(|o| o.deal_id == deal_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.attribute_name.cmp(&b.attribute_name));
        Ok(rows)
    }
}

#[async_trait]
impl DealSource for MemoryStore {
    async fn load_deal(&self, deal_id: &str) -> Result<Option<DealRecord>, StoreError> {
        Ok(self.state.read().await.deals.get(deal_id).cloned())
    }
}
