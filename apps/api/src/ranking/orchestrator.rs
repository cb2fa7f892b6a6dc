//! Orchestrator: drives one deal from job text to a persisted, scored attribute set.
//!
//! precondition → extraction → categorization → refinement → role-relevance → merge →
//! weight/colorize → summarize + hybrid recompute → persist.
//!
//! Stage failures never escape: every run ends in a `PipelineReport` whose status is
//! `ok`, `degraded` (fallback ranking, all grey) or `skipped` (precondition). Runs for the
//! same deal are serialized by a per-deal lock; different deals run concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::categorization::categorize;
use super::extraction::{check_precondition, extract};
use super::fallback::{fallback_ranking, FallbackInputs};
use super::merge::merge_rankings;
use super::refinement::refine;
use super::relevance::rank_by_title;
use super::stage::{StageError, StageOutcome};
use super::weighting::weigh_and_colorize;
use crate::fit::hybrid::{self, AttributeMatch, ScoringContext};
use crate::fit::summary::{estimate_fit_score, summarize, FitNarrative};
use crate::hashing::{content_hash, short};
use crate::models::attribute::FinalAttribute;
use crate::models::deal::{
    CandidateNarrative, ContentHashes, DealRecord, FitSummary, JobContext, NarrativeSource,
};
use crate::oracle::embedding::EmbeddingOracle;
use crate::oracle::{OracleError, TextOracle};
use crate::overrides::scoring_context;
use crate::store::{load_stage, save_stage, AttributeStore, DealSource, StageKind, StoreError};

const DEFAULT_BATCH_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub job_description: Option<String>,
    #[serde(default)]
    pub candidate_narrative: Option<String>,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Degraded,
    Skipped,
}

/// Stage-level diagnostic attached to degraded and skipped runs. Carries only the error
/// code and a generic message; oracle output is logged, never returned.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradeReason {
    pub step: String,
    pub code: String,
    pub message: String,
}

impl DegradeReason {
    fn from_stage(stage: StageKind, error: &StageError) -> Self {
        Self {
            step: stage.as_str().to_string(),
            code: error.code().to_string(),
            message: error.public_message(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    pub deal_id: String,
    pub status: RunStatus,
    pub reason: Option<DegradeReason>,
    pub cached: bool,
    /// The returned set was built from an earlier job description; `hashes` are that
    /// set's hashes, not this request's.
    pub stale: bool,
    pub hashes: ContentHashes,
    pub attributes: Vec<FinalAttribute>,
    pub summary: Option<FitSummary>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecomputeReport {
    pub deal_id: String,
    pub attributes: Vec<FinalAttribute>,
    pub matches: Vec<AttributeMatch>,
    pub summary: FitSummary,
}

/// Errors of the non-pipeline operations (recompute). Pipeline runs never fail.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Oracle(#[from] OracleError),
}

pub struct Orchestrator {
    store: Arc<dyn AttributeStore>,
    source: Arc<dyn DealSource>,
    oracle: Arc<dyn TextOracle>,
    embedder: Arc<dyn EmbeddingOracle>,
    default_narrative: Option<String>,
    batch_concurrency: usize,
    deal_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn AttributeStore>,
        source: Arc<dyn DealSource>,
        oracle: Arc<dyn TextOracle>,
        embedder: Arc<dyn EmbeddingOracle>,
    ) -> Self {
        Self {
            store,
            source,
            oracle,
            embedder,
            default_narrative: None,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
            deal_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Narrative used when neither the request nor the deal record carries one.
    pub fn with_default_narrative(mut self, narrative: Option<String>) -> Self {
        self.default_narrative = narrative.filter(|n| !n.trim().is_empty());
        self
    }

    pub fn with_batch_concurrency(mut self, n: usize) -> Self {
        self.batch_concurrency = n.max(1);
        self
    }

    async fn deal_lock(&self, deal_id: &str) -> Arc<Mutex<()>> {
        self.deal_locks
            .lock()
            .await
            .entry(deal_id.to_string())
            .or_default()
            .clone()
    }

    /// Runs the full pipeline for one deal.
    pub async fn run(&self, deal_id: &str, request: RunRequest) -> PipelineReport {
        let lock = self.deal_lock(deal_id).await;
        let _guard = lock.lock().await;

        let run_id = Uuid::new_v4();
        let mut warnings = Vec::new();

        let record = match self.source.load_deal(deal_id).await {
            Ok(record) => record,
            Err(e) => {
                warn!(deal_id, "Deal source unavailable: {e}");
                warnings.push("deal source: unavailable".to_string());
                None
            }
        };

        let job_title = first_text(
            request.job_title,
            record.as_ref().and_then(|r| r.job_title.as_ref()),
        );
        let job_description = first_text(
            request.job_description,
            record.as_ref().and_then(|r| r.job_description.as_ref()),
        );
        let ctx = JobContext::new(
            deal_id,
            job_title.as_deref().unwrap_or_default(),
            job_description.as_deref().unwrap_or_default(),
        );
        let narrative = self.resolve_narrative(request.candidate_narrative, record.as_ref());
        let hashes = ContentHashes {
            jd_hash: ctx.jd_hash.clone(),
            profile_hash: profile_hash(narrative.as_ref()),
        };

        let report = |status, reason, attributes, summary, cached, warnings| PipelineReport {
            run_id,
            deal_id: deal_id.to_string(),
            status,
            reason,
            cached,
            stale: false,
            hashes: hashes.clone(),
            attributes,
            summary,
            warnings,
        };

        if let Err(e) = check_precondition(&ctx) {
            info!(deal_id, jd_hash = short(&ctx.jd_hash), "Pipeline skipped: {e}");
            return report(
                RunStatus::Skipped,
                Some(DegradeReason::from_stage(StageKind::Extraction, &e)),
                Vec::new(),
                None,
                false,
                warnings,
            );
        }

        if !request.force {
            if let Some((attributes, summary)) = self.cached_result(deal_id, &hashes).await {
                info!(deal_id, jd_hash = short(&ctx.jd_hash), "Returning cached analysis");
                return report(RunStatus::Ok, None, attributes, Some(summary), true, warnings);
            }
        }

        info!(
            deal_id,
            %run_id,
            jd_hash = short(&ctx.jd_hash),
            profile_hash = short(&hashes.profile_hash),
            narrative = ?narrative.as_ref().map(|n| n.source),
            "Pipeline started"
        );

        // Stage 1. Without candidates there is nothing to fall back to, so the previous
        // final set and its job context stay in place.
        let oracle = self.oracle.as_ref();
        let candidates = match self
            .cached_stage(&ctx, StageKind::Extraction, request.force, &mut warnings, || {
                extract(oracle, &ctx)
            })
            .await
        {
            StageOutcome::Valid(rows) => rows,
            StageOutcome::Invalid(e) => {
                warn!(
                    deal_id,
                    code = e.code(),
                    "Extraction failed, keeping previous attributes: {e}"
                );
                let attributes = self
                    .store
                    .load_final_attributes(deal_id)
                    .await
                    .unwrap_or_default();
                let summary = self.store.load_fit_summary(deal_id).await.ok().flatten();
                let previous = self.store.load_job_context(deal_id).await.ok().flatten();

                let stale = !attributes.is_empty()
                    && previous.as_ref().is_some_and(|p| p.jd_hash != ctx.jd_hash);
                if stale {
                    warnings.push("attributes predate the current job description".to_string());
                }
                let set_hashes = match (&summary, &previous) {
                    (Some(summary), _) => summary.hashes(),
                    (None, Some(previous)) => ContentHashes {
                        jd_hash: previous.jd_hash.clone(),
                        profile_hash: hashes.profile_hash.clone(),
                    },
                    (None, None) => hashes.clone(),
                };

                let mut degraded = report(
                    RunStatus::Degraded,
                    Some(DegradeReason::from_stage(StageKind::Extraction, &e)),
                    attributes,
                    summary,
                    false,
                    warnings,
                );
                degraded.stale = stale;
                degraded.hashes = set_hashes;
                return degraded;
            }
        };

        if let Err(e) = self.store.upsert_job_context(&ctx).await {
            warn!(deal_id, "Failed to persist job context: {e}");
            warnings.push(persistence_warning("job context", &e));
        }

        let mut reason = None;

        let categorized = match self
            .cached_stage(&ctx, StageKind::Categorization, request.force, &mut warnings, || {
                categorize(oracle, &candidates)
            })
            .await
        {
            StageOutcome::Valid(rows) => Some(rows),
            StageOutcome::Invalid(e) => {
                reason = Some(DegradeReason::from_stage(StageKind::Categorization, &e));
                None
            }
        };

        let refined = match &categorized {
            Some(categorized) => match self
                .cached_stage(&ctx, StageKind::Refinement, request.force, &mut warnings, || {
                    refine(oracle, &ctx, categorized)
                })
                .await
            {
                StageOutcome::Valid(rows) => Some(rows),
                StageOutcome::Invalid(e) => {
                    reason = Some(DegradeReason::from_stage(StageKind::Refinement, &e));
                    None
                }
            },
            None => None,
        };

        let relevance = match &refined {
            Some(refined) => match self
                .cached_stage(&ctx, StageKind::RoleRelevance, request.force, &mut warnings, || {
                    rank_by_title(oracle, &ctx, refined)
                })
                .await
            {
                StageOutcome::Valid(rows) => Some(rows),
                StageOutcome::Invalid(e) => {
                    reason = Some(DegradeReason::from_stage(StageKind::RoleRelevance, &e));
                    None
                }
            },
            None => None,
        };

        let merged = match (&refined, &relevance) {
            (Some(refined), Some(relevance)) => {
                let merged = merge_rankings(refined, relevance);
                if merged.is_empty() {
                    reason = Some(DegradeReason {
                        step: "merge".to_string(),
                        code: "empty_merge".to_string(),
                        message: "merge produced no attributes".to_string(),
                    });
                    None
                } else {
                    Some(merged)
                }
            }
            _ => None,
        };

        let (mut attributes, status) = match merged {
            Some(mut attrs) => {
                weigh_and_colorize(&mut attrs);
                (attrs, RunStatus::Ok)
            }
            None => {
                if let Some(r) = &reason {
                    warn!(
                        deal_id,
                        step = %r.step,
                        code = %r.code,
                        "Pipeline degraded: {}",
                        r.message
                    );
                }
                let attrs = fallback_ranking(&FallbackInputs {
                    candidates: &candidates,
                    categorized: categorized.as_deref(),
                    refined: refined.as_deref(),
                });
                (attrs, RunStatus::Degraded)
            }
        };

        let overrides = match self.store.load_overrides(deal_id).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(deal_id, "Failed to load overrides: {e}");
                warnings.push("load overrides: unavailable".to_string());
                Vec::new()
            }
        };
        let mut scoring = scoring_context(&overrides, &hashes);

        let (fit, fit_score, recolored) = match &narrative {
            Some(narrative) => {
                self.score_against(
                    &ctx,
                    narrative,
                    &mut attributes,
                    &mut scoring,
                    status == RunStatus::Ok,
                    &mut warnings,
                )
                .await
            }
            None => (FitNarrative::default(), None, false),
        };

        let summary = FitSummary {
            jd_hash: hashes.jd_hash.clone(),
            profile_hash: hashes.profile_hash.clone(),
            jd_summary: fit.jd_summary,
            fit_summary: fit.fit_summary,
            fit_score,
            recolored,
            analyzed_at: Utc::now(),
        };

        if let Err(e) = self.store.replace_final_attributes(deal_id, &attributes).await {
            warn!(deal_id, "Failed to persist final attributes: {e}");
            warnings.push(persistence_warning("final attributes", &e));
        }
        if let Err(e) = self.store.upsert_fit_summary(deal_id, &summary).await {
            warn!(deal_id, "Failed to persist fit summary: {e}");
            warnings.push(persistence_warning("fit summary", &e));
        }

        info!(
            deal_id,
            %run_id,
            status = ?status,
            attributes = attributes.len(),
            fit_score = ?summary.fit_score,
            warnings = warnings.len(),
            "Pipeline finished"
        );

        report(status, reason, attributes, Some(summary), false, warnings)
    }

    /// Runs many deals with bounded parallelism. Report order is completion order.
    pub async fn run_batch(&self, deal_ids: Vec<String>, force: bool) -> Vec<PipelineReport> {
        info!(deals = deal_ids.len(), concurrency = self.batch_concurrency, "Batch started");
        stream::iter(deal_ids)
            .map(|deal_id| async move {
                self.run(
                    &deal_id,
                    RunRequest {
                        force,
                        ..Default::default()
                    },
                )
                .await
            })
            .buffer_unordered(self.batch_concurrency)
            .collect()
            .await
    }

    /// Re-colors the stored final set against a narrative without re-running any stage.
    pub async fn recompute(
        &self,
        deal_id: &str,
        candidate_narrative: Option<String>,
    ) -> Result<RecomputeReport, PipelineError> {
        let lock = self.deal_lock(deal_id).await;
        let _guard = lock.lock().await;

        let ctx = self
            .store
            .load_job_context(deal_id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(format!("Deal {deal_id} has not been analyzed")))?;
        let mut attributes = self.store.load_final_attributes(deal_id).await?;
        if attributes.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "No attributes for deal {deal_id}"
            )));
        }

        let record = self.source.load_deal(deal_id).await?;
        let narrative = self
            .resolve_narrative(candidate_narrative, record.as_ref())
            .ok_or_else(|| PipelineError::Invalid("No candidate narrative available".to_string()))?;
        let hashes = ContentHashes {
            jd_hash: ctx.jd_hash.clone(),
            profile_hash: narrative.profile_hash.clone(),
        };

        // The stored set belongs to the job text its summary was written under.
        let previous = self.store.load_fit_summary(deal_id).await?;
        if let Some(previous) = previous.as_ref().filter(|p| p.jd_hash != ctx.jd_hash) {
            warn!(
                deal_id,
                set_jd_hash = short(&previous.jd_hash),
                jd_hash = short(&ctx.jd_hash),
                "Refusing to recompute a stale attribute set"
            );
            return Err(PipelineError::Invalid(format!(
                "Attributes for deal {deal_id} predate its job description; re-run analysis"
            )));
        }

        let overrides = self.store.load_overrides(deal_id).await?;
        let scoring = scoring_context(&overrides, &hashes);
        let outcome =
            hybrid::recompute(self.embedder.as_ref(), &mut attributes, &narrative.text, &scoring)
                .await?;

        let (jd_summary, fit_summary) = match previous {
            Some(previous) => {
                let fit_summary = (previous.profile_hash == hashes.profile_hash)
                    .then_some(previous.fit_summary)
                    .flatten();
                (previous.jd_summary, fit_summary)
            }
            None => (None, None),
        };

        let fit_score = match outcome.fit_score {
            Some(score) => Some(score),
            None => {
                let fit = FitNarrative {
                    jd_summary: jd_summary.clone(),
                    fit_summary: fit_summary.clone(),
                    ..Default::default()
                };
                self.estimate(&ctx, &narrative, &fit).await
            }
        };

        let summary = FitSummary {
            jd_hash: hashes.jd_hash,
            profile_hash: hashes.profile_hash,
            jd_summary,
            fit_summary,
            fit_score,
            recolored: true,
            analyzed_at: Utc::now(),
        };
        self.store.replace_final_attributes(deal_id, &attributes).await?;
        self.store.upsert_fit_summary(deal_id, &summary).await?;

        info!(
            deal_id,
            profile_hash = short(&summary.profile_hash),
            fit_score = ?summary.fit_score,
            "Hybrid recompute persisted"
        );

        Ok(RecomputeReport {
            deal_id: deal_id.to_string(),
            attributes,
            matches: outcome.matches,
            summary,
        })
    }

    fn resolve_narrative(
        &self,
        requested: Option<String>,
        record: Option<&DealRecord>,
    ) -> Option<CandidateNarrative> {
        if let Some(text) = requested.filter(|t| !t.trim().is_empty()) {
            return Some(CandidateNarrative::new(&text, NarrativeSource::Request));
        }
        if let Some(text) = record
            .and_then(|r| r.candidate_narrative.as_deref())
            .filter(|t| !t.trim().is_empty())
        {
            return Some(CandidateNarrative::new(text, NarrativeSource::DealRecord));
        }
        self.default_narrative
            .as_deref()
            .map(|text| CandidateNarrative::new(text, NarrativeSource::Default))
    }

    /// A stored result is reusable when its summary matches both hashes and the stage
    /// pipeline completed for this job text. A re-colored set whose score went unset
    /// (every attribute hidden since) needs a run to estimate it.
    async fn cached_result(
        &self,
        deal_id: &str,
        hashes: &ContentHashes,
    ) -> Option<(Vec<FinalAttribute>, FitSummary)> {
        let summary = self.store.load_fit_summary(deal_id).await.ok()??;
        if summary.hashes() != *hashes || (summary.recolored && summary.fit_score.is_none()) {
            return None;
        }
        self.store
            .load_stage_rows(&hashes.jd_hash, StageKind::RoleRelevance)
            .await
            .ok()??;
        let attributes = self.store.load_final_attributes(deal_id).await.ok()?;
        (!attributes.is_empty()).then_some((attributes, summary))
    }

    /// Reuses a stage's persisted rows for this `jd_hash` unless `force`; otherwise runs the
    /// stage and persists valid output. Persistence failures become warnings.
    async fn cached_stage<T, F, Fut>(
        &self,
        ctx: &JobContext,
        stage: StageKind,
        force: bool,
        warnings: &mut Vec<String>,
        run: F,
    ) -> StageOutcome<T>
    where
        T: Serialize + DeserializeOwned + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = StageOutcome<T>>,
    {
        if !force {
            match load_stage::<T>(self.store.as_ref(), &ctx.jd_hash, stage).await {
                Ok(Some(rows)) if !rows.is_empty() => {
                    debug!(deal_id = %ctx.deal_id, %stage, rows = rows.len(), "Stage cache hit");
                    return StageOutcome::Valid(rows);
                }
                Ok(_) => {}
                Err(e) => warn!(deal_id = %ctx.deal_id, %stage, "Stage cache unreadable: {e}"),
            }
        }

        let outcome = run().await;
        match &outcome {
            StageOutcome::Valid(rows) => {
                if let Err(e) = save_stage(self.store.as_ref(), &ctx.jd_hash, stage, rows).await {
                    warn!(deal_id = %ctx.deal_id, %stage, "Failed to persist stage rows: {e}");
                    warnings.push(persistence_warning(stage.as_str(), &e));
                }
            }
            StageOutcome::Invalid(e) => {
                warn!(
                    deal_id = %ctx.deal_id,
                    jd_hash = short(&ctx.jd_hash),
                    %stage,
                    code = e.code(),
                    raw_preview = e.raw_preview().unwrap_or_default(),
                    "Stage failed: {e}"
                );
            }
        }
        outcome
    }

    /// Summarizes, re-colors (when `recolor`) and scores `attributes` against a narrative.
    /// A hash-valid override color outranks the summary's evidence color. The flag reports
    /// whether the re-coloring happened.
    async fn score_against(
        &self,
        ctx: &JobContext,
        narrative: &CandidateNarrative,
        attributes: &mut [FinalAttribute],
        scoring: &mut ScoringContext,
        recolor: bool,
        warnings: &mut Vec<String>,
    ) -> (FitNarrative, Option<f64>, bool) {
        let fit = match summarize(self.oracle.as_ref(), ctx, &narrative.text, attributes).await {
            Ok(fit) => fit,
            Err(e) => {
                warn!(deal_id = %ctx.deal_id, code = e.code(), "Summarization failed: {e}");
                warnings.push(format!("summary: {}", e.public_message()));
                FitNarrative::default()
            }
        };

        let mut fit_score = None;
        let mut recolored = false;
        if recolor {
            for (name, color) in &fit.evidence_colors {
                scoring.external_colors.entry(name.clone()).or_insert(*color);
            }
            match hybrid::recompute(self.embedder.as_ref(), attributes, &narrative.text, scoring)
                .await
            {
                Ok(outcome) => {
                    fit_score = outcome.fit_score;
                    recolored = true;
                }
                Err(e) => {
                    warn!(deal_id = %ctx.deal_id, "Hybrid recompute failed: {e}");
                    warnings.push("hybrid recompute: embedding call failed".to_string());
                }
            }
        }

        if fit_score.is_none() {
            fit_score = self.estimate(ctx, narrative, &fit).await;
        }
        (fit, fit_score, recolored)
    }

    async fn estimate(
        &self,
        ctx: &JobContext,
        narrative: &CandidateNarrative,
        fit: &FitNarrative,
    ) -> Option<f64> {
        let job = fit.jd_summary.as_deref().unwrap_or(&ctx.job_description);
        let candidate = fit.fit_summary.as_deref().unwrap_or(&narrative.text);
        estimate_fit_score(self.oracle.as_ref(), job, candidate).await
    }
}

fn first_text(requested: Option<String>, stored: Option<&String>) -> Option<String> {
    requested
        .filter(|t| !t.trim().is_empty())
        .or_else(|| stored.filter(|t| !t.trim().is_empty()).cloned())
}

/// Caller-facing warning for a failed write; the store's own message is only logged.
fn persistence_warning(what: &str, error: &StoreError) -> String {
    let error = StageError::Persistence {
        message: error.to_string(),
    };
    format!("{what}: {}", error.public_message())
}

fn profile_hash(narrative: Option<&CandidateNarrative>) -> String {
    narrative.map_or_else(|| content_hash(""), |n| n.profile_hash.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::prompts::{ESTIMATE_SYSTEM, SUMMARY_ROLE};
    use crate::models::attribute::{AttributeColor, FitPillar, RefinedAttribute};
    use crate::overrides::{self, OverrideRequest};
    use crate::ranking::prompts::{CATEGORIZATION_ROLE, EXTRACTION_ROLE, RELEVANCE_ROLE};
    use crate::ranking::relevance::shuffled_labels;
    use crate::store::{current_hashes, MemoryStore};
    use crate::test_support::{
        deal_record, extraction_reply, pipeline_oracle, BrokenEmbedder, KeywordEmbedder,
        ScriptedOracle, JOB_TITLE, LABELS, NARRATIVE,
    };
    use std::time::Duration;

    const SUMMARY_REPLY: &str = r#"{
        "jd_summary": "An analytics engineer for the data platform.",
        "fit_summary": "Strong SQL, Python and Airflow; no dbt.",
        "attributes": [{"attribute_name": "dbt", "color": "yellow"}]
    }"#;

    fn orchestrator(store: &Arc<MemoryStore>, oracle: &Arc<ScriptedOracle>) -> Orchestrator {
        Orchestrator::new(
            store.clone(),
            store.clone(),
            oracle.clone(),
            Arc::new(KeywordEmbedder),
        )
    }

    async fn seeded_store(narrative: Option<&str>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        let mut record = deal_record("deal-1");
        record.candidate_narrative = narrative.map(str::to_string);
        store.insert_deal(record).await;
        store
    }

    fn names(attrs: &[FinalAttribute]) -> Vec<&str> {
        attrs.iter().map(|a| a.attribute_name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_end_to_end_follows_title_ranks() {
        let store = seeded_store(None).await;
        let oracle = Arc::new(pipeline_oracle());
        let report = orchestrator(&store, &oracle)
            .run("deal-1", RunRequest::default())
            .await;

        assert_eq!(report.status, RunStatus::Ok);
        assert!(report.reason.is_none());
        assert_eq!(
            names(&report.attributes),
            vec!["Python", "Airflow", "SQL", "dbt", "Stakeholder Management"]
        );
        let ranks: Vec<_> = report.attributes.iter().map(|a| a.final_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        let weights: Vec<_> = report.attributes.iter().map(|a| a.weight).collect();
        assert_eq!(weights, vec![100, 60, 36, 22, 13]);
        let scores: Vec<_> = report.attributes.iter().map(|a| a.weighted_score).collect();
        assert_eq!(scores, vec![100, 60, 36, 14, 8]);
        let colors: Vec<_> = report.attributes.iter().map(|a| a.color).collect();
        assert_eq!(
            colors,
            vec![
                AttributeColor::Green,
                AttributeColor::Green,
                AttributeColor::Green,
                AttributeColor::Yellow,
                AttributeColor::Yellow
            ]
        );
        assert_eq!(report.attributes[4].pillar, FitPillar::Process);
        assert_eq!(report.summary.as_ref().unwrap().fit_score, None);

        let stored = store.load_final_attributes("deal-1").await.unwrap();
        assert_eq!(stored, report.attributes);

        // Role-relevance sees the job title but not the job description.
        let prompt = &oracle.prompts_for(RELEVANCE_ROLE)[0];
        assert!(prompt.contains(JOB_TITLE));
        assert!(!prompt.contains("keeps stakeholders informed"));

        // Labels reach the oracle in the hash-seeded order, not in stage order.
        let refined: Vec<RefinedAttribute> =
            load_stage(store.as_ref(), &report.hashes.jd_hash, StageKind::Refinement)
                .await
                .unwrap()
                .unwrap();
        let expected = shuffled_labels(&refined, &report.hashes.jd_hash);
        let mut presented: Vec<(usize, &str)> = LABELS
            .iter()
            .map(|l| (prompt.find(&format!("\"{l}\"")).unwrap(), *l))
            .collect();
        presented.sort();
        let presented: Vec<&str> = presented.into_iter().map(|(_, l)| l).collect();
        assert_eq!(presented, expected);
    }

    #[tokio::test]
    async fn test_rerun_under_same_hash_is_idempotent() {
        let store = seeded_store(None).await;
        let oracle = Arc::new(pipeline_oracle());
        let orchestrator = orchestrator(&store, &oracle);

        let first = orchestrator.run("deal-1", RunRequest::default()).await;
        let calls = oracle.calls();

        let second = orchestrator.run("deal-1", RunRequest::default()).await;
        assert!(second.cached);
        assert_eq!(oracle.calls(), calls);
        assert_eq!(second.attributes, first.attributes);

        let forced = orchestrator
            .run(
                "deal-1",
                RunRequest {
                    force: true,
                    ..Default::default()
                },
            )
            .await;
        assert!(!forced.cached);
        assert!(oracle.calls() > calls);
        assert_eq!(forced.attributes, first.attributes);
        assert_eq!(store.load_final_attributes("deal-1").await.unwrap(), first.attributes);
    }

    #[tokio::test]
    async fn test_empty_categorization_degrades_to_stage_one_order() {
        let store = seeded_store(None).await;
        let oracle = Arc::new(
            ScriptedOracle::new()
                .reply(EXTRACTION_ROLE, &extraction_reply())
                .reply(CATEGORIZATION_ROLE, "[]"),
        );
        let report = orchestrator(&store, &oracle)
            .run("deal-1", RunRequest::default())
            .await;

        assert_eq!(report.status, RunStatus::Degraded);
        let reason = report.reason.unwrap();
        assert_eq!(reason.step, "categorization");
        assert_eq!(reason.code, "validation");

        assert_eq!(names(&report.attributes), LABELS.to_vec());
        let ranks: Vec<_> = report.attributes.iter().map(|a| a.final_rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
        assert!(report
            .attributes
            .iter()
            .all(|a| a.color == AttributeColor::Grey && a.weighted_score == 0));
        assert_eq!(store.load_final_attributes("deal-1").await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_short_description_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(pipeline_oracle());
        let report = orchestrator(&store, &oracle)
            .run(
                "deal-9",
                RunRequest {
                    job_title: Some("Engineer".to_string()),
                    job_description: Some("Too short.".to_string()),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(report.status, RunStatus::Skipped);
        assert_eq!(report.reason.unwrap().code, "precondition");
        assert!(report.attributes.is_empty());
        assert_eq!(oracle.calls(), 0);
        assert!(store.load_fit_summary("deal-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_extraction_failure_keeps_previous_set() {
        let store = seeded_store(None).await;
        let good = Arc::new(pipeline_oracle());
        let first = orchestrator(&store, &good)
            .run("deal-1", RunRequest::default())
            .await;

        let broken = Arc::new(ScriptedOracle::new().reply(EXTRACTION_ROLE, "no json here"));
        let report = orchestrator(&store, &broken)
            .run(
                "deal-1",
                RunRequest {
                    job_description: Some(
                        "A completely different posting for a platform engineer role.".to_string(),
                    ),
                    ..Default::default()
                },
            )
            .await;

        assert_eq!(report.status, RunStatus::Degraded);
        assert_eq!(report.reason.unwrap().step, "extraction");
        assert_eq!(report.attributes, first.attributes);
        assert_eq!(
            store.load_final_attributes("deal-1").await.unwrap(),
            first.attributes
        );

        // The kept set is reported under its own hashes and flagged stale.
        assert!(report.stale);
        assert_eq!(report.hashes, first.hashes);
        let old_jd = &first.hashes.jd_hash;
        let ctx = store.load_job_context("deal-1").await.unwrap().unwrap();
        assert_eq!(&ctx.jd_hash, old_jd);
        let current = current_hashes(store.as_ref(), "deal-1").await.unwrap().unwrap();
        assert_eq!(&current.jd_hash, old_jd);

        let recomputed = orchestrator(&store, &good)
            .recompute("deal-1", Some(NARRATIVE.to_string()))
            .await
            .unwrap();
        assert_eq!(&recomputed.summary.jd_hash, old_jd);
    }

    #[tokio::test]
    async fn test_forced_extraction_failure_on_same_text_is_not_stale() {
        let store = seeded_store(None).await;
        let good = Arc::new(pipeline_oracle());
        let first = orchestrator(&store, &good)
            .run("deal-1", RunRequest::default())
            .await;

        let broken = Arc::new(ScriptedOracle::new().reply(EXTRACTION_ROLE, "no json here"));
        let report = orchestrator(&store, &broken)
            .run(
                "deal-1",
                RunRequest {
                    force: true,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(report.status, RunStatus::Degraded);
        assert!(!report.stale);
        assert_eq!(report.hashes, first.hashes);
    }

    #[tokio::test]
    async fn test_recompute_rejects_set_from_other_job_text() {
        let store = seeded_store(None).await;
        let oracle = Arc::new(pipeline_oracle());
        let orchestrator = orchestrator(&store, &oracle);
        orchestrator.run("deal-1", RunRequest::default()).await;

        let moved = JobContext::new(
            "deal-1",
            JOB_TITLE,
            "A completely different posting for a platform engineer role.",
        );
        store.upsert_job_context(&moved).await.unwrap();
        assert!(current_hashes(store.as_ref(), "deal-1").await.unwrap().is_none());

        let err = orchestrator
            .recompute("deal-1", Some(NARRATIVE.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Invalid(_)));
        let summary = store.load_fit_summary("deal-1").await.unwrap().unwrap();
        assert_ne!(summary.jd_hash, moved.jd_hash);
    }

    #[tokio::test]
    async fn test_degraded_report_hides_oracle_output() {
        let store = seeded_store(None).await;
        let failing = Arc::new(
            ScriptedOracle::new().fail(EXTRACTION_ROLE, "HTTP 500: request req_8812 rejected"),
        );
        let report = orchestrator(&store, &failing)
            .run("deal-1", RunRequest::default())
            .await;
        let reason = report.reason.clone().unwrap();
        assert_eq!(reason.code, "oracle_invocation");
        assert_eq!(reason.message, "oracle call failed");
        let body = serde_json::to_string(&report).unwrap();
        assert!(!body.contains("req_8812"));

        let chatty = Arc::new(
            ScriptedOracle::new().reply(EXTRACTION_ROLE, "Sure! Here is what I found: nothing"),
        );
        let report = orchestrator(&store, &chatty)
            .run("deal-1", RunRequest::default())
            .await;
        assert_eq!(report.reason.as_ref().unwrap().code, "malformed_output");
        let body = serde_json::to_string(&report).unwrap();
        assert!(!body.contains("Sure!"));
        assert!(!body.contains("raw_preview"));
    }

    #[tokio::test]
    async fn test_persistence_failure_is_a_warning() {
        let store = seeded_store(None).await;
        store.set_fail_writes(true);
        let oracle = Arc::new(pipeline_oracle());
        let report = orchestrator(&store, &oracle)
            .run("deal-1", RunRequest::default())
            .await;

        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(report.attributes.len(), 5);
        assert!(report.warnings.iter().any(|w| w.contains("final attributes")));
    }

    #[tokio::test]
    async fn test_narrative_drives_colors_and_score() {
        let store = seeded_store(Some(NARRATIVE)).await;
        let oracle = Arc::new(pipeline_oracle().reply(SUMMARY_ROLE, SUMMARY_REPLY));
        let report = orchestrator(&store, &oracle)
            .run("deal-1", RunRequest::default())
            .await;

        assert_eq!(report.status, RunStatus::Ok);
        let colors: Vec<_> = report.attributes.iter().map(|a| a.color).collect();
        // SQL/Python/Airflow share the narrative, dbt takes the summary's evidence color.
        assert_eq!(
            colors,
            vec![
                AttributeColor::Yellow,
                AttributeColor::Yellow,
                AttributeColor::Yellow,
                AttributeColor::Yellow,
                AttributeColor::Grey
            ]
        );
        let summary = report.summary.unwrap();
        let expected = (100.0 + 60.0 + 36.0 + 22.0) * 0.65 / 231.0;
        assert!((summary.fit_score.unwrap() - expected).abs() < 1e-9);
        assert_eq!(
            summary.jd_summary.as_deref(),
            Some("An analytics engineer for the data platform.")
        );
        assert_eq!(summary.profile_hash, content_hash(NARRATIVE));
    }

    #[tokio::test]
    async fn test_override_scoped_to_current_hashes() {
        let store = seeded_store(Some(NARRATIVE)).await;
        let oracle = Arc::new(pipeline_oracle().reply(SUMMARY_ROLE, SUMMARY_REPLY));
        let orchestrator = orchestrator(&store, &oracle);
        orchestrator.run("deal-1", RunRequest::default()).await;

        overrides::set_override(
            store.as_ref(),
            "deal-1",
            OverrideRequest {
                attribute_name: "Stakeholder Management".to_string(),
                color: Some(AttributeColor::Green),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Same hashes: the override color feeds scoring and shows in the view.
        let rerun = orchestrator
            .run(
                "deal-1",
                RunRequest {
                    force: true,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(rerun.attributes[4].color, AttributeColor::Green);
        let view = overrides::load_view(store.as_ref(), "deal-1", false).await.unwrap();
        assert!(view.groups[1].attributes[0].has_override);

        // New narrative: profile_hash moves and the override is ignored but kept.
        let changed = orchestrator
            .run(
                "deal-1",
                RunRequest {
                    candidate_narrative: Some("Ten years of Terraform.".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(changed.attributes[4].color, AttributeColor::Grey);
        let view = overrides::load_view(store.as_ref(), "deal-1", false).await.unwrap();
        assert!(!view.groups[1].attributes[0].has_override);
        assert_eq!(store.load_overrides("deal-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_hidden_attributes_leave_cached_score() {
        let store = seeded_store(Some(NARRATIVE)).await;
        let oracle = Arc::new(pipeline_oracle().reply(SUMMARY_ROLE, SUMMARY_REPLY));
        let orchestrator = orchestrator(&store, &oracle);
        let first = orchestrator.run("deal-1", RunRequest::default()).await;
        let full = first.summary.unwrap().fit_score.unwrap();

        for name in ["Python", "Airflow", "SQL", "dbt"] {
            overrides::set_override(
                store.as_ref(),
                "deal-1",
                OverrideRequest {
                    attribute_name: name.to_string(),
                    visible: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        // Only the grey "Stakeholder Management" is left in the denominator.
        let cached = orchestrator.run("deal-1", RunRequest::default()).await;
        assert!(cached.cached);
        assert_eq!(cached.summary.unwrap().fit_score, Some(0.0));
        let view = overrides::load_view(store.as_ref(), "deal-1", false).await.unwrap();
        assert_eq!(view.summary.unwrap().fit_score, Some(0.0));

        overrides::reset_all(store.as_ref(), "deal-1").await.unwrap();
        let restored = orchestrator.run("deal-1", RunRequest::default()).await;
        assert!(restored.cached);
        assert!((restored.summary.unwrap().fit_score.unwrap() - full).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_all_hidden_falls_back_to_estimate() {
        let store = seeded_store(Some(NARRATIVE)).await;
        let oracle = Arc::new(
            pipeline_oracle()
                .reply(SUMMARY_ROLE, SUMMARY_REPLY)
                .reply(ESTIMATE_SYSTEM, "72"),
        );
        let orchestrator = orchestrator(&store, &oracle);
        let first = orchestrator.run("deal-1", RunRequest::default()).await;

        for attr in &first.attributes {
            overrides::set_override(
                store.as_ref(),
                "deal-1",
                OverrideRequest {
                    attribute_name: attr.attribute_name.clone(),
                    visible: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        }

        let rerun = orchestrator
            .run(
                "deal-1",
                RunRequest {
                    force: true,
                    ..Default::default()
                },
            )
            .await;
        assert_eq!(rerun.summary.unwrap().fit_score, Some(0.72));
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_estimate() {
        let store = seeded_store(Some(NARRATIVE)).await;
        let oracle = Arc::new(
            pipeline_oracle()
                .reply(SUMMARY_ROLE, SUMMARY_REPLY)
                .reply(ESTIMATE_SYSTEM, "0.4"),
        );
        let report = Orchestrator::new(
            store.clone(),
            store.clone(),
            oracle.clone(),
            Arc::new(BrokenEmbedder),
        )
        .run("deal-1", RunRequest::default())
        .await;

        assert_eq!(report.status, RunStatus::Ok);
        assert_eq!(report.summary.unwrap().fit_score, Some(0.4));
        assert!(report.warnings.iter().any(|w| w.starts_with("hybrid recompute")));
        // Percentile colors survive when re-coloring is impossible.
        assert_eq!(report.attributes[0].color, AttributeColor::Green);
    }

    #[tokio::test]
    async fn test_recompute_uses_stored_set() {
        let store = seeded_store(None).await;
        let oracle = Arc::new(pipeline_oracle());
        let orchestrator = orchestrator(&store, &oracle);
        orchestrator.run("deal-1", RunRequest::default()).await;
        let calls = oracle.calls();

        let report = orchestrator
            .recompute("deal-1", Some(NARRATIVE.to_string()))
            .await
            .unwrap();

        assert_eq!(oracle.calls(), calls);
        assert_eq!(report.matches.len(), 5);
        let expected = (100.0 + 60.0 + 36.0) * 0.65 / 231.0;
        assert!((report.summary.fit_score.unwrap() - expected).abs() < 1e-9);
        assert_eq!(report.attributes[3].color, AttributeColor::Grey);
        assert_eq!(
            store.load_fit_summary("deal-1").await.unwrap().unwrap().profile_hash,
            content_hash(NARRATIVE)
        );
    }

    #[tokio::test]
    async fn test_recompute_unknown_deal_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let oracle = Arc::new(ScriptedOracle::new());
        let err = orchestrator(&store, &oracle)
            .recompute("ghost", Some(NARRATIVE.to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_for_same_deal_are_serialized() {
        let store = seeded_store(None).await;
        let oracle = Arc::new(pipeline_oracle().with_delay(Duration::from_millis(50)));
        let orchestrator = orchestrator(&store, &oracle);
        let forced = || RunRequest {
            force: true,
            ..Default::default()
        };

        let (a, b) = tokio::join!(
            orchestrator.run("deal-1", forced()),
            orchestrator.run("deal-1", forced())
        );
        assert_eq!(a.status, RunStatus::Ok);
        assert_eq!(b.status, RunStatus::Ok);
        assert_eq!(oracle.max_in_flight(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_runs_deals_in_parallel() {
        let store = seeded_store(None).await;
        store.insert_deal(deal_record("deal-2")).await;
        let oracle = Arc::new(pipeline_oracle().with_delay(Duration::from_millis(50)));
        let orchestrator = orchestrator(&store, &oracle).with_batch_concurrency(2);

        let reports = orchestrator
            .run_batch(vec!["deal-1".to_string(), "deal-2".to_string()], true)
            .await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.status == RunStatus::Ok));
        assert!(oracle.max_in_flight() >= 2);
    }
}
