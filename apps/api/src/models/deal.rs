use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hashing::content_hash;

/// A job posting under analysis. `jd_hash` is derived, never supplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub deal_id: String,
    pub job_title: String,
    pub job_description: String,
    pub jd_hash: String,
}

impl JobContext {
    pub fn new(deal_id: &str, job_title: &str, job_description: &str) -> Self {
        Self {
            deal_id: deal_id.to_string(),
            job_title: job_title.trim().to_string(),
            job_description: job_description.to_string(),
            jd_hash: content_hash(job_description),
        }
    }
}

/// Where a run's candidate narrative came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeSource {
    Request,
    DealRecord,
    Default,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateNarrative {
    pub text: String,
    pub profile_hash: String,
    pub source: NarrativeSource,
}

impl CandidateNarrative {
    pub fn new(text: &str, source: NarrativeSource) -> Self {
        Self {
            text: text.to_string(),
            profile_hash: content_hash(text),
            source,
        }
    }
}

/// The (jd_hash, profile_hash) pair every cached artifact and override is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHashes {
    pub jd_hash: String,
    pub profile_hash: String,
}

/// Per-deal summary row, upserted on every run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub jd_hash: String,
    pub profile_hash: String,
    pub jd_summary: Option<String>,
    pub fit_summary: Option<String>,
    pub fit_score: Option<f64>,
    /// The stored attribute set was re-colored against this narrative, so `fit_score` is
    /// its weighted score rather than an oracle estimate.
    #[serde(default)]
    pub recolored: bool,
    pub analyzed_at: DateTime<Utc>,
}

impl FitSummary {
    pub fn hashes(&self) -> ContentHashes {
        ContentHashes {
            jd_hash: self.jd_hash.clone(),
            profile_hash: self.profile_hash.clone(),
        }
    }
}

/// Raw texts for a deal as held by the CRM/profile source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DealRecord {
    pub deal_id: String,
    pub job_title: Option<String>,
    pub job_description: Option<String>,
    pub candidate_narrative: Option<String>,
}
