//! Stage 4, Role-Relevance: an independent ranking of the refined labels judged against
//! the job title alone.
//!
//! Labels are shuffled before they reach the oracle so stage order cannot leak into the
//! independent ranking. The shuffle is seeded from `jd_hash`, which keeps reruns over the
//! same job text reproducible.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::Value;
use tracing::info;

use super::extraction::MAX_ATTRIBUTES;
use super::prompts::{RELEVANCE_PROMPT_TEMPLATE, RELEVANCE_ROLE};
use super::stage::{
    get_number, get_text, rows_of, run_oracle_stage, ParsedRows, StageError, StageOutcome,
};
use crate::models::attribute::{normalize_label, RefinedAttribute, RoleRelevanceAttribute};
use crate::models::deal::JobContext;
use crate::oracle::prompts::system_prompt;
use crate::oracle::TextOracle;
use crate::store::StageKind;

const ATTEMPTS: u32 = 1;
const MIN_SCORE: f64 = 1.0;
const MAX_SCORE: f64 = 10.0;

pub async fn rank_by_title(
    oracle: &dyn TextOracle,
    ctx: &JobContext,
    refined: &[RefinedAttribute],
) -> StageOutcome<RoleRelevanceAttribute> {
    if ctx.job_title.trim().is_empty() {
        return StageOutcome::Invalid(StageError::Upstream {
            message: "job title unavailable".to_string(),
        });
    }

    let labels = shuffled_labels(refined, &ctx.jd_hash);
    let prompt = RELEVANCE_PROMPT_TEMPLATE
        .replace("{max_attributes}", &MAX_ATTRIBUTES.to_string())
        .replace(
            "{labels_json}",
            &serde_json::to_string_pretty(&labels).unwrap_or_default(),
        )
        .replace("{job_title}", &ctx.job_title);
    let system = system_prompt(RELEVANCE_ROLE);

    let outcome = run_oracle_stage(
        oracle,
        StageKind::RoleRelevance,
        &system,
        &prompt,
        ATTEMPTS,
        |value| parse_relevance(value, &labels),
    )
    .await;

    if let Some(rows) = outcome.rows() {
        info!(deal_id = %ctx.deal_id, rows = rows.len(), "Role-relevance ranking parsed");
    }
    outcome
}

/// Distinct refined labels in a deterministic pseudo-random order derived from `jd_hash`.
pub fn shuffled_labels(refined: &[RefinedAttribute], jd_hash: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut labels: Vec<String> = refined
        .iter()
        .filter(|r| seen.insert(normalize_label(&r.refined_label)))
        .map(|r| r.refined_label.clone())
        .collect();
    let mut rng = StdRng::seed_from_u64(shuffle_seed(jd_hash));
    labels.shuffle(&mut rng);
    labels
}

fn shuffle_seed(jd_hash: &str) -> u64 {
    let prefix: String = jd_hash.chars().take(16).collect();
    u64::from_str_radix(&prefix, 16).unwrap_or(0)
}

/// Matches oracle rows back to the presented labels and clamps rank to 1..=30 and score to
/// 1..=10. The oracle's ranks are kept as given; rows sharing a rank are ordered by higher
/// score, then by label, and each later row moves to the next free rank.
pub fn parse_relevance(value: &Value, labels: &[String]) -> ParsedRows<RoleRelevanceAttribute> {
    let by_label: HashMap<String, &String> =
        labels.iter().map(|l| (normalize_label(l), l)).collect();

    let raw = rows_of(value);
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(raw.len());

    for row in raw {
        let Some(label) = get_text(row, &["refined_label", "label", "attribute"])
            .and_then(|l| by_label.get(&normalize_label(&l)).copied())
        else {
            continue;
        };
        let Some(rank) = get_number(row, &["independent_rank", "rank"]) else {
            continue;
        };
        if !seen.insert(normalize_label(label)) {
            continue;
        }
        let score = get_number(row, &["relevance_score", "score"]).unwrap_or(MIN_SCORE);
        rows.push(RoleRelevanceAttribute {
            independent_rank: rank.round().clamp(1.0, MAX_ATTRIBUTES as f64) as u32,
            refined_label: label.clone(),
            relevance_score: score.round().clamp(MIN_SCORE, MAX_SCORE) as u8,
            rationale: get_text(row, &["rationale", "reason"]).unwrap_or_default(),
        });
    }

    rows.sort_by(|a, b| {
        a.independent_rank
            .cmp(&b.independent_rank)
            .then(b.relevance_score.cmp(&a.relevance_score))
            .then_with(|| a.refined_label.cmp(&b.refined_label))
    });
    let mut floor = 1;
    for row in rows.iter_mut() {
        row.independent_rank = row.independent_rank.max(floor);
        floor = row.independent_rank + 1;
    }
    // Collisions near the cap push past it; pull the tail back under.
    let mut ceiling = MAX_ATTRIBUTES as u32;
    for row in rows.iter_mut().rev() {
        row.independent_rank = row.independent_rank.min(ceiling);
        ceiling = row.independent_rank.saturating_sub(1);
    }

    ParsedRows {
        dropped: raw.len() - rows.len(),
        rows,
    }
}
