//! Stage 3, Refinement: rewrites each categorized label into a job-specific label of at
//! most five words. Rank and pillar are carried over from stage 2.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::{info, warn};

use super::prompts::{REFINEMENT_PROMPT_TEMPLATE, REFINEMENT_ROLE};
use super::stage::{
    get_number, get_text, rows_of, run_oracle_stage, ParsedRows, StageError, StageOutcome,
};
use crate::models::attribute::{
    clean_label, normalize_label, CategorizedAttribute, RefinedAttribute,
};
use crate::models::deal::JobContext;
use crate::oracle::prompts::system_prompt;
use crate::oracle::TextOracle;
use crate::store::StageKind;

pub const MAX_LABEL_WORDS: usize = 5;
const ATTEMPTS: u32 = 1;

pub async fn refine(
    oracle: &dyn TextOracle,
    ctx: &JobContext,
    categorized: &[CategorizedAttribute],
) -> StageOutcome<RefinedAttribute> {
    if ctx.job_description.trim().is_empty() {
        warn!(deal_id = %ctx.deal_id, "Refinement skipped: job text unavailable");
        return StageOutcome::Invalid(StageError::Upstream {
            message: "job text unavailable".to_string(),
        });
    }

    let payload: Vec<Value> = categorized
        .iter()
        .map(|c| json!({"rank": c.rank, "label": c.label, "fit_pillar": c.fit_pillar}))
        .collect();
    let prompt = REFINEMENT_PROMPT_TEMPLATE
        .replace("{max_words}", &MAX_LABEL_WORDS.to_string())
        .replace("{job_title}", &ctx.job_title)
        .replace("{job_description}", &ctx.job_description)
        .replace(
            "{attributes_json}",
            &serde_json::to_string_pretty(&payload).unwrap_or_default(),
        );
    let system = system_prompt(REFINEMENT_ROLE);

    let outcome = run_oracle_stage(
        oracle,
        StageKind::Refinement,
        &system,
        &prompt,
        ATTEMPTS,
        |value| parse_refined(value, categorized),
    )
    .await;

    if let Some(rows) = outcome.rows() {
        info!(deal_id = %ctx.deal_id, rows = rows.len(), "Refinement produced labels");
    }
    outcome
}

/// First `max_words` whitespace-separated words of `label`.
pub fn truncate_words(label: &str, max_words: usize) -> String {
    label
        .split_whitespace()
        .take(max_words)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Joins oracle rows to stage-2 rows by rank (then by label). When at least one row joins,
/// stage-2 attributes the oracle skipped are carried through with their original label,
/// so refinement never shrinks the set.
pub fn parse_refined(
    value: &Value,
    categorized: &[CategorizedAttribute],
) -> ParsedRows<RefinedAttribute> {
    let by_rank: HashMap<u32, &CategorizedAttribute> =
        categorized.iter().map(|c| (c.rank, c)).collect();
    let by_label: HashMap<String, &CategorizedAttribute> = categorized
        .iter()
        .map(|c| (normalize_label(&c.label), c))
        .collect();

    let raw = rows_of(value);
    let mut refined: HashMap<u32, RefinedAttribute> = HashMap::new();
    let mut dropped = 0;

    for row in raw {
        let source = get_number(row, &["rank", "jd_rank"])
            .and_then(|r| by_rank.get(&(r.round() as u32)))
            .or_else(|| {
                get_text(row, &["original_label", "label"])
                    .and_then(|l| by_label.get(&normalize_label(&l)))
            });
        let Some(source) = source.copied() else {
            dropped += 1;
            continue;
        };
        if refined.contains_key(&source.rank) {
            dropped += 1;
            continue;
        }
        let label = get_text(row, &["refined_label", "label"])
            .map(|l| truncate_words(&clean_label(&l), MAX_LABEL_WORDS))
            .filter(|l| !normalize_label(l).is_empty());
        refined.insert(source.rank, passthrough(source, label, row));
    }

    if refined.is_empty() {
        return ParsedRows {
            rows: Vec::new(),
            dropped,
        };
    }

    let joined: HashSet<u32> = refined.keys().copied().collect();
    let mut rows: Vec<RefinedAttribute> = refined.into_values().collect();
    rows.extend(
        categorized
            .iter()
            .filter(|c| !joined.contains(&c.rank))
            .map(|c| passthrough(c, None, &Value::Null)),
    );
    rows.sort_by_key(|r| r.rank);
    ParsedRows { rows, dropped }
}

fn passthrough(source: &CategorizedAttribute, label: Option<String>, row: &Value) -> RefinedAttribute {
    RefinedAttribute {
        rank: source.rank,
        original_label: source.label.clone(),
        refined_label: label.unwrap_or_else(|| truncate_words(&source.label, MAX_LABEL_WORDS)),
        fit_pillar: source.fit_pillar,
        rationale: get_text(row, &["rationale", "reason"]).unwrap_or_default(),
    }
}
