//! Stage 1, Extraction: job text → up to 30 ranked attribute candidates.

use std::collections::HashSet;

use serde_json::Value;
use tracing::info;

use super::prompts::{EXTRACTION_PROMPT_TEMPLATE, EXTRACTION_ROLE};
use super::stage::{
    get_number, get_text, rows_of, run_oracle_stage, ParsedRows, StageError, StageOutcome,
};
use crate::hashing::short;
use crate::models::attribute::{clean_label, normalize_label, AttributeCandidate, TaxonomyCategory};
use crate::models::deal::JobContext;
use crate::oracle::prompts::system_prompt;
use crate::oracle::TextOracle;
use crate::store::StageKind;

/// Job descriptions shorter than this (trimmed, in characters) are not analyzed.
pub const MIN_DESCRIPTION_CHARS: usize = 40;
pub const MAX_ATTRIBUTES: usize = 30;
const ATTEMPTS: u32 = 2;

pub fn check_precondition(ctx: &JobContext) -> Result<(), StageError> {
    let chars = ctx.job_description.trim().chars().count();
    if chars < MIN_DESCRIPTION_CHARS {
        return Err(StageError::Precondition {
            chars,
            min: MIN_DESCRIPTION_CHARS,
        });
    }
    Ok(())
}

pub async fn extract(oracle: &dyn TextOracle, ctx: &JobContext) -> StageOutcome<AttributeCandidate> {
    if let Err(e) = check_precondition(ctx) {
        return StageOutcome::Invalid(e);
    }

    let prompt = EXTRACTION_PROMPT_TEMPLATE
        .replace("{max_attributes}", &MAX_ATTRIBUTES.to_string())
        .replace("{job_title}", &ctx.job_title)
        .replace("{job_description}", &ctx.job_description);
    let system = system_prompt(EXTRACTION_ROLE);

    let outcome = run_oracle_stage(
        oracle,
        StageKind::Extraction,
        &system,
        &prompt,
        ATTEMPTS,
        parse_candidates,
    )
    .await;

    if let Some(rows) = outcome.rows() {
        info!(
            deal_id = %ctx.deal_id,
            jd_hash = short(&ctx.jd_hash),
            rows = rows.len(),
            "Extraction produced candidates"
        );
    }
    outcome
}

/// Validates extraction rows. Rows need a finite rank ≥ 1 and a non-empty label.
/// Duplicate ranks and labels keep their first occurrence in rank order; the survivors
/// are capped at [`MAX_ATTRIBUTES`] and renumbered 1..N.
pub fn parse_candidates(value: &Value) -> ParsedRows<AttributeCandidate> {
    let raw = rows_of(value);
    let mut valid = Vec::with_capacity(raw.len());

    for row in raw {
        let Some(rank) = get_number(row, &["rank", "jd_rank"]).map(f64::round) else {
            continue;
        };
        if rank < 1.0 {
            continue;
        }
        let Some(label) = get_text(row, &["label", "attribute", "name"]).map(|l| clean_label(&l))
        else {
            continue;
        };
        if normalize_label(&label).is_empty() {
            continue;
        }
        let taxonomy_category = get_text(row, &["taxonomy_category", "category"])
            .and_then(|c| TaxonomyCategory::parse(&c))
            .unwrap_or(TaxonomyCategory::Skill);

        valid.push(AttributeCandidate {
            rank: rank.min(u32::MAX as f64) as u32,
            label,
            taxonomy_category,
            rationale: get_text(row, &["rationale", "reason"]).unwrap_or_default(),
        });
    }

    valid.sort_by_key(|c| c.rank);

    let mut ranks = HashSet::new();
    let mut labels = HashSet::new();
    let mut rows: Vec<AttributeCandidate> = valid
        .into_iter()
        .filter(|c| ranks.insert(c.rank) && labels.insert(normalize_label(&c.label)))
        .take(MAX_ATTRIBUTES)
        .collect();
    for (i, row) in rows.iter_mut().enumerate() {
        row.rank = i as u32 + 1;
    }

    ParsedRows {
        dropped: raw.len() - rows.len(),
        rows,
    }
}
