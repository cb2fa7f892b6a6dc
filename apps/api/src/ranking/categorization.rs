//! Stage 2, Categorization: assigns one fit pillar per stage-1 attribute.
//!
//! Rank and label always come from the stage-1 row the oracle's answer joins to; the
//! oracle only contributes the pillar and rationale.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::info;

use super::prompts::{CATEGORIZATION_PROMPT_TEMPLATE, CATEGORIZATION_ROLE};
use super::stage::{get_number, get_text, rows_of, run_oracle_stage, ParsedRows, StageOutcome};
use crate::models::attribute::{
    normalize_label, AttributeCandidate, CategorizedAttribute, FitPillar,
};
use crate::oracle::prompts::system_prompt;
use crate::oracle::TextOracle;
use crate::store::StageKind;

const ATTEMPTS: u32 = 2;

pub async fn categorize(
    oracle: &dyn TextOracle,
    candidates: &[AttributeCandidate],
) -> StageOutcome<CategorizedAttribute> {
    let payload: Vec<Value> = candidates
        .iter()
        .map(|c| json!({"rank": c.rank, "label": c.label, "taxonomy_category": c.taxonomy_category}))
        .collect();
    let prompt = CATEGORIZATION_PROMPT_TEMPLATE.replace(
        "{attributes_json}",
        &serde_json::to_string_pretty(&payload).unwrap_or_default(),
    );
    let system = system_prompt(CATEGORIZATION_ROLE);

    let outcome = run_oracle_stage(
        oracle,
        StageKind::Categorization,
        &system,
        &prompt,
        ATTEMPTS,
        |value| parse_categorized(value, candidates),
    )
    .await;

    if let Some(rows) = outcome.rows() {
        info!(rows = rows.len(), of = candidates.len(), "Categorization assigned pillars");
    }
    outcome
}

/// Joins oracle rows to stage-1 rows by rank, falling back to normalized label.
/// Rows that join to nothing, lack a recognizable pillar, or repeat an attribute are dropped.
/// Once at least one row joins, stage-1 attributes the oracle skipped are kept under their
/// category's default pillar.
pub fn parse_categorized(
    value: &Value,
    candidates: &[AttributeCandidate],
) -> ParsedRows<CategorizedAttribute> {
    let by_rank: HashMap<u32, &AttributeCandidate> =
        candidates.iter().map(|c| (c.rank, c)).collect();
    let by_label: HashMap<String, &AttributeCandidate> = candidates
        .iter()
        .map(|c| (normalize_label(&c.label), c))
        .collect();

    let raw = rows_of(value);
    let mut seen = HashSet::new();
    let mut rows = Vec::with_capacity(raw.len());

    for row in raw {
        let source = get_number(row, &["rank", "jd_rank"])
            .and_then(|r| by_rank.get(&(r.round() as u32)))
            .or_else(|| {
                get_text(row, &["label", "attribute"])
                    .and_then(|l| by_label.get(&normalize_label(&l)))
            });
        let Some(source) = source.copied() else {
            continue;
        };
        let Some(fit_pillar) =
            get_text(row, &["fit_pillar", "pillar"]).and_then(|p| FitPillar::parse(&p))
        else {
            continue;
        };
        if !seen.insert(source.rank) {
            continue;
        }
        rows.push(CategorizedAttribute {
            rank: source.rank,
            label: source.label.clone(),
            previous_category: source.taxonomy_category,
            fit_pillar,
            rationale: get_text(row, &["rationale", "reason"]).unwrap_or_default(),
        });
    }

    if !rows.is_empty() {
        rows.extend(
            candidates
                .iter()
                .filter(|c| !seen.contains(&c.rank))
                .map(|c| CategorizedAttribute {
                    rank: c.rank,
                    label: c.label.clone(),
                    previous_category: c.taxonomy_category,
                    fit_pillar: c.taxonomy_category.default_pillar(),
                    rationale: String::new(),
                }),
        );
    }

    rows.sort_by_key(|r| r.rank);
    let dropped = raw.len().saturating_sub(seen.len());
    ParsedRows { rows, dropped }
}
