//! Oracle-driven fit summarization and the direct fit-score estimate.

use std::collections::{HashMap, HashSet};

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::prompts::{
    ESTIMATE_PROMPT_TEMPLATE, ESTIMATE_SYSTEM, SUMMARY_PROMPT_TEMPLATE, SUMMARY_ROLE,
};
use crate::models::attribute::{normalize_label, AttributeColor, FinalAttribute};
use crate::models::deal::JobContext;
use crate::oracle::prompts::system_prompt;
use crate::oracle::{self, TextOracle};
use crate::ranking::stage::{get_text, StageError};

/// Texts longer than this are cut before they are sent.
const MAX_CONTEXT_CHARS: usize = 8000;

/// What the summarization call produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitNarrative {
    pub jd_summary: Option<String>,
    pub fit_summary: Option<String>,
    /// Evidence colors keyed by normalized attribute name.
    pub evidence_colors: HashMap<String, AttributeColor>,
}

pub async fn summarize(
    oracle: &dyn TextOracle,
    ctx: &JobContext,
    narrative: &str,
    attrs: &[FinalAttribute],
) -> Result<FitNarrative, StageError> {
    let names: Vec<Value> = attrs
        .iter()
        .map(|a| json!({"final_rank": a.final_rank, "attribute_name": a.attribute_name, "pillar": a.pillar}))
        .collect();
    let prompt = SUMMARY_PROMPT_TEMPLATE
        .replace("{job_title}", &ctx.job_title)
        .replace("{job_description}", &clip(&ctx.job_description))
        .replace("{narrative}", &clip(narrative))
        .replace(
            "{attributes_json}",
            &serde_json::to_string_pretty(&names).unwrap_or_default(),
        );

    let reply = oracle::ask(oracle, &system_prompt(SUMMARY_ROLE), &prompt)
        .await
        .map_err(|e| StageError::OracleInvocation {
            message: e.to_string(),
        })?;

    let value = match &reply.parsed {
        Ok(v) => v,
        Err(reason) => {
            warn!(
                deal_id = %ctx.deal_id,
                parse_error = %reason,
                raw_preview = %reply.preview(),
                "Summary output could not be parsed"
            );
            return Err(StageError::MalformedOutput {
                reason: reason.clone(),
                raw_preview: reply.preview(),
            });
        }
    };

    parse_summary(value, attrs).ok_or(StageError::Validation { dropped: 0 })
}

/// Reads the summary object. Colors for names outside `attrs` are ignored.
/// Returns `None` when the reply carries neither summary text nor colors.
pub fn parse_summary(value: &Value, attrs: &[FinalAttribute]) -> Option<FitNarrative> {
    let known: HashSet<String> = attrs
        .iter()
        .map(|a| normalize_label(&a.attribute_name))
        .collect();

    let evidence_colors: HashMap<String, AttributeColor> = value
        .get("attributes")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let name = normalize_label(&get_text(row, &["attribute_name", "label"])?);
                    let color = AttributeColor::parse(&get_text(row, &["color"])?)?;
                    known.contains(&name).then_some((name, color))
                })
                .collect()
        })
        .unwrap_or_default();

    let narrative = FitNarrative {
        jd_summary: get_text(value, &["jd_summary", "job_summary"]),
        fit_summary: get_text(value, &["fit_summary", "candidate_summary"]),
        evidence_colors,
    };

    let empty = narrative.jd_summary.is_none()
        && narrative.fit_summary.is_none()
        && narrative.evidence_colors.is_empty();
    (!empty).then_some(narrative)
}

/// Asks the oracle for a direct 0–100 estimate. Any failure yields `None`.
pub async fn estimate_fit_score(
    oracle: &dyn TextOracle,
    job_summary: &str,
    candidate_summary: &str,
) -> Option<f64> {
    let prompt = ESTIMATE_PROMPT_TEMPLATE
        .replace("{job_summary}", &clip(job_summary))
        .replace("{candidate_summary}", &clip(candidate_summary));

    match oracle.complete(ESTIMATE_SYSTEM, &prompt).await {
        Ok(raw) => {
            let score = parse_score(&raw);
            if score.is_none() {
                warn!(raw_preview = %oracle::preview(&raw), "Fit estimate was not a number");
            }
            debug!(?score, "Fit estimate parsed");
            score
        }
        Err(e) => {
            warn!("Fit estimate call failed: {e}");
            None
        }
    }
}

/// First number in `raw`. Values in (1, 100] are read as percentages; the result is
/// clamped to [0, 1].
pub fn parse_score(raw: &str) -> Option<f64> {
    let start = raw.find(|c: char| c.is_ascii_digit())?;
    let digits: String = raw[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let value: f64 = digits.trim_end_matches('.').parse().ok()?;
    let value = if value > 1.0 && value <= 100.0 {
        value / 100.0
    } else {
        value
    };
    Some(value.clamp(0.0, 1.0))
}

fn clip(text: &str) -> String {
    text.chars().take(MAX_CONTEXT_CHARS).collect()
}
