//! Shared stage plumbing: the tagged stage result, the stage error taxonomy, the
//! retrying oracle runner, and lenient row-field accessors.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::oracle::{self, TextOracle};
use crate::store::StageKind;

/// Failure taxonomy for a single pipeline step. None of these escape the orchestrator.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum StageError {
    #[error("job description too short: {chars} characters (minimum {min})")]
    Precondition { chars: usize, min: usize },

    #[error("oracle invocation failed: {message}")]
    OracleInvocation { message: String },

    #[error("malformed oracle output: {reason}")]
    MalformedOutput {
        reason: String,
        #[serde(skip)]
        raw_preview: String,
    },

    #[error("no usable rows ({dropped} dropped by validation)")]
    Validation { dropped: usize },

    #[error("required input unavailable: {message}")]
    Upstream { message: String },

    #[error("persistence failed: {message}")]
    Persistence { message: String },
}

impl StageError {
    pub fn code(&self) -> &'static str {
        match self {
            StageError::Precondition { .. } => "precondition",
            StageError::OracleInvocation { .. } => "oracle_invocation",
            StageError::MalformedOutput { .. } => "malformed_output",
            StageError::Validation { .. } => "validation",
            StageError::Upstream { .. } => "upstream",
            StageError::Persistence { .. } => "persistence",
        }
    }

    /// Truncated raw oracle output, when the failure was unparseable output.
    pub fn raw_preview(&self) -> Option<&str> {
        match self {
            StageError::MalformedOutput { raw_preview, .. } => Some(raw_preview),
            _ => None,
        }
    }

    /// Caller-facing description. Oracle and store detail stays in the logs.
    pub fn public_message(&self) -> String {
        match self {
            StageError::OracleInvocation { .. } => "oracle call failed".to_string(),
            StageError::MalformedOutput { .. } => "oracle output could not be parsed".to_string(),
            StageError::Persistence { .. } => "persistence failed".to_string(),
            other => other.to_string(),
        }
    }
}

/// A stage's result: either usable rows or the reason there are none.
#[derive(Debug, Clone)]
pub enum StageOutcome<T> {
    Valid(Vec<T>),
    Invalid(StageError),
}

impl<T> StageOutcome<T> {
    pub fn rows(&self) -> Option<&[T]> {
        match self {
            StageOutcome::Valid(rows) => Some(rows),
            StageOutcome::Invalid(_) => None,
        }
    }
}

/// Rows that passed validation plus a count of rows that did not.
#[derive(Debug)]
pub struct ParsedRows<T> {
    pub rows: Vec<T>,
    pub dropped: usize,
}

/// Calls the oracle up to `max_attempts` times until `parse` yields at least one row.
/// Every failed attempt is logged with its reason and a truncated raw preview.
pub async fn run_oracle_stage<T, F>(
    oracle: &dyn TextOracle,
    stage: StageKind,
    system: &str,
    prompt: &str,
    max_attempts: u32,
    parse: F,
) -> StageOutcome<T>
where
    F: Fn(&Value) -> ParsedRows<T>,
{
    let attempts = max_attempts.max(1);
    let mut last_error = StageError::Validation { dropped: 0 };

    for attempt in 1..=attempts {
        let reply = match oracle::ask(oracle, system, prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(%stage, attempt, attempts, "Oracle call failed: {e}");
                last_error = StageError::OracleInvocation {
                    message: e.to_string(),
                };
                continue;
            }
        };

        let value = match &reply.parsed {
            Ok(value) => value,
            Err(reason) => {
                warn!(
                    %stage,
                    attempt,
                    attempts,
                    parse_error = %reason,
                    raw_preview = %reply.preview(),
                    "Oracle output could not be parsed"
                );
                last_error = StageError::MalformedOutput {
                    reason: reason.clone(),
                    raw_preview: reply.preview(),
                };
                continue;
            }
        };

        let parsed = parse(value);
        if parsed.rows.is_empty() {
            warn!(
                %stage,
                attempt,
                attempts,
                dropped = parsed.dropped,
                raw_preview = %reply.preview(),
                "Oracle output had no usable rows"
            );
            last_error = StageError::Validation {
                dropped: parsed.dropped,
            };
            continue;
        }

        debug!(%stage, attempt, rows = parsed.rows.len(), dropped = parsed.dropped, "Stage parsed");
        return StageOutcome::Valid(parsed.rows);
    }

    StageOutcome::Invalid(last_error)
}

// ────────────────────────────────────────────────────────────────────────────
// Lenient field access
// ────────────────────────────────────────────────────────────────────────────

/// The row array of a reply: a bare array, or the first array-valued field of an object
/// (`{"attributes": [...]}` and friends).
pub fn rows_of(value: &Value) -> &[Value] {
    match value {
        Value::Array(rows) => rows,
        Value::Object(map) => map
            .values()
            .find_map(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or(&[]),
        _ => &[],
    }
}

/// First present key parsed as a finite number (numbers or numeric strings).
pub fn get_number(row: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| {
        let v = row.get(*k)?;
        let n = match v {
            Value::Number(n) => n.as_f64()?,
            Value::String(s) => s.trim().trim_start_matches('#').parse::<f64>().ok()?,
            _ => return None,
        };
        n.is_finite().then_some(n)
    })
}

/// First present key as a non-empty trimmed string.
pub fn get_text(row: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| {
        let s = row.get(*k)?.as_str()?.trim();
        (!s.is_empty()).then(|| s.to_string())
    })
}

/// Rank in `1..=max`, rounded. Out-of-range or non-numeric yields `None`.
pub fn get_rank(row: &Value, keys: &[&str], max: u32) -> Option<u32> {
    let n = get_number(row, keys)?.round();
    (n >= 1.0 && n <= max as f64).then_some(n as u32)
}
