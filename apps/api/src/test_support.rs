//! Test doubles shared by the in-module test suites.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::fit::lexical::tokenize;
use crate::models::deal::DealRecord;
use crate::oracle::embedding::EmbeddingOracle;
use crate::oracle::{OracleError, TextOracle};
use crate::ranking::prompts::{
    CATEGORIZATION_ROLE, EXTRACTION_ROLE, REFINEMENT_ROLE, RELEVANCE_ROLE,
};

type Script = VecDeque<Result<String, String>>;

/// Oracle that answers from per-role scripts.
///
/// A call is routed to the first script whose key is contained in the system prompt.
/// Each script is consumed front to back and its last entry repeats forever.
#[derive(Default)]
pub struct ScriptedOracle {
    scripts: Mutex<Vec<(String, Script)>>,
    prompts: Mutex<Vec<(String, String)>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Option<Duration>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, key: &str, text: &str) -> Self {
        self.push(key, Ok(text.to_string()))
    }

    pub fn fail(self, key: &str, message: &str) -> Self {
        self.push(key, Err(message.to_string()))
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn push(self, key: &str, entry: Result<String, String>) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.iter_mut().find(|(k, _)| k == key) {
                Some((_, script)) => script.push_back(entry),
                None => scripts.push((key.to_string(), VecDeque::from([entry]))),
            }
        }
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Prompts sent to calls whose system prompt contained `key`.
    pub fn prompts_for(&self, key: &str) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|(system, _)| system.contains(key))
            .map(|(_, prompt)| prompt.clone())
            .collect()
    }

    fn next_entry(&self, system: &str) -> Option<Result<String, String>> {
        let mut scripts = self.scripts.lock().unwrap();
        let (_, script) = scripts.iter_mut().find(|(k, _)| system.contains(k.as_str()))?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

#[async_trait]
impl TextOracle for ScriptedOracle {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), prompt.to_string()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.next_entry(system) {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(OracleError::Unavailable(message)),
            None => Err(OracleError::Unavailable("no scripted reply".to_string())),
        }
    }
}

/// Deterministic embedder over a small keyword vocabulary: one dimension per keyword,
/// set when the text contains it. Texts with no keyword embed to the zero vector.
pub struct KeywordEmbedder;

const VOCABULARY: &[&str] = &[
    "sql", "python", "airflow", "dbt", "stakeholder", "kubernetes", "terraform", "payments",
    "management",
];

#[async_trait]
impl EmbeddingOracle for KeywordEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, OracleError> {
        Ok(texts
            .iter()
            .map(|text| {
                let tokens = tokenize(text);
                VOCABULARY
                    .iter()
                    .map(|w| if tokens.iter().any(|t| t == w) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect())
    }
}

/// Embedder that always fails.
pub struct BrokenEmbedder;

#[async_trait]
impl EmbeddingOracle for BrokenEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, OracleError> {
        Err(OracleError::Unavailable("embedding service down".to_string()))
    }
}

pub const JOB_TITLE: &str = "Analytics Engineer";
pub const JOB_DESCRIPTION: &str = "We need an analytics engineer who writes SQL and Python \
    every day, orchestrates jobs with Airflow, models data in dbt, and keeps stakeholders \
    informed about delivery.";
pub const NARRATIVE: &str = "Six years writing SQL and Python; ran Airflow in production.";

pub const LABELS: [&str; 5] = ["SQL", "Python", "Airflow", "Stakeholder Management", "dbt"];
/// Independent stage-4 ranks for `LABELS`, in label order.
pub const TITLE_RANKS: [u32; 5] = [3, 1, 2, 5, 4];

pub fn deal_record(deal_id: &str) -> DealRecord {
    DealRecord {
        deal_id: deal_id.to_string(),
        job_title: Some(JOB_TITLE.to_string()),
        job_description: Some(JOB_DESCRIPTION.to_string()),
        candidate_narrative: None,
    }
}

pub fn extraction_reply() -> String {
    let rows: Vec<_> = LABELS
        .iter()
        .enumerate()
        .map(|(i, l)| json!({"rank": i + 1, "label": l, "taxonomy_category": "Skill", "rationale": "Named in the posting."}))
        .collect();
    serde_json::Value::Array(rows).to_string()
}

pub fn categorization_reply() -> String {
    let rows: Vec<_> = LABELS
        .iter()
        .enumerate()
        .map(|(i, l)| {
            let pillar = if *l == "Stakeholder Management" { "Process" } else { "Technical" };
            json!({"rank": i + 1, "label": l, "fit_pillar": pillar})
        })
        .collect();
    serde_json::Value::Array(rows).to_string()
}

pub fn refinement_reply() -> String {
    let rows: Vec<_> = LABELS
        .iter()
        .enumerate()
        .map(|(i, l)| json!({"rank": i + 1, "original_label": l, "refined_label": l}))
        .collect();
    // Fenced on purpose: the client must strip fences.
    format!("```json\n{}\n```", serde_json::Value::Array(rows))
}

pub fn relevance_reply() -> String {
    let rows: Vec<_> = LABELS
        .iter()
        .zip(TITLE_RANKS)
        .map(|(l, r)| json!({"independent_rank": r, "refined_label": l, "relevance_score": 11 - r as i64 * 2, "rationale": format!("Core to an {JOB_TITLE}.")}))
        .collect();
    serde_json::Value::Array(rows).to_string()
}

/// An oracle scripted for a clean run of all four stages over `LABELS`.
pub fn pipeline_oracle() -> ScriptedOracle {
    ScriptedOracle::new()
        .reply(EXTRACTION_ROLE, &extraction_reply())
        .reply(CATEGORIZATION_ROLE, &categorization_reply())
        .reply(REFINEMENT_ROLE, &refinement_reply())
        .reply(RELEVANCE_ROLE, &relevance_reply())
}
