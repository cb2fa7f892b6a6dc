//! Hybrid recompute: re-colors a final attribute set against a candidate narrative without
//! touching the staged pipeline.
//!
//! Algorithm, per visible attribute in `final_rank` order:
//! 1. semantic = cosine(embed(label), embed(narrative))
//! 2. lexical  = fraction of label tokens found in the narrative
//! 3. hybrid   = 0.85 · semantic + 0.15 · lexical
//! 4. auto     = green (≥ 0.80) | yellow (≥ 0.60) | grey
//! 5. color    = more favorable of auto and the externally supplied color
//!
//! fit_score = Σ(weight · multiplier) / Σ(weight) over visible attributes.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::debug;

use super::lexical::{lexical_overlap, token_set};
use crate::models::attribute::{normalize_label, AttributeColor, FinalAttribute};
use crate::oracle::embedding::{cosine_similarity, EmbeddingOracle};
use crate::oracle::OracleError;
use crate::ranking::weighting::apply_color;

pub const SEMANTIC_WEIGHT: f64 = 0.85;
pub const LEXICAL_WEIGHT: f64 = 0.15;
pub const GREEN_THRESHOLD: f64 = 0.80;
pub const YELLOW_THRESHOLD: f64 = 0.60;

/// Per-attribute scoring detail, returned for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct AttributeMatch {
    pub attribute_name: String,
    pub semantic: f64,
    pub lexical: f64,
    pub hybrid: f64,
    pub auto_color: AttributeColor,
    pub external_color: Option<AttributeColor>,
    pub color: AttributeColor,
}

#[derive(Debug, Clone, Serialize)]
pub struct HybridOutcome {
    pub matches: Vec<AttributeMatch>,
    /// `None` when no attribute is visible.
    pub fit_score: Option<f64>,
}

/// Colors keyed by normalized attribute name, plus the normalized names hidden from scoring.
#[derive(Debug, Default, Clone)]
pub struct ScoringContext {
    pub external_colors: HashMap<String, AttributeColor>,
    pub hidden: HashSet<String>,
}

impl ScoringContext {
    pub fn is_visible(&self, attr: &FinalAttribute) -> bool {
        !self.hidden.contains(&normalize_label(&attr.attribute_name))
    }

    pub fn external_color(&self, attr: &FinalAttribute) -> Option<AttributeColor> {
        self.external_colors
            .get(&normalize_label(&attr.attribute_name))
            .copied()
    }
}

pub fn blend(semantic: f64, lexical: f64) -> f64 {
    SEMANTIC_WEIGHT * semantic + LEXICAL_WEIGHT * lexical
}

pub fn auto_color(hybrid: f64) -> AttributeColor {
    if hybrid >= GREEN_THRESHOLD {
        AttributeColor::Green
    } else if hybrid >= YELLOW_THRESHOLD {
        AttributeColor::Yellow
    } else {
        AttributeColor::Grey
    }
}

/// The more favorable of the computed and the supplied color.
pub fn resolve_color(auto: AttributeColor, external: Option<AttributeColor>) -> AttributeColor {
    external.map_or(auto, |e| auto.max(e))
}

/// Σ(weight · multiplier) / Σ(weight) over visible attributes; `None` when nothing is
/// visible or every visible weight is zero.
pub fn fit_score(attrs: &[FinalAttribute], scoring: &ScoringContext) -> Option<f64> {
    let (num, den) = attrs
        .iter()
        .filter(|a| scoring.is_visible(a))
        .fold((0.0, 0.0), |(num, den), a| {
            (num + a.weight as f64 * a.multiplier, den + a.weight as f64)
        });
    (den > 0.0).then(|| (num / den).clamp(0.0, 1.0))
}

/// Re-colors the visible attributes of `attrs` in place and returns the new fit score.
/// Hidden attributes keep their current color and do not count toward the score.
pub async fn recompute(
    embedder: &dyn EmbeddingOracle,
    attrs: &mut [FinalAttribute],
    narrative: &str,
    scoring: &ScoringContext,
) -> Result<HybridOutcome, OracleError> {
    attrs.sort_by_key(|a| a.final_rank);
    let visible: Vec<usize> = (0..attrs.len())
        .filter(|&i| scoring.is_visible(&attrs[i]))
        .collect();

    let semantic = semantic_scores(embedder, attrs, &visible, narrative).await?;
    let narrative_tokens = token_set(narrative);

    let mut matches = Vec::with_capacity(visible.len());
    for (&i, semantic) in visible.iter().zip(semantic) {
        let attr = &mut attrs[i];
        let lexical = lexical_overlap(&attr.attribute_name, &narrative_tokens);
        let hybrid = blend(semantic, lexical);
        let auto = auto_color(hybrid);
        let external = scoring.external_color(attr);
        let color = resolve_color(auto, external);
        apply_color(attr, color);

        matches.push(AttributeMatch {
            attribute_name: attr.attribute_name.clone(),
            semantic,
            lexical,
            hybrid,
            auto_color: auto,
            external_color: external,
            color,
        });
    }

    let fit_score = fit_score(attrs, scoring);
    debug!(visible = visible.len(), ?fit_score, "Hybrid recompute finished");
    Ok(HybridOutcome { matches, fit_score })
}

async fn semantic_scores(
    embedder: &dyn EmbeddingOracle,
    attrs: &[FinalAttribute],
    visible: &[usize],
    narrative: &str,
) -> Result<Vec<f64>, OracleError> {
    if visible.is_empty() || narrative.trim().is_empty() {
        return Ok(vec![0.0; visible.len()]);
    }

    let mut texts = Vec::with_capacity(visible.len() + 1);
    texts.push(narrative.to_string());
    texts.extend(visible.iter().map(|&i| attrs[i].attribute_name.clone()));

    let vectors = embedder.embed(&texts).await?;
    let Some((narrative_vec, label_vecs)) = vectors.split_first() else {
        return Err(OracleError::EmptyContent);
    };
    if label_vecs.len() != visible.len() {
        return Err(OracleError::Unavailable(format!(
            "expected {} label embeddings, got {}",
            visible.len(),
            label_vecs.len()
        )));
    }
    Ok(label_vecs
        .iter()
        .map(|v| cosine_similarity(v, narrative_vec))
        .collect())
}
