//! Degraded-path ranking: builds a valid final set from the furthest stage that produced
//! rows, ordered by stage-1 rank, every attribute grey.

use super::merge::{assign_final_ranks, RankedAttribute};
use super::weighting::weigh_all_grey;
use crate::models::attribute::{
    clean_label, AttributeCandidate, CategorizedAttribute, FinalAttribute, RefinedAttribute,
};

/// Rows available when the full pipeline could not finish.
#[derive(Debug, Default)]
pub struct FallbackInputs<'a> {
    pub candidates: &'a [AttributeCandidate],
    pub categorized: Option<&'a [CategorizedAttribute]>,
    pub refined: Option<&'a [RefinedAttribute]>,
}

pub fn fallback_ranking(inputs: &FallbackInputs<'_>) -> Vec<FinalAttribute> {
    let ranked: Vec<RankedAttribute> = match (inputs.refined, inputs.categorized) {
        (Some(refined), _) if !refined.is_empty() => refined
            .iter()
            .map(|r| RankedAttribute {
                name: clean_label(&r.refined_label),
                pillar: r.fit_pillar,
                jd_rank: r.rank,
                title_rank: r.rank,
                original_label: r.original_label.clone(),
            })
            .collect(),
        (_, Some(categorized)) if !categorized.is_empty() => categorized
            .iter()
            .map(|c| RankedAttribute {
                name: clean_label(&c.label),
                pillar: c.fit_pillar,
                jd_rank: c.rank,
                title_rank: c.rank,
                original_label: c.label.clone(),
            })
            .collect(),
        _ => inputs
            .candidates
            .iter()
            .map(|c| RankedAttribute {
                name: clean_label(&c.label),
                pillar: c.taxonomy_category.default_pillar(),
                jd_rank: c.rank,
                title_rank: c.rank,
                original_label: c.label.clone(),
            })
            .collect(),
    };

    let mut attrs = assign_final_ranks(ranked);
    weigh_all_grey(&mut attrs);
    attrs
}
