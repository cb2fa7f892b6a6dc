//! Merge & ranking: folds the independent role-relevance order into the refined set.
//!
//! Sort key: title_rank ↑, jd_rank ↑, normalized label ↑, pillar ↑, original label ↑.
//! Labels that collide after normalization keep only their first occurrence in that order,
//! then `final_rank` is assigned densely from 1.

use std::collections::{HashMap, HashSet};

use crate::models::attribute::{
    clean_label, normalize_label, AttributeColor, FinalAttribute, FitPillar, RefinedAttribute,
    RoleRelevanceAttribute,
};

/// An attribute with both ranks resolved, before weighting.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedAttribute {
    pub name: String,
    pub pillar: FitPillar,
    pub jd_rank: u32,
    pub title_rank: u32,
    pub original_label: String,
}

/// Merges stage 3 and stage 4 into a densely ranked, deduplicated set.
/// Weight and color are left at neutral values for the weighting engine to fill.
pub fn merge_rankings(
    refined: &[RefinedAttribute],
    relevance: &[RoleRelevanceAttribute],
) -> Vec<FinalAttribute> {
    let title_ranks: HashMap<String, u32> = relevance
        .iter()
        .map(|r| (normalize_label(&r.refined_label), r.independent_rank))
        .collect();

    let ranked = refined
        .iter()
        .map(|r| RankedAttribute {
            name: clean_label(&r.refined_label),
            pillar: r.fit_pillar,
            jd_rank: r.rank,
            title_rank: title_ranks
                .get(&normalize_label(&r.refined_label))
                .copied()
                .unwrap_or(r.rank),
            original_label: r.original_label.clone(),
        })
        .collect();

    assign_final_ranks(ranked)
}

/// Sorts, deduplicates by normalized name, and assigns dense `final_rank` values.
pub fn assign_final_ranks(mut ranked: Vec<RankedAttribute>) -> Vec<FinalAttribute> {
    ranked.retain(|r| !normalize_label(&r.name).is_empty());
    ranked.sort_by(|a, b| {
        a.title_rank
            .cmp(&b.title_rank)
            .then(a.jd_rank.cmp(&b.jd_rank))
            .then_with(|| normalize_label(&a.name).cmp(&normalize_label(&b.name)))
            .then(a.pillar.cmp(&b.pillar))
            .then_with(|| a.original_label.cmp(&b.original_label))
    });

    let mut seen = HashSet::new();
    ranked
        .into_iter()
        .filter(|r| seen.insert(normalize_label(&r.name)))
        .enumerate()
        .map(|(i, r)| FinalAttribute {
            attribute_name: r.name,
            pillar: r.pillar,
            jd_rank: r.jd_rank,
            title_rank: r.title_rank,
            final_rank: i as u32 + 1,
            weight: 0,
            color: AttributeColor::Grey,
            multiplier: 0.0,
            weighted_score: 0,
        })
        .collect()
}
