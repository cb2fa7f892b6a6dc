//! Override store & merge layer.
//!
//! Overrides are admin corrections to one attribute's label, pillar, color or visibility.
//! Each is scoped to the (jd_hash, profile_hash) pair that was current when it was written:
//! once either hash moves, the override is ignored but left in place. Only an explicit reset
//! deletes it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::fit::hybrid::{fit_score, resolve_color, ScoringContext};
use crate::hashing::short;
use crate::models::attribute::{
    clean_label, normalize_label, AttributeColor, FinalAttribute, FitPillar,
};
use crate::models::deal::{ContentHashes, FitSummary};
use crate::models::overrides::AttributeOverride;
use crate::ranking::weighting::apply_color;
use crate::store::{current_hashes, AttributeStore, StoreError};

pub mod handlers;

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A final attribute with any hash-valid override applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedAttribute {
    /// Identity of the underlying row; unchanged by label overrides.
    pub attribute_name: String,
    pub label: String,
    pub pillar: FitPillar,
    pub jd_rank: u32,
    pub title_rank: u32,
    pub final_rank: u32,
    pub weight: u32,
    pub color: AttributeColor,
    pub multiplier: f64,
    pub weighted_score: u32,
    pub visible: bool,
    pub has_override: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PillarGroup {
    pub pillar: FitPillar,
    pub attributes: Vec<MergedAttribute>,
}

/// Overrides that apply under `current`, keyed by normalized attribute name.
fn valid_overrides<'a>(
    overrides: &'a [AttributeOverride],
    current: Option<&ContentHashes>,
) -> HashMap<String, &'a AttributeOverride> {
    let Some(current) = current else {
        return HashMap::new();
    };
    overrides
        .iter()
        .filter(|o| o.is_valid_for(current))
        .map(|o| (normalize_label(&o.attribute_name), o))
        .collect()
}

/// Applies hash-valid overrides on top of `base`. Stale overrides are ignored.
pub fn merged_view(
    base: &[FinalAttribute],
    overrides: &[AttributeOverride],
    current: Option<&ContentHashes>,
) -> Vec<MergedAttribute> {
    let valid = valid_overrides(overrides, current);

    base.iter()
        .map(|attr| {
            let entry = valid.get(&normalize_label(&attr.attribute_name)).copied();
            let mut row = attr.clone();
            if let Some(color) = entry.and_then(|o| o.color) {
                apply_color(&mut row, color);
            }
            MergedAttribute {
                label: entry
                    .and_then(|o| o.label.clone())
                    .unwrap_or_else(|| row.attribute_name.clone()),
                pillar: entry.and_then(|o| o.pillar).unwrap_or(row.pillar),
                visible: entry.and_then(|o| o.visible).unwrap_or(true),
                has_override: entry.is_some(),
                attribute_name: row.attribute_name,
                jd_rank: row.jd_rank,
                title_rank: row.title_rank,
                final_rank: row.final_rank,
                weight: row.weight,
                color: row.color,
                multiplier: row.multiplier,
                weighted_score: row.weighted_score,
            }
        })
        .collect()
}

/// Groups merged attributes by pillar in pillar order, each group in `final_rank` order.
pub fn group_by_pillar(attrs: &[MergedAttribute], include_hidden: bool) -> Vec<PillarGroup> {
    FitPillar::ALL
        .into_iter()
        .map(|pillar| {
            let mut attributes: Vec<MergedAttribute> = attrs
                .iter()
                .filter(|a| a.pillar == pillar && (include_hidden || a.visible))
                .cloned()
                .collect();
            attributes.sort_by_key(|a| a.final_rank);
            PillarGroup { pillar, attributes }
        })
        .collect()
}

/// Hidden names and override colors that hybrid scoring must respect under `current`.
pub fn scoring_context(overrides: &[AttributeOverride], current: &ContentHashes) -> ScoringContext {
    let mut scoring = ScoringContext::default();
    for (name, entry) in valid_overrides(overrides, Some(current)) {
        if entry.visible == Some(false) {
            scoring.hidden.insert(name.clone());
        }
        if let Some(color) = entry.color {
            scoring.external_colors.insert(name, color);
        }
    }
    scoring
}

// ────────────────────────────────────────────────────────────────────────────
// Service operations
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OverrideRequest {
    pub attribute_name: String,
    pub label: Option<String>,
    pub pillar: Option<FitPillar>,
    pub color: Option<AttributeColor>,
    pub visible: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributeView {
    pub deal_id: String,
    pub hashes: Option<ContentHashes>,
    pub summary: Option<FitSummary>,
    pub groups: Vec<PillarGroup>,
}

/// Merged, grouped attributes of a deal plus its summary.
pub async fn load_view(
    store: &dyn AttributeStore,
    deal_id: &str,
    include_hidden: bool,
) -> Result<AttributeView, OverrideError> {
    let base = store.load_final_attributes(deal_id).await?;
    if base.is_empty() {
        return Err(OverrideError::NotFound(format!(
            "No attributes for deal {deal_id}"
        )));
    }
    let hashes = current_hashes(store, deal_id).await?;
    let overrides = store.load_overrides(deal_id).await?;
    let merged = merged_view(&base, &overrides, hashes.as_ref());

    Ok(AttributeView {
        deal_id: deal_id.to_string(),
        summary: store.load_fit_summary(deal_id).await?,
        groups: group_by_pillar(&merged, include_hidden),
        hashes,
    })
}

/// Upserts an override for one attribute under the deal's current hashes.
pub async fn set_override(
    store: &dyn AttributeStore,
    deal_id: &str,
    request: OverrideRequest,
) -> Result<AttributeOverride, OverrideError> {
    let hashes = current_hashes(store, deal_id)
        .await?
        .ok_or_else(|| OverrideError::NotFound(format!("Deal {deal_id} has not been analyzed")))?;

    let key = normalize_label(&request.attribute_name);
    let base = store.load_final_attributes(deal_id).await?;
    let attr = base
        .iter()
        .find(|a| normalize_label(&a.attribute_name) == key)
        .ok_or_else(|| {
            OverrideError::NotFound(format!(
                "Attribute '{}' not found for deal {deal_id}",
                request.attribute_name
            ))
        })?;

    let label = match request.label {
        Some(l) => {
            let cleaned = clean_label(&l);
            if normalize_label(&cleaned).is_empty() {
                return Err(OverrideError::Invalid("label cannot be empty".to_string()));
            }
            Some(cleaned)
        }
        None => None,
    };
    if label.is_none() && request.pillar.is_none() && request.color.is_none() && request.visible.is_none() {
        return Err(OverrideError::Invalid(
            "override must set at least one of label, pillar, color, visible".to_string(),
        ));
    }

    let entry = AttributeOverride {
        deal_id: deal_id.to_string(),
        attribute_name: attr.attribute_name.clone(),
        jd_hash: hashes.jd_hash,
        profile_hash: hashes.profile_hash,
        label,
        pillar: request.pillar,
        color: request.color,
        visible: request.visible,
    };
    store.upsert_override(&entry).await?;
    refresh_fit_score(store, deal_id).await?;

    info!(
        deal_id,
        attribute = %entry.attribute_name,
        jd_hash = short(&entry.jd_hash),
        "Override saved"
    );
    Ok(entry)
}

/// Deletes the override of one attribute under the current hashes.
pub async fn reset_override(
    store: &dyn AttributeStore,
    deal_id: &str,
    attribute_name: &str,
) -> Result<bool, OverrideError> {
    let hashes = current_hashes(store, deal_id)
        .await?
        .ok_or_else(|| OverrideError::NotFound(format!("Deal {deal_id} has not been analyzed")))?;

    let key = normalize_label(attribute_name);
    let name = store
        .load_overrides(deal_id)
        .await?
        .into_iter()
        .find(|o| o.is_valid_for(&hashes) && normalize_label(&o.attribute_name) == key)
        .map(|o| o.attribute_name);

    let Some(name) = name else {
        return Ok(false);
    };
    let deleted = store.delete_override(deal_id, &name, &hashes).await?;
    if deleted {
        refresh_fit_score(store, deal_id).await?;
    }
    info!(deal_id, attribute = %name, deleted, "Override reset");
    Ok(deleted)
}

/// Deletes every override of the deal, stale ones included.
pub async fn reset_all(store: &dyn AttributeStore, deal_id: &str) -> Result<u64, OverrideError> {
    let deleted = store.delete_overrides(deal_id).await?;
    if deleted > 0 {
        refresh_fit_score(store, deal_id).await?;
    }
    info!(deal_id, deleted, "All overrides reset");
    Ok(deleted)
}

/// Rewrites the stored fit score of a re-colored set under the current overrides: hidden
/// attributes leave the denominator and an override color counts when it is more favorable.
/// Estimated and unscored summaries are left alone.
async fn refresh_fit_score(store: &dyn AttributeStore, deal_id: &str) -> Result<(), OverrideError> {
    let Some(hashes) = current_hashes(store, deal_id).await? else {
        return Ok(());
    };
    let Some(mut summary) = store.load_fit_summary(deal_id).await? else {
        return Ok(());
    };
    if !summary.recolored {
        return Ok(());
    }

    let mut attrs = store.load_final_attributes(deal_id).await?;
    let overrides = store.load_overrides(deal_id).await?;
    let scoring = scoring_context(&overrides, &hashes);
    for attr in &mut attrs {
        let color = resolve_color(attr.color, scoring.external_color(attr));
        if color != attr.color {
            apply_color(attr, color);
        }
    }
    let score = fit_score(&attrs, &scoring);
    if score == summary.fit_score {
        return Ok(());
    }

    summary.fit_score = score;
    store.upsert_fit_summary(deal_id, &summary).await?;
    info!(deal_id, fit_score = ?score, "Fit score refreshed after override change");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::deal::JobContext;
    use crate::ranking::weighting::weigh_and_colorize;
    use crate::store::MemoryStore;
    use chrono::Utc;

    fn base() -> Vec<FinalAttribute> {
        let mut attrs: Vec<FinalAttribute> = ["SQL", "Python", "Budgeting"]
            .iter()
            .enumerate()
            .map(|(i, n)| FinalAttribute {
                attribute_name: n.to_string(),
                pillar: if *n == "Budgeting" {
                    FitPillar::Industry
                } else {
                    FitPillar::Technical
                },
                jd_rank: i as u32 + 1,
                title_rank: i as u32 + 1,
                final_rank: i as u32 + 1,
                weight: 0,
                color: AttributeColor::Grey,
                multiplier: 0.0,
                weighted_score: 0,
            })
            .collect();
        weigh_and_colorize(&mut attrs);
        attrs
    }

    fn hashes(jd: &str, profile: &str) -> ContentHashes {
        ContentHashes {
            jd_hash: jd.to_string(),
            profile_hash: profile.to_string(),
        }
    }

    fn entry(name: &str, jd: &str, profile: &str) -> AttributeOverride {
        AttributeOverride {
            deal_id: "deal-1".to_string(),
            attribute_name: name.to_string(),
            jd_hash: jd.to_string(),
            profile_hash: profile.to_string(),
            label: Some("Advanced SQL".to_string()),
            pillar: None,
            color: Some(AttributeColor::Yellow),
            visible: None,
        }
    }

    #[test]
    fn test_valid_override_applies_non_null_fields() {
        let merged = merged_view(&base(), &[entry("SQL", "A", "B")], Some(&hashes("A", "B")));
        let sql = &merged[0];
        assert!(sql.has_override);
        assert_eq!(sql.label, "Advanced SQL");
        assert_eq!(sql.attribute_name, "SQL");
        assert_eq!(sql.pillar, FitPillar::Technical);
        assert_eq!(sql.color, AttributeColor::Yellow);
        assert_eq!(sql.weighted_score, 65);
        assert!(!merged[1].has_override);
    }

    #[test]
    fn test_override_scoped_to_both_hashes() {
        let overrides = [entry("SQL", "A", "B")];
        for current in [hashes("A", "B2"), hashes("A2", "B")] {
            let merged = merged_view(&base(), &overrides, Some(&current));
            assert!(!merged[0].has_override);
            assert_eq!(merged[0].label, "SQL");
            assert_eq!(merged[0].color, AttributeColor::Green);
        }
        assert!(!merged_view(&base(), &overrides, None)[0].has_override);
    }

    #[test]
    fn test_hidden_rows_leave_listing_but_not_admin_view() {
        let mut hide = entry("Python", "A", "B");
        hide.visible = Some(false);
        let merged = merged_view(&base(), &[hide.clone()], Some(&hashes("A", "B")));

        let public = group_by_pillar(&merged, false);
        let technical = &public[2];
        assert_eq!(technical.pillar, FitPillar::Technical);
        assert_eq!(technical.attributes.len(), 1);

        let admin = group_by_pillar(&merged, true);
        assert_eq!(admin[2].attributes.len(), 2);
        assert_eq!(admin[0].attributes[0].attribute_name, "Budgeting");

        let scoring = scoring_context(&[hide], &hashes("A", "B"));
        assert!(scoring.hidden.contains("python"));
        assert_eq!(scoring.external_colors.get("python"), Some(&AttributeColor::Yellow));
    }

    #[test]
    fn test_pillar_override_moves_group() {
        let mut moved = entry("SQL", "A", "B");
        moved.pillar = Some(FitPillar::Process);
        let merged = merged_view(&base(), &[moved], Some(&hashes("A", "B")));
        let groups = group_by_pillar(&merged, false);
        assert_eq!(groups[1].attributes[0].attribute_name, "SQL");
    }

    async fn analyzed_store() -> MemoryStore {
        let store = MemoryStore::new();
        let ctx = JobContext::new("deal-1", "Analyst", "Analyze budgets and write SQL all week.");
        store.upsert_job_context(&ctx).await.unwrap();
        store
            .replace_final_attributes("deal-1", &base())
            .await
            .unwrap();
        store
            .upsert_fit_summary(
                "deal-1",
                &FitSummary {
                    jd_hash: ctx.jd_hash.clone(),
                    profile_hash: "P".to_string(),
                    jd_summary: None,
                    fit_summary: None,
                    fit_score: None,
                    recolored: false,
                    analyzed_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_set_and_reset_round_trip() {
        let store = analyzed_store().await;
        let saved = set_override(
            &store,
            "deal-1",
            OverrideRequest {
                attribute_name: "sql".to_string(),
                color: Some(AttributeColor::Grey),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(saved.attribute_name, "SQL");
        assert_eq!(saved.profile_hash, "P");

        let view = load_view(&store, "deal-1", false).await.unwrap();
        let sql = &view.groups[2].attributes[0];
        assert!(sql.has_override);
        assert_eq!(sql.color, AttributeColor::Grey);

        assert!(reset_override(&store, "deal-1", "SQL").await.unwrap());
        assert!(!reset_override(&store, "deal-1", "SQL").await.unwrap());
    }

    #[tokio::test]
    async fn test_set_rejects_unknown_attribute_and_empty_change() {
        let store = analyzed_store().await;
        let err = set_override(
            &store,
            "deal-1",
            OverrideRequest {
                attribute_name: "Kubernetes".to_string(),
                visible: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OverrideError::NotFound(_)));

        let err = set_override(
            &store,
            "deal-1",
            OverrideRequest {
                attribute_name: "SQL".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OverrideError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_set_requires_analyzed_deal() {
        let store = MemoryStore::new();
        let err = set_override(
            &store,
            "nope",
            OverrideRequest {
                attribute_name: "SQL".to_string(),
                visible: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OverrideError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_reset_all_removes_stale_rows_too() {
        let store = analyzed_store().await;
        store.upsert_override(&entry("SQL", "old", "old")).await.unwrap();
        store.upsert_override(&entry("Python", "old2", "P")).await.unwrap();
        assert_eq!(reset_all(&store, "deal-1").await.unwrap(), 2);
        assert!(store.load_overrides("deal-1").await.unwrap().is_empty());
    }

    fn hide(name: &str) -> OverrideRequest {
        OverrideRequest {
            attribute_name: name.to_string(),
            visible: Some(false),
            ..Default::default()
        }
    }

    async fn stored_score(store: &MemoryStore) -> Option<f64> {
        store.load_fit_summary("deal-1").await.unwrap().unwrap().fit_score
    }

    #[tokio::test]
    async fn test_override_changes_refresh_recolored_score() {
        let store = analyzed_store().await;
        let mut attrs = base();
        apply_color(&mut attrs[2], AttributeColor::Grey);
        store.replace_final_attributes("deal-1", &attrs).await.unwrap();
        let mut summary = store.load_fit_summary("deal-1").await.unwrap().unwrap();
        summary.fit_score = Some(160.0 / 196.0);
        summary.recolored = true;
        store.upsert_fit_summary("deal-1", &summary).await.unwrap();

        set_override(&store, "deal-1", hide("SQL")).await.unwrap();
        assert!((stored_score(&store).await.unwrap() - 60.0 / 96.0).abs() < 1e-9);

        set_override(
            &store,
            "deal-1",
            OverrideRequest {
                attribute_name: "Budgeting".to_string(),
                color: Some(AttributeColor::Yellow),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let expected = (60.0 + 36.0 * 0.65) / 96.0;
        assert!((stored_score(&store).await.unwrap() - expected).abs() < 1e-9);

        set_override(&store, "deal-1", hide("Python")).await.unwrap();
        set_override(&store, "deal-1", hide("Budgeting")).await.unwrap();
        assert_eq!(stored_score(&store).await, None);

        assert_eq!(reset_all(&store, "deal-1").await.unwrap(), 3);
        assert!((stored_score(&store).await.unwrap() - 160.0 / 196.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_estimated_score_is_left_alone() {
        let store = analyzed_store().await;
        let mut summary = store.load_fit_summary("deal-1").await.unwrap().unwrap();
        summary.fit_score = Some(0.72);
        store.upsert_fit_summary("deal-1", &summary).await.unwrap();

        set_override(&store, "deal-1", hide("SQL")).await.unwrap();
        assert_eq!(stored_score(&store).await, Some(0.72));
    }
}
