use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};

use super::{AttributeStore, DealSource, StageKind, StoreError};
use crate::models::attribute::{AttributeColor, FinalAttribute, FitPillar};
use crate::models::deal::{ContentHashes, DealRecord, FitSummary, JobContext};
use crate::models::overrides::AttributeOverride;

/// Postgres-backed store. Queries are runtime-checked `query`/`query_as` with `bind`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct JobContextRow {
    deal_id: String,
    job_title: String,
    job_description: String,
    jd_hash: String,
}

#[derive(Debug, FromRow)]
struct FinalAttributeRow {
    attribute_name: String,
    pillar: String,
    jd_rank: i32,
    title_rank: i32,
    final_rank: i32,
    weight: i32,
    color: String,
    multiplier: f64,
    weighted_score: i32,
}

impl TryFrom<FinalAttributeRow> for FinalAttribute {
    type Error = StoreError;

    fn try_from(row: FinalAttributeRow) -> Result<Self, Self::Error> {
        Ok(FinalAttribute {
            pillar: parse_pillar(&row.pillar)?,
            color: parse_color(&row.color)?,
            attribute_name: row.attribute_name,
            jd_rank: to_u32(row.jd_rank)?,
            title_rank: to_u32(row.title_rank)?,
            final_rank: to_u32(row.final_rank)?,
            weight: to_u32(row.weight)?,
            multiplier: row.multiplier,
            weighted_score: to_u32(row.weighted_score)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct FitSummaryRow {
    jd_hash: String,
    profile_hash: String,
    jd_summary: Option<String>,
    fit_summary: Option<String>,
    fit_score: Option<f64>,
    recolored: bool,
    analyzed_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct OverrideRow {
    deal_id: String,
    attribute_name: String,
    jd_hash: String,
    profile_hash: String,
    label: Option<String>,
    pillar: Option<String>,
    color: Option<String>,
    visible: Option<bool>,
}

impl TryFrom<OverrideRow> for AttributeOverride {
    type Error = StoreError;

    fn try_from(row: OverrideRow) -> Result<Self, Self::Error> {
        Ok(AttributeOverride {
            pillar: row.pillar.as_deref().map(parse_pillar).transpose()?,
            color: row.color.as_deref().map(parse_color).transpose()?,
            deal_id: row.deal_id,
            attribute_name: row.attribute_name,
            jd_hash: row.jd_hash,
            profile_hash: row.profile_hash,
            label: row.label,
            visible: row.visible,
        })
    }
}

#[derive(Debug, FromRow)]
struct DealRow {
    deal_id: String,
    job_title: Option<String>,
    job_description: Option<String>,
    candidate_narrative: Option<String>,
}

fn parse_pillar(s: &str) -> Result<FitPillar, StoreError> {
    FitPillar::parse(s).ok_or_else(|| StoreError::Corrupt(format!("unknown pillar '{s}'")))
}

fn parse_color(s: &str) -> Result<AttributeColor, StoreError> {
    AttributeColor::parse(s).ok_or_else(|| StoreError::Corrupt(format!("unknown color '{s}'")))
}

fn to_u32(v: i32) -> Result<u32, StoreError> {
    u32::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative value {v}")))
}

#[async_trait]
impl AttributeStore for PgStore {
    async fn upsert_job_context(&self, ctx: &JobContext) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_contexts (deal_id, job_title, job_description, jd_hash, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (deal_id) DO UPDATE
            SET job_title = EXCLUDED.job_title,
                job_description = EXCLUDED.job_description,
                jd_hash = EXCLUDED.jd_hash,
                updated_at = NOW()
            "#,
        )
        .bind(&ctx.deal_id)
        .bind(&ctx.job_title)
        .bind(&ctx.job_description)
        .bind(&ctx.jd_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_job_context(&self, deal_id: &str) -> Result<Option<JobContext>, StoreError> {
        let row = sqlx::query_as::<_, JobContextRow>(
            "SELECT deal_id, job_title, job_description, jd_hash FROM job_contexts WHERE deal_id = $1",
        )
        .bind(deal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| JobContext {
            deal_id: r.deal_id,
            job_title: r.job_title,
            job_description: r.job_description,
            jd_hash: r.jd_hash,
        }))
    }

    async fn save_stage_rows(
        &self,
        jd_hash: &str,
        stage: StageKind,
        rows: Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO stage_outputs (jd_hash, stage, rows, created_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (jd_hash, stage) DO UPDATE
            SET rows = EXCLUDED.rows, created_at = NOW()
            "#,
        )
        .bind(jd_hash)
        .bind(stage.as_str())
        .bind(&rows)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_stage_rows(
        &self,
        jd_hash: &str,
        stage: StageKind,
    ) -> Result<Option<Value>, StoreError> {
        Ok(sqlx::query_scalar::<_, Value>(
            "SELECT rows FROM stage_outputs WHERE jd_hash = $1 AND stage = $2",
        )
        .bind(jd_hash)
        .bind(stage.as_str())
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn replace_final_attributes(
        &self,
        deal_id: &str,
        rows: &[FinalAttribute],
    ) -> Result<(), StoreError> {
        // Delete + insert in one transaction so concurrent readers never see a gap.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM final_attributes WHERE deal_id = $1")
            .bind(deal_id)
            .execute(&mut *tx)
            .await?;

        for attr in rows {
            sqlx::query(
                r#"
                INSERT INTO final_attributes
                    (deal_id, attribute_name, pillar, jd_rank, title_rank, final_rank,
                     weight, color, multiplier, weighted_score)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(deal_id)
            .bind(&attr.attribute_name)
            .bind(attr.pillar.as_str())
            .bind(attr.jd_rank as i32)
            .bind(attr.title_rank as i32)
            .bind(attr.final_rank as i32)
            .bind(attr.weight as i32)
            .bind(attr.color.as_str())
            .bind(attr.multiplier)
            .bind(attr.weighted_score as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load_final_attributes(&self, deal_id: &str) -> Result<Vec<FinalAttribute>, StoreError> {
        let rows = sqlx::query_as::<_, FinalAttributeRow>(
            r#"
            SELECT attribute_name, pillar, jd_rank, title_rank, final_rank,
                   weight, color, multiplier, weighted_score
            FROM final_attributes
            WHERE deal_id = $1
            ORDER BY final_rank ASC
            "#,
        )
        .bind(deal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(FinalAttribute::try_from).collect()
    }

    async fn upsert_fit_summary(&self, deal_id: &str, summary: &FitSummary) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO fit_summaries
                (deal_id, jd_hash, profile_hash, jd_summary, fit_summary, fit_score, recolored,
                 analyzed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (deal_id) DO UPDATE
            SET jd_hash = EXCLUDED.jd_hash,
                profile_hash = EXCLUDED.profile_hash,
                jd_summary = EXCLUDED.jd_summary,
                fit_summary = EXCLUDED.fit_summary,
                fit_score = EXCLUDED.fit_score,
                recolored = EXCLUDED.recolored,
                analyzed_at = EXCLUDED.analyzed_at
            "#,
        )
        .bind(deal_id)
        .bind(&summary.jd_hash)
        .bind(&summary.profile_hash)
        .bind(&summary.jd_summary)
        .bind(&summary.fit_summary)
        .bind(summary.fit_score)
        .bind(summary.recolored)
        .bind(summary.analyzed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_fit_summary(&self, deal_id: &str) -> Result<Option<FitSummary>, StoreError> {
        let row = sqlx::query_as::<_, FitSummaryRow>(
            r#"
            SELECT jd_hash, profile_hash, jd_summary, fit_summary, fit_score, recolored, analyzed_at
            FROM fit_summaries
            WHERE deal_id = $1
            "#,
        )
        .bind(deal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| FitSummary {
            jd_hash: r.jd_hash,
            profile_hash: r.profile_hash,
            jd_summary: r.jd_summary,
            fit_summary: r.fit_summary,
            fit_score: r.fit_score,
            recolored: r.recolored,
            analyzed_at: r.analyzed_at,
        }))
    }

    async fn upsert_override(&self, entry: &AttributeOverride) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO attribute_overrides
                (deal_id, attribute_name, jd_hash, profile_hash, label, pillar, color, visible, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (deal_id, attribute_name, jd_hash, profile_hash) DO UPDATE
            SET label = EXCLUDED.label,
                pillar = EXCLUDED.pillar,
                color = EXCLUDED.color,
                visible = EXCLUDED.visible,
                updated_at = NOW()
            "#,
        )
        .bind(&entry.deal_id)
        .bind(&entry.attribute_name)
        .bind(&entry.jd_hash)
        .bind(&entry.profile_hash)
        .bind(&entry.label)
        .bind(entry.pillar.map(|p| p.as_str()))
        .bind(entry.color.map(|c| c.as_str()))
        .bind(entry.visible)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_override(
        &self,
        deal_id: &str,
        attribute_name: &str,
        hashes: &ContentHashes,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM attribute_overrides
            WHERE deal_id = $1 AND attribute_name = $2 AND jd_hash = $3 AND profile_hash = $4
            "#,
        )
        .bind(deal_id)
        .bind(attribute_name)
        .bind(&hashes.jd_hash)
        .bind(&hashes.profile_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_overrides(&self, deal_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM attribute_overrides WHERE deal_id = $1")
            .bind(deal_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn load_overrides(&self, deal_id: &str) -> Result<Vec<AttributeOverride>, StoreError> {
        let rows = sqlx::query_as::<_, OverrideRow>(
            r#"
            SELECT deal_id, attribute_name, jd_hash, profile_hash, label, pillar, color, visible
            FROM attribute_overrides
            WHERE deal_id = $1
            ORDER BY attribute_name ASC
            "#,
        )
        .bind(deal_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AttributeOverride::try_from).collect()
    }
}

#[async_trait]
impl DealSource for PgStore {
    async fn load_deal(&self, deal_id: &str) -> Result<Option<DealRecord>, StoreError> {
        let row = sqlx::query_as::<_, DealRow>(
            r#"
            SELECT deal_id, job_title, job_description, candidate_narrative
            FROM deals
            WHERE deal_id = $1
            "#,
        )
        .bind(deal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DealRecord {
            deal_id: r.deal_id,
            job_title: r.job_title,
            job_description: r.job_description,
            candidate_narrative: r.candidate_narrative,
        }))
    }
}
