//! Pipeline aggregator: the kanban board and its summary statistics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use entity::{deal, pipeline, stage};
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::deals::DealView;
use crate::directory::{self, Directory};
use crate::error::{CrmError, CrmResult};
use crate::pipelines::find_pipeline;
use crate::stages::{StageView, stages_for};

pub const MAX_CARDS_PER_STAGE: u32 = 100;

/// Ordering of cards inside a column, newest first.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CardOrder {
    #[default]
    Updated,
    Created,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardOptions {
    /// Limits the cards listed per column. Counts and totals still cover
    /// every deal.
    pub first_per_stage: Option<u32>,
    #[serde(default)]
    pub order_by: CardOrder,
}

impl BoardOptions {
    fn validate(&self) -> CrmResult<()> {
        match self.first_per_stage {
            Some(first) if first > MAX_CARDS_PER_STAGE => Err(CrmError::invalid(format!(
                "firstPerStage cannot exceed {MAX_CARDS_PER_STAGE}"
            ))),
            _ => Ok(()),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DealCard {
    #[serde(flatten)]
    pub deal: DealView,
    pub company_name: Option<String>,
    pub person_name: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StageColumn {
    pub stage: StageView,
    pub deals: Vec<DealCard>,
    pub deal_count: u64,
    pub total_value_cents: i64,
    pub expected_value_cents: i64,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BoardPipeline {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineBoard {
    pub pipeline: BoardPipeline,
    pub stages: Vec<StageColumn>,
    pub total_deals: u64,
    pub total_value_cents: i64,
    pub average_deal_value_cents: f64,
    /// Won deals as a percentage of deals in won or lost stages.
    pub win_rate: f64,
    pub expected_value_cents: i64,
    pub open_deals: u64,
}

fn expected_cents(deal: &deal::Model) -> i128 {
    i128::from(deal.value_cents) * i128::from(deal.probability) / 100
}

/// Totals are accumulated in `i128` and must fit back into `i64` cents.
fn to_cents(value: i128) -> CrmResult<i64> {
    i64::try_from(value)
        .map_err(|_| CrmError::precondition("pipeline totals exceed the supported money range"))
}

/// `won / (won + lost) * 100`, or 0 before any deal reached a terminal stage.
pub fn win_rate(won: u64, lost: u64) -> f64 {
    let closed = won + lost;
    if closed == 0 {
        0.0
    } else {
        won as f64 * 100.0 / closed as f64
    }
}

pub fn average_value(total_value_cents: i64, deals: u64) -> f64 {
    if deals == 0 {
        0.0
    } else {
        total_value_cents as f64 / deals as f64
    }
}

/// Buckets `deals` into `stages` (ordered by `sort_order`) and computes the
/// board totals. Deals whose stage is not in `stages` are ignored.
pub fn summarize(
    pipeline: &pipeline::Model,
    stages: &[stage::Model],
    deals: Vec<deal::Model>,
    directory: &Directory,
    options: &BoardOptions,
) -> CrmResult<PipelineBoard> {
    let mut ordered: Vec<&stage::Model> = stages.iter().collect();
    ordered.sort_by_key(|stage| stage.sort_order);

    let mut buckets: HashMap<Uuid, Vec<deal::Model>> =
        ordered.iter().map(|stage| (stage.id, Vec::new())).collect();
    for deal in deals {
        if let Some(bucket) = buckets.get_mut(&deal.stage_id) {
            bucket.push(deal);
        }
    }

    let mut columns = Vec::with_capacity(ordered.len());
    let (mut total_deals, mut total_value, mut expected_value) = (0u64, 0i128, 0i128);
    let (mut won, mut lost, mut open) = (0u64, 0u64, 0u64);
    for stage in ordered {
        let mut bucket = buckets.remove(&stage.id).unwrap_or_default();
        let deal_count = bucket.len() as u64;
        let column_value: i128 = bucket.iter().map(|d| i128::from(d.value_cents)).sum();
        let column_expected: i128 = bucket.iter().map(expected_cents).sum();

        total_deals += deal_count;
        total_value += column_value;
        expected_value += column_expected;
        if stage.is_won {
            won += deal_count;
        } else if stage.is_lost {
            lost += deal_count;
        } else {
            open += deal_count;
        }

        match options.order_by {
            CardOrder::Updated => bucket.sort_by(|a, b| {
                b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id))
            }),
            CardOrder::Created => bucket.sort_by(|a, b| {
                b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id))
            }),
        }
        if let Some(first) = options.first_per_stage {
            bucket.truncate(first as usize);
        }

        columns.push(StageColumn {
            stage: StageView::from(stage),
            deals: bucket
                .into_iter()
                .map(|deal| DealCard {
                    company_name: directory.company_name(deal.company_id),
                    person_name: directory.person_name(deal.person_id),
                    deal: DealView::from(deal),
                })
                .collect(),
            deal_count,
            total_value_cents: to_cents(column_value)?,
            expected_value_cents: to_cents(column_expected)?,
        });
    }

    let total_value = to_cents(total_value)?;
    Ok(PipelineBoard {
        pipeline: BoardPipeline {
            id: pipeline.id,
            name: pipeline.name.clone(),
            created_at: pipeline.created_at.with_timezone(&Utc),
            updated_at: pipeline.updated_at.with_timezone(&Utc),
        },
        stages: columns,
        total_deals,
        total_value_cents: total_value,
        average_deal_value_cents: average_value(total_value, total_deals),
        win_rate: win_rate(won, lost),
        expected_value_cents: to_cents(expected_value)?,
        open_deals: open,
    })
}

/// Loads a pipeline's stages and deals and aggregates them. A pipeline
/// without deals yields zeroed totals and empty columns.
#[instrument(
    name = "crm.pipeline_board",
    skip(conn, options),
    fields(first = options.first_per_stage, order_by = ?options.order_by)
)]
pub async fn load_board<C>(
    conn: &C,
    pipeline_id: Uuid,
    options: &BoardOptions,
) -> CrmResult<PipelineBoard>
where
    C: ConnectionTrait,
{
    options.validate()?;
    let pipeline = find_pipeline(conn, pipeline_id).await?;
    let stages = stages_for(conn, pipeline_id).await?;
    let deals = deal::Entity::find()
        .filter(deal::Column::PipelineId.eq(pipeline_id))
        .all(conn)
        .await?;
    let directory = directory::lookup(conn, &deals).await?;
    summarize(&pipeline, &stages, deals, &directory, options)
}
