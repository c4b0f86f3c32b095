//! Stage registry: the ordered columns of a pipeline.

use std::collections::HashSet;

use chrono::Utc;
use entity::{pipeline, stage};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{CrmError, CrmResult};
use crate::pipelines::find_pipeline;

pub const STAGE_ORDER_STEP: i32 = 10;
pub const MAX_STAGE_NAME: usize = 64;

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageDraft {
    pub name: String,
    #[serde(default)]
    pub is_won: bool,
    #[serde(default)]
    pub is_lost: bool,
    #[serde(default)]
    pub order: Option<i32>,
}

impl StageDraft {
    pub fn open(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn won(name: &str) -> Self {
        Self {
            is_won: true,
            ..Self::open(name)
        }
    }

    pub fn lost(name: &str) -> Self {
        Self {
            is_lost: true,
            ..Self::open(name)
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageView {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub order: i32,
    pub is_won: bool,
    pub is_lost: bool,
}

impl From<&stage::Model> for StageView {
    fn from(model: &stage::Model) -> Self {
        Self {
            id: model.id,
            pipeline_id: model.pipeline_id,
            name: model.name.clone(),
            order: model.sort_order,
            is_won: model.is_won,
            is_lost: model.is_lost,
        }
    }
}

/// Stages used when a pipeline is created without an explicit list.
pub fn default_stages() -> Vec<StageDraft> {
    vec![
        StageDraft::open("Lead"),
        StageDraft::open("Qualified"),
        StageDraft::open("Proposal"),
        StageDraft::open("Negotiation"),
        StageDraft::won("Won"),
        StageDraft::lost("Lost"),
    ]
}

pub fn validate_stage_flags(is_won: bool, is_lost: bool) -> CrmResult<()> {
    if is_won && is_lost {
        return Err(CrmError::invalid(
            "a stage cannot be flagged both won and lost",
        ));
    }
    Ok(())
}

pub fn normalize_stage_name(value: &str) -> CrmResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CrmError::invalid("stage name cannot be blank"));
    }
    if trimmed.chars().count() > MAX_STAGE_NAME {
        return Err(CrmError::invalid(format!(
            "stage name cannot exceed {MAX_STAGE_NAME} characters"
        )));
    }
    Ok(trimmed.to_string())
}

/// Normalizes names and assigns `order` to drafts that lack one
/// (`STAGE_ORDER_STEP * position`). Names and orders must be unique.
pub fn validate_stage_drafts(drafts: &[StageDraft]) -> CrmResult<Vec<StageDraft>> {
    if drafts.is_empty() {
        return Err(CrmError::invalid("a pipeline needs at least one stage"));
    }
    let mut names = HashSet::new();
    let mut orders = HashSet::new();
    let mut normalized = Vec::with_capacity(drafts.len());
    for (idx, draft) in drafts.iter().enumerate() {
        validate_stage_flags(draft.is_won, draft.is_lost)?;
        let name = normalize_stage_name(&draft.name)?;
        if !names.insert(name.to_lowercase()) {
            return Err(CrmError::invalid(format!("duplicate stage name {name}")));
        }
        let order = draft
            .order
            .unwrap_or((idx as i32 + 1) * STAGE_ORDER_STEP);
        if !orders.insert(order) {
            return Err(CrmError::invalid(format!("duplicate stage order {order}")));
        }
        normalized.push(StageDraft {
            name,
            is_won: draft.is_won,
            is_lost: draft.is_lost,
            order: Some(order),
        });
    }
    Ok(normalized)
}

pub(crate) async fn insert_stages<C>(
    conn: &C,
    pipeline_id: Uuid,
    drafts: &[StageDraft],
    now: DateTimeWithTimeZone,
) -> CrmResult<Vec<stage::Model>>
where
    C: ConnectionTrait,
{
    let models: Vec<stage::Model> = drafts
        .iter()
        .enumerate()
        .map(|(idx, draft)| stage::Model {
            id: Uuid::new_v4(),
            pipeline_id,
            name: draft.name.clone(),
            sort_order: draft
                .order
                .unwrap_or((idx as i32 + 1) * STAGE_ORDER_STEP),
            is_won: draft.is_won,
            is_lost: draft.is_lost,
            created_at: now,
        })
        .collect();
    let rows = models.iter().cloned().map(|model| stage::ActiveModel {
        id: Set(model.id),
        pipeline_id: Set(model.pipeline_id),
        name: Set(model.name),
        sort_order: Set(model.sort_order),
        is_won: Set(model.is_won),
        is_lost: Set(model.is_lost),
        created_at: Set(model.created_at),
    });
    stage::Entity::insert_many(rows)
        .exec_without_returning(conn)
        .await?;
    Ok(models)
}

/// Stages of a pipeline by ascending order, without checking the pipeline.
pub(crate) async fn stages_for<C>(conn: &C, pipeline_id: Uuid) -> CrmResult<Vec<stage::Model>>
where
    C: ConnectionTrait,
{
    let stages = stage::Entity::find()
        .filter(stage::Column::PipelineId.eq(pipeline_id))
        .order_by_asc(stage::Column::SortOrder)
        .all(conn)
        .await?;
    Ok(stages)
}

pub async fn find_stage<C>(conn: &C, stage_id: Uuid) -> CrmResult<stage::Model>
where
    C: ConnectionTrait,
{
    stage::Entity::find_by_id(stage_id)
        .one(conn)
        .await?
        .ok_or_else(|| CrmError::not_found("stage", stage_id))
}

pub async fn list_stages<C>(conn: &C, pipeline_id: Uuid) -> CrmResult<Vec<stage::Model>>
where
    C: ConnectionTrait,
{
    find_pipeline(conn, pipeline_id).await?;
    stages_for(conn, pipeline_id).await
}

/// Appends a stage after the current last one unless `draft.order` is given.
#[instrument(name = "crm.add_stage", skip(db, draft))]
pub async fn add_stage(
    db: &DatabaseConnection,
    pipeline_id: Uuid,
    draft: StageDraft,
) -> CrmResult<stage::Model> {
    validate_stage_flags(draft.is_won, draft.is_lost)?;
    let name = normalize_stage_name(&draft.name)?;

    let txn = db.begin().await?;
    find_pipeline(&txn, pipeline_id).await?;
    let existing = stages_for(&txn, pipeline_id).await?;
    if existing
        .iter()
        .any(|stage| stage.name.to_lowercase() == name.to_lowercase())
    {
        return Err(CrmError::invalid(format!("duplicate stage name {name}")));
    }
    let order = match draft.order {
        Some(order) if existing.iter().any(|stage| stage.sort_order == order) => {
            return Err(CrmError::invalid(format!("duplicate stage order {order}")));
        }
        Some(order) => order,
        None => existing
            .iter()
            .map(|stage| stage.sort_order)
            .max()
            .unwrap_or(0)
            .checked_add(STAGE_ORDER_STEP)
            .ok_or_else(|| {
                CrmError::invalid("no order left after the last stage; pass an explicit order")
            })?,
    };
    let now: DateTimeWithTimeZone = Utc::now().into();
    let mut inserted = insert_stages(
        &txn,
        pipeline_id,
        &[StageDraft {
            name,
            is_won: draft.is_won,
            is_lost: draft.is_lost,
            order: Some(order),
        }],
        now,
    )
    .await?;
    touch_pipeline(&txn, pipeline_id, now).await?;
    txn.commit().await?;

    let stage = inserted.remove(0);
    info!(stage_id = %stage.id, order = stage.sort_order, "stage added");
    Ok(stage)
}

pub(crate) async fn touch_pipeline<C>(
    conn: &C,
    pipeline_id: Uuid,
    now: DateTimeWithTimeZone,
) -> CrmResult<()>
where
    C: ConnectionTrait,
{
    pipeline::Entity::update_many()
        .col_expr(
            pipeline::Column::UpdatedAt,
            sea_orm::sea_query::Expr::value(now),
        )
        .filter(pipeline::Column::Id.eq(pipeline_id))
        .exec(conn)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_one_won_and_one_lost_stage() {
        let stages = validate_stage_drafts(&default_stages()).unwrap();
        assert_eq!(stages.len(), 6);
        assert_eq!(stages.iter().filter(|s| s.is_won).count(), 1);
        assert_eq!(stages.iter().filter(|s| s.is_lost).count(), 1);
        assert_eq!(stages[0].order, Some(STAGE_ORDER_STEP));
        assert_eq!(stages[5].order, Some(6 * STAGE_ORDER_STEP));
    }

    #[test]
    fn won_and_lost_are_mutually_exclusive() {
        let draft = StageDraft {
            name: "Closed".into(),
            is_won: true,
            is_lost: true,
            order: None,
        };
        let err = validate_stage_drafts(&[draft]).unwrap_err();
        assert!(matches!(err, CrmError::InvalidArgument(_)));
    }

    #[test]
    fn names_are_trimmed_and_unique_ignoring_case() {
        let err = validate_stage_drafts(&[StageDraft::open(" Lead "), StageDraft::open("lead")])
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate stage name lead");

        let ok = validate_stage_drafts(&[StageDraft::open("  Lead  ")]).unwrap();
        assert_eq!(ok[0].name, "Lead");
    }

    #[test]
    fn blank_and_empty_inputs_are_rejected() {
        assert!(validate_stage_drafts(&[]).is_err());
        assert!(validate_stage_drafts(&[StageDraft::open("   ")]).is_err());
        let long = "x".repeat(MAX_STAGE_NAME + 1);
        assert!(normalize_stage_name(&long).is_err());
    }

    #[test]
    fn explicit_orders_must_not_collide() {
        let mut first = StageDraft::open("Lead");
        first.order = Some(20);
        // the second draft falls back to 2 * STAGE_ORDER_STEP == 20
        let err = validate_stage_drafts(&[first, StageDraft::open("Demo")]).unwrap_err();
        assert_eq!(err.to_string(), "duplicate stage order 20");
    }
}
