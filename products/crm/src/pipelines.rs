use std::collections::HashMap;

use chrono::{DateTime, Utc};
use entity::{deal, pipeline, stage};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, FromQueryResult, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{CrmError, CrmResult};
use crate::stages::{
    StageDraft, StageView, default_stages, insert_stages, stages_for, validate_stage_drafts,
};

pub const MAX_PIPELINE_NAME: usize = 120;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPipeline {
    pub name: String,
    #[serde(default)]
    pub stages: Option<Vec<StageDraft>>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineView {
    pub id: Uuid,
    pub name: String,
    pub stages: Vec<StageView>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineView {
    pub fn new(model: &pipeline::Model, stages: &[stage::Model]) -> Self {
        Self {
            id: model.id,
            name: model.name.clone(),
            stages: stages.iter().map(StageView::from).collect(),
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSummary {
    pub id: Uuid,
    pub name: String,
    pub stage_count: u64,
    pub deal_count: u64,
    pub created_at: DateTime<Utc>,
}

pub fn normalize_pipeline_name(value: &str) -> CrmResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CrmError::invalid("pipeline name cannot be blank"));
    }
    if trimmed.chars().count() > MAX_PIPELINE_NAME {
        return Err(CrmError::invalid(format!(
            "pipeline name cannot exceed {MAX_PIPELINE_NAME} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub(crate) async fn find_pipeline<C>(conn: &C, pipeline_id: Uuid) -> CrmResult<pipeline::Model>
where
    C: ConnectionTrait,
{
    pipeline::Entity::find_by_id(pipeline_id)
        .one(conn)
        .await?
        .ok_or_else(|| CrmError::not_found("pipeline", pipeline_id))
}

#[instrument(name = "crm.create_pipeline", skip_all)]
pub async fn create_pipeline(db: &DatabaseConnection, input: NewPipeline) -> CrmResult<PipelineView> {
    let name = normalize_pipeline_name(&input.name)?;
    let drafts = validate_stage_drafts(&input.stages.unwrap_or_else(default_stages))?;

    let now: DateTimeWithTimeZone = Utc::now().into();
    let txn = db.begin().await?;
    let model = pipeline::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(name),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;
    let mut stages = insert_stages(&txn, model.id, &drafts, now).await?;
    txn.commit().await?;

    stages.sort_by_key(|stage| stage.sort_order);
    info!(pipeline_id = %model.id, stages = stages.len(), "pipeline created");
    Ok(PipelineView::new(&model, &stages))
}

pub async fn get_pipeline<C>(conn: &C, pipeline_id: Uuid) -> CrmResult<PipelineView>
where
    C: ConnectionTrait,
{
    let model = find_pipeline(conn, pipeline_id).await?;
    let stages = stages_for(conn, pipeline_id).await?;
    Ok(PipelineView::new(&model, &stages))
}

#[instrument(name = "crm.rename_pipeline", skip(db, name))]
pub async fn rename_pipeline(
    db: &DatabaseConnection,
    pipeline_id: Uuid,
    name: &str,
) -> CrmResult<PipelineView> {
    let name = normalize_pipeline_name(name)?;
    let existing = find_pipeline(db, pipeline_id).await?;
    let mut active: pipeline::ActiveModel = existing.into();
    active.name = Set(name);
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(db).await?;
    let stages = stages_for(db, pipeline_id).await?;
    Ok(PipelineView::new(&updated, &stages))
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    pipeline_id: Uuid,
    total: i64,
}

async fn counts_by_pipeline<C, E>(conn: &C, column: E::Column) -> CrmResult<HashMap<Uuid, u64>>
where
    C: ConnectionTrait,
    E: EntityTrait,
{
    let rows = E::find()
        .select_only()
        .column_as(column, "pipeline_id")
        .column_as(Expr::col(column).count(), "total")
        .group_by(column)
        .into_model::<CountRow>()
        .all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.pipeline_id, row.total.max(0) as u64))
        .collect())
}

pub async fn list_pipelines<C>(conn: &C) -> CrmResult<Vec<PipelineSummary>>
where
    C: ConnectionTrait,
{
    let pipelines = pipeline::Entity::find()
        .order_by_asc(pipeline::Column::Name)
        .order_by_asc(pipeline::Column::CreatedAt)
        .all(conn)
        .await?;
    let stage_counts = counts_by_pipeline::<_, stage::Entity>(conn, stage::Column::PipelineId).await?;
    let deal_counts = counts_by_pipeline::<_, deal::Entity>(conn, deal::Column::PipelineId).await?;
    Ok(pipelines
        .into_iter()
        .map(|model| PipelineSummary {
            stage_count: stage_counts.get(&model.id).copied().unwrap_or(0),
            deal_count: deal_counts.get(&model.id).copied().unwrap_or(0),
            id: model.id,
            name: model.name,
            created_at: model.created_at.with_timezone(&Utc),
        })
        .collect())
}

/// Deletes a pipeline and its stages, refusing while any deal sits in one of
/// those stages. The existence check, the deal count and both deletes share
/// one transaction; any failure rolls all of it back.
#[instrument(name = "crm.delete_pipeline", skip(db))]
pub async fn delete_pipeline(db: &DatabaseConnection, pipeline_id: Uuid) -> CrmResult<()> {
    let txn = db.begin().await?;
    pipeline::Entity::find_by_id(pipeline_id)
        .lock_exclusive()
        .one(&txn)
        .await?
        .ok_or_else(|| CrmError::not_found("pipeline", pipeline_id))?;

    let deal_count = deal::Entity::find()
        .inner_join(stage::Entity)
        .filter(stage::Column::PipelineId.eq(pipeline_id))
        .count(&txn)
        .await?;
    if deal_count > 0 {
        txn.rollback().await?;
        warn!(deal_count, "pipeline deletion refused");
        return Err(CrmError::precondition(format!(
            "pipeline still has {deal_count} deal(s); move or delete them first"
        )));
    }

    let removed = stage::Entity::delete_many()
        .filter(stage::Column::PipelineId.eq(pipeline_id))
        .exec(&txn)
        .await?;
    pipeline::Entity::delete_by_id(pipeline_id)
        .exec(&txn)
        .await?;
    txn.commit().await?;

    info!(stages_removed = removed.rows_affected, "pipeline deleted");
    Ok(())
}
