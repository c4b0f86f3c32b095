//! Stage transitions (kanban drag and drop).
//!
//! One deal per call. Concurrent moves of the same deal are last-write-wins:
//! there is no version column, the later commit simply overwrites the stage.

use chrono::{DateTime, Utc};
use entity::{deal, deal_stage_history, stage};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::deals::find_deal;
use crate::error::{CrmError, CrmResult};

const MAX_NOTE: usize = 2_000;

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StageHistoryView {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub from_stage_id: Option<Uuid>,
    pub from_stage_name: Option<String>,
    pub to_stage_id: Uuid,
    pub to_stage_name: String,
    pub changed_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl From<deal_stage_history::Model> for StageHistoryView {
    fn from(model: deal_stage_history::Model) -> Self {
        Self {
            id: model.id,
            deal_id: model.deal_id,
            from_stage_id: model.from_stage_id,
            from_stage_name: model.from_stage_name,
            to_stage_id: model.to_stage_id,
            to_stage_name: model.to_stage_name,
            changed_at: model.changed_at.with_timezone(&Utc),
            note: model.note,
        }
    }
}

/// Close date after moving into `target`.
///
/// Entering a won/lost stage stamps `now` unless the deal is already closed,
/// so hopping between terminal stages keeps the first close time. Entering an
/// open stage reopens the deal and clears the date.
pub fn close_date_after_move(
    current: Option<DateTimeWithTimeZone>,
    target: &stage::Model,
    now: DateTimeWithTimeZone,
) -> Option<DateTimeWithTimeZone> {
    if target.is_terminal() {
        current.or(Some(now))
    } else {
        None
    }
}

fn normalize_note(note: Option<String>) -> CrmResult<Option<String>> {
    let Some(note) = note else {
        return Ok(None);
    };
    let trimmed = note.trim();
    if trimmed.chars().count() > MAX_NOTE {
        return Err(CrmError::invalid(format!(
            "note cannot exceed {MAX_NOTE} characters"
        )));
    }
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Moves a deal to `stage_id`, which must belong to the deal's pipeline.
/// The update and its history row commit together.
#[instrument(name = "crm.move_deal_stage", skip(db, note))]
pub async fn move_deal_stage(
    db: &DatabaseConnection,
    deal_id: Uuid,
    stage_id: Uuid,
    note: Option<String>,
) -> CrmResult<deal::Model> {
    let note = normalize_note(note)?;
    let txn = db.begin().await?;
    let existing = find_deal(&txn, deal_id).await?;
    let target = stage::Entity::find_by_id(stage_id)
        .one(&txn)
        .await?
        .ok_or_else(|| CrmError::invalid(format!("stage {stage_id} does not exist")))?;
    if target.pipeline_id != existing.pipeline_id {
        return Err(CrmError::invalid(format!(
            "stage {stage_id} belongs to another pipeline; deals can only move within pipeline {}",
            existing.pipeline_id
        )));
    }

    let now: DateTimeWithTimeZone = Utc::now().into();
    if existing.stage_id == target.id {
        let mut active: deal::ActiveModel = existing.into();
        active.updated_at = Set(now);
        let updated = active.update(&txn).await?;
        txn.commit().await?;
        return Ok(updated);
    }

    let from = stage::Entity::find_by_id(existing.stage_id).one(&txn).await?;
    let close_date = close_date_after_move(existing.actual_close_date, &target, now);
    let mut active: deal::ActiveModel = existing.into();
    active.stage_id = Set(target.id);
    active.actual_close_date = Set(close_date);
    active.updated_at = Set(now);
    let updated = active.update(&txn).await?;

    deal_stage_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        deal_id: Set(deal_id),
        from_stage_id: Set(from.as_ref().map(|s| s.id)),
        from_stage_name: Set(from.map(|s| s.name)),
        to_stage_id: Set(target.id),
        to_stage_name: Set(target.name.clone()),
        changed_at: Set(now),
        note: Set(note),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    info!(
        to_stage = %target.name,
        closed = updated.actual_close_date.is_some(),
        "deal moved"
    );
    Ok(updated)
}

/// Stage history of a deal, newest first.
pub async fn deal_stage_history<C>(
    conn: &C,
    deal_id: Uuid,
) -> CrmResult<Vec<deal_stage_history::Model>>
where
    C: ConnectionTrait,
{
    find_deal(conn, deal_id).await?;
    let rows = deal_stage_history::Entity::find()
        .filter(deal_stage_history::Column::DealId.eq(deal_id))
        .order_by_desc(deal_stage_history::Column::ChangedAt)
        .order_by_desc(deal_stage_history::Column::Id)
        .all(conn)
        .await?;
    Ok(rows)
}
