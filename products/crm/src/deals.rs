//! Deal store.

use chrono::{DateTime, NaiveDate, Utc};
use entity::{company, deal, deal_stage_history, person, stage};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::{Expr, Func, LikeExpr};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, Order, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{CrmError, CrmResult};
use crate::pipelines::find_pipeline;
use crate::stages::stages_for;

pub const MAX_DEAL_TITLE: usize = 200;
pub const MAX_DEAL_NOTES: usize = 10_000;
/// Largest accepted deal value in cents. Mirrored by the `deal.value_cents`
/// CHECK constraint.
pub const MAX_DEAL_VALUE_CENTS: i64 = 1_000_000_000_000_000;
pub const DEFAULT_DEAL_PAGE: u64 = 50;
pub const MAX_DEAL_PAGE: u64 = 200;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDeal {
    pub title: String,
    #[serde(default)]
    pub value_cents: i64,
    pub pipeline_id: Uuid,
    /// Defaults to the pipeline's first stage.
    #[serde(default)]
    pub stage_id: Option<Uuid>,
    #[serde(default)]
    pub person_id: Option<Uuid>,
    #[serde(default)]
    pub company_id: Option<Uuid>,
    #[serde(default)]
    pub probability: Option<i16>,
    #[serde(default)]
    pub expected_close_date: Option<NaiveDate>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl NewDeal {
    pub fn new(title: impl Into<String>, value_cents: i64, pipeline_id: Uuid) -> Self {
        Self {
            title: title.into(),
            value_cents,
            pipeline_id,
            stage_id: None,
            person_id: None,
            company_id: None,
            probability: None,
            expected_close_date: None,
            notes: None,
        }
    }
}

/// Partial update. For nullable fields, an absent key leaves the value alone
/// and an explicit `null` clears it. The stage is only changed through
/// [`crate::transition::move_deal_stage`].
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub value_cents: Option<i64>,
    #[serde(default)]
    pub probability: Option<i16>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub person_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub company_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub expected_close_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "explicit_null")]
    pub notes: Option<Option<String>>,
}

fn explicit_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DealView {
    pub id: Uuid,
    pub title: String,
    pub value_cents: i64,
    pub stage_id: Uuid,
    pub pipeline_id: Uuid,
    pub person_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub probability: i16,
    pub expected_close_date: Option<NaiveDate>,
    pub actual_close_date: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<deal::Model> for DealView {
    fn from(model: deal::Model) -> Self {
        Self {
            id: model.id,
            title: model.title,
            value_cents: model.value_cents,
            stage_id: model.stage_id,
            pipeline_id: model.pipeline_id,
            person_id: model.person_id,
            company_id: model.company_id,
            probability: model.probability,
            expected_close_date: model.expected_close_date,
            actual_close_date: model.actual_close_date.map(|at| at.with_timezone(&Utc)),
            notes: model.notes,
            created_at: model.created_at.with_timezone(&Utc),
            updated_at: model.updated_at.with_timezone(&Utc),
        }
    }
}

/// Sortable columns. Only these map to SQL identifiers.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum DealSort {
    Title,
    Value,
    Probability,
    ExpectedCloseDate,
    CreatedAt,
    #[default]
    UpdatedAt,
}

impl DealSort {
    pub fn column(self) -> deal::Column {
        match self {
            DealSort::Title => deal::Column::Title,
            DealSort::Value => deal::Column::ValueCents,
            DealSort::Probability => deal::Column::Probability,
            DealSort::ExpectedCloseDate => deal::Column::ExpectedCloseDate,
            DealSort::CreatedAt => deal::Column::CreatedAt,
            DealSort::UpdatedAt => deal::Column::UpdatedAt,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

impl From<SortDirection> for Order {
    fn from(value: SortDirection) -> Self {
        match value {
            SortDirection::Asc => Order::Asc,
            SortDirection::Desc => Order::Desc,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealQuery {
    pub pipeline_id: Option<Uuid>,
    pub stage_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    /// Case-insensitive title substring.
    pub q: Option<String>,
    #[serde(default)]
    pub sort: DealSort,
    #[serde(default)]
    pub direction: SortDirection,
    pub limit: Option<u64>,
}

impl DealQuery {
    fn page_size(&self) -> CrmResult<u64> {
        match self.limit {
            None => Ok(DEFAULT_DEAL_PAGE),
            Some(0) => Err(CrmError::invalid("limit must be positive")),
            Some(limit) if limit > MAX_DEAL_PAGE => Err(CrmError::invalid(format!(
                "limit cannot exceed {MAX_DEAL_PAGE}"
            ))),
            Some(limit) => Ok(limit),
        }
    }

    fn condition(&self) -> Condition {
        let mut cond = Condition::all();
        if let Some(id) = self.pipeline_id {
            cond = cond.add(deal::Column::PipelineId.eq(id));
        }
        if let Some(id) = self.stage_id {
            cond = cond.add(deal::Column::StageId.eq(id));
        }
        if let Some(id) = self.company_id {
            cond = cond.add(deal::Column::CompanyId.eq(id));
        }
        if let Some(id) = self.person_id {
            cond = cond.add(deal::Column::PersonId.eq(id));
        }
        if let Some(term) = self.q.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
            cond = cond.add(
                Expr::expr(Func::lower(Expr::col((deal::Entity, deal::Column::Title))))
                    .like(LikeExpr::new(pattern).escape(LIKE_ESCAPE)),
            );
        }
        cond
    }
}

const LIKE_ESCAPE: char = '!';

/// Makes `%`, `_` and the escape character match literally.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | LIKE_ESCAPE) {
            escaped.push(LIKE_ESCAPE);
        }
        escaped.push(ch);
    }
    escaped
}

pub fn normalize_title(value: &str) -> CrmResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CrmError::invalid("deal title cannot be blank"));
    }
    if trimmed.chars().count() > MAX_DEAL_TITLE {
        return Err(CrmError::invalid(format!(
            "deal title cannot exceed {MAX_DEAL_TITLE} characters"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn validate_value(value_cents: i64) -> CrmResult<i64> {
    if value_cents < 0 {
        return Err(CrmError::invalid("deal value cannot be negative"));
    }
    if value_cents > MAX_DEAL_VALUE_CENTS {
        return Err(CrmError::invalid(format!(
            "deal value cannot exceed {MAX_DEAL_VALUE_CENTS} cents"
        )));
    }
    Ok(value_cents)
}

pub fn validate_probability(probability: i16) -> CrmResult<i16> {
    if !(0..=100).contains(&probability) {
        return Err(CrmError::invalid("probability must be between 0 and 100"));
    }
    Ok(probability)
}

fn normalize_notes(notes: Option<String>) -> CrmResult<Option<String>> {
    let Some(notes) = notes else {
        return Ok(None);
    };
    if notes.chars().count() > MAX_DEAL_NOTES {
        return Err(CrmError::invalid(format!(
            "notes cannot exceed {MAX_DEAL_NOTES} characters"
        )));
    }
    let trimmed = notes.trim();
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

async fn ensure_company<C: ConnectionTrait>(conn: &C, id: Option<Uuid>) -> CrmResult<()> {
    if let Some(id) = id {
        if company::Entity::find_by_id(id).one(conn).await?.is_none() {
            return Err(CrmError::invalid(format!("company {id} does not exist")));
        }
    }
    Ok(())
}

async fn ensure_person<C: ConnectionTrait>(conn: &C, id: Option<Uuid>) -> CrmResult<()> {
    if let Some(id) = id {
        if person::Entity::find_by_id(id).one(conn).await?.is_none() {
            return Err(CrmError::invalid(format!("person {id} does not exist")));
        }
    }
    Ok(())
}

pub async fn find_deal<C>(conn: &C, deal_id: Uuid) -> CrmResult<deal::Model>
where
    C: ConnectionTrait,
{
    deal::Entity::find_by_id(deal_id)
        .one(conn)
        .await?
        .ok_or_else(|| CrmError::not_found("deal", deal_id))
}

/// Creates a deal in the requested stage, or the pipeline's first stage.
/// A deal created straight into a won/lost stage is closed immediately.
#[instrument(name = "crm.create_deal", skip_all, fields(pipeline_id = %input.pipeline_id))]
pub async fn create_deal(db: &DatabaseConnection, input: NewDeal) -> CrmResult<deal::Model> {
    let title = normalize_title(&input.title)?;
    let value_cents = validate_value(input.value_cents)?;
    let probability = validate_probability(input.probability.unwrap_or(0))?;
    let notes = normalize_notes(input.notes)?;

    let txn = db.begin().await?;
    find_pipeline(&txn, input.pipeline_id).await?;
    let target: stage::Model = match input.stage_id {
        Some(stage_id) => stage::Entity::find_by_id(stage_id)
            .one(&txn)
            .await?
            .filter(|stage| stage.pipeline_id == input.pipeline_id)
            .ok_or_else(|| {
                CrmError::invalid(format!(
                    "stage {stage_id} does not belong to pipeline {}",
                    input.pipeline_id
                ))
            })?,
        None => stages_for(&txn, input.pipeline_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CrmError::precondition("pipeline has no stages"))?,
    };
    ensure_company(&txn, input.company_id).await?;
    ensure_person(&txn, input.person_id).await?;

    let now: DateTimeWithTimeZone = Utc::now().into();
    let model = deal::ActiveModel {
        id: Set(Uuid::new_v4()),
        title: Set(title),
        value_cents: Set(value_cents),
        stage_id: Set(target.id),
        pipeline_id: Set(input.pipeline_id),
        person_id: Set(input.person_id),
        company_id: Set(input.company_id),
        probability: Set(probability),
        expected_close_date: Set(input.expected_close_date),
        actual_close_date: Set(target.is_terminal().then_some(now)),
        notes: Set(notes),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;

    deal_stage_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        deal_id: Set(model.id),
        from_stage_id: Set(None),
        from_stage_name: Set(None),
        to_stage_id: Set(target.id),
        to_stage_name: Set(target.name.clone()),
        changed_at: Set(now),
        note: Set(None),
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    info!(deal_id = %model.id, stage_id = %model.stage_id, "deal created");
    Ok(model)
}

pub async fn get_deal<C>(conn: &C, deal_id: Uuid) -> CrmResult<deal::Model>
where
    C: ConnectionTrait,
{
    find_deal(conn, deal_id).await
}

pub async fn list_deals<C>(conn: &C, query: &DealQuery) -> CrmResult<Vec<deal::Model>>
where
    C: ConnectionTrait,
{
    let limit = query.page_size()?;
    let deals = deal::Entity::find()
        .filter(query.condition())
        .order_by(query.sort.column(), query.direction.into())
        .order_by_asc(deal::Column::Id)
        .limit(limit)
        .all(conn)
        .await?;
    Ok(deals)
}

#[instrument(name = "crm.update_deal", skip(db, patch))]
pub async fn update_deal(
    db: &DatabaseConnection,
    deal_id: Uuid,
    patch: DealPatch,
) -> CrmResult<deal::Model> {
    let txn = db.begin().await?;
    let existing = find_deal(&txn, deal_id).await?;
    let mut active: deal::ActiveModel = existing.into();
    if let Some(title) = patch.title {
        active.title = Set(normalize_title(&title)?);
    }
    if let Some(value) = patch.value_cents {
        active.value_cents = Set(validate_value(value)?);
    }
    if let Some(probability) = patch.probability {
        active.probability = Set(validate_probability(probability)?);
    }
    if let Some(company_id) = patch.company_id {
        ensure_company(&txn, company_id).await?;
        active.company_id = Set(company_id);
    }
    if let Some(person_id) = patch.person_id {
        ensure_person(&txn, person_id).await?;
        active.person_id = Set(person_id);
    }
    if let Some(expected) = patch.expected_close_date {
        active.expected_close_date = Set(expected);
    }
    if let Some(notes) = patch.notes {
        active.notes = Set(normalize_notes(notes)?);
    }
    active.updated_at = Set(Utc::now().into());
    let updated = active.update(&txn).await?;
    txn.commit().await?;
    info!(deal_id = %updated.id, "deal updated");
    Ok(updated)
}

#[instrument(name = "crm.delete_deal", skip(db))]
pub async fn delete_deal(db: &DatabaseConnection, deal_id: Uuid) -> CrmResult<()> {
    let result = deal::Entity::delete_by_id(deal_id).exec(db).await?;
    if result.rows_affected == 0 {
        return Err(CrmError::not_found("deal", deal_id));
    }
    info!("deal deleted");
    Ok(())
}
