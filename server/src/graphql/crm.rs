use async_graphql::{Context, Enum, InputObject, Object, SimpleObject};
use chrono::{DateTime, NaiveDate, Utc};
use platform_db::DbPool;
use products_crm::{
    BoardOptions, CardOrder, DealCard, DealQuery, DealSort, DealView, NewDeal, NewPipeline,
    PipelineBoard, PipelineSummary, PipelineView, SortDirection, StageColumn, StageDraft,
    StageHistoryView, StageView, deals, pipelines, transition,
};
use tracing::instrument;
use uuid::Uuid;

use super::{crm_error, database};

#[derive(Default)]
pub struct CrmQuery;

#[derive(Default)]
pub struct CrmMutation;

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum BoardOrder {
    #[graphql(name = "UPDATED")]
    Updated,
    #[graphql(name = "CREATED")]
    Created,
}

impl From<BoardOrder> for CardOrder {
    fn from(value: BoardOrder) -> Self {
        match value {
            BoardOrder::Updated => CardOrder::Updated,
            BoardOrder::Created => CardOrder::Created,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum DealSortField {
    #[graphql(name = "TITLE")]
    Title,
    #[graphql(name = "VALUE")]
    Value,
    #[graphql(name = "PROBABILITY")]
    Probability,
    #[graphql(name = "EXPECTED_CLOSE_DATE")]
    ExpectedCloseDate,
    #[graphql(name = "CREATED_AT")]
    CreatedAt,
    #[graphql(name = "UPDATED_AT")]
    UpdatedAt,
}

impl From<DealSortField> for DealSort {
    fn from(value: DealSortField) -> Self {
        match value {
            DealSortField::Title => DealSort::Title,
            DealSortField::Value => DealSort::Value,
            DealSortField::Probability => DealSort::Probability,
            DealSortField::ExpectedCloseDate => DealSort::ExpectedCloseDate,
            DealSortField::CreatedAt => DealSort::CreatedAt,
            DealSortField::UpdatedAt => DealSort::UpdatedAt,
        }
    }
}

#[derive(Enum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum SortOrder {
    #[graphql(name = "ASC")]
    Asc,
    #[graphql(name = "DESC")]
    Desc,
}

impl From<SortOrder> for SortDirection {
    fn from(value: SortOrder) -> Self {
        match value {
            SortOrder::Asc => SortDirection::Asc,
            SortOrder::Desc => SortDirection::Desc,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct StageNode {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub order: i32,
    pub is_won: bool,
    pub is_lost: bool,
}

impl From<StageView> for StageNode {
    fn from(view: StageView) -> Self {
        Self {
            id: view.id,
            pipeline_id: view.pipeline_id,
            name: view.name,
            order: view.order,
            is_won: view.is_won,
            is_lost: view.is_lost,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct PipelineNode {
    pub id: Uuid,
    pub name: String,
    pub stages: Vec<StageNode>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PipelineView> for PipelineNode {
    fn from(view: PipelineView) -> Self {
        Self {
            id: view.id,
            name: view.name,
            stages: view.stages.into_iter().map(StageNode::from).collect(),
            created_at: view.created_at,
            updated_at: view.updated_at,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct PipelineSummaryNode {
    pub id: Uuid,
    pub name: String,
    pub stage_count: u64,
    pub deal_count: u64,
    pub created_at: DateTime<Utc>,
}

impl From<PipelineSummary> for PipelineSummaryNode {
    fn from(summary: PipelineSummary) -> Self {
        Self {
            id: summary.id,
            name: summary.name,
            stage_count: summary.stage_count,
            deal_count: summary.deal_count,
            created_at: summary.created_at,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct DealNode {
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

impl From<DealView> for DealNode {
    fn from(view: DealView) -> Self {
        Self {
            id: view.id,
            title: view.title,
            value_cents: view.value_cents,
            stage_id: view.stage_id,
            pipeline_id: view.pipeline_id,
            person_id: view.person_id,
            company_id: view.company_id,
            probability: view.probability,
            expected_close_date: view.expected_close_date,
            actual_close_date: view.actual_close_date,
            notes: view.notes,
            created_at: view.created_at,
            updated_at: view.updated_at,
        }
    }
}

impl From<entity::deal::Model> for DealNode {
    fn from(model: entity::deal::Model) -> Self {
        DealView::from(model).into()
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct DealCardNode {
    pub deal: DealNode,
    pub company_name: Option<String>,
    pub person_name: Option<String>,
}

impl From<DealCard> for DealCardNode {
    fn from(card: DealCard) -> Self {
        Self {
            deal: card.deal.into(),
            company_name: card.company_name,
            person_name: card.person_name,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct StageColumnNode {
    pub stage: StageNode,
    pub deals: Vec<DealCardNode>,
    pub deal_count: u64,
    pub total_value_cents: i64,
    pub expected_value_cents: i64,
}

impl From<StageColumn> for StageColumnNode {
    fn from(column: StageColumn) -> Self {
        Self {
            stage: column.stage.into(),
            deals: column.deals.into_iter().map(DealCardNode::from).collect(),
            deal_count: column.deal_count,
            total_value_cents: column.total_value_cents,
            expected_value_cents: column.expected_value_cents,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct PipelineBoardNode {
    pub id: Uuid,
    pub name: String,
    pub stages: Vec<StageColumnNode>,
    pub total_deals: u64,
    pub total_value_cents: i64,
    pub average_deal_value_cents: f64,
    pub win_rate: f64,
    pub expected_value_cents: i64,
    pub open_deals: u64,
}

impl From<PipelineBoard> for PipelineBoardNode {
    fn from(board: PipelineBoard) -> Self {
        Self {
            id: board.pipeline.id,
            name: board.pipeline.name,
            stages: board.stages.into_iter().map(StageColumnNode::from).collect(),
            total_deals: board.total_deals,
            total_value_cents: board.total_value_cents,
            average_deal_value_cents: board.average_deal_value_cents,
            win_rate: board.win_rate,
            expected_value_cents: board.expected_value_cents,
            open_deals: board.open_deals,
        }
    }
}

#[derive(Clone, Debug, SimpleObject)]
pub struct StageHistoryNode {
    pub id: Uuid,
    pub deal_id: Uuid,
    pub from_stage_id: Option<Uuid>,
    pub from_stage_name: Option<String>,
    pub to_stage_id: Uuid,
    pub to_stage_name: String,
    pub changed_at: DateTime<Utc>,
    pub note: Option<String>,
}

impl From<StageHistoryView> for StageHistoryNode {
    fn from(view: StageHistoryView) -> Self {
        Self {
            id: view.id,
            deal_id: view.deal_id,
            from_stage_id: view.from_stage_id,
            from_stage_name: view.from_stage_name,
            to_stage_id: view.to_stage_id,
            to_stage_name: view.to_stage_name,
            changed_at: view.changed_at,
            note: view.note,
        }
    }
}

#[derive(Clone, Debug, InputObject)]
pub struct StageInput {
    pub name: String,
    #[graphql(default)]
    pub is_won: bool,
    #[graphql(default)]
    pub is_lost: bool,
}

#[derive(Clone, Debug, InputObject)]
pub struct NewPipelineInput {
    pub name: String,
    pub stages: Option<Vec<StageInput>>,
}

impl From<NewPipelineInput> for NewPipeline {
    fn from(input: NewPipelineInput) -> Self {
        Self {
            name: input.name,
            stages: input.stages.map(|stages| {
                stages
                    .into_iter()
                    .map(|stage| StageDraft {
                        name: stage.name,
                        is_won: stage.is_won,
                        is_lost: stage.is_lost,
                        order: None,
                    })
                    .collect()
            }),
        }
    }
}

#[derive(Clone, Debug, InputObject)]
pub struct NewDealInput {
    pub title: String,
    pub value_cents: i64,
    pub pipeline_id: Uuid,
    pub stage_id: Option<Uuid>,
    pub person_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
    pub probability: Option<i16>,
    pub expected_close_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl From<NewDealInput> for NewDeal {
    fn from(input: NewDealInput) -> Self {
        Self {
            title: input.title,
            value_cents: input.value_cents,
            pipeline_id: input.pipeline_id,
            stage_id: input.stage_id,
            person_id: input.person_id,
            company_id: input.company_id,
            probability: input.probability,
            expected_close_date: input.expected_close_date,
            notes: input.notes,
        }
    }
}

#[Object]
impl CrmQuery {
    async fn pipelines(&self, ctx: &Context<'_>) -> async_graphql::Result<Vec<PipelineSummaryNode>> {
        let db = database(ctx)?;
        let summaries = pipelines::list_pipelines(db).await.map_err(crm_error)?;
        Ok(summaries.into_iter().map(Into::into).collect())
    }

    async fn pipeline(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<PipelineNode> {
        let db = database(ctx)?;
        let view = pipelines::get_pipeline(db, id).await.map_err(crm_error)?;
        Ok(view.into())
    }

    #[graphql(name = "pipelineBoard")]
    #[instrument(name = "graphql.crm.pipeline_board", skip_all)]
    async fn pipeline_board(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        first_per_stage: Option<u32>,
        order_by: Option<BoardOrder>,
    ) -> async_graphql::Result<PipelineBoardNode> {
        let db = database(ctx)?;
        let options = BoardOptions {
            first_per_stage,
            order_by: order_by.map(Into::into).unwrap_or_default(),
        };
        let board = products_crm::load_board(db, id, &options)
            .await
            .map_err(crm_error)?;
        Ok(board.into())
    }

    async fn deal(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<DealNode> {
        let db = database(ctx)?;
        let model = deals::get_deal(db, id).await.map_err(crm_error)?;
        Ok(model.into())
    }

    #[allow(clippy::too_many_arguments)]
    async fn deals(
        &self,
        ctx: &Context<'_>,
        pipeline_id: Option<Uuid>,
        stage_id: Option<Uuid>,
        company_id: Option<Uuid>,
        person_id: Option<Uuid>,
        q: Option<String>,
        sort: Option<DealSortField>,
        direction: Option<SortOrder>,
        first: Option<u64>,
    ) -> async_graphql::Result<Vec<DealNode>> {
        let db = database(ctx)?;
        let query = DealQuery {
            pipeline_id,
            stage_id,
            company_id,
            person_id,
            q,
            sort: sort.map(Into::into).unwrap_or_default(),
            direction: direction.map(Into::into).unwrap_or_default(),
            limit: first,
        };
        let models = deals::list_deals(db, &query).await.map_err(crm_error)?;
        Ok(models.into_iter().map(Into::into).collect())
    }

    #[graphql(name = "dealStageHistory")]
    async fn deal_stage_history(
        &self,
        ctx: &Context<'_>,
        deal_id: Uuid,
    ) -> async_graphql::Result<Vec<StageHistoryNode>> {
        let db = database(ctx)?;
        let rows = transition::deal_stage_history(db, deal_id)
            .await
            .map_err(crm_error)?;
        Ok(rows
            .into_iter()
            .map(|row| StageHistoryView::from(row).into())
            .collect())
    }
}

#[Object]
impl CrmMutation {
    #[graphql(name = "createPipeline")]
    async fn create_pipeline(
        &self,
        ctx: &Context<'_>,
        input: NewPipelineInput,
    ) -> async_graphql::Result<PipelineNode> {
        let db = database(ctx)?;
        let view = pipelines::create_pipeline(db, input.into())
            .await
            .map_err(crm_error)?;
        Ok(view.into())
    }

    /// Refused with `FAILED_PRECONDITION` while the pipeline still holds deals.
    #[graphql(name = "deletePipeline")]
    async fn delete_pipeline(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<bool> {
        let db: &DbPool = database(ctx)?;
        pipelines::delete_pipeline(db, id).await.map_err(crm_error)?;
        Ok(true)
    }

    #[graphql(name = "createDeal")]
    async fn create_deal(
        &self,
        ctx: &Context<'_>,
        input: NewDealInput,
    ) -> async_graphql::Result<DealNode> {
        let db = database(ctx)?;
        let model = deals::create_deal(db, input.into())
            .await
            .map_err(crm_error)?;
        Ok(model.into())
    }

    #[graphql(name = "moveDealStage")]
    async fn move_deal_stage(
        &self,
        ctx: &Context<'_>,
        id: Uuid,
        stage_id: Uuid,
        note: Option<String>,
    ) -> async_graphql::Result<DealNode> {
        let db = database(ctx)?;
        let model = products_crm::move_deal_stage(db, id, stage_id, note)
            .await
            .map_err(crm_error)?;
        Ok(model.into())
    }

    #[graphql(name = "deleteDeal")]
    async fn delete_deal(&self, ctx: &Context<'_>, id: Uuid) -> async_graphql::Result<bool> {
        let db = database(ctx)?;
        deals::delete_deal(db, id).await.map_err(crm_error)?;
        Ok(true)
    }
}
