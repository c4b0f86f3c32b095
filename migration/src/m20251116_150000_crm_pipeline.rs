use sea_orm_migration::prelude::*;

use crate::m20251116_120000_directory::{Company, Person};

/// Upper bound for `deal.value_cents`, in cents.
const MAX_VALUE_CENTS: i64 = 1_000_000_000_000_000;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Pipeline::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Pipeline::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Pipeline::Name).string_len(120).not_null())
                    .col(
                        ColumnDef::new(Pipeline::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Pipeline::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Stage::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Stage::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Stage::PipelineId).uuid().not_null())
                    .col(ColumnDef::new(Stage::Name).string_len(64).not_null())
                    .col(ColumnDef::new(Stage::SortOrder).integer().not_null())
                    .col(
                        ColumnDef::new(Stage::IsWon)
                            .boolean()
                            .not_null()
                            .default(Expr::value(false)),
                    )
                    .col(
                        ColumnDef::new(Stage::IsLost)
                            .boolean()
                            .not_null()
                            .default(Expr::value(false)),
                    )
                    .col(
                        ColumnDef::new(Stage::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_stage_pipeline")
                            .from(Stage::Table, Stage::PipelineId)
                            .to(Pipeline::Table, Pipeline::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_stage_pipeline_order")
                    .table(Stage::Table)
                    .col(Stage::PipelineId)
                    .col(Stage::SortOrder)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Deal::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Deal::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Deal::Title).string_len(200).not_null())
                    .col(
                        ColumnDef::new(Deal::ValueCents)
                            .big_integer()
                            .not_null()
                            .default(Expr::value(0))
                            .check(Expr::col(Deal::ValueCents).between(0, MAX_VALUE_CENTS)),
                    )
                    .col(ColumnDef::new(Deal::StageId).uuid().not_null())
                    .col(ColumnDef::new(Deal::PipelineId).uuid().not_null())
                    .col(ColumnDef::new(Deal::PersonId).uuid().null())
                    .col(ColumnDef::new(Deal::CompanyId).uuid().null())
                    .col(
                        ColumnDef::new(Deal::Probability)
                            .small_integer()
                            .not_null()
                            .default(Expr::value(0))
                            .check(Expr::col(Deal::Probability).between(0, 100)),
                    )
                    .col(ColumnDef::new(Deal::ExpectedCloseDate).date().null())
                    .col(
                        ColumnDef::new(Deal::ActualCloseDate)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(Deal::Notes).text().null())
                    .col(
                        ColumnDef::new(Deal::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Deal::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_stage")
                            .from(Deal::Table, Deal::StageId)
                            .to(Stage::Table, Stage::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_pipeline")
                            .from(Deal::Table, Deal::PipelineId)
                            .to(Pipeline::Table, Pipeline::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_company")
                            .from(Deal::Table, Deal::CompanyId)
                            .to(Company::Table, Company::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_person")
                            .from(Deal::Table, Deal::PersonId)
                            .to(Person::Table, Person::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            ("idx_deal_stage", Deal::StageId),
            ("idx_deal_pipeline", Deal::PipelineId),
            ("idx_deal_company", Deal::CompanyId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name(name)
                        .table(Deal::Table)
                        .col(column)
                        .to_owned(),
                )
                .await?;
        }

        manager
            .create_table(
                Table::create()
                    .table(DealStageHistory::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DealStageHistory::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DealStageHistory::DealId).uuid().not_null())
                    .col(ColumnDef::new(DealStageHistory::FromStageId).uuid().null())
                    .col(
                        ColumnDef::new(DealStageHistory::FromStageName)
                            .string_len(64)
                            .null(),
                    )
                    .col(ColumnDef::new(DealStageHistory::ToStageId).uuid().not_null())
                    .col(
                        ColumnDef::new(DealStageHistory::ToStageName)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DealStageHistory::ChangedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DealStageHistory::Note).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_deal_stage_history_deal")
                            .from(DealStageHistory::Table, DealStageHistory::DealId)
                            .to(Deal::Table, Deal::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deal_stage_history_deal")
                    .table(DealStageHistory::Table)
                    .col(DealStageHistory::DealId)
                    .col(DealStageHistory::ChangedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(DealStageHistory::Table)
                    .if_exists()
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Deal::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Stage::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Pipeline::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Pipeline {
    Table,
    Id,
    Name,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Stage {
    Table,
    Id,
    PipelineId,
    Name,
    SortOrder,
    IsWon,
    IsLost,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Deal {
    Table,
    Id,
    Title,
    ValueCents,
    StageId,
    PipelineId,
    PersonId,
    CompanyId,
    Probability,
    ExpectedCloseDate,
    ActualCloseDate,
    Notes,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum DealStageHistory {
    Table,
    Id,
    DealId,
    FromStageId,
    FromStageName,
    ToStageId,
    ToStageName,
    ChangedAt,
    Note,
}
