use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "stage")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(indexed)]
    pub pipeline_id: Uuid,
    pub name: String,
    pub sort_order: i32,
    pub is_won: bool,
    pub is_lost: bool,
    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    /// Won and lost stages close a deal.
    pub fn is_terminal(&self) -> bool {
        self.is_won || self.is_lost
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pipeline::Entity",
        from = "Column::PipelineId",
        to = "super::pipeline::Column::Id",
        on_delete = "Cascade"
    )]
    Pipeline,
    #[sea_orm(has_many = "super::deal::Entity")]
    Deal,
}

impl Related<super::pipeline::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Pipeline.def()
    }
}

impl Related<super::deal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deal.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
