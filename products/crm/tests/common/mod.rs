#![allow(dead_code)]

use migration::{Migrator, MigratorTrait};
use platform_db::{DatabaseSettings, DbPool};
use products_crm::pipelines::create_pipeline;
use products_crm::{NewPipeline, PipelineView, StageDraft};
use uuid::Uuid;

/// Fresh migrated in-memory database. Each call gets its own.
pub async fn setup_db() -> DbPool {
    let db = platform_db::connect(&DatabaseSettings::sqlite_memory())
        .await
        .expect("sqlite connects");
    Migrator::up(&db, None).await.expect("migrations apply");
    db
}

/// Pipeline with `Lead`, `Won` and `Lost` stages.
pub async fn lead_won_lost(db: &DbPool, name: &str) -> PipelineView {
    create_pipeline(
        db,
        NewPipeline {
            name: name.into(),
            stages: Some(vec![
                StageDraft::open("Lead"),
                StageDraft::won("Won"),
                StageDraft::lost("Lost"),
            ]),
        },
    )
    .await
    .expect("pipeline created")
}

pub fn stage_id(view: &PipelineView, name: &str) -> Uuid {
    view.stages
        .iter()
        .find(|s| s.name == name)
        .map(|s| s.id)
        .unwrap_or_else(|| panic!("stage {name} missing"))
}
