mod crm;

use async_graphql::{Context, EmptySubscription, ErrorExtensions, Object, Schema};
use platform_api::{ApiError, internal_error};
use platform_db::DbPool;
use products_crm::CrmError;

pub use crm::{CrmMutation, CrmQuery};

pub type SchemaType = Schema<QueryRoot, MutationRoot, EmptySubscription>;

pub fn build_schema(pool: DbPool) -> SchemaType {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .data(pool)
        .finish()
}

/// SDL snapshot, no database required.
pub fn sdl() -> String {
    Schema::build(QueryRoot, MutationRoot, EmptySubscription)
        .finish()
        .sdl()
}

#[derive(Default)]
pub struct QueryRoot;

#[derive(Default)]
pub struct MutationRoot;

#[Object]
impl QueryRoot {
    async fn crm(&self) -> CrmQuery {
        CrmQuery
    }

    async fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

#[Object]
impl MutationRoot {
    async fn crm(&self) -> CrmMutation {
        CrmMutation
    }
}

fn database<'a>(ctx: &Context<'a>) -> async_graphql::Result<&'a DbPool> {
    ctx.data::<DbPool>()
        .map_err(|_| internal_error(anyhow::anyhow!("missing database connection")))
}

fn crm_error(err: CrmError) -> async_graphql::Error {
    ApiError::from(err).extend()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::{Request, Value, Variables};
    use migration::{Migrator, MigratorTrait};
    use platform_db::DatabaseSettings;
    use serde_json::json;

    async fn schema() -> SchemaType {
        let pool = platform_db::connect(&DatabaseSettings::sqlite_memory())
            .await
            .unwrap();
        Migrator::up(&pool, None).await.unwrap();
        build_schema(pool)
    }

    async fn run(schema: &SchemaType, query: &str, vars: serde_json::Value) -> async_graphql::Response {
        schema
            .execute(Request::new(query).variables(Variables::from_json(vars)))
            .await
    }

    fn error_code(response: &async_graphql::Response) -> Option<Value> {
        response
            .errors
            .first()
            .and_then(|err| err.extensions.as_ref())
            .and_then(|ext| ext.get("code"))
            .cloned()
    }

    const CREATE_PIPELINE: &str = r#"
        mutation Create($name: String!) {
            crm { createPipeline(input: { name: $name }) { id stages { id name isWon isLost } } }
        }
    "#;

    const CREATE_DEAL: &str = r#"
        mutation Deal($pipeline: UUID!, $value: Int!) {
            crm { createDeal(input: { title: "Pilot", valueCents: $value, pipelineId: $pipeline }) { id stageId } }
        }
    "#;

    #[tokio::test]
    async fn sdl_exposes_crm_namespace() {
        let sdl = sdl();
        assert!(sdl.contains("pipelineBoard"));
        assert!(sdl.contains("moveDealStage"));
    }

    #[tokio::test]
    async fn board_reflects_created_deals() {
        let schema = schema().await;
        let created = run(&schema, CREATE_PIPELINE, json!({"name": "Sales"})).await;
        assert!(created.errors.is_empty(), "{:?}", created.errors);
        let data = created.data.into_json().unwrap();
        let pipeline_id = data["crm"]["createPipeline"]["id"].clone();
        assert_eq!(
            data["crm"]["createPipeline"]["stages"].as_array().map(Vec::len),
            Some(6)
        );

        let deal = run(&schema, CREATE_DEAL, json!({"pipeline": pipeline_id, "value": 2500})).await;
        assert!(deal.errors.is_empty(), "{:?}", deal.errors);

        let board = run(
            &schema,
            r#"query Board($id: UUID!) {
                crm { pipelineBoard(id: $id) { totalDeals totalValueCents winRate stages { dealCount } } }
            }"#,
            json!({"id": pipeline_id}),
        )
        .await;
        assert!(board.errors.is_empty(), "{:?}", board.errors);
        let board = board.data.into_json().unwrap();
        assert_eq!(board["crm"]["pipelineBoard"]["totalDeals"], 1);
        assert_eq!(board["crm"]["pipelineBoard"]["totalValueCents"], 2500);
        assert_eq!(board["crm"]["pipelineBoard"]["stages"][0]["dealCount"], 1);
    }

    #[tokio::test]
    async fn cross_pipeline_move_reports_invalid_argument() {
        let schema = schema().await;
        let first = run(&schema, CREATE_PIPELINE, json!({"name": "A"})).await;
        let second = run(&schema, CREATE_PIPELINE, json!({"name": "B"})).await;
        let first = first.data.into_json().unwrap();
        let second = second.data.into_json().unwrap();
        let foreign_stage = second["crm"]["createPipeline"]["stages"][0]["id"].clone();

        let deal = run(
            &schema,
            CREATE_DEAL,
            json!({"pipeline": first["crm"]["createPipeline"]["id"], "value": 100}),
        )
        .await
        .data
        .into_json()
        .unwrap();
        let moved = run(
            &schema,
            r#"mutation Move($id: UUID!, $stage: UUID!) {
                crm { moveDealStage(id: $id, stageId: $stage) { id } }
            }"#,
            json!({"id": deal["crm"]["createDeal"]["id"], "stage": foreign_stage}),
        )
        .await;
        assert_eq!(error_code(&moved), Some(Value::from("INVALID_ARGUMENT")));
    }

    #[tokio::test]
    async fn deleting_busy_pipeline_reports_failed_precondition() {
        let schema = schema().await;
        let created = run(&schema, CREATE_PIPELINE, json!({"name": "Sales"}))
            .await
            .data
            .into_json()
            .unwrap();
        let pipeline_id = created["crm"]["createPipeline"]["id"].clone();
        run(&schema, CREATE_DEAL, json!({"pipeline": pipeline_id, "value": 100})).await;

        let deleted = run(
            &schema,
            r#"mutation Delete($id: UUID!) { crm { deletePipeline(id: $id) } }"#,
            json!({"id": pipeline_id}),
        )
        .await;
        assert_eq!(error_code(&deleted), Some(Value::from("FAILED_PRECONDITION")));
    }

    #[tokio::test]
    async fn unknown_deal_reports_not_found() {
        let schema = schema().await;
        let response = run(
            &schema,
            r#"query Deal($id: UUID!) { crm { deal(id: $id) { id } } }"#,
            json!({"id": uuid::Uuid::new_v4()}),
        )
        .await;
        assert_eq!(error_code(&response), Some(Value::from("NOT_FOUND")));
    }
}
