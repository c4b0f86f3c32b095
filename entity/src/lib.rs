//! SeaORM entities for the deal pipeline schema.

pub mod company;
pub mod deal;
pub mod deal_stage_history;
pub mod person;
pub mod pipeline;
pub mod stage;

pub mod prelude {
    pub use crate::company::Entity as Company;
    pub use crate::deal::Entity as Deal;
    pub use crate::deal_stage_history::Entity as DealStageHistory;
    pub use crate::person::Entity as Person;
    pub use crate::pipeline::Entity as Pipeline;
    pub use crate::stage::Entity as Stage;
}
