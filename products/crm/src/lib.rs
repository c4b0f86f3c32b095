//! Deal pipeline domain.
//!
//! A pipeline owns an ordered list of stages; every deal sits in exactly one
//! stage of its pipeline. The board aggregates deals per stage, transitions
//! move a deal between stages of the same pipeline, and a pipeline can only
//! be deleted once no deal references its stages.

pub mod board;
pub mod deals;
pub mod directory;
pub mod error;
pub mod pipelines;
pub mod seed;
pub mod stages;
pub mod transition;

pub use board::{BoardOptions, CardOrder, DealCard, PipelineBoard, StageColumn, load_board};
pub use deals::{DealPatch, DealQuery, DealSort, DealView, NewDeal, SortDirection};
pub use error::{CrmError, CrmResult};
pub use pipelines::{NewPipeline, PipelineSummary, PipelineView};
pub use seed::{SeededRecords, seed_demo};
pub use stages::{StageDraft, StageView};
pub use transition::{StageHistoryView, move_deal_stage};
