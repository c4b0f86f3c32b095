//! Demo data for local development and smoke tests.

use chrono::{NaiveDate, Utc};
use entity::{company, deal, person, pipeline, stage};
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use tracing::info;
use uuid::Uuid;

use crate::deals::{NewDeal, create_deal, find_deal};
use crate::error::{CrmError, CrmResult};
use crate::pipelines::{NewPipeline, create_pipeline};
use crate::stages::stages_for;
use crate::transition::move_deal_stage;

pub const DEMO_PIPELINE: &str = "Sales";

#[derive(Debug, Clone)]
pub struct SeededRecords {
    pub pipeline: pipeline::Model,
    pub stages: Vec<stage::Model>,
    pub companies: Vec<company::Model>,
    pub people: Vec<person::Model>,
    pub deals: Vec<deal::Model>,
}

impl SeededRecords {
    pub fn company_named(&self, name: &str) -> Option<&company::Model> {
        self.companies.iter().find(|c| c.name == name)
    }

    pub fn stage_named(&self, name: &str) -> Option<&stage::Model> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn deal_titled(&self, title: &str) -> Option<&deal::Model> {
        self.deals.iter().find(|d| d.title == title)
    }
}

struct DemoDeal {
    title: &'static str,
    value_cents: i64,
    company: usize,
    person: usize,
    probability: i16,
    expected: (i32, u32, u32),
    /// Stages walked after creation, in order.
    path: &'static [&'static str],
}

const DEMO_DEALS: &[DemoDeal] = &[
    DemoDeal {
        title: "ACME Pilot",
        value_cents: 120_000,
        company: 0,
        person: 0,
        probability: 30,
        expected: (2025, 1, 10),
        path: &["Qualified"],
    },
    DemoDeal {
        title: "Rust Tooling Upgrade",
        value_cents: 75_000,
        company: 1,
        person: 2,
        probability: 50,
        expected: (2025, 2, 15),
        path: &["Qualified", "Proposal"],
    },
    DemoDeal {
        title: "NuFlights Annual",
        value_cents: 210_000,
        company: 2,
        person: 3,
        probability: 25,
        expected: (2025, 3, 5),
        path: &["Qualified"],
    },
    DemoDeal {
        title: "ACME Retainer",
        value_cents: 60_000,
        company: 0,
        person: 1,
        probability: 70,
        expected: (2025, 2, 28),
        path: &["Qualified", "Proposal", "Negotiation"],
    },
    DemoDeal {
        title: "FossRust Expansion",
        value_cents: 95_000,
        company: 1,
        person: 2,
        probability: 100,
        expected: (2025, 1, 20),
        path: &["Proposal", "Negotiation", "Won"],
    },
    DemoDeal {
        title: "Quick Win",
        value_cents: 40_000,
        company: 0,
        person: 0,
        probability: 100,
        expected: (2025, 2, 10),
        path: &["Proposal", "Won"],
    },
    DemoDeal {
        title: "Stalled Trial",
        value_cents: 25_000,
        company: 2,
        person: 3,
        probability: 0,
        expected: (2025, 1, 25),
        path: &["Qualified", "Lost"],
    },
    DemoDeal {
        title: "Fresh Prospect",
        value_cents: 55_000,
        company: 0,
        person: 1,
        probability: 10,
        expected: (2025, 3, 15),
        path: &[],
    },
];

/// Seeds companies, contacts, a "Sales" pipeline with the default stages and
/// a spread of deals across it. Deals reach their stage through
/// [`move_deal_stage`] so the stage history and close dates are realistic.
/// Refuses to run twice against the same database.
pub async fn seed_demo(db: &DatabaseConnection) -> CrmResult<SeededRecords> {
    let existing = pipeline::Entity::find()
        .filter(pipeline::Column::Name.eq(DEMO_PIPELINE))
        .one(db)
        .await?;
    if existing.is_some() {
        return Err(CrmError::precondition(format!(
            "a pipeline named {DEMO_PIPELINE:?} already exists; database looks seeded"
        )));
    }

    let now: DateTimeWithTimeZone = Utc::now().into();
    let mut companies = Vec::new();
    for (name, website) in [
        ("ACME, Inc.", Some("https://acme.example")),
        ("FossRust", Some("https://fossrust.example")),
        ("NuFlights", None),
    ] {
        let model = company::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.into()),
            website: Set(website.map(str::to_string)),
            created_at: Set(now),
        }
        .insert(db)
        .await?;
        companies.push(model);
    }

    let mut people = Vec::new();
    for (first, last, email, company) in [
        ("Ada", "Lovelace", "ada@acme.example", 0),
        ("Charles", "Babbage", "charles@acme.example", 0),
        ("Linus", "Torvalds", "linus@fossrust.example", 1),
        ("Grace", "Hopper", "grace@nuflights.example", 2),
    ] {
        let model = person::ActiveModel {
            id: Set(Uuid::new_v4()),
            first_name: Set(first.into()),
            last_name: Set(last.into()),
            email: Set(Some(email.into())),
            company_id: Set(Some(companies[company].id)),
            created_at: Set(now),
        }
        .insert(db)
        .await?;
        people.push(model);
    }

    let view = create_pipeline(
        db,
        NewPipeline {
            name: DEMO_PIPELINE.into(),
            stages: None,
        },
    )
    .await?;
    let stages = stages_for(db, view.id).await?;
    let stage_id = |name: &str| {
        stages
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id)
            .ok_or_else(|| CrmError::precondition(format!("seed stage {name:?} is missing")))
    };

    let mut deals = Vec::new();
    for demo in DEMO_DEALS {
        let mut input = NewDeal::new(demo.title, demo.value_cents, view.id);
        input.company_id = Some(companies[demo.company].id);
        input.person_id = Some(people[demo.person].id);
        input.probability = Some(demo.probability);
        let (y, m, d) = demo.expected;
        input.expected_close_date = NaiveDate::from_ymd_opt(y, m, d);
        let created = create_deal(db, input).await?;
        for step in demo.path {
            move_deal_stage(db, created.id, stage_id(step)?, None).await?;
        }
        deals.push(find_deal(db, created.id).await?);
    }

    let pipeline = pipeline::Entity::find_by_id(view.id)
        .one(db)
        .await?
        .ok_or_else(|| CrmError::not_found("pipeline", view.id))?;
    info!(
        pipeline_id = %pipeline.id,
        deals = deals.len(),
        companies = companies.len(),
        "demo data seeded"
    );
    Ok(SeededRecords {
        pipeline,
        stages,
        companies,
        people,
        deals,
    })
}
