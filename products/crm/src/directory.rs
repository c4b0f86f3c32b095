//! Read-only company/person names used to decorate deal cards.

use std::collections::{BTreeSet, HashMap};

use entity::{company, deal, person};
use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter};
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct Directory {
    companies: HashMap<Uuid, String>,
    people: HashMap<Uuid, String>,
}

impl Directory {
    pub fn with_company(mut self, id: Uuid, name: impl Into<String>) -> Self {
        self.companies.insert(id, name.into());
        self
    }

    pub fn with_person(mut self, id: Uuid, name: impl Into<String>) -> Self {
        self.people.insert(id, name.into());
        self
    }

    pub fn company_name(&self, id: Option<Uuid>) -> Option<String> {
        id.and_then(|id| self.companies.get(&id).cloned())
    }

    pub fn person_name(&self, id: Option<Uuid>) -> Option<String> {
        id.and_then(|id| self.people.get(&id).cloned())
    }
}

/// Loads the names referenced by `deals` in two batched queries.
pub async fn lookup<C>(conn: &C, deals: &[deal::Model]) -> Result<Directory, DbErr>
where
    C: ConnectionTrait,
{
    let company_ids: BTreeSet<Uuid> = deals.iter().filter_map(|d| d.company_id).collect();
    let person_ids: BTreeSet<Uuid> = deals.iter().filter_map(|d| d.person_id).collect();

    let mut directory = Directory::default();
    if !company_ids.is_empty() {
        let rows = company::Entity::find()
            .filter(company::Column::Id.is_in(company_ids))
            .all(conn)
            .await?;
        directory
            .companies
            .extend(rows.into_iter().map(|row| (row.id, row.name)));
    }
    if !person_ids.is_empty() {
        let rows = person::Entity::find()
            .filter(person::Column::Id.is_in(person_ids))
            .all(conn)
            .await?;
        directory
            .people
            .extend(rows.into_iter().map(|row| (row.id, row.display_name())));
    }
    Ok(directory)
}
