use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::groups;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = groups)]
pub struct Group {
    pub id: i64,
    pub group_name: String,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = groups)]
pub struct NewGroup<'a> {
    pub group_name: &'a str,
    pub creator_id: i64,
    pub created_at: DateTime<Utc>,
}
