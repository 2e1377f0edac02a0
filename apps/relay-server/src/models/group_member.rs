use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::group_members;

#[derive(Debug, Insertable)]
#[diesel(table_name = group_members)]
pub struct NewGroupMember {
    pub group_id: i64,
    pub user_id: i64,
    pub joined_at: DateTime<Utc>,
}
