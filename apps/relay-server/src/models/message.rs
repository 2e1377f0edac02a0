use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::db::schema::messages;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = messages)]
pub struct Message {
    pub id: i64,
    pub group_id: i64,
    pub sender_id: i64,
    pub content: String,
    pub message_type: i16,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = messages)]
pub struct NewMessage<'a> {
    pub id: i64,
    pub group_id: i64,
    pub sender_id: i64,
    pub content: &'a str,
    pub message_type: i16,
    pub created_at: DateTime<Utc>,
}
