//! Postgres implementation of the storage traits (diesel-async + deadpool).

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::pooled_connection::deadpool::PoolError;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use relay_common::SnowflakeGenerator;
use scoped_futures::ScopedFutureExt;

use super::{GroupRecord, MembershipStore, MessageLog, StoreError, StoredMessage, UserRecord};
use crate::db::pool::DbPool;
use crate::db::schema::{group_members, groups, messages, users};
use crate::gateway::events::MessageType;
use crate::models::group::{Group, NewGroup};
use crate::models::group_member::NewGroupMember;
use crate::models::message::{Message, NewMessage};
use crate::models::user::{NewUser, User};

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => StoreError::NotFound("record".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(info.message().to_string())
            }
            DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
                StoreError::Unavailable(info.message().to_string())
            }
            DieselError::BrokenTransactionManager => {
                StoreError::Unavailable("broken transaction manager".to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

fn message_type_code(kind: MessageType) -> i16 {
    match kind {
        MessageType::Group => 0,
        MessageType::Heartbeat => 1,
    }
}

fn message_type_from_code(code: i16) -> MessageType {
    match code {
        1 => MessageType::Heartbeat,
        _ => MessageType::Group,
    }
}

fn group_record((group, creator): (Group, String)) -> GroupRecord {
    GroupRecord {
        id: group.id,
        name: group.group_name,
        creator,
    }
}

pub struct PgStore {
    pool: DbPool,
    snowflake: Arc<SnowflakeGenerator>,
}

impl PgStore {
    pub fn new(pool: DbPool, snowflake: Arc<SnowflakeGenerator>) -> Self {
        Self { pool, snowflake }
    }
}

async fn user_id(conn: &mut AsyncPgConnection, username: &str) -> Result<Option<i64>, StoreError> {
    let id = users::table
        .filter(users::username.eq(username))
        .select(users::id)
        .first::<i64>(conn)
        .await
        .optional()?;
    Ok(id)
}

async fn require_user_id(conn: &mut AsyncPgConnection, username: &str) -> Result<i64, StoreError> {
    user_id(conn, username)
        .await?
        .ok_or_else(|| StoreError::NotFound("user".to_string()))
}

#[async_trait]
impl MembershipStore for PgStore {
    async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<UserRecord, StoreError> {
        let mut conn = self.pool.get().await?;

        let user: User = diesel::insert_into(users::table)
            .values(NewUser {
                username,
                password_hash,
                created_at: Utc::now(),
            })
            .returning(User::as_returning())
            .get_result(&mut conn)
            .await?;

        Ok(UserRecord {
            id: user.id,
            username: user.username,
            password_hash: user.password_hash,
        })
    }

    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let mut conn = self.pool.get().await?;

        let user: Option<User> = users::table
            .filter(users::username.eq(username))
            .select(User::as_select())
            .first(&mut conn)
            .await
            .optional()?;

        Ok(user.map(|u| UserRecord {
            id: u.id,
            username: u.username,
            password_hash: u.password_hash,
        }))
    }

    async fn create_group(&self, creator: &str, name: &str) -> Result<GroupRecord, StoreError> {
        let mut conn = self.pool.get().await?;
        let creator_id = require_user_id(&mut conn, creator).await?;
        let now = Utc::now();

        // Group row and the creator's membership commit together.
        let group = conn
            .transaction::<_, StoreError, _>(|conn| {
                async move {
                    let group: Group = diesel::insert_into(groups::table)
                        .values(NewGroup {
                            group_name: name,
                            creator_id,
                            created_at: now,
                        })
                        .returning(Group::as_returning())
                        .get_result(conn)
                        .await?;

                    diesel::insert_into(group_members::table)
                        .values(NewGroupMember {
                            group_id: group.id,
                            user_id: creator_id,
                            joined_at: now,
                        })
                        .execute(conn)
                        .await?;

                    Ok(group)
                }
                .scope_boxed()
            })
            .await?;

        Ok(group_record((group, creator.to_string())))
    }

    async fn find_group(&self, group_id: i64) -> Result<Option<GroupRecord>, StoreError> {
        let mut conn = self.pool.get().await?;

        let row: Option<(Group, String)> = groups::table
            .inner_join(users::table)
            .filter(groups::id.eq(group_id))
            .select((Group::as_select(), users::username))
            .first(&mut conn)
            .await
            .optional()?;

        Ok(row.map(group_record))
    }

    async fn is_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;

        let found: Option<i64> = group_members::table
            .inner_join(users::table)
            .filter(group_members::group_id.eq(group_id))
            .filter(users::username.eq(username))
            .select(group_members::user_id)
            .first(&mut conn)
            .await
            .optional()?;

        Ok(found.is_some())
    }

    async fn members_of(&self, group_id: i64) -> Result<BTreeSet<String>, StoreError> {
        let mut conn = self.pool.get().await?;

        let names: Vec<String> = group_members::table
            .inner_join(users::table)
            .filter(group_members::group_id.eq(group_id))
            .select(users::username)
            .load(&mut conn)
            .await?;

        Ok(names.into_iter().collect())
    }

    async fn add_member(&self, username: &str, group_id: i64) -> Result<(), StoreError> {
        let mut conn = self.pool.get().await?;
        let member_id = require_user_id(&mut conn, username).await?;

        let group_exists: Option<i64> = groups::table
            .find(group_id)
            .select(groups::id)
            .first(&mut conn)
            .await
            .optional()?;
        if group_exists.is_none() {
            return Err(StoreError::NotFound("group".to_string()));
        }

        conn.transaction::<_, StoreError, _>(|conn| {
            async move {
                diesel::insert_into(group_members::table)
                    .values(NewGroupMember {
                        group_id,
                        user_id: member_id,
                        joined_at: Utc::now(),
                    })
                    .execute(conn)
                    .await?;
                Ok(())
            }
            .scope_boxed()
        })
        .await
    }

    async fn remove_member(&self, username: &str, group_id: i64) -> Result<bool, StoreError> {
        let mut conn = self.pool.get().await?;
        let Some(member_id) = user_id(&mut conn, username).await? else {
            return Ok(false);
        };

        let removed = diesel::delete(
            group_members::table
                .filter(group_members::group_id.eq(group_id))
                .filter(group_members::user_id.eq(member_id)),
        )
        .execute(&mut conn)
        .await?;

        Ok(removed > 0)
    }

    async fn groups_of(&self, username: &str) -> Result<Vec<GroupRecord>, StoreError> {
        let mut conn = self.pool.get().await?;
        let Some(member_id) = user_id(&mut conn, username).await? else {
            return Ok(Vec::new());
        };

        let rows: Vec<(Group, String)> = groups::table
            .inner_join(users::table)
            .filter(
                groups::id.eq_any(
                    group_members::table
                        .filter(group_members::user_id.eq(member_id))
                        .select(group_members::group_id),
                ),
            )
            .order(groups::id.asc())
            .select((Group::as_select(), users::username))
            .load(&mut conn)
            .await?;

        Ok(rows.into_iter().map(group_record).collect())
    }
}

#[async_trait]
impl MessageLog for PgStore {
    fn next_message_id(&self) -> i64 {
        self.snowflake.generate()
    }

    async fn append(
        &self,
        id: i64,
        group_id: i64,
        sender: &str,
        content: &str,
        kind: MessageType,
    ) -> Result<StoredMessage, StoreError> {
        let mut conn = self.pool.get().await?;
        let sender_id = require_user_id(&mut conn, sender).await?;

        let row = conn
            .transaction::<_, StoreError, _>(|conn| {
                async move {
                    diesel::insert_into(messages::table)
                        .values(NewMessage {
                            id,
                            group_id,
                            sender_id,
                            content,
                            message_type: message_type_code(kind),
                            created_at: Utc::now(),
                        })
                        .on_conflict(messages::id)
                        .do_nothing()
                        .execute(conn)
                        .await?;

                    let row: Message = messages::table
                        .find(id)
                        .select(Message::as_select())
                        .first(conn)
                        .await?;
                    Ok(row)
                }
                .scope_boxed()
            })
            .await?;

        Ok(StoredMessage {
            id: row.id,
            group_id: row.group_id,
            sender: sender.to_string(),
            content: row.content,
            kind: message_type_from_code(row.message_type),
            created_at: row.created_at,
        })
    }

    async fn history(&self, group_id: i64) -> Result<Vec<StoredMessage>, StoreError> {
        let mut conn = self.pool.get().await?;

        let rows: Vec<(Message, String)> = messages::table
            .inner_join(users::table)
            .filter(messages::group_id.eq(group_id))
            .order((messages::created_at.asc(), messages::id.asc()))
            .select((Message::as_select(), users::username))
            .load(&mut conn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|(row, sender)| StoredMessage {
                id: row.id,
                group_id: row.group_id,
                sender,
                content: row.content,
                kind: message_type_from_code(row.message_type),
                created_at: row.created_at,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_codes_round_trip() {
        for kind in [MessageType::Group, MessageType::Heartbeat] {
            assert_eq!(message_type_from_code(message_type_code(kind)), kind);
        }
    }

    #[test]
    fn broken_transaction_is_transient_but_not_found_is_not() {
        let err: StoreError = DieselError::BrokenTransactionManager.into();
        assert!(err.is_transient());
        let err: StoreError = DieselError::NotFound.into();
        assert!(!err.is_transient());
    }
}
