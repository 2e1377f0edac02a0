use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::AsyncPgConnection;

use crate::store::{RetryPolicy, StoreError};

pub type DbPool = Pool<AsyncPgConnection>;

/// Create a Diesel async connection pool and make sure the database answers.
///
/// The startup checkout goes through `retry`, so a database that is still
/// starting up gets a few chances before the relay gives up.
pub async fn connect(database_url: &str, retry: RetryPolicy) -> Result<DbPool, StoreError> {
    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(database_url);
    let pool = Pool::builder(manager)
        .max_size(20)
        .build()
        .map_err(|e| StoreError::Database(format!("failed to build connection pool: {e}")))?;

    let checked = &pool;
    retry
        .run("startup_check", || async move {
            checked.get().await.map(|_| ()).map_err(StoreError::from)
        })
        .await?;

    tracing::info!("database pool created");

    Ok(pool)
}
