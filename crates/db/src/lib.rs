use std::{str::FromStr, time::Duration};

use sqlx::{
    Error, Pool, Sqlite,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use utils::assets::database_path;
use uuid::Uuid;

pub mod models;
pub mod tenant;

pub use tenant::TenantScope;

#[derive(Clone)]
pub struct DBService {
    pub pool: Pool<Sqlite>,
}

impl DBService {
    pub async fn new() -> Result<DBService, Error> {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}", database_path().to_string_lossy())
        });
        let options = SqliteConnectOptions::from_str(&database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database ready at {}", database_url);
        Ok(DBService { pool })
    }

    /// Private in-memory database. A single connection that never expires
    /// keeps the schema alive for the lifetime of the pool.
    pub async fn new_in_memory() -> Result<DBService, Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(DBService { pool })
    }

    /// Sets the current tenant: everything read through the returned scope
    /// is filtered to `tenant_id`.
    pub fn for_tenant(&self, tenant_id: Uuid) -> TenantScope {
        TenantScope::new(self.pool.clone(), tenant_id)
    }
}
