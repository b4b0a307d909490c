use anyhow::Result;
use sqlx::any::{install_default_drivers, AnyPoolOptions};
use sqlx::AnyPool;
use std::time::Duration;

/// Connection pool for the file metadata table. The `Any` driver lets the same
/// queries run against Postgres in deployment and SQLite locally.
#[derive(Clone)]
pub struct Database {
    pool: AnyPool,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        install_default_drivers();

        let mut options = AnyPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(10));

        // Each connection to `sqlite::memory:` is its own database, and it is
        // gone once that connection closes.
        if database_url.contains(":memory:") {
            options = options.max_connections(1).idle_timeout(None::<Duration>).max_lifetime(None::<Duration>);
        }

        let pool = options.connect(database_url).await?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
