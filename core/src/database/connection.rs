// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Database connection and pool management.

use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::Arc;
use tracing::info;

use super::config::DatabaseConfig;
use super::error::{DatabaseError, DatabaseResult};
use super::repositories::{PgCredentialRepository, PgJobRepository, PgTenantRepository};

/// Database connection with repository access.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    jobs: Arc<PgJobRepository>,
    tenants: Arc<PgTenantRepository>,
    credentials: Arc<PgCredentialRepository>,
}

impl Database {
    /// Connect to the database.
    pub async fn connect(config: &DatabaseConfig) -> DatabaseResult<Self> {
        info!("Connecting to database: {}", config.url_safe());

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(config.idle_timeout())
            .max_lifetime(config.max_lifetime())
            .connect(&config.url)
            .await
            .map_err(|e| DatabaseError::ConnectionError(e.to_string()))?;

        info!("Database connected");

        Ok(Self::from_pool(pool))
    }

    /// Build repositories over an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        let jobs = Arc::new(PgJobRepository::new(pool.clone()));
        let tenants = Arc::new(PgTenantRepository::new(pool.clone()));
        let credentials = Arc::new(PgCredentialRepository::new(pool.clone()));
        Self {
            pool,
            jobs,
            tenants,
            credentials,
        }
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> DatabaseResult<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Get the job repository.
    pub fn jobs(&self) -> Arc<PgJobRepository> {
        Arc::clone(&self.jobs)
    }

    /// Get the tenant repository.
    pub fn tenants(&self) -> Arc<PgTenantRepository> {
        Arc::clone(&self.tenants)
    }

    /// Get the credential repository.
    pub fn credentials(&self) -> Arc<PgCredentialRepository> {
        Arc::clone(&self.credentials)
    }

    /// Check database health.
    pub async fn health_check(&self) -> DatabaseResult<bool> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::from)?;
        Ok(true)
    }
}
