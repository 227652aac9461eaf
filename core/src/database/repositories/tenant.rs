// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Postgres tenant repository.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::TenantRepository;
use crate::database::error::DatabaseResult;
use crate::database::models::{Tenant, TenantRow};

/// Tenant repository over PostgreSQL.
pub struct PgTenantRepository {
    pool: PgPool,
}

impl PgTenantRepository {
    /// Create a new tenant repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepository for PgTenantRepository {
    async fn find_by_fingerprint(&self, fingerprint: &str) -> DatabaseResult<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>(
            "SELECT * FROM tenants WHERE api_key_fingerprint = $1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Tenant::from))
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<Tenant>> {
        let row = sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Tenant::from))
    }
}
