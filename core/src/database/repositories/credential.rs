// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Postgres credential repository.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::CredentialRepository;
use crate::credentials::Credential;
use crate::database::error::DatabaseResult;
use crate::database::models::CredentialRow;

/// Credential repository over PostgreSQL.
pub struct PgCredentialRepository {
    pool: PgPool,
}

impl PgCredentialRepository {
    /// Create a new credential repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialRepository for PgCredentialRepository {
    async fn list_enabled(&self, provider: &str) -> DatabaseResult<Vec<Credential>> {
        // Creation order is the scheduler's deterministic tie-break.
        let rows = sqlx::query_as::<_, CredentialRow>(
            r#"
            SELECT * FROM credentials
            WHERE provider = $1 AND enabled
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(provider)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Credential::from).collect())
    }

    async fn get(&self, id: Uuid) -> DatabaseResult<Option<Credential>> {
        let row = sqlx::query_as::<_, CredentialRow>("SELECT * FROM credentials WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Credential::from))
    }
}
