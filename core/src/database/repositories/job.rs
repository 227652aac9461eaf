// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Postgres job repository.

use async_trait::async_trait;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use super::{
    decode_cursor, encode_cursor, new_job_id, CancelOutcome, JobListFilter, JobPage, JobRepository,
    NewJob,
};
use crate::database::error::DatabaseResult;
use crate::database::models::JobRow;
use crate::jobs::{Job, JobStatus};

/// Job repository over PostgreSQL.
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    /// Create a new job repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    async fn create(&self, new_job: NewJob) -> DatabaseResult<Job> {
        let id = new_job_id();
        let inserted = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (
                id, tenant_id, idempotency_key, status, mode, prompt,
                input_image, resolution, aspect_ratio, sample_count, model,
                attempts, max_attempts, result_urls
            )
            VALUES ($1, $2, $3, 'QUEUED', $4, $5, $6, $7, $8, $9, $10, 0, $11, '{}')
            ON CONFLICT (tenant_id, idempotency_key) WHERE idempotency_key IS NOT NULL
                DO NOTHING
            RETURNING *
            "#,
        )
        .bind(&id)
        .bind(new_job.tenant_id)
        .bind(&new_job.idempotency_key)
        .bind(new_job.mode.as_str())
        .bind(&new_job.prompt)
        .bind(&new_job.input_image)
        .bind(new_job.resolution.map(|r| r.as_str()))
        .bind(new_job.aspect_ratio.map(|a| a.as_str()))
        .bind(new_job.sample_count)
        .bind(&new_job.model)
        .bind(new_job.max_attempts)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return row.try_into();
        }

        // The idempotency token has been seen before; hand back the
        // existing job.
        let key = new_job.idempotency_key.as_deref().unwrap_or_default();
        let existing = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE tenant_id = $1 AND idempotency_key = $2",
        )
        .bind(new_job.tenant_id)
        .bind(key)
        .fetch_one(&self.pool)
        .await?;
        existing.try_into()
    }

    async fn get(&self, id: &str) -> DatabaseResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn get_for_tenant(&self, tenant_id: Uuid, id: &str) -> DatabaseResult<Option<Job>> {
        let row =
            sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1 AND tenant_id = $2")
                .bind(id)
                .bind(tenant_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_for_tenant(
        &self,
        tenant_id: Uuid,
        filter: JobListFilter,
    ) -> DatabaseResult<JobPage> {
        let limit = filter.limit.clamp(1, 100);

        let mut builder: QueryBuilder<sqlx::Postgres> =
            QueryBuilder::new("SELECT * FROM jobs WHERE tenant_id = ");
        builder.push_bind(tenant_id);
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(cursor) = filter.cursor.as_deref().and_then(decode_cursor) {
            builder.push(" AND (created_at, id) < (");
            builder.push_bind(cursor.0);
            builder.push(", ");
            builder.push_bind(cursor.1);
            builder.push(")");
        }
        builder.push(" ORDER BY created_at DESC, id DESC LIMIT ");
        builder.push_bind(limit + 1);

        let rows: Vec<JobRow> = builder.build_query_as().fetch_all(&self.pool).await?;

        let has_more = rows.len() as i64 > limit;
        let items: Vec<Job> = rows
            .into_iter()
            .take(limit as usize)
            .map(Job::try_from)
            .collect::<Result<_, _>>()?;
        let next_cursor = if has_more {
            items.last().map(|j| encode_cursor(j.created_at, &j.id))
        } else {
            None
        };

        Ok(JobPage {
            items,
            next_cursor,
            has_more,
        })
    }

    async fn mark_running(&self, id: &str, credential_id: Uuid) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'RUNNING', credential_id = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('QUEUED', 'RETRYING')
            "#,
        )
        .bind(id)
        .bind(credential_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_succeeded(&self, id: &str) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'SUCCEEDED', error_code = NULL, error_message = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'RUNNING'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment_attempts(&self, id: &str) -> DatabaseResult<i32> {
        let row = sqlx::query(
            "UPDATE jobs SET attempts = attempts + 1, updated_at = NOW() WHERE id = $1 RETURNING attempts",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        let attempts: i32 = row.try_get("attempts").map_err(sqlx::Error::from)?;
        Ok(attempts)
    }

    async fn record_error(
        &self,
        id: &str,
        status: JobStatus,
        code: &str,
        message: &str,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, error_code = $3, error_message = $4, updated_at = NOW()
            WHERE id = $1 AND status IN ('QUEUED', 'RETRYING', 'RUNNING')
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(code)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_result_url(&self, id: &str, url: &str) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET result_urls = array_append(result_urls, $2), updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel(&self, tenant_id: Uuid, id: &str) -> DatabaseResult<CancelOutcome> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'CANCELED', updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2 AND status IN ('QUEUED', 'RETRYING')
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(CancelOutcome::Canceled(row.try_into()?));
        }

        match self.get_for_tenant(tenant_id, id).await? {
            Some(job) => Ok(CancelOutcome::InvalidState(job.status)),
            None => Ok(CancelOutcome::NotFound),
        }
    }
}
