use async_trait::async_trait;
use sqlx::PgPool;

use super::{AuditRecord, AuditSink};
use crate::core::error::Result;

/// Appends audit records to the `audit_logs` table
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (actor_id, action, target_table, target_id, payload)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.actor_id)
        .bind(record.action)
        .bind(record.target_table)
        .bind(record.target_id)
        .bind(&record.payload)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
