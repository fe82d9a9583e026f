//! Audit trail for mutating messaging operations
//!
//! Records are appended through an [`AuditDispatcher`], which hands them to
//! the configured [`AuditSink`] on a spawned task. A failing sink is logged
//! and never affects the operation that produced the record.

mod postgres_sink;

pub use postgres_sink::PostgresAuditSink;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error};
use uuid::Uuid;

use crate::core::error::Result;

/// One actor/action/target entry
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub actor_id: String,
    pub action: &'static str,
    pub target_table: &'static str,
    pub target_id: Uuid,
    pub payload: Value,
}

impl AuditRecord {
    pub fn new(
        actor_id: impl Into<String>,
        action: &'static str,
        target_table: &'static str,
        target_id: Uuid,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            action,
            target_table,
            target_id,
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// Non-blocking front of an [`AuditSink`]
#[derive(Clone)]
pub struct AuditDispatcher {
    sink: Arc<dyn AuditSink>,
}

impl AuditDispatcher {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    /// Queue `record` for the sink and return immediately.
    pub fn record(&self, record: AuditRecord) {
        let sink = Arc::clone(&self.sink);
        tokio::spawn(async move {
            match sink.append(&record).await {
                Ok(()) => debug!(
                    action = record.action,
                    target_id = %record.target_id,
                    "Audit record appended"
                ),
                Err(e) => error!(
                    action = record.action,
                    actor_id = %record.actor_id,
                    target_table = record.target_table,
                    target_id = %record.target_id,
                    "Failed to append audit record: {}",
                    e
                ),
            }
        });
    }
}
