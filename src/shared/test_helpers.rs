#![cfg(test)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use axum::{extract::Request, middleware::Next, response::Response, Router};
use uuid::Uuid;

use crate::core::error::{AppError, Result};
use crate::features::auth::model::AuthenticatedUser;
use crate::modules::audit::{AuditRecord, AuditSink};
use crate::modules::storage::BlobGateway;

pub fn create_member_user(account_id: &str, community_id: Uuid) -> AuthenticatedUser {
    AuthenticatedUser {
        account_id: account_id.to_string(),
        community_id,
    }
}

/// Insert `user` into every request, standing in for the JWT middleware
pub fn with_user(router: Router, user: AuthenticatedUser) -> Router {
    router.layer(axum::middleware::from_fn(
        move |mut request: Request, next: Next| {
            let user = user.clone();
            async move {
                request.extensions_mut().insert(user);
                let response: Response = next.run(request).await;
                response
            }
        },
    ))
}

/// Blob gateway that keeps uploads in memory and signs with a fake host
#[derive(Default)]
pub struct FakeBlobGateway {
    uploads: Mutex<Vec<(String, usize, String)>>,
    failing_extensions: Mutex<HashSet<String>>,
    signing_fails: Mutex<bool>,
    upload_delay: Mutex<Option<Duration>>,
}

impl FakeBlobGateway {
    pub fn fail_uploads_with_extension(&self, extension: &str) {
        self.failing_extensions
            .lock()
            .unwrap()
            .insert(extension.to_string());
    }

    pub fn fail_signing(&self) {
        *self.signing_fails.lock().unwrap() = true;
    }

    pub fn stall_uploads(&self, delay: Duration) {
        *self.upload_delay.lock().unwrap() = Some(delay);
    }

    /// Stored keys in upload order
    pub fn uploaded_keys(&self) -> Vec<String> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .map(|(key, _, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl BlobGateway for FakeBlobGateway {
    async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        let delay = *self.upload_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing_extensions
            .lock()
            .unwrap()
            .iter()
            .any(|ext| path.ends_with(&format!(".{}", ext)));
        if failing {
            return Err(AppError::Storage(format!("injected upload failure for {}", path)));
        }

        let key = format!("private/{}", path);
        self.uploads
            .lock()
            .unwrap()
            .push((key.clone(), data.len(), content_type.to_string()));
        Ok(key)
    }

    async fn signed_url(&self, key: &str, ttl_secs: u32) -> Result<String> {
        if *self.signing_fails.lock().unwrap() {
            return Err(AppError::Storage("injected signing failure".to_string()));
        }
        Ok(format!("https://blobs.test/{}?ttl={}", key, ttl_secs))
    }
}

/// Audit sink that keeps every record for assertions
#[derive(Default)]
pub struct RecordingAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl RecordingAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Wait until at least `count` records arrived or `timeout` passed
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Vec<AuditRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let records = self.records();
            if records.len() >= count || tokio::time::Instant::now() >= deadline {
                return records;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub async fn actions(&self, count: usize) -> Vec<&'static str> {
        self.wait_for(count, Duration::from_secs(1))
            .await
            .iter()
            .map(|r| r.action)
            .collect()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}
