//! Storage module for attachment bytes
//!
//! Provides the blob gateway abstraction and its MinIO/S3-compatible
//! implementation (uploads and presigned URL generation).

mod blob_gateway;
mod minio_client;

pub use blob_gateway::BlobGateway;
pub use minio_client::MinIOClient;
