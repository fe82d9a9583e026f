//! Modules layer - Infrastructure components for external integrations
//!
//! Contains adapters for blob storage and the audit trail.

pub mod audit;
pub mod storage;
