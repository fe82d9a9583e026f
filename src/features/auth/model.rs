use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Identity of the caller, as established by the bearer token
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    pub account_id: String,
    /// Community the session was issued for
    pub community_id: Uuid,
}

/// Portal-specific claims issued alongside the standard JWT claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalClaims {
    pub community_id: Uuid,
}
