use serde::Serialize;
use utoipa::ToSchema;

/// Body of `GET /healthcheck`.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while storage-backed requests are rejected.
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
        }
    }
}
