/// OpenAPI documentation generation.
pub mod documentation;
/// Game creation, seat claims and read models.
pub mod game_service;
/// Game master commands: phase changes, scoring and corrections.
pub mod gm_service;
/// Player guess submission.
pub mod guess_service;
/// Health check service.
pub mod health_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events subscription handling.
pub mod sse_service;
/// Storage connection supervisor driving degraded mode.
pub mod storage_supervisor;
