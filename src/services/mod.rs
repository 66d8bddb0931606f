/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Expiry sweep for abandoned sessions.
pub mod session_gc;
/// Session create, lookup, merge and deactivation.
pub mod session_service;
/// Push channel over Server-Sent Events.
pub mod sse_service;
/// Storage connection supervisor with reconnect backoff.
pub mod storage_supervisor;
