//! stt-gate Library
//!
//! Per-user, self-healing admission quota in front of a paid speech-to-text
//! API: the quota store and admission controller, background recovery, the
//! gated transcription pipeline, and the HTTP admission API.

pub mod api_server;
pub mod config;
pub mod metrics;
pub mod pipeline;
pub mod rate_limit;
