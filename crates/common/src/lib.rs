//! Common utilities, types, and configurations shared across Cohort crates.
//!
//! This crate contains the base building blocks for the Cohort system, including:
//! - **Configuration**: Strongly typed application configuration (`config`).
//! - **Log hygiene**: Query redaction and truncation for log lines (`scrubber`).
//! - **Resilience**: Async retry with backoff for best-effort writes (`retry`).
//! - **Telemetry**: Observability setup (`telemetry`).
pub mod config;
pub mod retry;
pub mod scrubber;
pub mod telemetry;
