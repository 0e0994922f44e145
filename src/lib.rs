//! Certification lifecycle engine for the Good Agricultural and Collection
//! Practices (GACP) standard.
//!
//! The crate is organized around the `workflows::certification` module, which
//! owns the application aggregate, the legal-move state machine, field-audit
//! scoring, and certificate issuance. Everything else (config, telemetry,
//! HTTP error mapping) is plumbing around that core.

pub mod config;
pub mod error;
pub mod telemetry;
pub mod workflows;
