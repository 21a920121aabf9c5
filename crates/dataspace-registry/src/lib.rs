//! Dataspace participant registry: onboarding state machine, verification pipeline and
//! the HTTP surface used to submit and inspect registrations.

pub mod config;
pub mod error;
pub mod registration;
pub mod telemetry;
