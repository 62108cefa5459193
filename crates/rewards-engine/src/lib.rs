//! Rewards engine library: eligibility and tier resolution for agent reward
//! programs, plus the configuration, telemetry, and error plumbing shared
//! with the HTTP service.

pub mod config;
pub mod engine;
pub mod error;
pub mod telemetry;
