//! Unit tests for ghe-restore-core.

pub mod orchestrator;
pub mod validation;
pub mod version_gate;
