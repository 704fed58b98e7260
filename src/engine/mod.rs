//! Check orchestration engine.
//!
//! Checks are grouped, selected by label expression, run behind lifecycle
//! hooks and recorded against the catalog.

pub mod check;
pub mod group;
pub mod guard;
pub mod labels;
pub mod orchestrator;
pub mod result;
pub mod signals;
