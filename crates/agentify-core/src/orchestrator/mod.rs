//! Orchestration
//!
//! Turns one free-text request into at most one validated plan against the
//! backend tool catalog.

pub mod catalog;
pub mod engine;
pub mod plan;

pub use engine::OrchestrationEngine;
pub use plan::{OrchestrationRequest, Plan, RequestContext};
