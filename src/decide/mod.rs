//! Rebuild decisions and their audit report

pub mod audit;
pub mod engine;

pub use audit::{audit_value, render_audit, AUDIT_SCHEMA_VERSION};
pub use engine::DecisionEngine;
