//! Domain types for crop-health analysis.
//!
//! Everything here is pure: masks and crops, affected-area policies, prompt
//! templates, diagnosis parsing, reports and status derivation. Model clients
//! live in `cropscan-models`; orchestration lives in `cropscan-pipeline`.

pub mod affected_area;
pub mod config;
pub mod diagnosis;
pub mod error;
pub mod frame;
pub mod input;
pub mod mask;
pub mod prompt;
pub mod report;
pub mod types;
