//! Small shared helpers with no natural home in a single review-pipeline
//! crate.
//!
//! Currently just stable deterministic IDs (correlation IDs for checkpoints
//! and job submissions need to be the same across a crash/restart, so they
//! can't be `Uuid::new_v4`).

pub mod uuid;
