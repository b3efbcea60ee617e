//! Shared types for the comfybot workspace.
//!
//! Holds the identifiers and artifact containers that flow between the
//! transport, job and worker crates, plus the progress-sink and
//! output-surface traits that callers implement to receive updates.

pub mod progress;
pub mod types;
