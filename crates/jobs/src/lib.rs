//! Job lifecycle for generation requests.
//!
//! A job submits one request to the backend, follows its progress on the
//! shared event stream, and returns the generated artifacts. This crate
//! provides:
//!
//! - [`ComfyJob`]: the event-driven state machine for backend prompts.
//! - [`ExternalJob`]: wraps a single future for externally hosted tasks.
//! - [`JobTracker`]: process-wide registry of running jobs, used for
//!   shutdown announcements.
//! - [`Dispatcher`]: the entry point callers use to run either kind.

pub mod comfy_job;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod external;
pub mod job;
pub mod retrieval;
pub mod throttle;
pub mod tracker;

pub use comfy_job::ComfyJob;
pub use config::JobConfig;
pub use dispatcher::Dispatcher;
pub use error::{JobError, RetrievalError};
pub use external::ExternalJob;
pub use job::{run_job, Job, JobState, JobStatus};
pub use tracker::JobTracker;
