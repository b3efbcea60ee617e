use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// Backend-assigned identifier correlating a submitted prompt with its
/// streamed lifecycle events.
pub type PromptId = String;

/// Generated outputs grouped by the backend node that produced them.
///
/// Each node's sequence keeps the order reported by the backend.
pub type Artifacts = BTreeMap<String, Vec<Bytes>>;

/// Boxed error used at seams where callers supply their own error types.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

static NEXT_JOB_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique job identity.
///
/// Used as the key in both the transport's listener registry and the job
/// tracker, so registering the same job twice collapses to one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl JobId {
    /// Allocate the next unused id.
    pub fn next() -> Self {
        Self(NEXT_JOB_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique_and_increasing() {
        let a = JobId::next();
        let b = JobId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn job_id_display() {
        let id = JobId(42);
        assert_eq!(id.to_string(), "job-42");
        assert_eq!(id.as_u64(), 42);
    }
}
