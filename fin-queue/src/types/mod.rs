pub mod ids;
pub mod options;
pub mod record;
pub mod stats;
pub mod events;

pub use ids::{JobId, LeaseToken};
pub use options::{Backoff, JobOptions};
pub use record::{Admission, CleanState, JobOutcome, JobRecord, JobState, LeasedJob};
pub use stats::QueueStats;
pub use events::JobEvent;

/// Convert a std duration for timestamp arithmetic, saturating on overflow
pub(crate) fn chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}
