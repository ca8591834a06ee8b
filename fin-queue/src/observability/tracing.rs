//! Process-wide log subscriber.

use tracing_subscriber::EnvFilter;

use crate::{QueueError, QueueResult};

/// Install the global subscriber. `RUST_LOG` drives filtering (default `info`);
/// `json` switches to one JSON object per line.
///
/// Returns an error if a subscriber is already installed.
pub fn init_tracing(json: bool) -> QueueResult<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };

    result.map_err(|e| QueueError::Internal(format!("Failed to install tracing subscriber: {}", e)))
}
