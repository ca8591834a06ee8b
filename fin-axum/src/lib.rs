//! fin-axum: HTTP surface for the fin job engine.
//!
//! Mounts the operator dashboard over a [`fin_jobs::QueueService`] and
//! renders control-plane errors as Feathers-style JSON.

pub mod app;
pub mod dashboard;
pub mod state;
mod error;
pub use error::{DashboardError, ErrorKind};
pub use state::DashboardState;

pub use app::DashboardApp;
pub use dashboard::dashboard_router;
