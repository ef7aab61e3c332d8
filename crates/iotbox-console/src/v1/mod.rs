//! Dashboard API handlers
//!
//! One module per dashboard view plus the health and metrics endpoints.

pub mod collection;
pub mod health;
pub mod home;
pub mod metrics;
pub mod monitor;
pub mod route;
pub mod settings;
