//! IoT Box Console - Dashboard backend
//!
//! This crate provides:
//! - Home, Monitor, IODD collection and Settings endpoints
//! - Health and Prometheus metrics endpoints
//! - Error to response mapping

pub mod error;
pub mod model;
pub mod v1;

pub use error::AppError;
pub use model::{ApiResult, AppState, Settings};
pub use v1::route::{index, routes as v1_routes};
