//! Server configuration model

pub mod config;

pub use config::Configuration;
