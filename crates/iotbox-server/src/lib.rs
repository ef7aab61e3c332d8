//! IoT Box Server - startup, configuration and logging
//!
//! The `iotbox-server` binary wires the acquisition poller, the optional value
//! bridge and the dashboard API together.

pub mod model;
pub mod startup;
