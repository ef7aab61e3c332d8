//! IoT Box Master - IO-Link master acquisition
//!
//! This crate provides:
//! - The `MasterClient` abstraction with OPC-UA and ifm IoT-core implementations
//! - The poller that tracks port connectivity and records decoded readings
//! - The OPC-UA value bridge
//! - Acquisition metrics

pub mod bridge;
pub mod client;
pub mod metrics;
pub mod poller;

pub use bridge::{Bridge, BridgeMapping, ConversionRule, NodeAccess, OpcUaNodeAccess};
pub use client::{
    ConnectedSensor, DeviceName, IotCoreMasterClient, MasterClient, OpcUaMasterClient,
    create_client, find_connected_sensors,
};
pub use metrics::{METRICS, Metrics};
pub use poller::{AcquisitionState, PortState, Poller};
