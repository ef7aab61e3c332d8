//! IO-Link master port addressing
//!
//! Ports are numbered from 1 like on the master housing. The OPC-UA server of the
//! master publishes every port below `IOLM/Port {n}/Attached Device` in namespace 1.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{PORT_COUNT, error::IotBoxError};

/// Namespace index of the IO-Link master address space
pub const MASTER_NAMESPACE: u16 = 1;

/// A validated master port number (1-based)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct PortId(u8);

impl PortId {
    pub fn new(port: u8) -> Result<Self, IotBoxError> {
        if port == 0 || port > PORT_COUNT {
            return Err(IotBoxError::IllegalArgument(format!(
                "port must be between 1 and {}, got {}",
                PORT_COUNT, port
            )));
        }
        Ok(PortId(port))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// All ports of a master with `count` ports, capped at `PORT_COUNT`
    pub fn all(count: u8) -> Vec<PortId> {
        (1..=count.min(PORT_COUNT)).map(PortId).collect()
    }
}

impl TryFrom<u8> for PortId {
    type Error = IotBoxError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        PortId::new(value)
    }
}

impl From<PortId> for u8 {
    fn from(value: PortId) -> Self {
        value.0
    }
}

impl Display for PortId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// String identifier of the product name variable of a port
pub fn product_name_node(port: PortId) -> String {
    format!("IOLM/Port {}/Attached Device/Product Name", port)
}

/// String identifier of the process data input byte array of a port
pub fn pdi_node(port: PortId) -> String {
    format!("IOLM/Port {}/Attached Device/PDI Data Byte Array", port)
}
