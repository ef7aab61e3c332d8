//! IoT Box Common - Shared types and constants
//!
//! This crate provides the foundational types used across all IoT Box components:
//! - Error types and error codes
//! - IO-Link master port and node addressing
//! - Common constants

pub mod error;
pub mod node;

// Re-exports for convenience
pub use error::{ErrorCode, IotBoxError};
pub use node::{PortId, pdi_node, product_name_node};

/// Number of ports on the IO-Link master
pub const PORT_COUNT: u8 = 8;

/// XML namespace of IODD 1.1 documents and the standard unit definitions
pub const IODD_NAMESPACE: &str = "http://www.io-link.com/IODD/2010/10";

/// File name of the IODD collection index
pub const COLLECTION_INDEX_FILE: &str = "iodd_collection_index.json";

/// File name of the IODD standard unit definitions
pub const UNIT_DEFINITIONS_FILE: &str = "IODD-StandardUnitDefinitions1.1.xml";

/// Unit abbreviation used when an information point carries no unit code
pub const UNIT_NOT_AVAILABLE: &str = "N/A";

/// Value written to float list columns for readings that could not be decoded
pub const MISSING_VALUE: f64 = -1.0;

/// Master client kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MasterKind {
    #[default]
    OpcUa,
    IotCore,
}

impl MasterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MasterKind::OpcUa => "opcua",
            MasterKind::IotCore => "iotcore",
        }
    }
}

impl std::fmt::Display for MasterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MasterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "opcua" | "opc-ua" => Ok(MasterKind::OpcUa),
            "iotcore" | "iot-core" => Ok(MasterKind::IotCore),
            _ => Err(format!("Invalid master kind: {}", s)),
        }
    }
}
