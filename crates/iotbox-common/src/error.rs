//! Error types and error codes for IoT Box
//!
//! This module defines:
//! - `IotBoxError`: Application-specific error enum
//! - `ErrorCode`: Structured error codes for API responses

use serde::{Deserialize, Serialize};

/// Application-specific error types
#[derive(thiserror::Error, Debug)]
pub enum IotBoxError {
    #[error("caused: {0}")]
    IllegalArgument(String),

    #[error("IODD collection @ {collection} does not contain IODD for sensor {sensor}")]
    IoddNotFound { sensor: String, collection: String },

    #[error("failed to parse IODD {file}: {reason}")]
    IoddParse { file: String, reason: String },

    #[error("IODD StandardUnitDefinitions file not found at: {0}")]
    UnitDefinitionsMissing(String),

    #[error("master error: {0}")]
    MasterError(String),

    #[error("port {0} has no sensor connected")]
    PortNotConnected(u8),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    InternalError(String),

    #[error("{2}")]
    ApiError(i32, i32, String, String),
}

/// Error code structure for API responses
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ErrorCode<'a> {
    pub code: i32,
    pub message: &'a str,
}

pub const SUCCESS: ErrorCode<'static> = ErrorCode {
    code: 0,
    message: "success",
};

pub const PARAMETER_MISSING: ErrorCode<'static> = ErrorCode {
    code: 10000,
    message: "parameter missing",
};

pub const DATA_ACCESS_ERROR: ErrorCode<'static> = ErrorCode {
    code: 10002,
    message: "data access error",
};

pub const PARAMETER_VALIDATE_ERROR: ErrorCode<'static> = ErrorCode {
    code: 20002,
    message: "parameter validate error",
};

pub const RESOURCE_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 20004,
    message: "resource not found",
};

pub const IODD_NOT_FOUND: ErrorCode<'static> = ErrorCode {
    code: 24000,
    message: "IODD not found",
};

pub const IODD_INVALID: ErrorCode<'static> = ErrorCode {
    code: 24001,
    message: "IODD file invalid",
};

pub const IMPORT_FILE_INVALID: ErrorCode<'static> = ErrorCode {
    code: 24002,
    message: "IODD archive invalid",
};

pub const FETCHER_DISABLED: ErrorCode<'static> = ErrorCode {
    code: 24003,
    message: "IODD fetcher disabled",
};

pub const MASTER_UNAVAILABLE: ErrorCode<'static> = ErrorCode {
    code: 25000,
    message: "IO-Link master unavailable",
};

pub const SERVER_ERROR: ErrorCode<'static> = ErrorCode {
    code: 30000,
    message: "server error",
};
