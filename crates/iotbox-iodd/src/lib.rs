//! IoT Box IODD - IO Device Description handling
//!
//! This crate provides:
//! - IODD 1.1 parsing into information points
//! - Raw process data to engineering value conversion
//! - IODD standard unit definitions
//! - The on-disk IODD collection and its JSON index
//! - Archive import and remote fetching to grow the collection

pub mod collection;
pub mod fetcher;
pub mod information_point;
pub mod parser;
pub mod units;

mod xml;

pub use collection::{IndexEntry, IoddCollection};
pub use fetcher::{AcquireReport, HttpArchiveFetcher, IoddFetcher, acquire};
pub use information_point::{DataType, InformationPoint};
pub use parser::Iodd;
pub use units::UnitDefinitions;
