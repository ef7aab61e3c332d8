//! IoT Box Persistence - Database entities and persistence layer
//!
//! This crate provides:
//! - SeaORM entity definitions for port connections and readings
//! - Persistence trait abstractions
//! - The SQLite backend and connection helper
//! - The list codec used for list valued columns

pub mod entity;
pub mod list_codec;
pub mod model;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

// Re-export persistence traits
pub use traits::{ConnectionPersistence, PersistenceService, ReadingPersistence};

// Re-export SQL backend
pub use sql::{DbPoolOptions, SqlitePersistService, connect};

// Re-export model types
pub use list_codec::{FloatList, StringList};
pub use model::{NewReading, Page, PortConnection, Reading, TIME_FORMAT};
