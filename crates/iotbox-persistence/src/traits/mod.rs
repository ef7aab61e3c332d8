//! Persistence traits
//!
//! The poller writes connection changes and readings through these traits, the
//! console reads them back.

pub mod connection;
pub mod reading;

pub use connection::ConnectionPersistence;
pub use reading::ReadingPersistence;

use async_trait::async_trait;

use iotbox_common::PortId;

/// Unified persistence service trait
#[async_trait]
pub trait PersistenceService: ConnectionPersistence + ReadingPersistence + Send + Sync {
    /// Create missing tables and seed one connection row per port.
    ///
    /// `reset_connections` marks every port as disconnected, readings of the ports in
    /// `reset_readings_for` are deleted.
    async fn init_schema(
        &self,
        port_count: u8,
        reset_connections: bool,
        reset_readings_for: &[PortId],
    ) -> anyhow::Result<()>;

    /// Health check for the storage backend
    async fn health_check(&self) -> anyhow::Result<()>;
}
