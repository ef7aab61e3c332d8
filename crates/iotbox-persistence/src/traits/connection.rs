//! Port connection persistence trait

use async_trait::async_trait;

use iotbox_common::PortId;

use crate::model::PortConnection;

#[async_trait]
pub trait ConnectionPersistence: Send + Sync {
    /// Find the connection state of every port, ordered by port
    async fn connection_find_all(&self) -> anyhow::Result<Vec<PortConnection>>;

    async fn connection_find(&self, port: PortId) -> anyhow::Result<Option<PortConnection>>;

    /// Store the connection state of a port
    async fn connection_update(
        &self,
        port: PortId,
        connected: bool,
        sensor: Option<&str>,
    ) -> anyhow::Result<()>;
}
