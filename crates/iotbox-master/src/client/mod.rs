//! IO-Link master clients
//!
//! A master publishes the product name and the raw process data input of every port.
//! Both the OPC-UA server of the master and the ifm IoT-core JSON API expose the
//! same data, so the poller works against the [`MasterClient`] trait.

mod iot_core;
pub(crate) mod opc_ua;

pub use self::iot_core::IotCoreMasterClient;
pub use self::opc_ua::OpcUaMasterClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use iotbox_common::{MasterKind, PortId};

/// Result of reading the product name of a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceName {
    Present(String),
    /// Nothing attached to the port
    NotConnected,
    /// A device is attached but has no readable name, e.g. a non IO-Link sensor
    NoData,
}

#[async_trait]
pub trait MasterClient: Send + Sync {
    fn kind(&self) -> MasterKind;

    fn endpoint(&self) -> &str;

    async fn read_product_name(&self, port: PortId) -> anyhow::Result<DeviceName>;

    /// Raw process data input bytes of a port
    async fn read_process_data(&self, port: PortId) -> anyhow::Result<Vec<u8>>;
}

/// Create the client for the configured master kind.
pub fn create_client(
    kind: MasterKind,
    url: &str,
    timeout: Duration,
) -> anyhow::Result<Arc<dyn MasterClient>> {
    let client: Arc<dyn MasterClient> = match kind {
        MasterKind::OpcUa => Arc::new(OpcUaMasterClient::new(url)),
        MasterKind::IotCore => Arc::new(IotCoreMasterClient::new(url, timeout)?),
    };
    Ok(client)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedSensor {
    pub port: PortId,
    pub name: Option<String>,
}

/// Read the product name of every port.
pub async fn find_connected_sensors(
    client: &dyn MasterClient,
    ports: &[PortId],
) -> anyhow::Result<Vec<ConnectedSensor>> {
    let mut sensors = Vec::with_capacity(ports.len());
    for port in ports {
        let name = match client.read_product_name(*port).await? {
            DeviceName::Present(name) => {
                debug!("Sensor {} connected to port {}", name, port);
                Some(name)
            }
            DeviceName::NotConnected => {
                debug!("No sensor connected to port {}", port);
                None
            }
            DeviceName::NoData => {
                debug!(
                    "Sensor connected to port {}, but name could not be read. \
                     Might be due to non IO-Link sensor connection.",
                    port
                );
                None
            }
        };
        sensors.push(ConnectedSensor { port: *port, name });
    }
    Ok(sensors)
}


#[cfg(test)]
mod tests {
    use super::testing::FakeMaster;
    use super::*;

    #[tokio::test]
    async fn test_find_connected_sensors() {
        let master = FakeMaster::default();
        master.attach(1, "O5D100", vec![0x00, 0x00]);
        master.set_name(3, DeviceName::NoData);

        let sensors = find_connected_sensors(&master, &PortId::all(4)).await.unwrap();
        assert_eq!(sensors.len(), 4);
        assert_eq!(sensors[0].name.as_deref(), Some("O5D100"));
        assert!(sensors[1].name.is_none());
        assert!(sensors[2].name.is_none());
        assert_eq!(sensors[3].port.get(), 4);
    }

    #[test]
    fn test_create_client() {
        let client = create_client(
            MasterKind::IotCore,
            "http://192.168.1.250",
            Duration::from_secs(2),
        )
        .unwrap();
        assert_eq!(client.kind(), MasterKind::IotCore);
        assert_eq!(client.endpoint(), "http://192.168.1.250");

        let client = create_client(
            MasterKind::OpcUa,
            "opc.tcp://192.168.1.250:4840",
            Duration::from_secs(2),
        )
        .unwrap();
        assert_eq!(client.kind(), MasterKind::OpcUa);
    }
}
