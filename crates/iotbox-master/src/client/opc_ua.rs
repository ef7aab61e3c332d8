//! OPC-UA master client
//!
//! The `opcua` client API is synchronous and drives its own runtime, so every call
//! runs on the blocking thread pool.

use std::sync::Arc;

use async_trait::async_trait;
use opcua::client::prelude::*;
use opcua::sync::RwLock;
use parking_lot::Mutex;
use tracing::{info, warn};

use iotbox_common::node::MASTER_NAMESPACE;
use iotbox_common::{IotBoxError, MasterKind, PortId, pdi_node, product_name_node};

use super::{DeviceName, MasterClient};

const APPLICATION_NAME: &str = "IoT Box";
const APPLICATION_URI: &str = "urn:iotbox:client";
const PRODUCT_URI: &str = "urn:iotbox";

/// Service results after which the session is dropped and reopened on the next call
const CONNECTION_STATUSES: &[StatusCode] = &[
    StatusCode::BadConnectionClosed,
    StatusCode::BadNotConnected,
    StatusCode::BadServerNotConnected,
    StatusCode::BadSessionClosed,
    StatusCode::BadSessionIdInvalid,
    StatusCode::BadCommunicationError,
    StatusCode::BadTimeout,
];

/// Lazily connected OPC-UA session
pub(crate) struct SessionSlot {
    endpoint: String,
    session: Mutex<Option<Arc<RwLock<Session>>>>,
}

impl SessionSlot {
    pub(crate) fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            session: Mutex::new(None),
        }
    }

    pub(crate) fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn session(&self) -> anyhow::Result<Arc<RwLock<Session>>> {
        let mut slot = self.session.lock();
        if let Some(session) = slot.as_ref() {
            return Ok(session.clone());
        }
        let session = connect(&self.endpoint)?;
        *slot = Some(session.clone());
        Ok(session)
    }

    /// Run a service call on the session. Blocks the current thread.
    pub(crate) fn call<T>(
        &self,
        f: impl FnOnce(&Session) -> Result<T, StatusCode>,
    ) -> anyhow::Result<T> {
        let session = self.session()?;
        let result = {
            let guard = session.read();
            f(&guard)
        };
        result.map_err(|status| {
            if CONNECTION_STATUSES.contains(&status) {
                warn!(
                    "OPC-UA session to {} lost ({}), reconnecting on next call",
                    self.endpoint, status
                );
                self.session.lock().take();
            }
            IotBoxError::MasterError(format!("{} from {}", status, self.endpoint)).into()
        })
    }

    pub(crate) fn disconnect(&self) {
        if let Some(session) = self.session.lock().take() {
            session.read().disconnect();
            info!("Disconnected from OPC-UA server {}", self.endpoint);
        }
    }
}

fn connect(endpoint: &str) -> anyhow::Result<Arc<RwLock<Session>>> {
    let mut client = ClientBuilder::new()
        .application_name(APPLICATION_NAME)
        .application_uri(APPLICATION_URI)
        .product_uri(PRODUCT_URI)
        .trust_server_certs(true)
        .create_sample_keypair(true)
        .session_retry_limit(3)
        .client()
        .ok_or_else(|| {
            IotBoxError::MasterError("invalid OPC-UA client configuration".to_string())
        })?;

    info!("Connecting to OPC-UA server {}", endpoint);
    client
        .connect_to_endpoint(
            (
                endpoint,
                SecurityPolicy::None.to_str(),
                MessageSecurityMode::None,
                UserTokenPolicy::anonymous(),
            ),
            IdentityToken::Anonymous,
        )
        .map_err(|status| {
            IotBoxError::MasterError(format!("connecting to {} failed: {}", endpoint, status))
                .into()
        })
}

pub(crate) fn read_node(session: &Session, node_id: NodeId) -> Result<DataValue, StatusCode> {
    let read = ReadValueId {
        node_id,
        attribute_id: AttributeId::Value as u32,
        index_range: UAString::null(),
        data_encoding: QualifiedName::null(),
    };
    let mut values = session.read(&[read], TimestampsToReturn::Neither, 0.0)?;
    values.pop().ok_or(StatusCode::BadNoData)
}

pub(crate) fn write_node(session: &Session, node_id: NodeId, value: f64) -> Result<(), StatusCode> {
    let write = WriteValue {
        node_id,
        attribute_id: AttributeId::Value as u32,
        index_range: UAString::null(),
        value: DataValue::value_only(Variant::Double(value)),
    };
    let results = session.write(&[write])?;
    match results.first() {
        Some(status) if status.is_bad() => Err(*status),
        _ => Ok(()),
    }
}

pub(crate) fn device_name_from(value: DataValue) -> anyhow::Result<DeviceName> {
    match value.status {
        Some(status) if status == StatusCode::BadNotConnected => {
            return Ok(DeviceName::NotConnected);
        }
        Some(status) if status == StatusCode::BadNoData => return Ok(DeviceName::NoData),
        Some(status) if status.is_bad() => {
            return Err(IotBoxError::MasterError(format!("reading product name: {}", status)).into());
        }
        _ => {}
    }
    match value.value {
        Some(Variant::String(name)) => Ok(DeviceName::Present(
            name.value().clone().unwrap_or_default(),
        )),
        Some(Variant::Empty) | None => Ok(DeviceName::NoData),
        Some(other) => Err(IotBoxError::MasterError(format!(
            "unexpected product name value {:?}",
            other
        ))
        .into()),
    }
}

pub(crate) fn bytes_from_variant(value: &Variant) -> Option<Vec<u8>> {
    match value {
        Variant::ByteString(bytes) => Some(bytes.value.clone().unwrap_or_default()),
        Variant::Byte(byte) => Some(vec![*byte]),
        Variant::Array(array) => array
            .values
            .iter()
            .map(|v| match v {
                Variant::Byte(b) => Some(*b),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn process_data_from(port: PortId, value: DataValue) -> anyhow::Result<Vec<u8>> {
    match value.status {
        Some(status) if status == StatusCode::BadNotConnected => {
            return Err(IotBoxError::PortNotConnected(port.get()).into());
        }
        Some(status) if status.is_bad() => {
            return Err(IotBoxError::MasterError(format!(
                "reading process data of port {}: {}",
                port, status
            ))
            .into());
        }
        _ => {}
    }
    value
        .value
        .as_ref()
        .and_then(bytes_from_variant)
        .ok_or_else(|| {
            IotBoxError::MasterError(format!("port {} returned no process data bytes", port)).into()
        })
}

/// Client for the OPC-UA server of the IO-Link master
pub struct OpcUaMasterClient {
    slot: Arc<SessionSlot>,
}

impl OpcUaMasterClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            slot: Arc::new(SessionSlot::new(endpoint)),
        }
    }

    async fn blocking<T, F>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&SessionSlot) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let slot = self.slot.clone();
        tokio::task::spawn_blocking(move || f(&slot)).await?
    }
}

impl Drop for OpcUaMasterClient {
    fn drop(&mut self) {
        if Arc::strong_count(&self.slot) == 1 {
            self.slot.disconnect();
        }
    }
}

#[async_trait]
impl MasterClient for OpcUaMasterClient {
    fn kind(&self) -> MasterKind {
        MasterKind::OpcUa
    }

    fn endpoint(&self) -> &str {
        self.slot.endpoint()
    }

    async fn read_product_name(&self, port: PortId) -> anyhow::Result<DeviceName> {
        let node_id = NodeId::new(MASTER_NAMESPACE, product_name_node(port));
        let value = self
            .blocking(move |slot| slot.call(|session| read_node(session, node_id)))
            .await?;
        device_name_from(value)
    }

    async fn read_process_data(&self, port: PortId) -> anyhow::Result<Vec<u8>> {
        let node_id = NodeId::new(MASTER_NAMESPACE, pdi_node(port));
        let value = self
            .blocking(move |slot| slot.call(|session| read_node(session, node_id)))
            .await?;
        process_data_from(port, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_value(value: Option<Variant>, status: Option<StatusCode>) -> DataValue {
        DataValue {
            value,
            status,
            ..Default::default()
        }
    }

    #[test]
    fn test_device_name_from_status() {
        let name = device_name_from(data_value(None, Some(StatusCode::BadNotConnected))).unwrap();
        assert_eq!(name, DeviceName::NotConnected);

        let name = device_name_from(data_value(None, Some(StatusCode::BadNoData))).unwrap();
        assert_eq!(name, DeviceName::NoData);

        assert!(device_name_from(data_value(None, Some(StatusCode::BadNodeIdUnknown))).is_err());
    }

    #[test]
    fn test_device_name_from_value() {
        let value = data_value(Some(Variant::String(UAString::from("O5D100"))), None);
        assert_eq!(
            device_name_from(value).unwrap(),
            DeviceName::Present("O5D100".to_string())
        );

        let value = data_value(Some(Variant::String(UAString::from(""))), Some(StatusCode::Good));
        assert_eq!(
            device_name_from(value).unwrap(),
            DeviceName::Present(String::new())
        );

        assert_eq!(
            device_name_from(data_value(None, None)).unwrap(),
            DeviceName::NoData
        );
    }

    #[test]
    fn test_process_data_from_value() {
        let port = PortId::new(2).unwrap();
        let value = data_value(
            Some(Variant::ByteString(ByteString::from(vec![0x13, 0x49]))),
            None,
        );
        assert_eq!(process_data_from(port, value).unwrap(), vec![0x13, 0x49]);

        let value = data_value(None, Some(StatusCode::BadNotConnected));
        let err = process_data_from(port, value).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IotBoxError>(),
            Some(IotBoxError::PortNotConnected(2))
        ));

        let value = data_value(Some(Variant::Double(1.0)), None);
        assert!(process_data_from(port, value).is_err());
    }
}
