//! ifm IoT-core JSON API client

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use iotbox_common::{IotBoxError, MasterKind, PortId};

use super::{DeviceName, MasterClient};

const CODE_OK: u16 = 200;
const CODE_SERVICE_UNAVAILABLE: u16 = 503;
const CODE_DATA_INVALID: u16 = 530;
const CODE_DATA_NOT_AVAILABLE: u16 = 531;

#[derive(Debug, Serialize)]
struct Request<'a> {
    code: &'a str,
    cid: u32,
    adr: String,
}

#[derive(Debug, Deserialize)]
struct Response {
    #[serde(default)]
    cid: Option<u32>,
    code: u16,
    #[serde(default)]
    data: Option<ResponseData>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    #[serde(default)]
    value: Value,
}

/// Outcome of a `getdata` service call
#[derive(Debug, PartialEq)]
enum GetData {
    Value(Value),
    NotConnected,
    NoData,
}

fn product_name_address(port: PortId) -> String {
    format!("/iolinkmaster/port[{}]/iolinkdevice/productname/getdata", port)
}

fn pdin_address(port: PortId) -> String {
    format!("/iolinkmaster/port[{}]/iolinkdevice/pdin/getdata", port)
}

fn interpret(response: Response, adr: &str) -> anyhow::Result<GetData> {
    match response.code {
        CODE_OK => Ok(GetData::Value(
            response.data.map(|d| d.value).unwrap_or(Value::Null),
        )),
        CODE_SERVICE_UNAVAILABLE => Ok(GetData::NotConnected),
        CODE_DATA_INVALID | CODE_DATA_NOT_AVAILABLE => Ok(GetData::NoData),
        code => Err(IotBoxError::MasterError(format!(
            "IoT-core request {} (cid {:?}) failed with code {}",
            adr, response.cid, code
        ))
        .into()),
    }
}

fn device_name_from(data: GetData) -> DeviceName {
    match data {
        GetData::Value(Value::String(name)) => DeviceName::Present(name),
        GetData::Value(Value::Null) | GetData::NoData => DeviceName::NoData,
        GetData::Value(other) => DeviceName::Present(other.to_string()),
        GetData::NotConnected => DeviceName::NotConnected,
    }
}

fn process_data_from(port: PortId, data: GetData) -> anyhow::Result<Vec<u8>> {
    match data {
        GetData::Value(Value::String(hex)) => const_hex::decode(hex.trim()).map_err(|e| {
            IotBoxError::MasterError(format!("invalid process data of port {}: {}", port, e))
                .into()
        }),
        GetData::NotConnected => Err(IotBoxError::PortNotConnected(port.get()).into()),
        GetData::NoData | GetData::Value(Value::Null) => Err(IotBoxError::MasterError(format!(
            "port {} returned no process data",
            port
        ))
        .into()),
        GetData::Value(other) => Err(IotBoxError::MasterError(format!(
            "unexpected process data of port {}: {}",
            port, other
        ))
        .into()),
    }
}

/// Client for the JSON API of ifm IO-Link masters
pub struct IotCoreMasterClient {
    client: reqwest::Client,
    url: String,
    cid: AtomicU32,
}

impl IotCoreMasterClient {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            cid: AtomicU32::new(1),
        })
    }

    async fn get_data(&self, adr: String) -> anyhow::Result<GetData> {
        let request = Request {
            code: "request",
            cid: self.cid.fetch_add(1, Ordering::Relaxed),
            adr,
        };
        debug!("IoT-core request {} (cid {})", request.adr, request.cid);

        let response: Response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;
        interpret(response, &request.adr)
    }
}

#[async_trait]
impl MasterClient for IotCoreMasterClient {
    fn kind(&self) -> MasterKind {
        MasterKind::IotCore
    }

    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn read_product_name(&self, port: PortId) -> anyhow::Result<DeviceName> {
        let data = self.get_data(product_name_address(port)).await?;
        Ok(device_name_from(data))
    }

    async fn read_process_data(&self, port: PortId) -> anyhow::Result<Vec<u8>> {
        let data = self.get_data(pdin_address(port)).await?;
        process_data_from(port, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> Response {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_request_serialization() {
        let request = Request {
            code: "request",
            cid: 4,
            adr: product_name_address(PortId::new(2).unwrap()),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["code"], "request");
        assert_eq!(json["cid"], 4);
        assert_eq!(
            json["adr"],
            "/iolinkmaster/port[2]/iolinkdevice/productname/getdata"
        );
    }

    #[test]
    fn test_product_name_response() {
        let data = interpret(
            response(r#"{"cid":1,"data":{"value":"O5D100"},"code":200}"#),
            "adr",
        )
        .unwrap();
        assert_eq!(
            device_name_from(data),
            DeviceName::Present("O5D100".to_string())
        );

        let data = interpret(response(r#"{"cid":2,"code":503}"#), "adr").unwrap();
        assert_eq!(device_name_from(data), DeviceName::NotConnected);

        let data = interpret(response(r#"{"cid":3,"code":531}"#), "adr").unwrap();
        assert_eq!(device_name_from(data), DeviceName::NoData);

        assert!(interpret(response(r#"{"cid":4,"code":400}"#), "adr").is_err());
    }

    #[test]
    fn test_pdin_response() {
        let port = PortId::new(1).unwrap();
        let data = interpret(
            response(r#"{"cid":1,"data":{"value":"1349"},"code":200}"#),
            "adr",
        )
        .unwrap();
        assert_eq!(process_data_from(port, data).unwrap(), vec![0x13, 0x49]);

        let err = process_data_from(port, GetData::NotConnected).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<IotBoxError>(),
            Some(IotBoxError::PortNotConnected(1))
        ));

        let data = GetData::Value(Value::String("zz".to_string()));
        assert!(process_data_from(port, data).is_err());
    }

    #[test]
    fn test_new_trims_url() {
        let client = IotCoreMasterClient::new("http://192.168.1.250/", Duration::from_secs(1))
            .unwrap();
        assert_eq!(client.endpoint(), "http://192.168.1.250");
    }
}
