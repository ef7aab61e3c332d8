//! Domain model types for the persistence layer
//!
//! These types are returned from the persistence traits, decoupled from the
//! SeaORM entities.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize, Serializer};

use iotbox_common::PortId;

use crate::entity::{port_connection, reading};
use crate::list_codec::{FloatList, StringList};

/// Format of reading timestamps
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

fn serialize_time<S: Serializer>(time: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&time.format(TIME_FORMAT).to_string())
}

/// Connection state of one master port
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortConnection {
    pub port: u8,
    pub connected: bool,
    pub sensor: Option<String>,
    #[serde(serialize_with = "serialize_time")]
    pub updated_at: NaiveDateTime,
}

impl From<port_connection::Model> for PortConnection {
    fn from(model: port_connection::Model) -> Self {
        Self {
            port: model.id as u8,
            connected: model.connected,
            sensor: model.sensor,
            updated_at: model.updated_at,
        }
    }
}

/// A recorded set of sensor values
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub id: i32,
    pub port: u8,
    #[serde(serialize_with = "serialize_time")]
    pub time: NaiveDateTime,
    pub sensor: String,
    pub ips: Vec<String>,
    pub readings: Vec<f64>,
    pub lower_limits: Vec<f64>,
    pub upper_limits: Vec<f64>,
    pub units: Vec<String>,
}

impl TryFrom<reading::Model> for Reading {
    type Error = anyhow::Error;

    fn try_from(model: reading::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            id: model.id,
            port: model.port as u8,
            time: model.time,
            sensor: model.sensor,
            ips: StringList::decode(&model.ips).into_inner(),
            readings: FloatList::decode(&model.readings)?.into_inner(),
            lower_limits: FloatList::decode(&model.lower_limits)?.into_inner(),
            upper_limits: FloatList::decode(&model.upper_limits)?.into_inner(),
            units: StringList::decode(&model.units).into_inner(),
        })
    }
}

/// Values to record for a port
#[derive(Clone, Debug, PartialEq)]
pub struct NewReading {
    pub port: PortId,
    pub time: NaiveDateTime,
    pub sensor: String,
    pub ips: Vec<String>,
    pub readings: Vec<Option<f64>>,
    pub lower_limits: Vec<Option<f64>>,
    pub upper_limits: Vec<Option<f64>>,
    pub units: Vec<String>,
}

/// Generic paginated result
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub total_count: u64,
    pub page_number: u64,
    pub pages_available: u64,
    pub page_items: Vec<T>,
}

impl<T> Page<T> {
    pub fn new(total_count: u64, page_number: u64, page_size: u64, page_items: Vec<T>) -> Self {
        Self {
            total_count,
            page_number,
            pages_available: if page_size > 0 {
                total_count.div_ceil(page_size)
            } else {
                0
            },
            page_items,
        }
    }

    pub fn empty() -> Self {
        Self {
            total_count: 0,
            page_number: 0,
            pages_available: 0,
            page_items: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_new() {
        let page = Page::<String>::new(101, 1, 10, vec!["a".to_string()]);
        assert_eq!(page.total_count, 101);
        assert_eq!(page.page_number, 1);
        assert_eq!(page.pages_available, 11);
        assert_eq!(page.page_items.len(), 1);
    }

    #[test]
    fn test_page_empty() {
        let page = Page::<String>::empty();
        assert_eq!(page.total_count, 0);
        assert!(page.page_items.is_empty());
    }

    #[test]
    fn test_reading_from_model() {
        let time = NaiveDateTime::parse_from_str("2022-06-29 12:00:01.250000", TIME_FORMAT).unwrap();
        let model = reading::Model {
            id: 7,
            port: 3,
            time,
            sensor: "O5D100".to_string(),
            ips: "Distance,OUT2,OUT1".to_string(),
            readings: "1.234,0.0,1.0".to_string(),
            lower_limits: "0.03,-1.0,-1.0".to_string(),
            upper_limits: "2.0,-1.0,-1.0".to_string(),
            units: "m,N/A,N/A".to_string(),
        };

        let reading = Reading::try_from(model).unwrap();
        assert_eq!(reading.port, 3);
        assert_eq!(reading.readings, vec![1.234, 0.0, 1.0]);
        assert_eq!(reading.units, vec!["m", "N/A", "N/A"]);

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["time"], "2022-06-29 12:00:01.250000");
        assert_eq!(json["lowerLimits"][1], -1.0);
    }
}
