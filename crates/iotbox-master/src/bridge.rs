//! OPC-UA value bridge
//!
//! Reads raw byte array nodes from a source server, converts a byte window of each
//! into an engineering value and writes it as a double to a node of a target server.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opcua::types::NodeId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use iotbox_common::IotBoxError;

use crate::client::opc_ua::{SessionSlot, bytes_from_variant, read_node, write_node};
use crate::metrics::METRICS;

pub const DEFAULT_BRIDGE_INTERVAL: Duration = Duration::from_secs(10);

/// Widest window that fits a signed 64 bit integer
const MAX_WINDOW_BYTES: usize = 8;

fn default_scale() -> f64 {
    1.0
}

/// Conversion of a byte window into a real value:
/// `signed_big_endian(bytes[start..end]) / 2^right_shift_bits * gradient * scale`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRule {
    pub start: usize,
    pub end: usize,
    #[serde(default)]
    pub right_shift_bits: u32,
    pub gradient: f64,
    /// Unit conversion factor, e.g. `0.0254` for inch to metre
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl ConversionRule {
    pub fn validate(&self) -> Result<(), IotBoxError> {
        let width = self.end.saturating_sub(self.start);
        if width == 0 || width > MAX_WINDOW_BYTES {
            return Err(IotBoxError::IllegalArgument(format!(
                "byte window {}..{} must cover 1 to {} bytes",
                self.start, self.end, MAX_WINDOW_BYTES
            )));
        }
        Ok(())
    }

    /// `None` when the value is shorter than the window.
    pub fn convert(&self, bytes: &[u8]) -> Option<f64> {
        let window = bytes.get(self.start..self.end)?;
        let first = *window.first()?;
        if window.len() > MAX_WINDOW_BYTES {
            return None;
        }

        let mut raw: i64 = if first & 0x80 != 0 { -1 } else { 0 };
        for byte in window {
            raw = (raw << 8) | i64::from(*byte);
        }
        let shifted = raw as f64 / 2f64.powi(self.right_shift_bits as i32);
        Some(shifted * self.gradient * self.scale)
    }
}

/// Source node to target node, node ids in the `ns=<idx>;<type>=<id>` notation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeMapping {
    pub source: String,
    pub target: String,
    pub rule: ConversionRule,
}

/// Reading and writing nodes of one server
#[async_trait]
pub trait NodeAccess: Send + Sync {
    async fn read_bytes(&self, node: &str) -> anyhow::Result<Vec<u8>>;

    async fn write_f64(&self, node: &str, value: f64) -> anyhow::Result<()>;
}

fn parse_node_id(node: &str) -> Result<NodeId, IotBoxError> {
    NodeId::from_str(node)
        .map_err(|_| IotBoxError::IllegalArgument(format!("invalid node id {}", node)))
}

/// [`NodeAccess`] over an OPC-UA session
pub struct OpcUaNodeAccess {
    slot: Arc<SessionSlot>,
}

impl OpcUaNodeAccess {
    pub fn new(endpoint: &str) -> Self {
        Self {
            slot: Arc::new(SessionSlot::new(endpoint)),
        }
    }

    pub fn endpoint(&self) -> &str {
        self.slot.endpoint()
    }
}

impl Drop for OpcUaNodeAccess {
    fn drop(&mut self) {
        if Arc::strong_count(&self.slot) == 1 {
            self.slot.disconnect();
        }
    }
}

#[async_trait]
impl NodeAccess for OpcUaNodeAccess {
    async fn read_bytes(&self, node: &str) -> anyhow::Result<Vec<u8>> {
        let node_id = parse_node_id(node)?;
        let slot = self.slot.clone();
        let value = tokio::task::spawn_blocking(move || {
            slot.call(|session| read_node(session, node_id))
        })
        .await??;

        if let Some(status) = value.status.filter(|s| s.is_bad()) {
            anyhow::bail!(IotBoxError::MasterError(format!("reading {}: {}", node, status)));
        }
        value
            .value
            .as_ref()
            .and_then(bytes_from_variant)
            .ok_or_else(|| {
                IotBoxError::MasterError(format!("node {} holds no byte array", node)).into()
            })
    }

    async fn write_f64(&self, node: &str, value: f64) -> anyhow::Result<()> {
        let node_id = parse_node_id(node)?;
        let slot = self.slot.clone();
        tokio::task::spawn_blocking(move || {
            slot.call(|session| write_node(session, node_id, value))
        })
        .await?
    }
}

pub struct Bridge {
    source: Arc<dyn NodeAccess>,
    target: Arc<dyn NodeAccess>,
    mappings: Vec<BridgeMapping>,
    interval: Duration,
}

impl Bridge {
    pub fn new(
        source: Arc<dyn NodeAccess>,
        target: Arc<dyn NodeAccess>,
        mappings: Vec<BridgeMapping>,
    ) -> anyhow::Result<Self> {
        for mapping in &mappings {
            parse_node_id(&mapping.source)?;
            parse_node_id(&mapping.target)?;
            mapping.rule.validate()?;
        }
        Ok(Self {
            source,
            target,
            mappings,
            interval: DEFAULT_BRIDGE_INTERVAL,
        })
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn mappings(&self) -> &[BridgeMapping] {
        &self.mappings
    }

    async fn transfer(&self, mapping: &BridgeMapping) -> anyhow::Result<f64> {
        let bytes = self.source.read_bytes(&mapping.source).await?;
        let value = mapping.rule.convert(&bytes).ok_or_else(|| {
            IotBoxError::IllegalArgument(format!(
                "{} returned {} bytes, window is {}..{}",
                mapping.source,
                bytes.len(),
                mapping.rule.start,
                mapping.rule.end
            ))
        })?;
        self.target.write_f64(&mapping.target, value).await?;
        Ok(value)
    }

    /// Transfer every mapping once. Returns the number of values written.
    pub async fn transfer_once(&self) -> usize {
        let mut written = 0;
        for mapping in &self.mappings {
            match self.transfer(mapping).await {
                Ok(value) => {
                    debug!("Bridged {} -> {} = {}", mapping.source, mapping.target, value);
                    METRICS.inc_bridge_writes();
                    written += 1;
                }
                Err(e) => {
                    METRICS.inc_bridge_errors();
                    warn!("Bridging {} -> {} failed: {}", mapping.source, mapping.target, e);
                }
            }
        }
        written
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Bridging {} node(s) every {:?}",
            self.mappings.len(),
            self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Bridge stopped");
                    break;
                }
                _ = ticker.tick() => {
                    self.transfer_once().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use parking_lot::Mutex;

    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {}, got {}",
            expected,
            actual
        );
    }

    fn rule(right_shift_bits: u32, gradient: f64, scale: f64) -> ConversionRule {
        ConversionRule {
            start: 0,
            end: 2,
            right_shift_bits,
            gradient,
            scale,
        }
    }

    #[test]
    fn test_convert_pressure() {
        // 256 >> 4 = 16, 16 * 0.01
        assert_close(rule(4, 0.01, 1.0).convert(&[0x01, 0x00, 0xAA, 0xBB]).unwrap(), 0.16);
    }

    #[test]
    fn test_convert_scaled() {
        // 1000 * 0.01 * 0.0254
        assert_close(rule(0, 0.01, 0.0254).convert(&[0x03, 0xE8]).unwrap(), 0.254);
    }

    #[test]
    fn test_convert_signed() {
        assert_close(rule(0, 0.1, 1.0).convert(&[0xFF, 0x38]).unwrap(), -20.0);
    }

    #[test]
    fn test_convert_short_buffer() {
        assert!(rule(0, 1.0, 1.0).convert(&[0x01]).is_none());
    }

    #[test]
    fn test_rule_validate() {
        assert!(rule(0, 1.0, 1.0).validate().is_ok());
        let empty = ConversionRule {
            start: 2,
            end: 2,
            ..rule(0, 1.0, 1.0)
        };
        assert!(empty.validate().is_err());
        let wide = ConversionRule {
            start: 0,
            end: 9,
            ..rule(0, 1.0, 1.0)
        };
        assert!(wide.validate().is_err());
    }

    #[test]
    fn test_mapping_deserialize_defaults() {
        let mapping: BridgeMapping = serde_json::from_str(
            r#"{"source":"ns=6;i=32824","target":"ns=2;s=Port 1","rule":{"start":0,"end":2,"gradient":0.1}}"#,
        )
        .unwrap();
        assert_eq!(mapping.rule.right_shift_bits, 0);
        assert_eq!(mapping.rule.scale, 1.0);
    }

    #[derive(Default)]
    struct FakeNodes {
        values: Mutex<HashMap<String, Vec<u8>>>,
        written: Mutex<HashMap<String, f64>>,
    }

    #[async_trait]
    impl NodeAccess for FakeNodes {
        async fn read_bytes(&self, node: &str) -> anyhow::Result<Vec<u8>> {
            self.values
                .lock()
                .get(node)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("unknown node {}", node))
        }

        async fn write_f64(&self, node: &str, value: f64) -> anyhow::Result<()> {
            self.written.lock().insert(node.to_string(), value);
            Ok(())
        }
    }

    fn mapping(source: &str, target: &str) -> BridgeMapping {
        BridgeMapping {
            source: source.to_string(),
            target: target.to_string(),
            rule: rule(0, 0.1, 1.0),
        }
    }

    #[tokio::test]
    async fn test_transfer_once() {
        let source = Arc::new(FakeNodes::default());
        source
            .values
            .lock()
            .insert("ns=6;i=163896".to_string(), vec![0x00, 0xFA]);
        let target = Arc::new(FakeNodes::default());

        let bridge = Bridge::new(
            source,
            target.clone(),
            vec![
                mapping("ns=6;i=163896", "ns=2;s=Port 3"),
                mapping("ns=6;i=32824", "ns=2;s=Port 1"),
            ],
        )
        .unwrap();

        // the second source node is unknown and only counts as an error
        assert_eq!(bridge.transfer_once().await, 1);
        let written = target.written.lock();
        assert_close(written["ns=2;s=Port 3"], 25.0);
        assert!(!written.contains_key("ns=2;s=Port 1"));
    }

    #[test]
    fn test_new_rejects_invalid_node_id() {
        let nodes: Arc<dyn NodeAccess> = Arc::new(FakeNodes::default());
        let result = Bridge::new(
            nodes.clone(),
            nodes,
            vec![mapping("not a node id", "ns=2;s=Port 1")],
        );
        assert!(result.is_err());
    }
}
