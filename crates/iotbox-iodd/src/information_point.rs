//! Information points and process data decoding
//!
//! An information point describes a single output value of a sensor and how the raw
//! process data from the master has to be processed to get the real value.
//!
//! Process data is transmitted big-endian. Bit offsets in the IODD are counted from the
//! least significant bit of the last byte, so offset 0 is the rightmost bit of the
//! buffer.

use serde::{Deserialize, Serialize};

/// Length of one block of process data in bits
pub const BLOCK_LENGTH: u32 = 8;

/// Datatype of an information point, taken from the `xsi:type` of its datatype
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    Boolean,
    #[default]
    UInteger,
    Integer,
    Float32,
    Other(String),
}

impl DataType {
    pub fn from_xsi_type(xsi_type: Option<&str>) -> Self {
        match xsi_type {
            Some("BooleanT") => DataType::Boolean,
            Some("UIntegerT") | None => DataType::UInteger,
            Some("IntegerT") => DataType::Integer,
            Some("Float32T") => DataType::Float32,
            Some(other) => DataType::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InformationPoint {
    pub name: String,
    pub bit_offset: u32,
    pub bit_length: u32,
    pub subindex: u32,
    pub data_type: DataType,
    pub low_val: Option<f64>,
    pub up_val: Option<f64>,
    pub gradient: Option<f64>,
    pub offset: Option<f64>,
    pub display_format: Option<String>,
    pub decimals: Option<u32>,
    pub unit_code: Option<u32>,
    pub units: String,
    pub value_indices: Vec<usize>,
}

impl InformationPoint {
    pub fn new(name: impl Into<String>, bit_offset: u32, bit_length: u32, subindex: u32) -> Self {
        Self {
            name: name.into(),
            bit_offset,
            bit_length,
            subindex,
            units: iotbox_common::UNIT_NOT_AVAILABLE.to_string(),
            ..Default::default()
        }
    }

    /// Derive the number of decimals from a display format like `Dec.2`.
    pub fn convert_display_format(&mut self) {
        self.decimals = self.display_format.as_deref().and_then(parse_display_format);
    }

    /// Compute the byte indices covering this point inside the process data.
    pub fn compute_value_indices(&mut self, total_bit_length: u32) -> Result<(), String> {
        let end = self.bit_offset.checked_add(self.bit_length).ok_or_else(|| {
            format!(
                "{}: bitOffset {} + bitLength {} overflows",
                self.name, self.bit_offset, self.bit_length
            )
        })?;
        let num_indices = if self.bit_length >= BLOCK_LENGTH && self.bit_length % BLOCK_LENGTH == 0
        {
            self.bit_length / BLOCK_LENGTH
        } else {
            1
        };
        let start = total_bit_length.saturating_sub(end) / BLOCK_LENGTH;
        self.value_indices = (start..start + num_indices).map(|i| i as usize).collect();
        Ok(())
    }

    /// Raw value of the point, interpreted according to its datatype.
    pub fn raw_value(&self, bytes: &[u8], total_bit_length: u32) -> Option<f64> {
        let bits = extract_bits(bytes, total_bit_length, self.bit_offset, self.bit_length)?;
        let value = match self.data_type {
            DataType::Integer => sign_extend(bits, self.bit_length) as f64,
            DataType::Float32 if self.bit_length == 32 => f32::from_bits(bits as u32) as f64,
            _ => bits as f64,
        };
        Some(value)
    }

    /// Convert raw process data into the real value of this point.
    ///
    /// Returns `None` when the buffer does not cover the point.
    pub fn byte_to_real_value(&self, bytes: &[u8], total_bit_length: u32) -> Option<f64> {
        self.raw_value(bytes, total_bit_length)
            .map(|raw| self.scale(raw))
    }

    /// Lower bound of the value range in real units
    pub fn lower_limit(&self) -> Option<f64> {
        self.low_val.map(|v| self.scale(v))
    }

    /// Upper bound of the value range in real units
    pub fn upper_limit(&self) -> Option<f64> {
        self.up_val.map(|v| self.scale(v))
    }

    pub fn real_bounds(&self) -> (Option<f64>, Option<f64>) {
        (self.lower_limit(), self.upper_limit())
    }

    fn scale(&self, raw: f64) -> f64 {
        let value = raw * self.gradient.unwrap_or(1.0) + self.offset.unwrap_or(0.0);
        match self.decimals {
            Some(decimals) => round_to(value, decimals),
            None => value,
        }
    }
}

fn parse_display_format(format: &str) -> Option<u32> {
    match format.split_once('.') {
        Some(("Dec", decimals)) => decimals.parse().ok(),
        None if format == "Dec" => Some(0),
        _ => None,
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn sign_extend(bits: u64, bit_length: u32) -> i64 {
    if bit_length == 0 || bit_length >= 64 {
        return bits as i64;
    }
    let shift = 64 - bit_length;
    ((bits << shift) as i64) >> shift
}

/// Extract `bit_length` bits starting at `bit_offset` from a big-endian buffer of
/// `total_bit_length` bits.
pub fn extract_bits(
    bytes: &[u8],
    total_bit_length: u32,
    bit_offset: u32,
    bit_length: u32,
) -> Option<u64> {
    let total_bytes = total_bit_length.div_ceil(BLOCK_LENGTH) as usize;
    let end = bit_offset.checked_add(bit_length)?;
    if bit_length == 0
        || bit_length > 64
        || bytes.len() < total_bytes
        || end as usize > total_bytes * BLOCK_LENGTH as usize
    {
        return None;
    }

    let mut value = 0u64;
    for i in (0..bit_length).rev() {
        let bit = (bit_offset + i) as usize;
        let byte = bytes[total_bytes - 1 - bit / 8];
        value = (value << 1) | u64::from((byte >> (bit % 8)) & 1);
    }
    Some(value)
}
