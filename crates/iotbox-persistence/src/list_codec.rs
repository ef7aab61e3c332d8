//! List valued columns
//!
//! Lists of variable length are stored as comma joined text. Float lists write
//! values that could not be determined as `-1.0`.

use std::num::ParseFloatError;

use iotbox_common::MISSING_VALUE;

const SEPARATOR: char = ',';

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringList(pub Vec<String>);

impl StringList {
    pub fn encode(&self) -> String {
        self.0.join(&SEPARATOR.to_string())
    }

    pub fn decode(s: &str) -> Self {
        if s.is_empty() {
            return Self::default();
        }
        Self(s.split(SEPARATOR).map(str::to_string).collect())
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl<S: Into<String>> FromIterator<S> for StringList {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloatList(pub Vec<f64>);

impl FloatList {
    pub fn from_options(values: &[Option<f64>]) -> Self {
        Self(
            values
                .iter()
                .map(|v| v.unwrap_or(MISSING_VALUE))
                .collect(),
        )
    }

    pub fn encode(&self) -> String {
        self.0
            .iter()
            .map(|v| format!("{:?}", v))
            .collect::<Vec<_>>()
            .join(&SEPARATOR.to_string())
    }

    pub fn decode(s: &str) -> Result<Self, ParseFloatError> {
        if s.is_empty() {
            return Ok(Self::default());
        }
        s.split(SEPARATOR)
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn into_inner(self) -> Vec<f64> {
        self.0
    }
}
