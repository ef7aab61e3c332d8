//! IODD standard unit definitions
//!
//! Maps unit codes used in IODD files to their abbreviations, as published in
//! `IODD-StandardUnitDefinitions1.1.xml`.

use std::collections::HashMap;
use std::path::Path;

use tracing::{debug, warn};

use iotbox_common::{IotBoxError, UNIT_NOT_AVAILABLE};

use crate::xml::{children, path};

/// Unit codes for the SI units most IO-Link sensors report
const BUILTIN_UNITS: &[(u32, &str)] = &[
    (1000, "K"),
    (1001, "°C"),
    (1010, "m"),
    (1023, "m²"),
    (1034, "m³"),
    (1054, "s"),
    (1061, "m/s"),
    (1076, "m/s²"),
];

#[derive(Debug, Clone, Default)]
pub struct UnitDefinitions {
    version: Option<String>,
    units: HashMap<u32, String>,
}

impl UnitDefinitions {
    /// Load the standard unit definitions file.
    pub fn load(location: &Path) -> Result<Self, IotBoxError> {
        if !location.exists() {
            return Err(IotBoxError::UnitDefinitionsMissing(
                location.display().to_string(),
            ));
        }
        let content = std::fs::read_to_string(location).map_err(|e| IotBoxError::IoddParse {
            file: location.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|reason| IotBoxError::IoddParse {
            file: location.display().to_string(),
            reason,
        })
    }

    /// Load the definitions file, falling back to the built-in table when it is missing.
    pub fn load_or_builtin(location: &Path) -> Result<Self, IotBoxError> {
        match Self::load(location) {
            Err(IotBoxError::UnitDefinitionsMissing(path)) => {
                warn!(
                    "IODD StandardUnitDefinitions file not found at: {}, using built-in units",
                    path
                );
                Ok(Self::builtin())
            }
            other => other,
        }
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let doc = roxmltree::Document::parse(content).map_err(|e| e.to_string())?;
        let root = doc.root_element();

        let version = path(root, &["DocumentInfo"])
            .and_then(|info| info.attribute("version"))
            .map(str::to_string);
        debug!(
            "IODD-StandardUnitDefinitions version {}",
            version.as_deref().unwrap_or("unknown")
        );

        let mut units = HashMap::new();
        if let Some(collection) = path(root, &["UnitCollection"]) {
            for unit in children(collection, "Unit") {
                let code = unit.attribute("code").and_then(|c| c.parse::<u32>().ok());
                if let (Some(code), Some(abbr)) = (code, unit.attribute("abbr")) {
                    units.insert(code, abbr.to_string());
                }
            }
        }

        Ok(Self { version, units })
    }

    pub fn builtin() -> Self {
        Self {
            version: None,
            units: BUILTIN_UNITS
                .iter()
                .map(|(code, abbr)| (*code, abbr.to_string()))
                .collect(),
        }
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Abbreviation for a unit code, `N/A` without a code
    pub fn abbr(&self, code: Option<u32>) -> String {
        match code {
            None => UNIT_NOT_AVAILABLE.to_string(),
            Some(code) => match self.units.get(&code) {
                Some(abbr) => abbr.clone(),
                None => {
                    warn!("Unit code {} not found in unit definitions", code);
                    UNIT_NOT_AVAILABLE.to_string()
                }
            },
        }
    }
}
