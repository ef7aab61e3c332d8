//! IODD 1.1 document parsing
//!
//! An [`Iodd`] holds the device family and the information points of the process
//! data input of one IODD file, ready to decode raw process data.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use regex::Regex;
use roxmltree::{Document, Node};
use serde::Serialize;
use tracing::{debug, warn};

use iotbox_common::IotBoxError;

use crate::information_point::{DataType, InformationPoint};
use crate::units::UnitDefinitions;
use crate::xml::{child, children, path, xsi_type};

const MENU_PREFIX: &str = "M_MR_SR_Observation";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Iodd {
    pub file: PathBuf,
    pub family: Vec<String>,
    pub vendor_name: Option<String>,
    pub device_id: Option<String>,
    pub total_bit_length: u32,
    pub information_points: Vec<InformationPoint>,
}

impl Iodd {
    pub fn parse_file(file: &Path, units: &UnitDefinitions) -> Result<Self, IotBoxError> {
        let content = std::fs::read_to_string(file).map_err(|e| IotBoxError::IoddParse {
            file: file.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse_str(file, &content, units)
    }

    pub fn parse_str(
        file: impl Into<PathBuf>,
        content: &str,
        units: &UnitDefinitions,
    ) -> Result<Self, IotBoxError> {
        let file = file.into();
        parse_document(&file, content, units).map_err(|reason| IotBoxError::IoddParse {
            file: file.display().to_string(),
            reason,
        })
    }

    /// Product ids of all device variants described by an IODD document.
    pub fn read_family(content: &str) -> Result<Vec<String>, String> {
        let doc = Document::parse(content).map_err(|e| e.to_string())?;
        Ok(family_of(doc.root_element()))
    }

    pub fn file_name(&self) -> String {
        self.file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn matches(&self, sensor: &str) -> bool {
        self.family.iter().any(|product| product == sensor)
    }

    /// Real values of every information point, `None` where the buffer does not cover it.
    pub fn decode(&self, bytes: &[u8]) -> Vec<Option<f64>> {
        self.information_points
            .iter()
            .map(|ip| ip.byte_to_real_value(bytes, self.total_bit_length))
            .collect()
    }

    pub fn point_names(&self) -> Vec<String> {
        self.information_points
            .iter()
            .map(|ip| ip.name.clone())
            .collect()
    }

    pub fn units(&self) -> Vec<String> {
        self.information_points
            .iter()
            .map(|ip| ip.units.clone())
            .collect()
    }

    pub fn lower_limits(&self) -> Vec<Option<f64>> {
        self.information_points
            .iter()
            .map(InformationPoint::lower_limit)
            .collect()
    }

    pub fn upper_limits(&self) -> Vec<Option<f64>> {
        self.information_points
            .iter()
            .map(InformationPoint::upper_limit)
            .collect()
    }
}

fn family_of(root: Node<'_, '_>) -> Vec<String> {
    path(
        root,
        &["ProfileBody", "DeviceIdentity", "DeviceVariantCollection"],
    )
    .map(|collection| {
        children(collection, "DeviceVariant")
            .filter_map(|variant| variant.attribute("productId"))
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_document(file: &Path, content: &str, units: &UnitDefinitions) -> Result<Iodd, String> {
    let doc = Document::parse(content).map_err(|e| e.to_string())?;
    let root = doc.root_element();

    let identity = path(root, &["ProfileBody", "DeviceIdentity"]);
    let device_function = path(root, &["ProfileBody", "DeviceFunction"])
        .ok_or_else(|| "missing ProfileBody/DeviceFunction".to_string())?;
    let process_data_in = path(
        device_function,
        &["ProcessDataCollection", "ProcessData", "ProcessDataIn"],
    )
    .ok_or_else(|| "missing ProcessDataIn".to_string())?;

    let datatypes = DatatypeLookup::new(child(device_function, "DatatypeCollection"));
    let texts = text_collection(root);

    let record = match child(process_data_in, "Datatype") {
        Some(datatype) => datatype,
        None => child(process_data_in, "DatatypeRef")
            .and_then(|r| r.attribute("datatypeId"))
            .and_then(|id| datatypes.get(id))
            .ok_or_else(|| "ProcessDataIn has no datatype".to_string())?,
    };
    let total_bit_length = record
        .attribute("bitLength")
        .or_else(|| process_data_in.attribute("bitLength"))
        .ok_or_else(|| "ProcessDataIn datatype has no bitLength".to_string())
        .and_then(|v| parse_number::<u32>(v, "bitLength"))?;

    let mut information_points = Vec::new();
    let record_items: Vec<_> = children(record, "RecordItem").collect();
    if record_items.is_empty() {
        // single value process data
        let name = name_of(process_data_in, &texts);
        let mut ip = InformationPoint::new(name, 0, total_bit_length, 0);
        apply_datatype(&mut ip, record, file);
        information_points.push(ip);
    } else {
        for item in record_items {
            let bit_offset = parse_number::<u32>(required(item, "bitOffset")?, "bitOffset")?;
            let subindex = parse_number::<u32>(required(item, "subindex")?, "subindex")?;
            let name = name_of(item, &texts);

            let datatype = match child(item, "SimpleDatatype") {
                Some(datatype) => Some(datatype),
                None => child(item, "DatatypeRef")
                    .and_then(|r| r.attribute("datatypeId"))
                    .and_then(|id| datatypes.get(id)),
            };
            let Some(datatype) = datatype else {
                warn!(
                    "Record item {} ({}) in {} has no resolvable datatype, skipping",
                    subindex,
                    name,
                    file.display()
                );
                continue;
            };

            let bit_length = match datatype.attribute("bitLength") {
                Some(v) => parse_number::<u32>(v, "bitLength")?,
                None => 1,
            };
            let mut ip = InformationPoint::new(name, bit_offset, bit_length, subindex);
            apply_datatype(&mut ip, datatype, file);
            information_points.push(ip);
        }
    }

    for ip in &information_points {
        debug!("{}, {}", ip.name, ip.bit_offset);
    }

    let menu_pattern = observation_menu_pattern(root)?;
    let menus = path(device_function, &["UserInterface", "MenuCollection"]);
    for menu in menus.into_iter().flat_map(|m| children(m, "Menu")) {
        let Some(id) = menu.attribute("id") else {
            continue;
        };
        if !menu_pattern.is_match(id) {
            continue;
        }
        debug!("Menu: {}", id);
        let Some(item_ref) = child(menu, "RecordItemRef") else {
            continue;
        };
        let subindex = parse_number::<u32>(required(item_ref, "subindex")?, "subindex")?;
        for ip in information_points
            .iter_mut()
            .filter(|ip| ip.subindex == subindex)
        {
            apply_menu(ip, item_ref, units)?;
        }
    }

    for ip in information_points.iter_mut() {
        ip.convert_display_format();
        ip.compute_value_indices(total_bit_length)?;
    }

    Ok(Iodd {
        file: file.to_path_buf(),
        family: family_of(root),
        vendor_name: identity
            .and_then(|i| i.attribute("vendorName"))
            .map(str::to_string),
        device_id: identity
            .and_then(|i| i.attribute("deviceId"))
            .map(str::to_string),
        total_bit_length,
        information_points,
    })
}

struct DatatypeLookup<'a, 'input> {
    collection: Option<Node<'a, 'input>>,
}

impl<'a, 'input> DatatypeLookup<'a, 'input> {
    fn new(collection: Option<Node<'a, 'input>>) -> Self {
        Self { collection }
    }

    fn get(&self, id: &str) -> Option<Node<'a, 'input>> {
        self.collection
            .and_then(|c| children(c, "Datatype").find(|d| d.attribute("id") == Some(id)))
    }
}

fn text_collection(root: Node<'_, '_>) -> HashMap<String, String> {
    path(root, &["ExternalTextCollection", "PrimaryLanguage"])
        .map(|language| {
            children(language, "Text")
                .filter_map(|text| Some((text.attribute("id")?, text.attribute("value")?)))
                .map(|(id, value)| (id.to_string(), value.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn name_of(node: Node<'_, '_>, texts: &HashMap<String, String>) -> String {
    child(node, "Name")
        .and_then(|n| n.attribute("textId"))
        .map(|id| texts.get(id).cloned().unwrap_or_else(|| id.to_string()))
        .unwrap_or_default()
}

fn apply_datatype(ip: &mut InformationPoint, datatype: Node<'_, '_>, file: &Path) {
    ip.data_type = DataType::from_xsi_type(xsi_type(&datatype));
    if let Some(range) = child(datatype, "ValueRange") {
        ip.low_val = range_bound(range, "lowerValue", ip, file);
        ip.up_val = range_bound(range, "upperValue", ip, file);
    }
}

fn range_bound(
    range: Node<'_, '_>,
    attribute: &str,
    ip: &InformationPoint,
    file: &Path,
) -> Option<f64> {
    let value = range.attribute(attribute)?;
    match value.trim().parse() {
        Ok(bound) => Some(bound),
        Err(_) => {
            warn!(
                "Ignoring invalid ValueRange {} {:?} of {} (subindex {}) in {}",
                attribute,
                value,
                ip.name,
                ip.subindex,
                file.display()
            );
            None
        }
    }
}

fn apply_menu(
    ip: &mut InformationPoint,
    item_ref: Node<'_, '_>,
    units: &UnitDefinitions,
) -> Result<(), String> {
    ip.gradient = optional_number(item_ref, "gradient")?;
    ip.offset = optional_number(item_ref, "offset")?;
    ip.display_format = item_ref.attribute("displayFormat").map(str::to_string);
    ip.unit_code = optional_number(item_ref, "unitCode")?;
    ip.units = units.abbr(ip.unit_code);
    Ok(())
}

/// Observation menus optionally carry one of the unit codes used in the document as suffix.
fn observation_menu_pattern(root: Node<'_, '_>) -> Result<Regex, String> {
    let unit_codes: BTreeSet<&str> = root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().namespace() == root.tag_name().namespace())
        .filter_map(|n| n.attribute("unitCode"))
        .collect();
    let unit_suffix = if unit_codes.is_empty() {
        String::new()
    } else {
        let alternatives = unit_codes
            .iter()
            .map(|code| regex::escape(code))
            .collect::<Vec<_>>()
            .join("|");
        format!("(_(?:{alternatives}))?")
    };
    Regex::new(&format!("^{MENU_PREFIX}(_[^_]*)?{unit_suffix}$")).map_err(|e| e.to_string())
}

fn required<'a>(node: Node<'a, '_>, attribute: &str) -> Result<&'a str, String> {
    node.attribute(attribute).ok_or_else(|| {
        format!(
            "{} element is missing attribute {}",
            node.tag_name().name(),
            attribute
        )
    })
}

fn optional_number<T: std::str::FromStr>(
    node: Node<'_, '_>,
    attribute: &str,
) -> Result<Option<T>, String> {
    node.attribute(attribute)
        .map(|v| parse_number(v, attribute))
        .transpose()
}

fn parse_number<T: std::str::FromStr>(value: &str, attribute: &str) -> Result<T, String> {
    value
        .trim()
        .parse()
        .map_err(|_| format!("invalid {} value: {}", attribute, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    const O5D100: &str = include_str!("../tests/fixtures/ifm-O5D100-20190314-IODD1.1.xml");

    fn parse(content: &str) -> Iodd {
        Iodd::parse_str("collection/test-IODD1.1.xml", content, &UnitDefinitions::builtin())
            .unwrap()
    }

    #[test]
    fn test_parse_identity() {
        let iodd = parse(O5D100);
        assert_eq!(iodd.family, vec!["O5D100", "O5D150"]);
        assert_eq!(iodd.vendor_name.as_deref(), Some("ifm electronic gmbh"));
        assert_eq!(iodd.device_id.as_deref(), Some("967"));
        assert_eq!(iodd.total_bit_length, 16);
        assert_eq!(iodd.file_name(), "test-IODD1.1.xml");
        assert!(iodd.matches("O5D150"));
        assert!(!iodd.matches("O5D"));
    }

    #[test]
    fn test_parse_information_points() {
        let iodd = parse(O5D100);
        assert_eq!(iodd.point_names(), vec!["Distance", "OUT2", "OUT1"]);

        let distance = &iodd.information_points[0];
        assert_eq!(distance.bit_offset, 2);
        assert_eq!(distance.bit_length, 14);
        assert_eq!(distance.data_type, DataType::UInteger);
        assert_eq!(distance.low_val, Some(30.0));
        assert_eq!(distance.up_val, Some(2000.0));
        assert_eq!(distance.value_indices, vec![0]);

        let out1 = &iodd.information_points[2];
        assert_eq!(out1.bit_length, 1);
        assert_eq!(out1.data_type, DataType::Boolean);
        assert_eq!(out1.value_indices, vec![1]);
        assert_eq!(out1.units, "N/A");
    }

    #[test]
    fn test_later_menu_overrides() {
        let iodd = parse(O5D100);
        let distance = &iodd.information_points[0];
        assert_eq!(distance.gradient, Some(0.001));
        assert_eq!(distance.offset, Some(0.0));
        assert_eq!(distance.decimals, Some(3));
        assert_eq!(distance.unit_code, Some(1010));
        assert_eq!(distance.units, "m");

        // M_MR_SR_Parameter does not describe observation values
        let out2 = &iodd.information_points[1];
        assert_eq!(out2.gradient, None);
        assert_eq!(out2.unit_code, None);
    }

    #[test]
    fn test_decode_process_data() {
        let iodd = parse(O5D100);
        // distance 1234 shifted by two bits, OUT1 set
        let bytes = [0x13, 0x49];
        assert_eq!(
            iodd.decode(&bytes),
            vec![Some(1.234), Some(0.0), Some(1.0)]
        );
        assert_eq!(iodd.lower_limits(), vec![Some(0.03), None, None]);
        assert_eq!(iodd.upper_limits(), vec![Some(2.0), None, None]);
        assert_eq!(iodd.units(), vec!["m", "N/A", "N/A"]);

        assert_eq!(iodd.decode(&[0x13]), vec![None, None, None]);
    }

    #[test]
    fn test_read_family() {
        let family = Iodd::read_family(O5D100).unwrap();
        assert_eq!(family, vec!["O5D100", "O5D150"]);
        assert!(Iodd::read_family("<not-xml").is_err());
    }

    #[test]
    fn test_single_value_process_data() {
        let content = r#"<?xml version="1.0" encoding="utf-8"?>
<IODevice xmlns="http://www.io-link.com/IODD/2010/10" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <ProfileBody>
    <DeviceIdentity vendorId="310" vendorName="ifm electronic gmbh" deviceId="1234">
      <DeviceVariantCollection>
        <DeviceVariant productId="TV7105"><Name textId="TN_TV7105"/></DeviceVariant>
      </DeviceVariantCollection>
    </DeviceIdentity>
    <DeviceFunction>
      <ProcessDataCollection>
        <ProcessData id="P_Data">
          <ProcessDataIn id="PI_Temperature" bitLength="16">
            <Datatype xsi:type="IntegerT" bitLength="16">
              <ValueRange lowerValue="-500" upperValue="1500"/>
            </Datatype>
            <Name textId="TN_PI_Temperature"/>
          </ProcessDataIn>
        </ProcessData>
      </ProcessDataCollection>
      <UserInterface>
        <MenuCollection>
          <Menu id="M_MR_SR_Observation_1001">
            <RecordItemRef variableId="V_PdT" subindex="0" gradient="0.1" displayFormat="Dec.1" unitCode="1001"/>
          </Menu>
        </MenuCollection>
      </UserInterface>
    </DeviceFunction>
  </ProfileBody>
  <ExternalTextCollection>
    <PrimaryLanguage xml:lang="en">
      <Text id="TN_PI_Temperature" value="Temperature"/>
    </PrimaryLanguage>
  </ExternalTextCollection>
</IODevice>"#;
        let iodd = parse(content);
        assert_eq!(iodd.information_points.len(), 1);

        let temperature = &iodd.information_points[0];
        assert_eq!(temperature.name, "Temperature");
        assert_eq!(temperature.data_type, DataType::Integer);
        assert_eq!(temperature.value_indices, vec![0, 1]);
        assert_eq!(temperature.units, "°C");

        // -215 -> -21.5 °C
        let bytes = (-215i16).to_be_bytes();
        assert_eq!(iodd.decode(&bytes), vec![Some(-21.5)]);
        assert_eq!(iodd.lower_limits(), vec![Some(-50.0)]);
    }

    fn single_value_iodd(datatype: &str, menus: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="utf-8"?>
<IODevice xmlns="http://www.io-link.com/IODD/2010/10" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance">
  <ProfileBody>
    <DeviceIdentity vendorId="310" vendorName="ifm electronic gmbh" deviceId="77">
      <DeviceVariantCollection>
        <DeviceVariant productId="LR2050"/>
      </DeviceVariantCollection>
    </DeviceIdentity>
    <DeviceFunction>
      <ProcessDataCollection>
        <ProcessData id="P_Data">
          <ProcessDataIn id="PI_Level" bitLength="8">
            {datatype}
            <Name textId="TN_PI_Level"/>
          </ProcessDataIn>
        </ProcessData>
      </ProcessDataCollection>
      <UserInterface>
        <MenuCollection>
          {menus}
        </MenuCollection>
      </UserInterface>
    </DeviceFunction>
  </ProfileBody>
  <ExternalTextCollection>
    <PrimaryLanguage xml:lang="en">
      <Text id="TN_PI_Level" value="Level"/>
    </PrimaryLanguage>
  </ExternalTextCollection>
</IODevice>"#
        )
    }

    #[test]
    fn test_observation_menu_without_unit_codes() {
        let content = single_value_iodd(
            r#"<Datatype xsi:type="UIntegerT" bitLength="8"/>"#,
            r#"<Menu id="M_MR_SR_Observation">
            <RecordItemRef variableId="V_PdT" subindex="0" gradient="0.5" offset="10"/>
          </Menu>
          <Menu id="M_MR_SR_Observation_Level">
            <RecordItemRef variableId="V_PdT" subindex="0" gradient="0.5" offset="10" displayFormat="Dec.1"/>
          </Menu>"#,
        );
        let iodd = parse(&content);
        let level = &iodd.information_points[0];
        assert_eq!(level.gradient, Some(0.5));
        assert_eq!(level.offset, Some(10.0));
        assert_eq!(level.decimals, Some(1));
        assert_eq!(level.unit_code, None);
        assert_eq!(level.units, "N/A");

        assert_eq!(iodd.decode(&[100]), vec![Some(60.0)]);
    }

    #[test]
    fn test_invalid_value_range_is_ignored() {
        let content = single_value_iodd(
            r#"<Datatype xsi:type="UIntegerT" bitLength="8">
              <ValueRange lowerValue="zero" upperValue="200"/>
            </Datatype>"#,
            "",
        );
        let iodd = parse(&content);
        let level = &iodd.information_points[0];
        assert_eq!(level.low_val, None);
        assert_eq!(level.up_val, Some(200.0));
    }

    #[test]
    fn test_overflowing_bit_offset() {
        let content = O5D100.replacen(r#"bitOffset="2""#, r#"bitOffset="4294967295""#, 1);
        assert_ne!(content, O5D100);
        let err = Iodd::parse_str("broken.xml", &content, &UnitDefinitions::builtin()).unwrap_err();
        assert!(matches!(err, IotBoxError::IoddParse { .. }));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_missing_process_data() {
        let content = r#"<IODevice xmlns="http://www.io-link.com/IODD/2010/10">
  <ProfileBody><DeviceFunction/></ProfileBody>
</IODevice>"#;
        let err = Iodd::parse_str("broken.xml", content, &UnitDefinitions::builtin()).unwrap_err();
        assert!(matches!(err, IotBoxError::IoddParse { .. }));
        assert!(err.to_string().contains("ProcessDataIn"));
    }
}
