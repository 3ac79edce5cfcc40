//! Device identity criteria and scan-filter compilation.
//!
//! Glow devices advertise a fixed 21-byte manufacturer-data payload:
//!
//! ```text
//! [0-1]   Firmware version (u16 little-endian, packed M*10000 + m*100 + p)
//! [2-3]   Product code (u16 little-endian)
//! [4-19]  Owner signature (16 bytes)
//! [20]    Adoption flag (1 = adopting)
//! ```
//!
//! A [`DeviceCriteria`] compiles into one or more `(mask, value)` pairs over
//! that layout for the platform's advertisement matcher; the same layout
//! parses back into a criteria value when an advertisement is received.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of the manufacturer-data payload and of every filter mask/value.
pub const MANUFACTURER_DATA_LEN: usize = 21;

const VERSION_OFFSET: usize = 0;
const PRODUCT_CODE_OFFSET: usize = 2;
const OWNER_SIGNATURE_OFFSET: usize = 4;
const ADOPTION_FLAG_OFFSET: usize = 20;

/// Identity criteria for matching a device, produced by configuration.
///
/// `fw_version` is a rule string `"M.m.p"`, optionally prefixed with `!` to
/// mean "any version *except* this one". An empty string means no version
/// rule. `owner_signature` is 32 hex characters; any other length is treated
/// as absent (wildcard), not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceCriteria {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub fw_version: String,
    #[serde(default)]
    pub product_code: Option<u16>,
    #[serde(default)]
    pub owner_signature: String,
    #[serde(default)]
    pub adoption_flag: bool,
}

/// One compiled advertisement filter: match when
/// `advertisement & mask == value & mask`, plus optional name/MAC criteria
/// for the platform scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanFilter {
    pub mask: [u8; MANUFACTURER_DATA_LEN],
    pub value: [u8; MANUFACTURER_DATA_LEN],
    pub name: Option<String>,
    pub mac_address: Option<String>,
}

/// Advertisement payload could not be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdvertisementError {
    #[error("manufacturer data must be {MANUFACTURER_DATA_LEN} bytes, got {got}")]
    InvalidLength { got: usize },
}

impl DeviceCriteria {
    /// Compile this criteria into advertisement filters.
    ///
    /// Absent rules compile to zero masks (wildcards). An exact version rule
    /// yields one filter; a negated rule (`!M.m.p`) yields 16 filters, one
    /// per bit of the packed version code, each masking exactly that bit with
    /// its value inverted. A device whose version differs from the reference
    /// in any bit matches at least one of the 16 (OR semantics).
    pub fn compile(&self) -> Vec<ScanFilter> {
        let mut value = [0u8; MANUFACTURER_DATA_LEN];
        let mut mask = [0u8; MANUFACTURER_DATA_LEN];

        if let Some(code) = self.product_code {
            value[PRODUCT_CODE_OFFSET..PRODUCT_CODE_OFFSET + 2].copy_from_slice(&code.to_le_bytes());
            mask[PRODUCT_CODE_OFFSET..PRODUCT_CODE_OFFSET + 2].copy_from_slice(&[0xff, 0xff]);
        }

        // A malformed signature string is a wildcard, not an error.
        if let Some(signature) = decode_owner_signature(&self.owner_signature) {
            value[OWNER_SIGNATURE_OFFSET..OWNER_SIGNATURE_OFFSET + 16].copy_from_slice(&signature);
            mask[OWNER_SIGNATURE_OFFSET..OWNER_SIGNATURE_OFFSET + 16].fill(0xff);
        }

        value[ADOPTION_FLAG_OFFSET] = self.adoption_flag as u8;
        mask[ADOPTION_FLAG_OFFSET] = 0xff;

        let name = (!self.name.is_empty()).then(|| self.name.clone());
        let mac_address = (!self.mac_address.is_empty()).then(|| self.mac_address.clone());
        let filter = |value, mask| ScanFilter {
            mask,
            value,
            name: name.clone(),
            mac_address: mac_address.clone(),
        };

        match parse_version_rule(&self.fw_version) {
            Some((false, code)) => {
                value[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&code.to_le_bytes());
                mask[VERSION_OFFSET..VERSION_OFFSET + 2].copy_from_slice(&[0xff, 0xff]);
                vec![filter(value, mask)]
            }
            Some((true, code)) => {
                let version_bytes = code.to_le_bytes();
                let mut filters = Vec::with_capacity(16);
                for i in 0..2 {
                    for j in 0..8 {
                        value[VERSION_OFFSET] = 0;
                        value[VERSION_OFFSET + 1] = 0;
                        mask[VERSION_OFFSET] = 0;
                        mask[VERSION_OFFSET + 1] = 0;
                        value[VERSION_OFFSET + i] = !(version_bytes[i] & (1 << j));
                        mask[VERSION_OFFSET + i] = 1 << j;
                        filters.push(filter(value, mask));
                    }
                }
                filters
            }
            None => vec![filter(value, mask)],
        }
    }

    /// Parse a 21-byte manufacturer-data payload into criteria fields.
    pub fn parse_advertisement(data: &[u8]) -> Result<Self, AdvertisementError> {
        if data.len() != MANUFACTURER_DATA_LEN {
            return Err(AdvertisementError::InvalidLength { got: data.len() });
        }

        let version_code = u16::from_le_bytes([data[0], data[1]]);
        let product_code = u16::from_le_bytes([data[2], data[3]]);
        let owner_signature = hex::encode(&data[OWNER_SIGNATURE_OFFSET..OWNER_SIGNATURE_OFFSET + 16]);

        Ok(Self {
            name: String::new(),
            mac_address: String::new(),
            fw_version: version_string(version_code),
            product_code: Some(product_code),
            owner_signature,
            adoption_flag: data[ADOPTION_FLAG_OFFSET] == 1,
        })
    }
}

/// Compile a list of criteria into the flat filter list handed to the
/// platform scanner.
pub fn build_scan_filters(criteria: &[DeviceCriteria]) -> Vec<ScanFilter> {
    criteria.iter().flat_map(DeviceCriteria::compile).collect()
}

/// Parse a version rule string into `(negated, packed code)`.
///
/// Returns `None` for an empty or unparseable rule (wildcard). The major
/// group may be empty, reading as 0. The packed code is truncated to the two
/// bytes that fit the advertisement field.
fn parse_version_rule(rule: &str) -> Option<(bool, u16)> {
    let rule = rule.trim();
    if rule.is_empty() {
        return None;
    }
    let (negated, rest) = match rule.strip_prefix('!') {
        Some(rest) => (true, rest),
        None => (false, rule),
    };

    let mut groups = rest.split('.');
    let major = groups.next()?;
    let minor = groups.next()?;
    let patch = groups.next()?;
    if groups.next().is_some() {
        return None;
    }

    let group = |g: &str| -> Option<u32> {
        if g.is_empty() {
            Some(0)
        } else {
            g.parse().ok()
        }
    };
    let code = group(major)? * 10_000 + group(minor)? * 100 + group(patch)?;
    Some((negated, (code & 0xffff) as u16))
}

/// Decompose a packed version code into the `"T.H.D"` string devices report.
///
/// The hundreds digit divides `code - thousands`, not `code - thousands*1000`.
/// Fleet metadata was produced with exactly this decomposition, so it is kept
/// verbatim; do not "fix" the hundreds term.
fn version_string(code: u16) -> String {
    let code = code as i32;
    let thousands = code / 1000;
    let hundreds = (code - thousands) / 100;
    let units = code - thousands * 1000 - hundreds * 100;
    format!("{thousands}.{hundreds}.{units}")
}

fn decode_owner_signature(signature: &str) -> Option<[u8; 16]> {
    if signature.len() != 32 {
        return None;
    }
    let bytes = hex::decode(signature).ok()?;
    bytes.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(filter: &ScanFilter, advertisement: &[u8; MANUFACTURER_DATA_LEN]) -> bool {
        filter
            .mask
            .iter()
            .zip(filter.value.iter())
            .zip(advertisement.iter())
            .all(|((m, v), a)| a & m == v & m)
    }

    fn advertisement(version_code: u16, adoption: bool) -> [u8; MANUFACTURER_DATA_LEN] {
        let mut data = [0u8; MANUFACTURER_DATA_LEN];
        data[0..2].copy_from_slice(&version_code.to_le_bytes());
        data[ADOPTION_FLAG_OFFSET] = adoption as u8;
        data
    }

    #[test]
    fn parse_known_advertisement() {
        let mut data = [0u8; MANUFACTURER_DATA_LEN];
        data[0] = 0x64; // version code 100
        data[2] = 0x05; // product code 5
        data[20] = 0x01;

        let criteria = DeviceCriteria::parse_advertisement(&data).unwrap();
        assert_eq!(criteria.fw_version, "0.1.0");
        assert_eq!(criteria.product_code, Some(5));
        assert_eq!(criteria.owner_signature, "0".repeat(32));
        assert!(criteria.adoption_flag);
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = DeviceCriteria::parse_advertisement(&[0u8; 20]).unwrap_err();
        assert_eq!(err, AdvertisementError::InvalidLength { got: 20 });
    }

    #[test]
    fn exact_version_filter() {
        let criteria = DeviceCriteria {
            fw_version: "1.2.3".to_string(),
            ..Default::default()
        };
        let filters = criteria.compile();
        assert_eq!(filters.len(), 1);

        // 1*10000 + 2*100 + 3 = 10203 = 0x27DB
        assert_eq!(filters[0].value[0..2], [0xdb, 0x27]);
        assert_eq!(filters[0].mask[0..2], [0xff, 0xff]);
    }

    #[test]
    fn absent_rules_are_wildcards() {
        let criteria = DeviceCriteria::default();
        let filters = criteria.compile();
        assert_eq!(filters.len(), 1);

        let filter = &filters[0];
        assert!(filter.mask[0..20].iter().all(|&b| b == 0));
        // The adoption flag is always part of the match.
        assert_eq!(filter.mask[ADOPTION_FLAG_OFFSET], 0xff);
        assert_eq!(filter.value[ADOPTION_FLAG_OFFSET], 0);
        assert!(filter.name.is_none());
        assert!(filter.mac_address.is_none());
    }

    #[test]
    fn malformed_owner_signature_is_wildcard() {
        let criteria = DeviceCriteria {
            owner_signature: "abc123".to_string(),
            ..Default::default()
        };
        let filter = &criteria.compile()[0];
        assert!(filter.mask[OWNER_SIGNATURE_OFFSET..OWNER_SIGNATURE_OFFSET + 16]
            .iter()
            .all(|&b| b == 0));
    }

    #[test]
    fn owner_signature_and_product_code_compile() {
        let criteria = DeviceCriteria {
            product_code: Some(0x0102),
            owner_signature: "00112233445566778899aabbccddeeff".to_string(),
            ..Default::default()
        };
        let filter = &criteria.compile()[0];
        assert_eq!(filter.value[2..4], [0x02, 0x01]);
        assert_eq!(filter.mask[2..4], [0xff, 0xff]);
        assert_eq!(filter.value[4], 0x00);
        assert_eq!(filter.value[19], 0xff);
        assert!(filter.mask[4..20].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn negated_version_produces_sixteen_filters() {
        let criteria = DeviceCriteria {
            fw_version: "!0.1.0".to_string(),
            ..Default::default()
        };
        assert_eq!(criteria.compile().len(), 16);
    }

    #[test]
    fn negated_version_matches_any_single_bit_difference() {
        let criteria = DeviceCriteria {
            fw_version: "!0.1.0".to_string(),
            ..Default::default()
        };
        let filters = criteria.compile();
        let reference = 100u16; // 0*10000 + 1*100 + 0

        for bit in 0..16 {
            let candidate = advertisement(reference ^ (1 << bit), false);
            assert!(
                filters.iter().any(|f| matches(f, &candidate)),
                "bit {bit} difference must match at least one filter"
            );
        }

        // The reference version itself matches none of the sixteen.
        let same = advertisement(reference, false);
        assert!(filters.iter().all(|f| !matches(f, &same)));
    }

    #[test]
    fn name_and_mac_carried_on_every_filter() {
        let criteria = DeviceCriteria {
            name: "lamp".to_string(),
            mac_address: "AA:BB:CC:DD:EE:FF".to_string(),
            fw_version: "!0.0.1".to_string(),
            ..Default::default()
        };
        let filters = build_scan_filters(&[criteria]);
        assert_eq!(filters.len(), 16);
        assert!(filters
            .iter()
            .all(|f| f.name.as_deref() == Some("lamp")
                && f.mac_address.as_deref() == Some("AA:BB:CC:DD:EE:FF")));
    }

    #[test]
    fn version_rule_parsing() {
        assert_eq!(parse_version_rule("1.2.3"), Some((false, 10203)));
        assert_eq!(parse_version_rule("!1.2.3"), Some((true, 10203)));
        assert_eq!(parse_version_rule(".1.0"), Some((false, 100)));
        assert_eq!(parse_version_rule(""), None);
        assert_eq!(parse_version_rule("nonsense"), None);
    }

    #[test]
    fn version_string_decomposition_is_kept_verbatim() {
        // 100 -> thousands 0, hundreds (100-0)/100 = 1, units 0
        assert_eq!(version_string(100), "0.1.0");
        // 1234 -> thousands 1, hundreds (1234-1)/100 = 12, units 1234-1000-1200 = -966
        assert_eq!(version_string(1234), "1.12.-966");
    }
}
