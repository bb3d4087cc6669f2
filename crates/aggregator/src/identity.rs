//! Device identity normalization and vendor lookup

use std::collections::HashMap;

/// Vendor reported for identities with no known OUI
pub const UNREGISTERED_VENDOR: &str = "Unregistered";

/// Longest vendor name carried in a sub-entry
pub const MAX_VENDOR_LEN: usize = 20;

/// Normalize a device identity
///
/// Hardware addresses in any of the usual spellings (`aa:bb:cc:dd:ee:ff`,
/// `AA-BB-CC-DD-EE-FF`, `aabb.ccdd.eeff`, `aabbccddeeff`) become
/// `AA-BB-CC-DD-EE-FF`. Anything else is only trimmed.
pub fn normalize_identity(raw: &str) -> String {
    let trimmed = raw.trim();
    match mac_digits(trimmed) {
        Some(digits) => format_mac(&digits),
        None => trimmed.to_string(),
    }
}

fn mac_digits(s: &str) -> Option<Vec<u8>> {
    let digits: Vec<u8> = s
        .bytes()
        .filter(|b| !matches!(b, b':' | b'-' | b'.'))
        .collect();

    (digits.len() == 12 && digits.iter().all(u8::is_ascii_hexdigit))
        .then(|| digits.iter().map(u8::to_ascii_uppercase).collect())
}

fn format_mac(digits: &[u8]) -> String {
    digits
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join("-")
}

/// OUI prefix -> vendor name
#[derive(Debug, Clone, Default)]
pub struct VendorTable {
    entries: HashMap<String, String>,
}

impl VendorTable {
    /// Build from `prefix -> vendor` pairs; prefixes in any MAC spelling
    pub fn new(entries: &HashMap<String, String>) -> Self {
        let entries = entries
            .iter()
            .filter_map(|(prefix, vendor)| {
                let key = normalize_oui(prefix)?;
                Some((key, sanitize_vendor(vendor)))
            })
            .collect();
        Self { entries }
    }

    /// Number of known prefixes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Vendor for a normalized identity
    pub fn lookup(&self, identity: &str) -> String {
        identity
            .get(..8)
            .and_then(|oui| self.entries.get(oui))
            .cloned()
            .unwrap_or_else(|| UNREGISTERED_VENDOR.to_string())
    }
}

fn normalize_oui(prefix: &str) -> Option<String> {
    let digits: Vec<u8> = prefix
        .trim()
        .bytes()
        .filter(|b| !matches!(b, b':' | b'-' | b'.'))
        .collect();

    (digits.len() == 6 && digits.iter().all(u8::is_ascii_hexdigit)).then(|| {
        let upper: Vec<u8> = digits.iter().map(u8::to_ascii_uppercase).collect();
        format_mac(&upper)
    })
}

/// Vendor names go into CSV rows: no commas, bounded length
fn sanitize_vendor(vendor: &str) -> String {
    vendor
        .chars()
        .filter(|c| *c != ',')
        .take(MAX_VENDOR_LEN)
        .collect()
}
