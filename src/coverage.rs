//! Routing-key extraction for lead coverage matching.
//!
//! A routing key is the alphabetic area prefix of a UK-style postcode
//! (`SW1A 1AA` -> `SW`). Companies declare the set of keys they serve and a
//! lead is offered to a company only when its key is an exact member of that set.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

pub const UNKNOWN_ROUTING_KEY: &str = "unknown";

// Full postcode anywhere in the text: area, district, optional space, sector, unit.
static FULL_POSTCODE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z]{1,2})[0-9][a-z0-9]?\s*[0-9][a-z]{2}\b").expect("valid regex")
});

// Outward code only, anchored at the end of the address.
static PARTIAL_POSTCODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([a-z]{1,2})[0-9][a-z0-9]?\s*$").expect("valid regex"));

static ANY_AREA_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b([a-z]{1,2})[0-9]").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum RoutingKey {
    Area(String),
    Unknown,
}

impl RoutingKey {
    pub fn as_str(&self) -> &str {
        match self {
            RoutingKey::Area(key) => key.as_str(),
            RoutingKey::Unknown => UNKNOWN_ROUTING_KEY,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, RoutingKey::Area(_))
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<RoutingKey> for String {
    fn from(key: RoutingKey) -> Self {
        key.as_str().to_string()
    }
}

/// Derive the routing key for a free-text address.
///
/// Patterns are tried in priority order: a full postcode anywhere, an outward
/// code at the end of the string, then the first letters-before-digit run.
pub fn routing_key(address: &str) -> RoutingKey {
    [&*FULL_POSTCODE, &*PARTIAL_POSTCODE, &*ANY_AREA_PREFIX]
        .iter()
        .find_map(|pattern| pattern.captures(address))
        .and_then(|captures| captures.get(1))
        .map(|area| RoutingKey::Area(area.as_str().to_ascii_uppercase()))
        .unwrap_or(RoutingKey::Unknown)
}

/// Exact membership only: a company covering `SW` does not cover `SW1`.
pub fn covers<S: AsRef<str>>(coverage: &[S], key: &RoutingKey) -> bool {
    match key {
        RoutingKey::Area(area) => coverage.iter().any(|entry| entry.as_ref() == area),
        RoutingKey::Unknown => false,
    }
}
