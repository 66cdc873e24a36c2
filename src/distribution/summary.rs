//! Display-only move estimates snapshotted onto each lead purchase.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const FT3_TO_M3: f64 = 0.0283168;
pub const VAN_CAPACITY_M3: f64 = 35.0;

static FT3_NOTE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)~?\s*(\d+(?:\.\d+)?)\s*(?:ft³|ft3|cu\.?\s*ft|cubic\s+f(?:ee|oo)t)")
        .expect("valid regex")
});

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MoveSummary {
    pub estimate: Option<f64>,
    pub volume_m3: Option<f64>,
    pub van_count: Option<i32>,
    pub movers: Option<i32>,
}

/// Derive the summary from an analysis payload, preferring top-level fields.
pub fn derive_summary(analysis: &Value) -> MoveSummary {
    let estimate = number_at(analysis, &["estimate"]);
    let volume_m3 = number_at(analysis, &["totalVolumeM3", "total_volume_m3", "volume_m3"])
        .or_else(|| items_volume_m3(analysis));
    let van_count = number_at(analysis, &["vans", "van_count", "vanCount"])
        .map(|vans| vans.round() as i32)
        .or_else(|| volume_m3.map(vans_for_volume));
    let movers = number_at(analysis, &["movers", "mover_count", "moversCount"])
        .map(|movers| movers.round() as i32)
        .or_else(|| van_count.map(movers_for_vans));

    MoveSummary {
        estimate,
        volume_m3,
        van_count,
        movers,
    }
}

pub fn vans_for_volume(volume_m3: f64) -> i32 {
    (volume_m3 / VAN_CAPACITY_M3).ceil() as i32
}

pub fn movers_for_vans(vans: i32) -> i32 {
    if vans >= 2 {
        3
    } else {
        2
    }
}

// Sum of per-item volumes; `None` when no item carries any volume hint.
fn items_volume_m3(analysis: &Value) -> Option<f64> {
    let items = analysis.get("items")?.as_array()?;
    let mut total = 0.0;
    let mut found = false;
    for item in items {
        if let Some(volume) = item_volume_m3(item) {
            total += volume;
            found = true;
        }
    }
    found.then(|| round_1dp(total))
}

fn item_volume_m3(item: &Value) -> Option<f64> {
    if let Some(native) = number_at(item, &["volume_m3", "volumeM3", "estimated_volume_m3"]) {
        return Some(native);
    }
    let quantity = number_at(item, &["quantity"]).unwrap_or(1.0);
    if let Some(per_unit_ft3) = item
        .get("note")
        .and_then(Value::as_str)
        .and_then(parse_ft3_note)
    {
        return Some(per_unit_ft3 * quantity * FT3_TO_M3);
    }
    number_at(item, &["estimated_volume_ft3", "volume_ft3"]).map(|ft3| ft3 * FT3_TO_M3)
}

fn parse_ft3_note(note: &str) -> Option<f64> {
    FT3_NOTE
        .captures(note)
        .and_then(|captures| captures.get(1))
        .and_then(|value| value.as_str().parse().ok())
}

fn number_at(value: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| match value.get(*key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    })
}

fn round_1dp(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
