//! Telemetry payload decoding.
//!
//! Device telemetry arrives as a `#`-delimited string whose last two fields
//! are raw cumulative counters in integer micro-units. Device identity
//! messages are a small JSON envelope.

use rust_decimal::Decimal;
use tracing::warn;

const MICRO_UNITS_PER_UNIT: i64 = 1_000_000;

/// Decoder tunables. The sanity bounds were calibrated against one
/// deployment's expected daily ranges, so they are configuration rather
/// than constants.
#[derive(Debug, Clone)]
pub struct DecoderConfig {
    /// Minimum delimited field count for a telemetry payload
    pub min_fields: usize,
    /// Decoded total_a at or above this is treated as corrupt
    pub max_total_a: Decimal,
    /// Decoded total_a2 at or above this is treated as corrupt
    pub max_total_a2: Decimal,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            min_fields: 10,
            max_total_a: Decimal::from(15_000),
            max_total_a2: Decimal::from(8_000),
        }
    }
}

/// Decoded per-message counter deltas in display units.
///
/// Zero totals mean "no increment": short payloads, unparseable counters and
/// out-of-range values all decode to zero rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecodedTotals {
    pub delta_a: Decimal,
    pub delta_a2: Decimal,
}

impl DecodedTotals {
    pub fn is_zero(&self) -> bool {
        self.delta_a.is_zero() && self.delta_a2.is_zero()
    }
}

fn micro_units_to_display(field: &str) -> Decimal {
    field
        .trim()
        .parse::<Decimal>()
        .map(|raw| raw / Decimal::from(MICRO_UNITS_PER_UNIT))
        .unwrap_or_default()
}

/// Decode a delimited telemetry payload into counter deltas.
///
/// Never fails: anything that cannot be read as a well-formed payload
/// decodes to zero totals.
pub fn decode_telemetry(device_id: &str, raw: &str, config: &DecoderConfig) -> DecodedTotals {
    let fields: Vec<&str> = raw.split('#').collect();
    if fields.len() < config.min_fields {
        return DecodedTotals::default();
    }

    // Last two fields are the raw cumulative counters
    let delta_a = micro_units_to_display(fields[fields.len() - 2]);
    let delta_a2 = micro_units_to_display(fields[fields.len() - 1]);

    if delta_a >= config.max_total_a || delta_a2 >= config.max_total_a2 {
        warn!(
            device_id = %device_id,
            total_a = %delta_a,
            total_a2 = %delta_a2,
            "discarding out-of-range telemetry"
        );
        return DecodedTotals::default();
    }

    DecodedTotals { delta_a, delta_a2 }
}

/// Extract the display name from a device identity JSON envelope,
/// falling back to the device identifier when absent.
pub fn decode_device_identity(device_id: &str, raw: &str) -> String {
    serde_json::from_str::<serde_json::Value>(raw)
        .ok()
        .and_then(|v| v.get("name").and_then(|n| n.as_str()).map(str::to_string))
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| device_id.to_string())
}
