//! Artifact quality tiers: display labels, canonical percentage bands and the
//! roll → percentage conversion.

pub const MAX_RARITY: u8 = 5;

pub const RARITY_LABELS: [&str; 6] = [
    "Common",
    "Uncommon",
    "Special",
    "Rare",
    "Exceptional",
    "Legendary",
];

/// Canonical (min, max) percentage band per rarity.
const PERCENT_BANDS: [(f64, f64); 6] = [
    (0.0, 100.0),
    (100.0, 110.0),
    (110.0, 120.0),
    (120.0, 130.0),
    (130.0, 140.0),
    (140.0, 150.0),
];

/// Linear coefficients (A, B) per quality tier: `percent = A * roll + B`.
const TIER_COEFFICIENTS: [(f64, f64); 6] = [
    (25.0, 50.0),
    (2.5, 105.0),
    (2.24, 114.54),
    (2.5, 125.0),
    (4.35, 130.0),
    (4.08, 140.0),
];

pub fn rarity_label(rarity: u8) -> &'static str {
    RARITY_LABELS.get(rarity as usize).copied().unwrap_or("Unknown")
}

pub fn percent_band(rarity: u8) -> Option<(f64, f64)> {
    PERCENT_BANDS.get(rarity as usize).copied()
}

/// The rarity whose band strictly contains the range (`lo <= min < max <= hi`).
/// Used when a percent range is edited so the rarity follows the range.
pub fn rarity_for_percent_range(min: f64, max: f64) -> Option<u8> {
    PERCENT_BANDS
        .iter()
        .position(|&(lo, hi)| lo <= min && min < max && max <= hi)
        .map(|i| i as u8)
}

/// Quality percentage for a tier and raw roll, rounded to 2 decimals.
/// `None` when the roll is absent or the tier is unknown.
pub fn quality_percent(tier: i64, roll: Option<f64>) -> Option<f64> {
    let roll = roll?;
    let idx = usize::try_from(tier).ok()?;
    let (a, b) = TIER_COEFFICIENTS.get(idx)?;
    Some(round2(a * roll + b))
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
