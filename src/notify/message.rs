use std::fmt::Write;

use crate::matcher::quality::rarity_label;
use crate::types::{FilterKind, LotMatch};

/// Render the alert text for a matched lot.
pub fn render_alert(m: &LotMatch) -> String {
    let mut msg = String::new();
    let minutes = m.remaining_minutes.max(0.0).trunc() as u64;

    match m.filter.kind {
        FilterKind::Artifact => {
            let rarity = m.filter.rarity.map(rarity_label).unwrap_or("Unknown");
            let _ = writeln!(msg, "🌀 Artifact found!");
            let _ = writeln!(msg, "Name: {}", m.filter.name);
            let _ = writeln!(msg, "Rarity: {rarity}");
            let _ = writeln!(msg, "Price type: {}", m.basis.price_type);
            let _ = writeln!(msg, "Total price: {}", format_price(m.basis.total_price));
            if let Some(percent) = m.percent {
                let _ = writeln!(msg, "Quality: {percent:.2}%");
            }
        }
        FilterKind::Item => {
            let _ = writeln!(msg, "🛒 Lot found!");
            let _ = writeln!(msg, "Item: {}", m.filter.name);
            let _ = writeln!(msg, "Price type: {}", m.basis.price_type);
            let _ = writeln!(msg, "Quantity: {}", m.listing.amount);
            let _ = writeln!(msg, "Total price: {}", format_price(m.basis.total_price));
            if m.listing.amount > 1 {
                let _ = writeln!(msg, "Price per unit: {}", format_unit_price(m.basis.price_per_unit));
            }
        }
    }
    let _ = writeln!(msg, "Ends in: {minutes} min");
    msg
}

/// Whole-number price with space-separated thousands: `1 234 567`.
pub fn format_price(v: f64) -> String {
    group_digits(v.max(0.0).trunc() as u64)
}

/// Price rounded to cents; cents are shown only when non-zero.
pub fn format_unit_price(v: f64) -> String {
    let cents = (v.max(0.0) * 100.0).round() as u64;
    let (whole, frac) = (cents / 100, cents % 100);
    if frac == 0 {
        group_digits(whole)
    } else {
        format!("{}.{frac:02}", group_digits(whole))
    }
}

fn group_digits(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(' ');
        }
        out.push(c);
    }
    out
}
