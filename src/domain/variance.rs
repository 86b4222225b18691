use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{trailing_average, Money};

/// Above this multiple of the 3-month average a value is flagged high.
pub const HIGH_FACTOR: Decimal = Decimal::from_parts(115, 0, 0, false, 2);

/// Below this multiple of the 3-month average a value is flagged low.
pub const LOW_FACTOR: Decimal = Decimal::from_parts(85, 0, 0, false, 2);

/// Highlighting needs at least this many months on screen.
pub const MIN_MONTHS_FOR_HIGHLIGHT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variance {
    High,
    Low,
}

impl Variance {
    pub fn marker(&self) -> &'static str {
        match self {
            Variance::High => "▲",
            Variance::Low => "▼",
        }
    }
}

/// Compare a value against its 3-month average. Both bounds are strict,
/// and a non-positive average never flags.
pub fn classify_variance(value: Money, average: Money) -> Option<Variance> {
    if average <= Money::ZERO {
        return None;
    }
    if value > average * HIGH_FACTOR {
        Some(Variance::High)
    } else if value < average * LOW_FACTOR {
        Some(Variance::Low)
    } else {
        None
    }
}

/// Flags for a series ordered most recent first. The selected month
/// (index 0) is never flagged.
pub fn highlight_series(values: &[Money]) -> Vec<Option<Variance>> {
    if values.len() < MIN_MONTHS_FOR_HIGHLIGHT {
        return vec![None; values.len()];
    }
    let average = trailing_average(values, 3);
    values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            if i == 0 {
                None
            } else {
                classify_variance(*value, average)
            }
        })
        .collect()
}
