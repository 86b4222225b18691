use std::fmt;
use std::str::FromStr;

use rust_decimal::{Decimal, RoundingStrategy};

/// Monetary amounts are exact decimals so markups, VAT removal and
/// variance thresholds never drift the way binary floats do.
pub type Money = Decimal;

/// Ledger amounts are persisted as integer cents.
pub type Cents = i64;

/// Convert stored cents into a money value.
/// Example: 5000 -> 50.00
pub fn cents_to_money(cents: Cents) -> Money {
    Decimal::new(cents, 2)
}

/// Convert a money value into cents, rounding half away from zero.
/// Example: 12.345 -> 1235
pub fn money_to_cents(amount: Money) -> Result<Cents, ParseMoneyError> {
    let scaled = (amount * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    i64::try_from(scaled).map_err(|_| ParseMoneyError::OutOfRange)
}

/// Format an amount with two decimals and thousands separators.
/// Example: 1234567.891 -> "1,234,567.89", -50 -> "-50.00"
pub fn format_money(amount: Money) -> String {
    let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let text = format!("{:.2}", rounded.abs());
    let (units, fraction) = text.split_once('.').unwrap_or((&text, "00"));

    let mut grouped = String::with_capacity(units.len() + units.len() / 3);
    for (i, ch) in units.chars().enumerate() {
        if i > 0 && (units.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    format!("{}{}.{}", sign, grouped, fraction)
}

/// Parse a plain decimal string ("1234.56", "-12", "0.5") into money.
pub fn parse_money(input: &str) -> Result<Money, ParseMoneyError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(ParseMoneyError::InvalidFormat);
    }
    Decimal::from_str(input).map_err(|_| ParseMoneyError::InvalidFormat)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseMoneyError {
    InvalidFormat,
    OutOfRange,
}

impl fmt::Display for ParseMoneyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseMoneyError::InvalidFormat => write!(f, "invalid money format"),
            ParseMoneyError::OutOfRange => write!(f, "amount out of range"),
        }
    }
}

impl std::error::Error for ParseMoneyError {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(dec!(50)), "50.00");
        assert_eq!(format_money(dec!(1234.5)), "1,234.50");
        assert_eq!(format_money(dec!(1234567.891)), "1,234,567.89");
        assert_eq!(format_money(dec!(100)), "100.00");
        assert_eq!(format_money(dec!(0)), "0.00");
        assert_eq!(format_money(dec!(-350000)), "-350,000.00");
        assert_eq!(format_money(dec!(-0.001)), "0.00");
    }

    #[test]
    fn test_parse_money() {
        assert_eq!(parse_money("50.00"), Ok(dec!(50.00)));
        assert_eq!(parse_money(" 12.5 "), Ok(dec!(12.5)));
        assert_eq!(parse_money("-7"), Ok(dec!(-7)));
        assert!(parse_money("abc").is_err());
        assert!(parse_money("").is_err());
    }

    #[test]
    fn test_cents_conversion() {
        assert_eq!(cents_to_money(5000), dec!(50.00));
        assert_eq!(cents_to_money(-1), dec!(-0.01));
        assert_eq!(money_to_cents(dec!(12.345)), Ok(1235));
        assert_eq!(money_to_cents(dec!(-12.345)), Ok(-1235));
        assert_eq!(money_to_cents(dec!(0.004)), Ok(0));
    }
}
