//! Fixed-point currency amounts.

use serde::{Serialize, Serializer};
use std::fmt;

/// A currency amount stored in hundredths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    /// Build an amount from hundredths.
    pub const fn from_minor(minor: i64) -> Self {
        Amount(minor)
    }

    /// Build an amount from whole units.
    pub const fn from_units(units: i64) -> Self {
        Amount(units * 100)
    }

    pub fn minor(self) -> i64 {
        self.0
    }

    /// Parse a decimal amount such as `1,250,000`, `-42.5` or ` 7.05 `.
    ///
    /// `,` is treated as a thousands separator and dropped. At most two
    /// fractional digits are accepted. Returns `None` for anything else.
    pub fn parse(input: &str) -> Option<Self> {
        let cleaned: String = input.trim().chars().filter(|c| *c != ',').collect();
        let (negative, digits) = match cleaned.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, cleaned.as_str()),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (digits, ""),
        };
        if whole.is_empty() || frac.len() > 2 {
            return None;
        }
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }

        let whole: i64 = whole.parse().ok()?;
        let frac: i64 = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().ok()? * 10,
            _ => frac.parse().ok()?,
        };
        let minor = whole.checked_mul(100)?.checked_add(frac)?;
        Some(Amount(if negative { -minor } else { minor }))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_thousands_separators() {
        assert_eq!(Amount::parse("1,000,000"), Some(Amount::from_units(1_000_000)));
        assert_eq!(Amount::parse(" 600,001 "), Some(Amount::from_units(600_001)));
    }

    #[test]
    fn test_parse_fractions_and_sign() {
        assert_eq!(Amount::parse("12.5"), Some(Amount::from_minor(1250)));
        assert_eq!(Amount::parse("12.05"), Some(Amount::from_minor(1205)));
        assert_eq!(Amount::parse("-3"), Some(Amount::from_minor(-300)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "-", "abc", "1.234", "12a", ".5", "1.2.3", "--1"] {
            assert_eq!(Amount::parse(bad), None, "accepted {bad:?}");
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Amount::from_minor(100_000_050).to_string(), "1000000.50");
        assert_eq!(Amount::from_minor(-5).to_string(), "-0.05");
    }
}
