use std::fmt;

use serde::{Deserialize, Serialize};

/// Asking price in whole US dollars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(u64);

impl Price {
    pub const fn from_dollars(dollars: u64) -> Self {
        Self(dollars)
    }

    pub const fn dollars(self) -> u64 {
        self.0
    }

    /// Extract the first `$1,234`-style amount from marketplace text.
    ///
    /// Text made only of digits and thousands separators is accepted without
    /// the dollar sign. Returns `None` for "Call for price" and similar.
    ///
    /// ```rust
    /// use listing::Price;
    ///
    /// assert_eq!(Price::parse("Now $15,999!"), Some(Price::from_dollars(15_999)));
    /// assert_eq!(Price::parse("18500"), Some(Price::from_dollars(18_500)));
    /// assert_eq!(Price::parse("Call for price"), None);
    /// ```
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == ',') {
            return digits_value(trimmed).map(Self);
        }

        let mut rest = trimmed;
        while let Some(pos) = rest.find('$') {
            let after = &rest[pos + 1..];
            let end = after
                .find(|c: char| !(c.is_ascii_digit() || c == ','))
                .unwrap_or(after.len());
            if let Some(value) = digits_value(&after[..end]) {
                return Some(Self(value));
            }
            rest = after;
        }
        None
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", group_thousands(self.0))
    }
}

/// Extract the first number (thousands separators allowed) from odometer text
/// such as `"45,123 mi."` or `"50K miles"`.
pub fn parse_mileage(text: &str) -> Option<u32> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let tail = &text[start..];
    let end = tail
        .find(|c: char| !(c.is_ascii_digit() || c == ','))
        .unwrap_or(tail.len());
    let mut value = digits_value(&tail[..end])?;
    if tail[end..].starts_with(['k', 'K']) {
        value = value.checked_mul(1000)?;
    }
    u32::try_from(value).ok()
}

fn digits_value(raw: &str) -> Option<u64> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn group_thousands(value: u64) -> String {
    let raw = value.to_string();
    let mut out = String::with_capacity(raw.len() + raw.len() / 3);
    for (i, ch) in raw.chars().enumerate() {
        if i > 0 && (raw.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
