use std::fmt;

/// Money is represented as integer cents so that sums and splits are exact.
/// 1 unit = 100 cents, so 50.00 = 5000 cents.
pub type Cents = i64;

/// Smallest amount that is still considered an outstanding balance.
/// Anything with an absolute value below this is settled.
pub const SETTLED_EPSILON: Cents = 1;

/// Returns true if a balance is small enough to need no transfer.
pub fn is_settled(balance: Cents) -> bool {
    balance.abs() < SETTLED_EPSILON
}

/// Format cents as a human-readable amount.
/// Example: 5000 -> "50.00", -1234 -> "-12.34"
pub fn format_cents(cents: Cents) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs_cents = cents.abs();
    format!("{}{}.{:02}", sign, abs_cents / 100, abs_cents % 100)
}

/// Parse a decimal string into cents.
/// Example: "50.00" -> 5000, "12.5" -> 1250, "100" -> 10000
///
/// More than two decimal places is rejected rather than truncated: split
/// amounts must add up exactly, so silently dropping a fraction is never safe.
pub fn parse_cents(input: &str) -> Result<Cents, ParseCentsError> {
    let input = input.trim();
    let (negative, digits) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };

    let (units_str, fraction_str) = match digits.split_once('.') {
        Some((units, fraction)) => (units, fraction),
        None => (digits, ""),
    };

    if units_str.is_empty() && fraction_str.is_empty() {
        return Err(ParseCentsError::InvalidFormat);
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(units_str) || !all_digits(fraction_str) {
        return Err(ParseCentsError::InvalidFormat);
    }
    if fraction_str.len() > 2 {
        return Err(ParseCentsError::TooPrecise);
    }

    let units: i64 = if units_str.is_empty() {
        0
    } else {
        units_str.parse().map_err(|_| ParseCentsError::Overflow)?
    };
    let fraction: i64 = match fraction_str.len() {
        0 => 0,
        1 => fraction_str.parse::<i64>().map_err(|_| ParseCentsError::InvalidFormat)? * 10,
        _ => fraction_str.parse().map_err(|_| ParseCentsError::InvalidFormat)?,
    };

    let cents = units
        .checked_mul(100)
        .and_then(|c| c.checked_add(fraction))
        .ok_or(ParseCentsError::Overflow)?;
    Ok(if negative { -cents } else { cents })
}

/// Divide `total` into `parts` whole-cent shares that add up to `total`.
///
/// The leftover cents go one each to the first shares, so 100.00 split three
/// ways is [33.34, 33.33, 33.33].
pub fn split_evenly(total: Cents, parts: usize) -> Vec<Cents> {
    if parts == 0 {
        return Vec::new();
    }
    let parts_i = parts as i64;
    let base = total / parts_i;
    let remainder = (total % parts_i) as usize;
    (0..parts)
        .map(|i| if i < remainder { base + 1 } else { base })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseCentsError {
    InvalidFormat,
    TooPrecise,
    Overflow,
}

impl fmt::Display for ParseCentsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCentsError::InvalidFormat => write!(f, "invalid money format"),
            ParseCentsError::TooPrecise => write!(f, "at most two decimal places are allowed"),
            ParseCentsError::Overflow => write!(f, "amount is too large"),
        }
    }
}

impl std::error::Error for ParseCentsError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_cents() {
        assert_eq!(format_cents(5000), "50.00");
        assert_eq!(format_cents(1234), "12.34");
        assert_eq!(format_cents(1), "0.01");
        assert_eq!(format_cents(0), "0.00");
        assert_eq!(format_cents(-5000), "-50.00");
        assert_eq!(format_cents(-1), "-0.01");
    }

    #[test]
    fn test_parse_cents() {
        assert_eq!(parse_cents("50.00"), Ok(5000));
        assert_eq!(parse_cents("50"), Ok(5000));
        assert_eq!(parse_cents("12.5"), Ok(1250));
        assert_eq!(parse_cents(".50"), Ok(50));
        assert_eq!(parse_cents("-50.00"), Ok(-5000));
        assert_eq!(parse_cents(" 7.05 "), Ok(705));
    }

    #[test]
    fn test_parse_cents_rejects_bad_input() {
        assert_eq!(parse_cents("abc"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("12.34.56"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("."), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("1e3"), Err(ParseCentsError::InvalidFormat));
        assert_eq!(parse_cents("100.999"), Err(ParseCentsError::TooPrecise));
        assert_eq!(
            parse_cents("999999999999999999999"),
            Err(ParseCentsError::Overflow)
        );
    }

    #[test]
    fn test_split_evenly_with_remainder() {
        assert_eq!(split_evenly(10000, 3), vec![3334, 3333, 3333]);
        assert_eq!(split_evenly(30000, 3), vec![10000, 10000, 10000]);
        assert_eq!(split_evenly(2, 3), vec![1, 1, 0]);
        assert!(split_evenly(100, 0).is_empty());
    }

    #[test]
    fn test_split_evenly_preserves_total() {
        for total in [1, 99, 100, 12345, 99999] {
            for parts in 1..=7 {
                let shares = split_evenly(total, parts);
                assert_eq!(shares.len(), parts);
                assert_eq!(shares.iter().sum::<Cents>(), total);
            }
        }
    }

    #[test]
    fn test_is_settled() {
        assert!(is_settled(0));
        assert!(!is_settled(1));
        assert!(!is_settled(-1));
    }
}
