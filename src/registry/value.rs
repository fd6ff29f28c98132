//! Decoding and encoding of raw configuration bytes into typed values.

use std::fmt::{Debug, Write as _};
use std::time::Duration;

pub trait ConfigValue: Clone + PartialEq + Debug + Send + Sync + 'static {
    /// Human-readable type name used in logs.
    const KIND: &'static str;

    fn decode(raw: &[u8]) -> Result<Self, String>;

    fn encode(&self) -> Vec<u8>;
}

fn utf8(raw: &[u8]) -> Result<&str, String> {
    std::str::from_utf8(raw).map_err(|e| e.to_string())
}

impl ConfigValue for String {
    const KIND: &'static str = "string";

    fn decode(raw: &[u8]) -> Result<Self, String> {
        utf8(raw).map(str::to_string)
    }

    fn encode(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ConfigValue for bool {
    const KIND: &'static str = "bool";

    fn decode(raw: &[u8]) -> Result<Self, String> {
        match utf8(raw)? {
            "1" | "t" | "T" | "TRUE" | "true" | "True" => Ok(true),
            "0" | "f" | "F" | "FALSE" | "false" | "False" => Ok(false),
            other => Err(format!("'{other}' is not a boolean")),
        }
    }

    fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl ConfigValue for i64 {
    const KIND: &'static str = "int";

    fn decode(raw: &[u8]) -> Result<Self, String> {
        utf8(raw)?.trim().parse().map_err(|e| format!("{e}"))
    }

    fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl ConfigValue for f64 {
    const KIND: &'static str = "float";

    fn decode(raw: &[u8]) -> Result<Self, String> {
        utf8(raw)?.trim().parse().map_err(|e| format!("{e}"))
    }

    fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl ConfigValue for Duration {
    const KIND: &'static str = "duration";

    fn decode(raw: &[u8]) -> Result<Self, String> {
        parse_duration(utf8(raw)?)
    }

    fn encode(&self) -> Vec<u8> {
        format_duration(*self).into_bytes()
    }
}

fn unit_nanos(unit: &str) -> Option<u128> {
    Some(match unit {
        "ns" => 1,
        "us" | "µs" | "μs" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SEC,
        "m" => 60 * NANOS_PER_SEC,
        "h" => 3600 * NANOS_PER_SEC,
        _ => return None,
    })
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

// Fraction digits beyond this are below a nanosecond for every unit.
const MAX_FRACTION_DIGITS: usize = 20;

/// `int.frac` scaled to nanoseconds, fraction truncated. Exact in integers.
fn scaled_nanos(num: &str, scale: u128) -> Option<u128> {
    let (int_part, frac_part) = num.split_once('.').unwrap_or((num, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let whole: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    let mut nanos = whole.checked_mul(scale)?;

    let digits = &frac_part[..frac_part.len().min(MAX_FRACTION_DIGITS)];
    if !digits.is_empty() {
        let frac: u128 = digits.parse().ok()?;
        let denom = 10u128.pow(u32::try_from(digits.len()).ok()?);
        nanos = nanos.checked_add(frac * scale / denom)?;
    }
    Some(nanos)
}

/// Parses durations such as `300ms`, `1.5h` or `2h45m`.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    if text == "0" {
        return Ok(Duration::ZERO);
    }
    if text.is_empty() {
        return Err("empty duration".into());
    }

    let mut nanos: u128 = 0;
    let mut rest = text;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (num, tail) = rest.split_at(num_end);
        if num.is_empty() {
            return Err(format!("invalid duration '{text}'"));
        }

        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);
        if unit.is_empty() {
            return Err(format!("missing unit in duration '{text}'"));
        }
        let scale = unit_nanos(unit).ok_or_else(|| format!("unknown unit '{unit}' in duration '{text}'"))?;

        let part = scaled_nanos(num, scale).ok_or_else(|| format!("invalid duration '{text}'"))?;
        nanos = nanos
            .checked_add(part)
            .ok_or_else(|| format!("duration '{text}' out of range"))?;
        rest = next;
    }

    let secs = u64::try_from(nanos / NANOS_PER_SEC).map_err(|_| format!("duration '{text}' out of range"))?;
    #[allow(clippy::cast_possible_truncation)]
    let subsec = (nanos % NANOS_PER_SEC) as u32;
    Ok(Duration::new(secs, subsec))
}

/// Renders `d` in the syntax accepted by [`parse_duration`].
#[must_use]
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".into();
    }
    let nanos = d.subsec_nanos();
    let secs = d.as_secs();
    if secs == 0 {
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}us", nanos / 1_000)
        } else {
            format!("{nanos}ns")
        };
    }

    let mut out = String::new();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    // write! to String is infallible
    if h > 0 {
        let _ = write!(out, "{h}h");
    }
    if h > 0 || m > 0 {
        let _ = write!(out, "{m}m");
    }
    if nanos == 0 {
        let _ = write!(out, "{s}s");
    } else {
        let frac = format!("{nanos:09}");
        let _ = write!(out, "{s}.{}s", frac.trim_end_matches('0'));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_spellings() {
        for t in ["1", "t", "T", "TRUE", "true", "True"] {
            assert!(bool::decode(t.as_bytes()).unwrap());
        }
        for f in ["0", "f", "F", "FALSE", "false", "False"] {
            assert!(!bool::decode(f.as_bytes()).unwrap());
        }
        assert!(bool::decode(b"yes").is_err());
    }

    #[test]
    fn int_and_float() {
        assert_eq!(i64::decode(b"-42").unwrap(), -42);
        assert!(i64::decode(b"4.2").is_err());
        assert!((f64::decode(b"4.25").unwrap() - 4.25).abs() < f64::EPSILON);
    }

    #[test]
    fn string_rejects_invalid_utf8() {
        assert!(String::decode(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn durations() {
        assert_eq!(parse_duration("1s").unwrap(), Duration::from_secs(1));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn duration_text_form() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(100)), "100ms");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");

        let d = Duration::from_millis(3_723_250);
        assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
    }

    #[test]
    fn long_durations_keep_every_nanosecond() {
        for d in [
            Duration::new(10_000_000, 1),
            Duration::new(u64::MAX / 4, 999_999_999),
            Duration::new(86_400 * 365 * 300, 123_456_789),
        ] {
            assert_eq!(parse_duration(&format_duration(d)).unwrap(), d);
        }
        assert_eq!(
            parse_duration("0.000000001s").unwrap(),
            Duration::from_nanos(1)
        );
        assert_eq!(parse_duration(".5s").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("1.2.3s").is_err());
        assert!(parse_duration(".s").is_err());
        assert!(parse_duration("99999999999999999999999h").is_err());
    }
}
