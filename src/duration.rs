//! Duration codec — parses and formats `DD-hh:mm:ss` duration strings.
//!
//! Used for `Sailor::max_time` and `User::time_limit`. Empty input or an
//! all-zero value both mean "no limit", represented as `None` seconds.

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serializer};

/// Parse a `DD-hh:mm:ss` string into a second count.
///
/// Empty string means "no limit" (`Ok(None)`). A syntactically valid string
/// whose value is exactly zero also means "no limit", matching the teacher's
/// convention that zero-valued limits are unlimited rather than "run for 0s".
pub fn parse(s: &str) -> Result<Option<u64>> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(None);
    }
    let (days_part, rest) = s
        .split_once('-')
        .ok_or_else(|| anyhow::anyhow!("duration must be DD-hh:mm:ss, got {s:?}"))?;
    let mut fields = rest.split(':');
    let (Some(hh), Some(mm), Some(ss), None) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        bail!("duration must be DD-hh:mm:ss, got {s:?}");
    };
    if hh.len() != 2 || mm.len() != 2 || ss.len() != 2 {
        bail!("duration hh/mm/ss fields must be zero-padded to 2 digits, got {s:?}");
    }
    let days: u64 = days_part
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid day field in duration {s:?}"))?;
    let hh: u64 = hh
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid hour field in duration {s:?}"))?;
    let mm: u64 = mm
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minute field in duration {s:?}"))?;
    let ss: u64 = ss
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid second field in duration {s:?}"))?;
    if hh >= 24 || mm >= 60 || ss >= 60 {
        bail!("duration field out of range in {s:?}");
    }
    let total = days
        .checked_mul(86_400)
        .and_then(|d| d.checked_add(hh * 3_600))
        .and_then(|d| d.checked_add(mm * 60))
        .and_then(|d| d.checked_add(ss))
        .ok_or_else(|| anyhow::anyhow!("duration overflow in {s:?}"))?;
    if total == 0 {
        Ok(None)
    } else {
        Ok(Some(total))
    }
}

/// Format a second count back into `DD-hh:mm:ss`. `None` formats as `"0-00:00:00"`.
pub fn format(seconds: Option<u64>) -> String {
    let seconds = seconds.unwrap_or(0);
    let days = seconds / 86_400;
    let hh = (seconds % 86_400) / 3_600;
    let mm = (seconds % 3_600) / 60;
    let ss = seconds % 60;
    format!("{days}-{hh:02}:{mm:02}:{ss:02}")
}

/// `serialize_with` for an `Option<u64>` second count, writing it through
/// [`format`] so `Sailor::max_time`/`User::time_limit` persist and round-trip
/// as the same `DD-hh:mm:ss` string the HTTP ingress accepts on input
/// (spec.md §3, §6), instead of a bare integer.
pub fn serialize_opt<S>(value: &Option<u64>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(*value))
}

/// `deserialize_with` counterpart to [`serialize_opt`].
pub fn deserialize_opt<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_is_unlimited() {
        assert_eq!(parse("").unwrap(), None);
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn parse_all_zero_is_unlimited() {
        assert_eq!(parse("0-00:00:00").unwrap(), None);
    }

    #[test]
    fn parse_simple_duration() {
        assert_eq!(parse("1-02:03:04").unwrap(), Some(93_784));
    }

    #[test]
    fn parse_zero_days() {
        assert_eq!(parse("0-00:00:30").unwrap(), Some(30));
    }

    #[test]
    fn parse_rejects_bad_shape() {
        assert!(parse("garbage").is_err());
        assert!(parse("1-2:3:4").is_err()); // not zero-padded
        assert!(parse("1-24:00:00").is_err()); // hour out of range
        assert!(parse("1-00:60:00").is_err());
        assert!(parse("1-00:00:60").is_err());
    }

    #[test]
    fn format_roundtrips() {
        assert_eq!(format(Some(93_784)), "1-02:03:04");
        assert_eq!(format(None), "0-00:00:00");
        assert_eq!(format(Some(30)), "0-00:00:30");
    }

    #[test]
    fn format_then_parse_roundtrips_nonzero() {
        let secs = 93_784u64;
        assert_eq!(parse(&format(Some(secs))).unwrap(), Some(secs));
    }

    #[derive(serde::Serialize, serde::Deserialize)]
    struct Wrapper {
        #[serde(serialize_with = "serialize_opt", deserialize_with = "deserialize_opt")]
        value: Option<u64>,
    }

    #[test]
    fn serde_helpers_emit_and_read_back_duration_strings() {
        let w = Wrapper { value: Some(93_784) };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"value":"1-02:03:04"}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, Some(93_784));
    }

    #[test]
    fn serde_helpers_round_trip_none_as_zero_string() {
        let w = Wrapper { value: None };
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"{"value":"0-00:00:00"}"#);
        let back: Wrapper = serde_json::from_str(&json).unwrap();
        assert_eq!(back.value, None);
    }
}
