// Capacity units and size-string parsing
//
// Controllers and their CLIs report capacity in different units (bytes from
// the SDK, MiB from the CLI); comparisons normalize both to whole GiB.

use crate::{VerifyError, VerifyResult};
use lazy_static::lazy_static;
use regex::Regex;

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

lazy_static! {
    static ref SIZE_RE: Regex =
        Regex::new(r"(?i)^\s*(\d+)\s*(B|KB|MB|GB|TB)?\s*$").expect("size regex is valid");
}

/// Parse sizes such as "20GB", "3000MB" or "512" (bytes)
pub fn parse_size(text: &str) -> VerifyResult<u64> {
    let caps = SIZE_RE
        .captures(text)
        .ok_or_else(|| VerifyError::Parse(format!("unrecognised size '{}'", text)))?;

    let value: u64 = caps[1]
        .parse()
        .map_err(|_| VerifyError::Parse(format!("size '{}' out of range", text)))?;

    let unit = caps
        .get(2)
        .map(|m| m.as_str().to_ascii_uppercase())
        .unwrap_or_else(|| "B".to_string());

    let multiplier = match unit.as_str() {
        "B" => 1,
        "KB" => KIB,
        "MB" => MIB,
        "GB" => GIB,
        "TB" => TIB,
        _ => unreachable!("regex only admits known units"),
    };

    value
        .checked_mul(multiplier)
        .ok_or_else(|| VerifyError::Parse(format!("size '{}' out of range", text)))
}

/// Whole GiB in a byte count (truncating)
pub fn bytes_to_gib(bytes: u64) -> u64 {
    bytes / GIB
}

/// Whole GiB in a MiB count (truncating)
pub fn mib_to_gib(mib: u64) -> u64 {
    mib / KIB
}

/// Format bytes for log lines
pub fn human_bytes(bytes: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut val = bytes as f64;
    let mut i = 0usize;
    while val >= 1024.0 && i + 1 < units.len() {
        val /= 1024.0;
        i += 1;
    }
    format!("{:.2}{}", val, units[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("20GB", 20 * GIB ; "gigabytes")]
    #[test_case("3000MB", 3000 * MIB ; "megabytes")]
    #[test_case("10gb", 10 * GIB ; "lowercase unit")]
    #[test_case(" 4 KB ", 4 * KIB ; "padded")]
    #[test_case("512", 512 ; "bare bytes")]
    #[test_case("1TB", TIB ; "terabyte")]
    fn test_parse_size(text: &str, expected: u64) {
        assert_eq!(parse_size(text).unwrap(), expected);
    }

    #[test_case("twenty GB" ; "words")]
    #[test_case("20 PB" ; "unknown unit")]
    #[test_case("" ; "empty")]
    fn test_parse_size_rejects(text: &str) {
        assert!(matches!(parse_size(text), Err(VerifyError::Parse(_))));
    }

    #[test]
    fn test_unit_conversions_truncate() {
        assert_eq!(bytes_to_gib(GIB * 3 + GIB / 2), 3);
        assert_eq!(mib_to_gib(1_907_729), 1863);
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0.00B");
        assert_eq!(human_bytes(1536), "1.50KB");
        assert_eq!(human_bytes(20 * GIB), "20.00GB");
    }
}
