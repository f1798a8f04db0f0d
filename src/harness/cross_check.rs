// Two-path cross-checks
//
// The SDK and the CLI render the same facts differently: PCI ids in decimal
// versus hex, SAS addresses with and without a "0X" or "<prefix>:" prefix,
// capacities in bytes versus MiB. Each reading is normalized on its own
// terms before the two are compared.

use crate::model::units::{bytes_to_gib, mib_to_gib};
use crate::{VerifyError, VerifyResult};
use std::fmt;

/// Capacity readings may differ by this many GiB after unit conversion
pub const CAPACITY_TOLERANCE_GIB: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    Exact,
    Trimmed,
    CaseInsensitive,
    /// Hex with or without a `0x` prefix, compared as decimal
    HexToDecimal,
    /// Bare upper-case address without `0X` or `<prefix>:` prefixes
    SasAddress,
}

impl Normalization {
    pub fn apply(&self, raw: &str) -> VerifyResult<String> {
        match self {
            Normalization::Exact => Ok(raw.to_string()),
            Normalization::Trimmed => Ok(raw.trim().to_string()),
            Normalization::CaseInsensitive => Ok(raw.to_uppercase()),
            Normalization::HexToDecimal => hex_to_decimal(raw).map(|v| v.to_string()),
            Normalization::SasAddress => Ok(strip_sas_prefix(raw)),
        }
    }
}

/// Parse a hex identifier the way the CLI prints it
pub fn hex_to_decimal(raw: &str) -> VerifyResult<u64> {
    let trimmed = raw.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16)
        .map_err(|_| VerifyError::Parse(format!("'{}' is not a hex identifier", raw)))
}

fn strip_sas_prefix(raw: &str) -> String {
    let address = raw.trim().rsplit(':').next().unwrap_or("");
    let address = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .unwrap_or(address);
    address.to_uppercase()
}

/// One side of a cross-check: which path produced the value, and how to read it
#[derive(Debug, Clone)]
pub struct Reading {
    pub path: String,
    pub value: String,
    pub normalization: Normalization,
}

impl Reading {
    pub fn new(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: value.into(),
            normalization: Normalization::Exact,
        }
    }

    pub fn normalized(mut self, normalization: Normalization) -> Self {
        self.normalization = normalization;
        self
    }

    pub fn sdk(value: impl Into<String>) -> Self {
        Self::new("sdk", value)
    }

    pub fn cli(value: impl Into<String>) -> Self {
        Self::new("cli", value)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.path, self.value)
    }
}

/// Require two readings of `field` to agree after normalization
///
/// Returns the agreed normalized value.
pub fn cross_check(field: &str, left: Reading, right: Reading) -> VerifyResult<String> {
    let a = left.normalization.apply(&left.value)?;
    let b = right.normalization.apply(&right.value)?;

    if a != b {
        return Err(VerifyError::mismatch(
            field,
            left.path,
            left.value,
            right.path,
            right.value,
        ));
    }

    tracing::info!(field, value = %a, "read paths agree");
    Ok(a)
}

/// Compare a byte capacity with a MiB capacity within [`CAPACITY_TOLERANCE_GIB`]
pub fn check_capacity(field: &str, sdk_bytes: u64, cli_mib: u64) -> VerifyResult<u64> {
    let sdk_gib = bytes_to_gib(sdk_bytes);
    let cli_gib = mib_to_gib(cli_mib);

    if sdk_gib.abs_diff(cli_gib) > CAPACITY_TOLERANCE_GIB {
        return Err(VerifyError::mismatch(
            field,
            "sdk",
            format!("{} GiB", sdk_gib),
            "cli",
            format!("{} GiB", cli_gib),
        ));
    }

    tracing::info!(field, gib = sdk_gib, "capacity agrees");
    Ok(sdk_gib)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::units::{GIB, MIB};
    use test_case::test_case;

    #[test_case("0x1000", 4096 ; "lower prefix")]
    #[test_case("0X1028", 4136 ; "upper prefix")]
    #[test_case("1f0c", 7948 ; "bare")]
    #[test_case(" 0x0 ", 0 ; "padded zero")]
    fn test_hex_to_decimal(raw: &str, expected: u64) {
        assert_eq!(hex_to_decimal(raw).unwrap(), expected);
    }

    #[test]
    fn test_hex_to_decimal_rejects_garbage() {
        assert!(matches!(hex_to_decimal("0xZZ"), Err(VerifyError::Parse(_))));
        assert!(hex_to_decimal("").is_err());
    }

    #[test]
    fn test_pci_ids_agree_across_bases() {
        let agreed = cross_check(
            "pci_vendor_id",
            Reading::sdk("4096"),
            Reading::cli("0x1000").normalized(Normalization::HexToDecimal),
        )
        .unwrap();
        assert_eq!(agreed, "4096");
    }

    #[test]
    fn test_case_insensitive_product_name() {
        cross_check(
            "product_name",
            Reading::sdk("MegaRAID SAS 9361-8i").normalized(Normalization::CaseInsensitive),
            Reading::cli("MEGARAID SAS 9361-8I").normalized(Normalization::CaseInsensitive),
        )
        .unwrap();
    }

    #[test]
    fn test_mismatch_names_both_paths() {
        let err = cross_check("bios_version", Reading::sdk("7.02"), Reading::cli("7.03")).unwrap_err();
        match err {
            VerifyError::StateMismatch {
                field,
                left_path,
                right,
                ..
            } => {
                assert_eq!(field, "bios_version");
                assert_eq!(left_path, "sdk");
                assert_eq!(right, "7.03");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sas_address_prefixes() {
        cross_check(
            "sas_address",
            Reading::sdk("sas:5000c500a1b2c3d4").normalized(Normalization::SasAddress),
            Reading::cli("0X5000C500A1B2C3D4").normalized(Normalization::SasAddress),
        )
        .unwrap();
    }

    #[test]
    fn test_capacity_tolerance() {
        let sdk_bytes = 931 * GIB + 500 * MIB;
        assert_eq!(check_capacity("size", sdk_bytes, 953_869).unwrap(), 931);
        assert!(check_capacity("size", 100 * GIB, 103 * 1024).is_err());
        assert!(check_capacity("size", 100 * GIB, 102 * 1024).is_ok());
    }
}
