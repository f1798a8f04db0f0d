// Property tests for the two-path normalizations

use proptest::prelude::*;
use raid_verify::harness::{check_capacity, cross_check, hex_to_decimal, Normalization, Reading};
use raid_verify::model::units::{GIB, MIB};

proptest! {
    #[test]
    fn hex_renderings_agree_with_decimal(value in any::<u64>(), upper in any::<bool>(), prefixed in any::<bool>()) {
        let digits = if upper { format!("{:X}", value) } else { format!("{:x}", value) };
        let raw = if prefixed { format!("0x{}", digits) } else { digits };

        prop_assert_eq!(hex_to_decimal(&raw).unwrap(), value);

        let agreed = cross_check(
            "pci_device_id",
            Reading::sdk(value.to_string()),
            Reading::cli(raw).normalized(Normalization::HexToDecimal),
        );
        prop_assert_eq!(agreed.unwrap(), value.to_string());
    }

    #[test]
    fn sas_address_prefixes_are_ignored(address in "[0-9a-f]{16}", prefix in prop::sample::select(vec!["", "0x", "0X", "SAS:"])) {
        let agreed = cross_check(
            "sas_address",
            Reading::sdk(address.to_uppercase()).normalized(Normalization::SasAddress),
            Reading::cli(format!("{}{}", prefix, address)).normalized(Normalization::SasAddress),
        );
        prop_assert_eq!(agreed.unwrap(), address.to_uppercase());
    }

    #[test]
    fn capacity_within_tolerance_passes(gib in 1u64..100_000, skew in 0u64..=2) {
        let cli_mib = (gib + skew) * 1024;
        prop_assert_eq!(check_capacity("capacity", gib * GIB, cli_mib).unwrap(), gib);
    }

    #[test]
    fn capacity_beyond_tolerance_fails(gib in 1u64..100_000, skew in 3u64..1_000) {
        let sdk_bytes = (gib + skew) * GIB;
        let cli_mib = gib * GIB / MIB;
        prop_assert!(check_capacity("capacity", sdk_bytes, cli_mib).is_err());
    }
}
