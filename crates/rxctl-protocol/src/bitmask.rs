//! Bitmask decoding for built-in-test and log masks
//!
//! The radio reports masks as integers and names each bit in a companion
//! `…L` list, least significant bit first.

/// Render the names of the set bits as CSV, LSB first
///
/// Bits without a name are reported as `BIT<n>`.
pub fn decode_bitmask(value: u64, names: &[String]) -> String {
    (0..64u32)
        .filter(|bit| value & (1u64 << bit) != 0)
        .map(|bit| {
            names
                .get(bit as usize)
                .cloned()
                .unwrap_or_else(|| format!("BIT{bit}"))
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// Build a mask from a CSV of bit names, the inverse of [`decode_bitmask`]
///
/// Unknown names are ignored.
pub fn encode_bitmask(csv: &str, names: &[String]) -> u64 {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|name| {
            names
                .iter()
                .position(|n| n.eq_ignore_ascii_case(name))
                .or_else(|| name.strip_prefix("BIT").and_then(|n| n.parse().ok()))
        })
        .filter(|&bit| bit < 64)
        .fold(0u64, |mask, bit| mask | (1u64 << bit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names() -> Vec<String> {
        ["ERRORS", "WARNINGS", "INFO", "DEBUG", "TRAFFIC"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_decode_lsb_first() {
        assert_eq!(decode_bitmask(0b10101, &names()), "ERRORS,INFO,TRAFFIC");
        assert_eq!(decode_bitmask(0, &names()), "");
    }

    #[test]
    fn test_decode_unnamed_bits() {
        assert_eq!(decode_bitmask(1 << 7 | 1, &names()), "ERRORS,BIT7");
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode_bitmask("INFO,errors", &names()), 0b101);
        assert_eq!(encode_bitmask("BIT9", &names()), 1 << 9);
        assert_eq!(encode_bitmask("", &names()), 0);
    }

    proptest! {
        #[test]
        fn prop_bitmask_roundtrip(mask in 0u64..(1 << 12)) {
            let names = names();
            let decoded = decode_bitmask(mask, &names);
            prop_assert_eq!(encode_bitmask(&decoded, &names), mask);
        }
    }
}
