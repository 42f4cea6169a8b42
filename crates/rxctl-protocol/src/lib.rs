//! Receiver Control Protocol Library
//!
//! This crate provides encoding and decoding for the line-oriented text
//! protocol spoken by a family of multi-channel software-defined receivers:
//!
//! - **Requests**: `MOD[:CH] VERB[?] [ARGS]\n`, `?` marking a query
//! - **Replies**: `MOD[:CH] VERB VALUE`, where only the last token carries data
//! - **Errors**: `MOD[:CH] VERB ERR CODE`
//!
//! # Architecture
//!
//! - [`command`]: module identities and request encoding
//! - [`reply`]: reply decoding, list/range helpers
//! - [`values`]: admissible-value selection against lists and ranges
//! - [`bitmask`]: named-bit decoding for built-in-test and log masks
//! - [`models`]: module class registry and mapping versions
//! - [`units`]: Hz/MHz conversion
//!
//! Nothing here performs I/O; the transport lives in `rxctl-core`.
//!
//! # Example
//!
//! ```rust
//! use rxctl_protocol::{ModuleId, Reply};
//!
//! let cmd = ModuleId::new("WBDDC", 1).query("FRQ");
//! assert_eq!(cmd.encode(), "WBDDC:1 FRQ?\n");
//!
//! let reply = Reply::parse("WBDDC:1 FRQ 12.500000").unwrap();
//! assert_eq!(reply.value::<f64>().unwrap(), 12.5);
//! ```

pub mod bitmask;
pub mod command;
pub mod error;
pub mod models;
pub mod reply;
pub mod units;
pub mod values;

pub use bitmask::{decode_bitmask, encode_bitmask};
pub use command::{decode_request, Command, ModuleId};
pub use error::{ParseError, ProtocolError};
pub use models::{MappingVersion, ModuleKind};
pub use reply::{
    clean_reply, encode_flag, index_of, is_error, looks_like_range, parse_flag,
    parse_indexed_list, parse_list, parse_number, parse_range, Reply,
};
pub use units::{format_mhz, hz_to_mhz, mhz_to_hz};
pub use values::{get_value_valid, get_value_valid_list, in_range, Declared, ValueRange};

/// Output packet protocol configured on an Output module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum OutputProtocol {
    /// SDDS
    #[default]
    Sdds,
    /// SDDS with extended header
    Sddsx,
    /// SDDS with analog-info header
    Sddsa,
    /// Uninterpreted samples
    Raw,
    /// VITA-49 data and context packets
    Vita49,
}

impl OutputProtocol {
    /// All protocols in the radio's `POLL` order
    pub const ALL: [OutputProtocol; 5] = [
        OutputProtocol::Sdds,
        OutputProtocol::Sddsx,
        OutputProtocol::Sddsa,
        OutputProtocol::Raw,
        OutputProtocol::Vita49,
    ];

    /// Wire name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sdds => "SDDS",
            Self::Sddsx => "SDDSX",
            Self::Sddsa => "SDDSA",
            Self::Raw => "RAW",
            Self::Vita49 => "VITA49",
        }
    }

    /// Resolve a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Whether radio time is carried as seconds-from-start-of-year
    pub fn uses_year_time(&self) -> bool {
        matches!(self, Self::Sdds | Self::Sddsx | Self::Sddsa | Self::Raw)
    }
}

/// Sample byte order configured on an Output module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endianess {
    /// Network byte order
    #[default]
    Big,
    /// Little endian
    Little,
}

impl Endianess {
    /// Wire name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Big => "BIG",
            Self::Little => "LITTLE",
        }
    }

    /// Resolve a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_uppercase().as_str() {
            "BIG" => Some(Self::Big),
            "LITTLE" => Some(Self::Little),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_protocol_names() {
        for p in OutputProtocol::ALL {
            assert_eq!(OutputProtocol::from_name(p.name()), Some(p));
        }
        assert_eq!(OutputProtocol::from_name("vita49"), Some(OutputProtocol::Vita49));
        assert!(OutputProtocol::Sdds.uses_year_time());
        assert!(!OutputProtocol::Vita49.uses_year_time());
    }

    #[test]
    fn test_endianess_names() {
        assert_eq!(Endianess::from_name("little"), Some(Endianess::Little));
        assert_eq!(Endianess::from_name("middle"), None);
    }
}
