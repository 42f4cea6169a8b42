//! Module class registry
//!
//! Installed modules are described by an installation name (the hardware
//! class, e.g. `MSDR3000` or `SWDDCDEC2`) and a registration name (the name
//! used on the wire). Older radio loads register some classes under legacy
//! aliases; the mapping version, read from the radio's batch filename,
//! selects which alias table applies.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

/// Pattern identifying the mapping generation in a batch filename
pub const MAPPING_PATTERN: &str = r"_Gen(\d+)_Map";

static MAPPING_REGEX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(MAPPING_PATTERN).ok());

/// Module class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModuleKind {
    /// Global command console
    Console,
    /// Syslog forwarding
    Log,
    /// Board health (built-in test, meters, reference)
    Board,
    /// Network interface
    Network,
    /// Dataflow graph manager
    StreamRouter,
    /// Wideband analog receiver with a fixed narrow/wide bandwidth pair
    WideReceiver,
    /// Serially controlled receiver with an enumerated bandwidth list
    SerialReceiver,
    /// Wideband digital down-converter
    WbDdc,
    /// Narrowband digital down-converter
    NbDdc,
    /// Software down-converter
    SwDdc,
    /// FFT engine
    Fft,
    /// Wide-range spectral scan engine
    SpectralScan,
    /// UDP output emitter
    Output,
    /// Time-of-day
    TimeOfDay,
}

/// All classes, in discovery order
pub const ALL_KINDS: [ModuleKind; 14] = [
    ModuleKind::Console,
    ModuleKind::Log,
    ModuleKind::Board,
    ModuleKind::Network,
    ModuleKind::StreamRouter,
    ModuleKind::WideReceiver,
    ModuleKind::SerialReceiver,
    ModuleKind::WbDdc,
    ModuleKind::NbDdc,
    ModuleKind::SwDdc,
    ModuleKind::Fft,
    ModuleKind::SpectralScan,
    ModuleKind::Output,
    ModuleKind::TimeOfDay,
];

impl ModuleKind {
    /// Resolve an installation name to a class
    pub fn from_install_name(name: &str) -> Option<Self> {
        let name = name.trim().to_ascii_uppercase();
        let kind = match name.as_str() {
            "CON" => Self::Console,
            "LOG" => Self::Log,
            "BRD" => Self::Board,
            "NET" => Self::Network,
            "SRT" => Self::StreamRouter,
            "TOD" => Self::TimeOfDay,
            "WBDDC" => Self::WbDdc,
            "NBDDC" => Self::NbDdc,
            "OUT" => Self::Output,
            "FFT" => Self::Fft,
            "SPC" => Self::SpectralScan,
            "RCV" => Self::WideReceiver,
            "MSDR_RS422" => Self::SerialReceiver,
            n if n.starts_with("SWDDC") => Self::SwDdc,
            n if n.starts_with("MSDR") => Self::WideReceiver,
            _ => return None,
        };
        Some(kind)
    }

    /// Resolve a registration name using the alias table of `version`
    ///
    /// Falls back to treating the name as an installation name.
    pub fn from_registration_name(name: &str, version: MappingVersion) -> Option<Self> {
        ALL_KINDS
            .iter()
            .copied()
            .find(|k| k.registration_name(version).eq_ignore_ascii_case(name))
            .or_else(|| Self::from_install_name(name))
    }

    /// Registration (wire) name of this class under a mapping version
    pub fn registration_name(&self, version: MappingVersion) -> &'static str {
        match (self, version) {
            (Self::Console, _) => "CON",
            (Self::Log, _) => "LOG",
            (Self::Board, _) => "BRD",
            (Self::Network, _) => "NET",
            (Self::StreamRouter, _) => "SRT",
            (Self::TimeOfDay, _) => "TOD",
            (Self::WideReceiver | Self::SerialReceiver, MappingVersion::V1) => "RX",
            (Self::WideReceiver | Self::SerialReceiver, MappingVersion::V2) => "RCV",
            (Self::WbDdc, _) => "WBDDC",
            (Self::NbDdc, _) => "NBDDC",
            (Self::SwDdc, MappingVersion::V1) => "SWDDC",
            (Self::SwDdc, MappingVersion::V2) => "SWDDCDEC2",
            (Self::Fft, _) => "FFT",
            (Self::SpectralScan, _) => "SPC",
            (Self::Output, _) => "OUT",
        }
    }

    /// Canonical installation name for this class
    pub fn install_name(&self) -> &'static str {
        match self {
            Self::Console => "CON",
            Self::Log => "LOG",
            Self::Board => "BRD",
            Self::Network => "NET",
            Self::StreamRouter => "SRT",
            Self::TimeOfDay => "TOD",
            Self::WideReceiver => "MSDR3000",
            Self::SerialReceiver => "MSDR_RS422",
            Self::WbDdc => "WBDDC",
            Self::NbDdc => "NBDDC",
            Self::SwDdc => "SWDDCDEC2",
            Self::Fft => "FFT",
            Self::SpectralScan => "SPC",
            Self::Output => "OUT",
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Console => "Console",
            Self::Log => "Log",
            Self::Board => "Board",
            Self::Network => "Network",
            Self::StreamRouter => "Stream Router",
            Self::WideReceiver => "Wideband Receiver",
            Self::SerialReceiver => "Serial Receiver",
            Self::WbDdc => "Wideband DDC",
            Self::NbDdc => "Narrowband DDC",
            Self::SwDdc => "Software DDC",
            Self::Fft => "FFT",
            Self::SpectralScan => "Spectral Scan",
            Self::Output => "Output",
            Self::TimeOfDay => "Time of Day",
        }
    }

    /// Whether this is an analog receiver front-end
    pub fn is_receiver(&self) -> bool {
        matches!(self, Self::WideReceiver | Self::SerialReceiver)
    }

    /// Whether this is a digital down-converter
    pub fn is_ddc(&self) -> bool {
        matches!(self, Self::WbDdc | Self::NbDdc | Self::SwDdc)
    }

    /// Whether the class is addressed globally (channel 0)
    pub fn is_global(&self) -> bool {
        matches!(
            self,
            Self::Console | Self::Log | Self::Board | Self::StreamRouter | Self::TimeOfDay
        )
    }
}

/// Alias table generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MappingVersion {
    /// Legacy aliases (`RX`, `SWDDC`)
    #[default]
    V1,
    /// Current names (`RCV`, `SWDDCDEC2`)
    V2,
}

impl MappingVersion {
    /// Detect the mapping version from a batch filename
    ///
    /// Filenames without a `_Gen<N>_Map` marker, or with `N < 2`, map to V1.
    pub fn from_batch_filename(filename: &str) -> Self {
        let generation = MAPPING_REGEX
            .as_ref()
            .and_then(|re| re.captures(filename))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        trace!("batch {:?} has mapping generation {:?}", filename, generation);
        match generation {
            Some(n) if n >= 2 => Self::V2,
            _ => Self::V1,
        }
    }

    /// Numeric version
    pub fn as_u8(&self) -> u8 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
        }
    }
}
