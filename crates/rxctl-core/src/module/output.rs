//! UDP output streamers (`OUT:n`)
//!
//! An output packetizes whatever the router links into it. Wiring is the
//! router's job; this facade covers the packet format and destination.

use std::fmt;
use std::str::FromStr;

use rxctl_protocol::{Endianess, OutputProtocol, ParseError, ValueRange};
use serde::Serialize;

use super::{Cache, ModuleBase, Tolerance};
use crate::error::Result;

/// Packet destination: `ip:port`, optionally prefixed by an interface
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Destination {
    pub interface: Option<String>,
    pub ip: String,
    pub port: u16,
}

impl Destination {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            interface: None,
            ip: ip.into(),
            port,
        }
    }

    pub fn on_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(iface) = &self.interface {
            write!(f, "{iface}:")?;
        }
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for Destination {
    type Err = ParseError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        let malformed = || ParseError::InvalidAddress(s.to_string());
        let (head, port) = s.rsplit_once(':').ok_or_else(malformed)?;
        let port = port.parse().map_err(|_| malformed())?;
        let (interface, ip) = match head.split_once(':') {
            Some((iface, ip)) => (Some(iface.to_string()), ip),
            None => (None, head),
        };
        if ip.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            interface,
            ip: ip.to_string(),
            port,
        })
    }
}

/// Snapshot of an output's configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputStatus {
    pub module: String,
    pub destination: String,
    pub protocol: Option<OutputProtocol>,
    pub enabled: bool,
    pub samples_per_frame: u32,
    pub packet_rate: f64,
}

/// An output streamer
#[derive(Debug)]
pub struct Output {
    base: ModuleBase,
    protocols: Cache<Vec<String>>,
    endianesses: Cache<Vec<String>>,
    frame_range: Cache<ValueRange>,
    data_widths: Cache<Vec<u32>>,
    time_references: Cache<Vec<String>>,
}

impl Output {
    pub fn new(base: ModuleBase) -> Self {
        Self {
            base,
            protocols: Cache::default(),
            endianesses: Cache::default(),
            frame_range: Cache::default(),
            data_widths: Cache::default(),
            time_references: Cache::default(),
        }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    pub fn invalidate(&self) {
        self.protocols.clear();
        self.endianesses.clear();
        self.frame_range.clear();
        self.data_widths.clear();
        self.time_references.clear();
    }

    /// Raw `IPP` text
    pub async fn ip_address(&self) -> Result<String> {
        self.base.get_text("IPP").await
    }

    pub async fn destination(&self) -> Result<Destination> {
        self.base
            .read("IPP", &[], |r| r.payload().parse())
            .await
    }

    pub async fn set_destination(&self, destination: &Destination) -> Result<()> {
        self.base
            .set_text_validated("IPP", &destination.to_string())
            .await
    }

    /// Protocol names in `POLL` order
    pub async fn protocols(&self) -> Result<Vec<String>> {
        self.protocols
            .get_or_fetch(move || self.base.choices("POLL"))
            .await
    }

    /// Current protocol name
    pub async fn protocol_name(&self) -> Result<String> {
        let protocols = self.protocols().await?;
        self.base.get_choice("POL", &protocols).await
    }

    /// Current protocol, `None` when the radio reports one this library lacks
    pub async fn protocol(&self) -> Result<Option<OutputProtocol>> {
        Ok(OutputProtocol::from_name(&self.protocol_name().await?))
    }

    pub async fn set_protocol(&self, protocol: OutputProtocol) -> Result<()> {
        let protocols = self.protocols().await?;
        self.base.set_choice("POL", &protocols, protocol.name()).await
    }

    pub async fn set_protocol_index(&self, index: usize) -> Result<()> {
        let protocols = self.protocols().await?;
        self.base.set_choice_index("POL", &protocols, index).await
    }

    pub async fn endianesses(&self) -> Result<Vec<String>> {
        self.endianesses
            .get_or_fetch(move || self.base.choices("ENDL"))
            .await
    }

    pub async fn endianess(&self) -> Result<Option<Endianess>> {
        let names = self.endianesses().await?;
        let name = self.base.get_choice("END", &names).await?;
        Ok(Endianess::from_name(&name))
    }

    pub async fn set_endianess(&self, endianess: Endianess) -> Result<()> {
        let names = self.endianesses().await?;
        self.base.set_choice("END", &names, endianess.name()).await
    }

    pub async fn set_endianess_index(&self, index: usize) -> Result<()> {
        let names = self.endianesses().await?;
        self.base.set_choice_index("END", &names, index).await
    }

    pub async fn samples_per_frame(&self) -> Result<u32> {
        self.base.get_first("SPF").await
    }

    pub async fn frame_range(&self) -> Result<ValueRange> {
        self.frame_range
            .get_or_fetch(move || self.base.get_range("SPFL"))
            .await
    }

    pub async fn set_samples_per_frame(&self, samples: u32) -> Result<()> {
        let range = self.frame_range().await?;
        let value = f64::from(samples);
        if !range.contains_on_grid(value) {
            return Err(self.base.invalid(
                "SPF",
                samples,
                format!("outside {}:{}:{}", range.min, range.max, range.step),
            ));
        }
        self.base.set_number_validated("SPF", value, Tolerance::Exact).await
    }

    /// Bits per sample component
    pub async fn data_width(&self) -> Result<u32> {
        self.base.get_first("DWD").await
    }

    pub async fn data_widths(&self) -> Result<Vec<u32>> {
        self.data_widths
            .get_or_fetch(move || self.base.get_numbers("DWDL"))
            .await
    }

    pub async fn set_data_width(&self, bits: u32) -> Result<()> {
        let widths = self.data_widths().await?;
        if !widths.contains(&bits) {
            return Err(self.base.invalid("DWD", bits, format!("not one of {widths:?}")));
        }
        self.base
            .set_number_validated("DWD", f64::from(bits), Tolerance::Exact)
            .await
    }

    pub async fn stream_id(&self) -> Result<u32> {
        self.base.get_first("SID").await
    }

    pub async fn set_stream_id(&self, id: u32) -> Result<()> {
        self.base
            .set_number_validated("SID", f64::from(id), Tolerance::Exact)
            .await
    }

    /// Packets per second at the current source rate
    pub async fn packet_rate(&self) -> Result<f64> {
        self.base.get_first("PKR").await
    }

    pub async fn vlan_enabled(&self) -> Result<bool> {
        self.base.get_flag("VLANEN").await
    }

    pub async fn set_vlan_enabled(&self, on: bool) -> Result<()> {
        self.base.set_flag_validated("VLANEN", on).await
    }

    pub async fn vlan_tci(&self) -> Result<u32> {
        self.base.get_first("VLANTCI").await
    }

    pub async fn set_vlan_tci(&self, tci: u32) -> Result<()> {
        self.base
            .set_number_validated("VLANTCI", f64::from(tci), Tolerance::Exact)
            .await
    }

    /// Context packet rate (CDR)
    pub async fn cdr(&self) -> Result<u32> {
        self.base.get_first("CDR").await
    }

    pub async fn set_cdr(&self, rate: u32) -> Result<()> {
        self.base
            .set_number_validated("CDR", f64::from(rate), Tolerance::Exact)
            .await
    }

    /// Context change rate (CCR)
    pub async fn ccr(&self) -> Result<u32> {
        self.base.get_first("CCR").await
    }

    pub async fn set_ccr(&self, rate: u32) -> Result<()> {
        self.base
            .set_number_validated("CCR", f64::from(rate), Tolerance::Exact)
            .await
    }

    /// Multi-frame packing mask
    pub async fn mfp(&self) -> Result<u32> {
        self.base.get_first("MFP").await
    }

    pub async fn set_mfp(&self, mask: u32) -> Result<()> {
        self.base
            .set_number_validated("MFP", f64::from(mask), Tolerance::Exact)
            .await
    }

    /// Timestamp offset
    pub async fn timestamp_offset(&self) -> Result<i64> {
        self.base.get_first("TSO").await
    }

    pub async fn set_timestamp_offset(&self, offset: i64) -> Result<()> {
        self.base
            .set_number_validated("TSO", offset as f64, Tolerance::Exact)
            .await
    }

    pub async fn time_references(&self) -> Result<Vec<String>> {
        self.time_references
            .get_or_fetch(move || self.base.choices("TSRL"))
            .await
    }

    pub async fn time_reference(&self) -> Result<String> {
        let names = self.time_references().await?;
        self.base.get_choice("TSR", &names).await
    }

    pub async fn set_time_reference(&self, name: &str) -> Result<()> {
        let names = self.time_references().await?;
        self.base.set_choice("TSR", &names, name).await
    }

    /// Apply gain when reducing bits
    pub async fn gain_reduction(&self) -> Result<bool> {
        self.base.get_flag("GRB").await
    }

    pub async fn set_gain_reduction(&self, on: bool) -> Result<()> {
        self.base.set_flag_validated("GRB", on).await
    }

    pub async fn enabled(&self) -> Result<bool> {
        self.base.get_flag("ENB").await
    }

    pub async fn set_enabled(&self, on: bool) -> Result<()> {
        self.base.set_flag_validated("ENB", on).await
    }

    pub async fn status(&self) -> Result<OutputStatus> {
        Ok(OutputStatus {
            module: self.base.name(),
            destination: self.ip_address().await?,
            protocol: self.protocol().await?,
            enabled: self.enabled().await?,
            samples_per_frame: self.samples_per_frame().await?,
            packet_rate: self.packet_rate().await?,
        })
    }
}
