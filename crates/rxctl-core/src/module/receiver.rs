//! Analog receiver front-ends (`RCV:n`)
//!
//! Two variants share one surface:
//! - wideband (`MSDR…`): `BWT` carries the bandwidth in MHz, one of `BWTL`
//! - serial (`MSDR_RS422`): `BWT` carries a position into `BWCL`

use rxctl_protocol::units::mhz_to_hz;
use rxctl_protocol::{decode_bitmask, get_value_valid, get_value_valid_list, ModuleKind, ValueRange};
use serde::Serialize;

use super::{Cache, ModuleBase, Tolerance};
use crate::error::{ControlError, Result};

/// Readback tolerance for frequencies and bandwidths (Hz)
pub(crate) const HZ_TOLERANCE: f64 = 1.0;

/// ADC meter reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct AdcMeter {
    /// Samples in the measurement window
    pub samples: u64,
    /// Samples that overflowed
    pub overflows: u64,
    /// Largest absolute sample value
    pub abs_max: u64,
}

/// An analog receiver
#[derive(Debug)]
pub struct Receiver {
    base: ModuleBase,
    frequency_range: Cache<ValueRange>,
    bandwidths: Cache<Vec<f64>>,
    attenuation_range: Cache<ValueRange>,
    gain_range: Cache<ValueRange>,
    bit_names: Cache<Vec<String>>,
}

impl Receiver {
    pub fn new(base: ModuleBase) -> Self {
        Self {
            base,
            frequency_range: Cache::default(),
            bandwidths: Cache::default(),
            attenuation_range: Cache::default(),
            gain_range: Cache::default(),
            bit_names: Cache::default(),
        }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    /// Whether bandwidth is selected by position (serial control)
    pub fn is_serial(&self) -> bool {
        self.base.kind() == ModuleKind::SerialReceiver
    }

    /// Drop every cached capability
    pub fn invalidate(&self) {
        self.frequency_range.clear();
        self.bandwidths.clear();
        self.attenuation_range.clear();
        self.gain_range.clear();
        self.bit_names.clear();
    }

    /// Tuned frequency (Hz)
    pub async fn frequency(&self) -> Result<f64> {
        self.base.get_mhz("FRQ").await
    }

    /// Tunable range (Hz)
    pub async fn frequency_range(&self) -> Result<ValueRange> {
        self.frequency_range
            .get_or_fetch(move || self.base.get_mhz_range("FRQL"))
            .await
    }

    /// Snap a requested frequency up to the tuning grid
    pub async fn valid_frequency(&self, hz: f64) -> Result<f64> {
        let range = self.frequency_range().await?;
        let tolerance = self.base.validation().frequency_tolerance_percent;
        get_value_valid(Some(hz), tolerance, range, true)
            .map_err(|e| self.base.protocol_error("FRQ", e))
    }

    pub async fn set_frequency(&self, hz: f64) -> Result<()> {
        let hz = self.valid_frequency(hz).await?;
        self.base
            .set_mhz_validated("FRQ", hz, Tolerance::Absolute(HZ_TOLERANCE))
            .await
    }

    /// Selectable bandwidths (Hz), in declaration order
    pub async fn bandwidths(&self) -> Result<Vec<f64>> {
        let verb = if self.is_serial() { "BWCL" } else { "BWTL" };
        self.bandwidths
            .get_or_fetch(move || async move {
                let mhz: Vec<f64> = self.base.get_numbers(verb).await?;
                Ok::<_, ControlError>(mhz.into_iter().map(mhz_to_hz).collect())
            })
            .await
    }

    /// Current bandwidth (Hz)
    pub async fn bandwidth(&self) -> Result<f64> {
        if !self.is_serial() {
            return self.base.get_mhz("BWT").await;
        }
        let index: usize = self.base.get_first("BWT").await?;
        let bandwidths = self.bandwidths().await?;
        bandwidths.get(index).copied().ok_or_else(|| ControlError::ParseFailure {
            module: self.base.name(),
            verb: "BWT".into(),
            reply: index.to_string(),
            reason: format!("position outside {} bandwidths", bandwidths.len()),
        })
    }

    /// Pick the declared bandwidth for a request, rounding up
    pub async fn valid_bandwidth(&self, hz: f64, tolerance_percent: f64) -> Result<f64> {
        let bandwidths = self.bandwidths().await?;
        get_value_valid_list(Some(hz), tolerance_percent, &bandwidths, false)
            .map_err(|e| self.base.protocol_error("BWT", e))
    }

    pub async fn set_bandwidth(&self, hz: f64, tolerance_percent: f64) -> Result<()> {
        let hz = self.valid_bandwidth(hz, tolerance_percent).await?;
        if !self.is_serial() {
            return self
                .base
                .set_mhz_validated("BWT", hz, Tolerance::Absolute(HZ_TOLERANCE))
                .await;
        }
        let bandwidths = self.bandwidths().await?;
        let index = bandwidths
            .iter()
            .position(|&b| b == hz)
            .ok_or_else(|| self.base.invalid("BWT", hz, "not a declared bandwidth"))?;
        self.base.set_index_validated("BWT", index).await
    }

    pub async fn attenuation(&self) -> Result<f64> {
        self.base.get("ATN").await
    }

    pub async fn attenuation_range(&self) -> Result<ValueRange> {
        self.attenuation_range
            .get_or_fetch(move || self.base.get_range("ATNL"))
            .await
    }

    pub async fn set_attenuation(&self, db: f64) -> Result<()> {
        let range = self.attenuation_range().await?;
        let db = get_value_valid(Some(db), self.base.validation().tolerance_percent, range, false)
            .map_err(|e| self.base.protocol_error("ATN", e))?;
        self.base.set_number_validated("ATN", db, Tolerance::Exact).await
    }

    pub async fn gain(&self) -> Result<f64> {
        self.base.get("GAI").await
    }

    pub async fn gain_range(&self) -> Result<ValueRange> {
        self.gain_range
            .get_or_fetch(move || self.base.get_range("GAIL"))
            .await
    }

    pub async fn set_gain(&self, db: f64) -> Result<()> {
        let range = self.gain_range().await?;
        let db = get_value_valid(Some(db), self.base.validation().tolerance_percent, range, false)
            .map_err(|e| self.base.protocol_error("GAI", e))?;
        self.base.set_number_validated("GAI", db, Tolerance::Exact).await
    }

    pub async fn enabled(&self) -> Result<bool> {
        self.base.get_flag("ENB").await
    }

    pub async fn set_enabled(&self, on: bool) -> Result<()> {
        self.base.set_flag_validated("ENB", on).await
    }

    /// Whether the external frequency reference is selected
    pub async fn external_reference(&self) -> Result<bool> {
        self.base.get_flag("EXR").await
    }

    pub async fn set_external_reference(&self, on: bool) -> Result<()> {
        self.base.set_flag_validated("EXR", on).await
    }

    pub async fn bit(&self) -> Result<u64> {
        self.base.get("BIT").await
    }

    pub async fn bit_names(&self) -> Result<Vec<String>> {
        self.bit_names
            .get_or_fetch(move || self.base.get_list("BITL"))
            .await
    }

    pub async fn bit_readable(&self) -> Result<String> {
        let bits = self.bit().await?;
        Ok(decode_bitmask(bits, &self.bit_names().await?))
    }

    /// Sample count, overflow count and absolute maximum of the ADC
    pub async fn adc_meter(&self) -> Result<AdcMeter> {
        self.base
            .read("ADM", &[], |r| {
                let fields = r.fields(',', Some(3))?;
                Ok(AdcMeter {
                    samples: rxctl_protocol::parse_number(fields[0])?,
                    overflows: rxctl_protocol::parse_number(fields[1])?,
                    abs_max: rxctl_protocol::parse_number(fields[2])?,
                })
            })
            .await
    }
}
