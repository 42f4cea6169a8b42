//! Digital down-converters (`WBDDC:n`, `NBDDC:n`, `SWDDC…:n`)
//!
//! A DDC decimates its input: `sample_rate = input_sample_rate / decimation`.
//! The decimation is declared by `DECL` either as a `min:max:step` range (set
//! by value) or as a list (set by position); the form is detected from the
//! reply. Sample-rate and bandwidth lists are co-indexed with the declared
//! decimations.
//!
//! `FRQ` is an IF offset. The API speaks RF: the IF value is translated by the
//! module's RF offset, which the channel layer sets to the frequency of the
//! parent tuner.

use std::sync::{Mutex, PoisonError};

use rxctl_protocol::units::format_number;
use rxctl_protocol::{get_value_valid, get_value_valid_list, Declared, ModuleKind, ValueRange};
use serde::Serialize;
use tracing::{debug, warn};

use super::receiver::HZ_TOLERANCE;
use super::{Cache, ModuleBase, Tolerance};
use crate::error::{ControlError, Result};

/// Down-converter variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DdcKind {
    /// Fed by the ADC; bandwidth is a fixed fraction of the sample rate
    Wideband,
    /// Reports its filter bandwidth through `BWT`
    Narrowband,
    /// Pure decimation; no attenuation, gain or built-in test
    Software,
}

impl DdcKind {
    /// Variant for a module class
    pub fn of(kind: ModuleKind) -> Self {
        match kind {
            ModuleKind::WbDdc => Self::Wideband,
            ModuleKind::NbDdc => Self::Narrowband,
            _ => Self::Software,
        }
    }
}

/// A digital down-converter
#[derive(Debug)]
pub struct Ddc {
    base: ModuleBase,
    kind: DdcKind,
    wideband_ratio: f64,
    rf_offset: Mutex<f64>,
    parent_bandwidth: Mutex<Option<f64>>,
    decimations: Cache<Declared>,
    input_rate: Cache<f64>,
    bandwidths: Cache<Vec<f64>>,
    if_range: Cache<ValueRange>,
    attenuation_range: Cache<ValueRange>,
    gain_range: Cache<ValueRange>,
}

impl Ddc {
    pub fn new(base: ModuleBase, wideband_ratio: f64) -> Self {
        Self {
            kind: DdcKind::of(base.kind()),
            base,
            wideband_ratio,
            rf_offset: Mutex::new(0.0),
            parent_bandwidth: Mutex::new(None),
            decimations: Cache::default(),
            input_rate: Cache::default(),
            bandwidths: Cache::default(),
            if_range: Cache::default(),
            attenuation_range: Cache::default(),
            gain_range: Cache::default(),
        }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    pub fn ddc_kind(&self) -> DdcKind {
        self.kind
    }

    /// Drop every cached capability
    pub fn invalidate(&self) {
        self.decimations.clear();
        self.input_rate.clear();
        self.bandwidths.clear();
        self.if_range.clear();
        self.attenuation_range.clear();
        self.gain_range.clear();
    }

    /// RF frequency that IF 0 corresponds to (Hz)
    pub fn rf_offset(&self) -> f64 {
        *self.rf_offset.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_rf_offset(&self, hz: f64) {
        *self.rf_offset.lock().unwrap_or_else(PoisonError::into_inner) = hz;
    }

    /// Bandwidth of the feeding tuner, which caps a software DDC's bandwidth
    pub fn parent_bandwidth(&self) -> Option<f64> {
        *self.parent_bandwidth.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_parent_bandwidth(&self, hz: Option<f64>) {
        *self.parent_bandwidth.lock().unwrap_or_else(PoisonError::into_inner) = hz;
        if self.kind == DdcKind::Software {
            self.bandwidths.clear();
        }
    }

    // Frequency

    /// IF offset (Hz)
    pub async fn if_frequency(&self) -> Result<f64> {
        self.base.get_mhz("FRQ").await
    }

    pub async fn set_if_frequency(&self, hz: f64) -> Result<()> {
        self.base
            .set_mhz_validated("FRQ", hz, Tolerance::Absolute(HZ_TOLERANCE))
            .await
    }

    /// IF tuning range (Hz)
    pub async fn if_frequency_range(&self) -> Result<ValueRange> {
        self.if_range
            .get_or_fetch(move || self.base.get_mhz_range("FRQL"))
            .await
    }

    /// RF frequency: IF offset plus RF offset (Hz)
    pub async fn frequency(&self) -> Result<f64> {
        Ok(self.if_frequency().await? + self.rf_offset())
    }

    /// RF tuning range under the current RF offset (Hz)
    pub async fn frequency_range(&self) -> Result<ValueRange> {
        Ok(self.if_frequency_range().await?.shifted(self.rf_offset()))
    }

    /// Snap a requested RF frequency up to the tuning grid
    pub async fn valid_frequency(&self, hz: f64) -> Result<f64> {
        let range = self.frequency_range().await?;
        let tolerance = self.base.validation().frequency_tolerance_percent;
        get_value_valid(Some(hz), tolerance, range, true)
            .map_err(|e| self.base.protocol_error("FRQ", e))
    }

    /// Tune to an RF frequency
    pub async fn set_frequency(&self, hz: f64) -> Result<()> {
        let hz = self.valid_frequency(hz).await?;
        self.set_if_frequency(hz - self.rf_offset()).await
    }

    // Decimation and sample rate

    /// Declared decimations
    pub async fn decimations(&self) -> Result<Declared> {
        self.decimations
            .get_or_fetch(move || self.base.get_declared("DECL"))
            .await
    }

    /// Current decimation
    pub async fn decimation(&self) -> Result<f64> {
        match self.decimations().await? {
            Declared::List(values) => {
                let index: usize = self.base.get_first("DEC").await?;
                values.get(index).copied().ok_or_else(|| ControlError::ParseFailure {
                    module: self.base.name(),
                    verb: "DEC".into(),
                    reply: index.to_string(),
                    reason: format!("position outside {} decimations", values.len()),
                })
            }
            Declared::Range(_) => self.base.get_first("DEC").await,
        }
    }

    /// Position of the current decimation in the declared list
    pub async fn decimation_index(&self) -> Result<usize> {
        let declared = self.decimations().await?;
        let current = self.decimation().await?;
        declared
            .values()
            .iter()
            .position(|&d| d == current)
            .ok_or_else(|| self.base.invalid("DEC", current, "not a declared decimation"))
    }

    /// Set the decimation by value
    pub async fn set_decimation(&self, value: f64) -> Result<()> {
        let declared = self.decimations().await?;
        match declared.position(value) {
            Some(index) => self.base.set_index_validated("DEC", index).await,
            None if !declared.is_enumerated() && declared.accepts(value) => {
                self.base
                    .set_number_validated("DEC", value, Tolerance::Exact)
                    .await
            }
            None => Err(self.base.invalid("DEC", value, "not a declared decimation")),
        }
    }

    /// Set the decimation by position in the declared list
    pub async fn set_decimation_index(&self, index: usize) -> Result<()> {
        let values = self.decimations().await?.values();
        let value = values.get(index).copied().ok_or_else(|| {
            self.base
                .invalid("DEC", index, format!("only {} decimations declared", values.len()))
        })?;
        self.set_decimation(value).await
    }

    /// Rate of the samples entering the DDC (Hz)
    ///
    /// A software DDC's input follows its source's decimation, so it is
    /// never cached.
    pub async fn input_sample_rate(&self) -> Result<f64> {
        if self.kind == DdcKind::Software {
            return self.base.get_mhz("ISR").await;
        }
        self.input_rate
            .get_or_fetch(move || self.base.get_mhz("ISR"))
            .await
    }

    /// Output sample rate (Hz)
    pub async fn sample_rate(&self) -> Result<f64> {
        let input = self.input_sample_rate().await?;
        Ok(input / self.decimation().await?)
    }

    /// Sample rates, co-indexed with the declared decimations
    pub async fn sample_rates(&self) -> Result<Vec<f64>> {
        let input = self.input_sample_rate().await?;
        Ok(self
            .decimations()
            .await?
            .values()
            .into_iter()
            .map(|d| input / d)
            .collect())
    }

    /// Pick the declared sample rate for a request, rounding up
    pub async fn valid_sample_rate(&self, hz: f64, tolerance_percent: f64) -> Result<f64> {
        let rates = self.sample_rates().await?;
        get_value_valid_list(Some(hz), tolerance_percent, &rates, false)
            .map_err(|e| self.base.protocol_error("DEC", e))
    }

    pub async fn set_sample_rate(&self, hz: f64, tolerance_percent: f64) -> Result<()> {
        let rate = self.valid_sample_rate(hz, tolerance_percent).await?;
        let rates = self.sample_rates().await?;
        let index = rates
            .iter()
            .position(|&r| r == rate)
            .ok_or_else(|| self.base.invalid("DEC", rate, "not a declared sample rate"))?;
        self.set_decimation_index(index).await
    }

    // Bandwidth

    /// Current bandwidth (Hz)
    pub async fn bandwidth(&self) -> Result<f64> {
        match self.kind {
            DdcKind::Wideband => Ok(self.sample_rate().await? * self.wideband_ratio),
            DdcKind::Narrowband => self.base.get_mhz("BWT").await,
            DdcKind::Software => {
                let rate = self.sample_rate().await?;
                Ok(self.parent_bandwidth().map_or(rate, |bw| rate.min(bw)))
            }
        }
    }

    /// Bandwidths, co-indexed with the declared decimations
    ///
    /// A narrowband DDC only reports the bandwidth of its current decimation,
    /// so the list is measured by stepping through every decimation and
    /// restoring the original one afterwards.
    pub async fn bandwidths(&self) -> Result<Vec<f64>> {
        match self.kind {
            DdcKind::Wideband => Ok(self
                .sample_rates()
                .await?
                .into_iter()
                .map(|r| r * self.wideband_ratio)
                .collect()),
            DdcKind::Narrowband => {
                self.bandwidths
                    .get_or_fetch(move || self.measure_bandwidths())
                    .await
            }
            DdcKind::Software => {
                let parent = self.parent_bandwidth();
                Ok(self
                    .sample_rates()
                    .await?
                    .into_iter()
                    .map(|r| parent.map_or(r, |bw| r.min(bw)))
                    .collect())
            }
        }
    }

    async fn measure_bandwidths(&self) -> Result<Vec<f64>> {
        let declared = self.decimations().await?;
        let original = self.decimation().await?;
        let mut bandwidths = Vec::new();
        let mut outcome = Ok(());
        for (index, value) in declared.values().into_iter().enumerate() {
            let arg = if declared.is_enumerated() {
                index.to_string()
            } else {
                format_number(value)
            };
            let measured = match self.base.set("DEC", &[arg]).await {
                Ok(()) => self.base.get_mhz("BWT").await,
                Err(e) => Err(e),
            };
            match measured {
                Ok(bw) => bandwidths.push(bw),
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }
        if let Err(e) = self.set_decimation(original).await {
            warn!("{}: could not restore decimation {}: {}", self.base.id(), original, e);
            outcome = outcome.and(Err(e));
        }
        outcome?;
        debug!("{}: measured {} bandwidths", self.base.id(), bandwidths.len());
        Ok(bandwidths)
    }

    // Enable

    pub async fn enabled(&self) -> Result<bool> {
        self.base.get_flag("ENB").await
    }

    pub async fn set_enabled(&self, on: bool) -> Result<()> {
        self.enable(on, None, None).await
    }

    /// Enable with an optional block size and sync channel
    pub async fn enable(&self, on: bool, block: Option<u32>, sync: Option<u32>) -> Result<()> {
        let mut extra = Vec::new();
        if block.is_some() || sync.is_some() {
            extra.push(block.unwrap_or(0).to_string());
        }
        if let Some(sync) = sync {
            extra.push(sync.to_string());
        }
        self.base.set_enable_args(on, &extra).await
    }

    // Gain stages

    pub async fn attenuation(&self) -> Result<f64> {
        if self.kind == DdcKind::Software {
            return Err(self.base.not_implemented("ATN"));
        }
        self.base.get("ATN").await
    }

    pub async fn set_attenuation(&self, db: f64) -> Result<()> {
        if self.kind == DdcKind::Software {
            return Err(self.base.not_implemented("ATN"));
        }
        let range = self
            .attenuation_range
            .get_or_fetch(move || self.base.get_range("ATNL"))
            .await?;
        let db = get_value_valid(Some(db), self.base.validation().tolerance_percent, range, false)
            .map_err(|e| self.base.protocol_error("ATN", e))?;
        self.base.set_number_validated("ATN", db, Tolerance::Exact).await
    }

    pub async fn gain(&self) -> Result<f64> {
        if self.kind == DdcKind::Software {
            return Err(self.base.not_implemented("GAI"));
        }
        self.base.get("GAI").await
    }

    pub async fn set_gain(&self, db: f64) -> Result<()> {
        if self.kind == DdcKind::Software {
            return Err(self.base.not_implemented("GAI"));
        }
        let range = self
            .gain_range
            .get_or_fetch(move || self.base.get_range("GAIL"))
            .await?;
        let db = get_value_valid(Some(db), self.base.validation().tolerance_percent, range, false)
            .map_err(|e| self.base.protocol_error("GAI", e))?;
        self.base.set_number_validated("GAI", db, Tolerance::Exact).await
    }

    pub async fn bit(&self) -> Result<u64> {
        if self.kind == DdcKind::Software {
            return Err(self.base.not_implemented("BIT"));
        }
        self.base.get("BIT").await
    }
}
