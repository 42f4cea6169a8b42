//! Receive channels
//!
//! An Rx channel is an end-to-end receive path stitched from modules: an
//! optional analog receiver, a digital down-converter, an optional in-line
//! software DDC and the output that streams the result. Channels live in the
//! controller's arena and refer to their parent and children by index.
//!
//! Sample rate and bandwidth are properties of the whole chain. The legal
//! combinations are computed once from the modules' declarations and kept in
//! a [`RateTable`] until the capabilities are invalidated.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use rxctl_protocol::{get_value_valid_list, ModuleId, ValueRange};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{ControlError, Result};
use crate::module::{Cache, Ddc, Fft, Output, OutputStatus, Receiver, SpectralScan};
use crate::pool::Identified;

/// Kind of receive path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RxType {
    /// Receiver with no digital stage
    AnalogOnly,
    /// Wideband DDC, fed by a receiver or by the ADC directly
    Digital,
    /// Narrowband DDC tuned inside a parent's passband
    HwDdc,
    /// Software DDC tuned inside a narrowband parent's passband
    SwDdc,
    /// FFT engine
    Fft,
    /// Spectral scanner
    Spc,
}

/// An FFT engine paired with the output that streams its frames
#[derive(Debug, Clone)]
pub struct FftChannel {
    pub fft: Arc<Fft>,
    pub output: Arc<Output>,
    /// Module currently feeding the FFT
    pub upstream: Option<ModuleId>,
}

impl FftChannel {
    pub fn new(fft: Arc<Fft>, output: Arc<Output>) -> Self {
        Self {
            fft,
            output,
            upstream: None,
        }
    }

    pub fn id(&self) -> &ModuleId {
        self.fft.base().id()
    }

    pub async fn status(&self) -> Result<FftStatus> {
        Ok(FftStatus {
            fft: self.fft.base().name(),
            output: self.output.base().name(),
            upstream: self.upstream.as_ref().map(ToString::to_string),
            enabled: self.fft.enabled().await? && self.output.enabled().await?,
            size: self.fft.size().await?,
        })
    }
}

impl Identified for FftChannel {
    fn module_id(&self) -> &ModuleId {
        self.id()
    }
}

/// Snapshot of an FFT channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FftStatus {
    pub fft: String,
    pub output: String,
    pub upstream: Option<String>,
    pub enabled: bool,
    pub size: u32,
}

/// Snapshot of an Rx channel
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelStatus {
    pub index: usize,
    pub rx_type: RxType,
    pub tuner: Option<String>,
    pub enabled: bool,
    pub frequency: Option<f64>,
    pub bandwidth: Option<f64>,
    pub sample_rate: Option<f64>,
    pub output: Option<String>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Settings that realise one (sample rate, bandwidth) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateTuple {
    /// Receiver bandwidth to select (Hz)
    pub analog_bandwidth: Option<f64>,
    /// Hardware DDC decimation
    pub hw_decimation: Option<f64>,
    /// In-line software DDC decimation
    pub sw_decimation: Option<f64>,
    /// Resulting bandwidth (Hz)
    pub bandwidth: f64,
    /// Resulting sample rate (Hz)
    pub sample_rate: f64,
}

/// Legal rate combinations of a channel, keyed by whole Hz
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateTable {
    by_sample_rate: BTreeMap<u64, RateTuple>,
    by_bandwidth: BTreeMap<u64, RateTuple>,
}

fn hz_key(hz: f64) -> u64 {
    hz.round().max(0.0) as u64
}

impl RateTable {
    /// Record a combination
    ///
    /// For a sample rate the smallest software decimation wins, for a
    /// bandwidth the lowest sample rate.
    pub fn insert(&mut self, tuple: RateTuple) {
        let sw = |t: &RateTuple| t.sw_decimation.unwrap_or(1.0);
        match self.by_sample_rate.entry(hz_key(tuple.sample_rate)) {
            Entry::Vacant(slot) => {
                slot.insert(tuple);
            }
            Entry::Occupied(mut slot) => {
                if sw(&tuple) < sw(slot.get()) {
                    slot.insert(tuple);
                }
            }
        }
        self.insert_bandwidth(tuple);
    }

    /// Record a combination selectable by bandwidth only
    pub fn insert_bandwidth(&mut self, tuple: RateTuple) {
        match self.by_bandwidth.entry(hz_key(tuple.bandwidth)) {
            Entry::Vacant(slot) => {
                slot.insert(tuple);
            }
            Entry::Occupied(mut slot) => {
                if tuple.sample_rate < slot.get().sample_rate {
                    slot.insert(tuple);
                }
            }
        }
    }

    /// Sample rates, ascending
    pub fn sample_rates(&self) -> Vec<f64> {
        self.by_sample_rate.values().map(|t| t.sample_rate).collect()
    }

    /// Bandwidths, ascending
    pub fn bandwidths(&self) -> Vec<f64> {
        self.by_bandwidth.values().map(|t| t.bandwidth).collect()
    }

    pub fn for_sample_rate(&self, hz: f64) -> Option<&RateTuple> {
        self.by_sample_rate.get(&hz_key(hz))
    }

    pub fn for_bandwidth(&self, hz: f64) -> Option<&RateTuple> {
        self.by_bandwidth.get(&hz_key(hz))
    }
}

/// Smallest receiver bandwidth covering `bandwidth`, else the widest one
fn covering_bandwidth(choices: &[f64], bandwidth: f64) -> Option<f64> {
    let mut sorted = choices.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
        .iter()
        .copied()
        .find(|&c| c >= bandwidth)
        .or_else(|| sorted.last().copied())
}

/// A module in the enable chain
enum Stage<'a> {
    Receiver(&'a Receiver),
    Ddc(&'a Ddc),
    Fft(&'a Fft),
    Scan(&'a SpectralScan),
    Output(&'a Output),
}

impl Stage<'_> {
    fn id(&self) -> &ModuleId {
        match self {
            Self::Receiver(m) => m.base().id(),
            Self::Ddc(m) => m.base().id(),
            Self::Fft(m) => m.base().id(),
            Self::Scan(m) => m.base().id(),
            Self::Output(m) => m.base().id(),
        }
    }

    fn is_tuner(&self) -> bool {
        matches!(self, Self::Receiver(_) | Self::Ddc(_))
    }

    async fn enabled(&self) -> Result<bool> {
        match self {
            Self::Receiver(m) => m.enabled().await,
            Self::Ddc(m) => m.enabled().await,
            Self::Fft(m) => m.enabled().await,
            Self::Scan(m) => m.enabled().await,
            Self::Output(m) => m.enabled().await,
        }
    }

    async fn set_enabled(&self, on: bool) -> Result<()> {
        match self {
            Self::Receiver(m) => m.set_enabled(on).await,
            Self::Ddc(m) => m.set_enabled(on).await,
            Self::Fft(m) => m.set_enabled(on).await,
            Self::Scan(m) => m.set_enabled(on).await,
            Self::Output(m) => m.set_enabled(on).await,
        }
    }
}

/// Keep a value, or `None` when the chain lacks the capability
fn optional<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(ControlError::NotImplemented { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// An end-to-end receive path
#[derive(Debug)]
pub struct RxChannel {
    index: usize,
    rx_type: RxType,
    analog: Option<Arc<Receiver>>,
    digital: Option<Arc<Ddc>>,
    swddc: Option<Arc<Ddc>>,
    output: Option<Arc<Output>>,
    fft_channel: Option<FftChannel>,
    spectral_scan: Option<Arc<SpectralScan>>,
    parent: Option<usize>,
    children: Vec<usize>,
    rates: Cache<RateTable>,
}

impl RxChannel {
    pub fn new(index: usize, rx_type: RxType) -> Self {
        Self {
            index,
            rx_type,
            analog: None,
            digital: None,
            swddc: None,
            output: None,
            fft_channel: None,
            spectral_scan: None,
            parent: None,
            children: Vec::new(),
            rates: Cache::default(),
        }
    }

    pub fn with_analog(mut self, receiver: Arc<Receiver>) -> Self {
        self.analog = Some(receiver);
        self
    }

    pub fn with_digital(mut self, ddc: Arc<Ddc>) -> Self {
        self.digital = Some(ddc);
        self
    }

    pub fn with_spectral_scan(mut self, scan: Arc<SpectralScan>) -> Self {
        self.spectral_scan = Some(scan);
        self
    }

    pub fn with_fft_channel(mut self, fft: FftChannel) -> Self {
        self.fft_channel = Some(fft);
        self
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn rx_type(&self) -> RxType {
        self.rx_type
    }

    pub fn analog(&self) -> Option<&Arc<Receiver>> {
        self.analog.as_ref()
    }

    pub fn digital(&self) -> Option<&Arc<Ddc>> {
        self.digital.as_ref()
    }

    pub fn swddc(&self) -> Option<&Arc<Ddc>> {
        self.swddc.as_ref()
    }

    pub fn output(&self) -> Option<&Arc<Output>> {
        self.output.as_ref()
    }

    pub fn fft_channel(&self) -> Option<&FftChannel> {
        self.fft_channel.as_ref()
    }

    pub fn spectral_scan(&self) -> Option<&Arc<SpectralScan>> {
        self.spectral_scan.as_ref()
    }

    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }

    pub(crate) fn set_output(&mut self, output: Option<Arc<Output>>) {
        self.output = output;
    }

    pub(crate) fn set_swddc(&mut self, swddc: Option<Arc<Ddc>>) {
        self.swddc = swddc;
        self.rates.clear();
    }

    pub(crate) fn set_parent(&mut self, parent: Option<usize>) {
        self.parent = parent;
    }

    pub(crate) fn add_child(&mut self, child: usize) {
        if !self.children.contains(&child) {
            self.children.push(child);
        }
    }

    pub(crate) fn remove_child(&mut self, child: usize) {
        self.children.retain(|&c| c != child);
    }

    /// Module the channel tunes with
    pub fn tuner_id(&self) -> Option<&ModuleId> {
        if let Some(a) = &self.analog {
            return Some(a.base().id());
        }
        if let Some(d) = &self.digital {
            return Some(d.base().id());
        }
        if let Some(f) = &self.fft_channel {
            return Some(f.id());
        }
        self.spectral_scan.as_ref().map(|s| s.base().id())
    }

    /// Whether another channel can hang below this one's tuner
    pub fn can_be_child(&self) -> bool {
        matches!(self.rx_type, RxType::HwDdc | RxType::SwDdc | RxType::Digital) && self.analog.is_none()
    }

    /// Every module of the chain
    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.stages().iter().map(|s| s.id().clone()).collect()
    }

    fn stages(&self) -> Vec<Stage<'_>> {
        let mut stages = Vec::new();
        if let Some(a) = &self.analog {
            stages.push(Stage::Receiver(a));
        }
        if let Some(d) = &self.digital {
            stages.push(Stage::Ddc(d));
        }
        if let Some(s) = &self.swddc {
            stages.push(Stage::Ddc(s));
        }
        if let Some(f) = &self.fft_channel {
            stages.push(Stage::Fft(&f.fft));
            stages.push(Stage::Output(&f.output));
        }
        if let Some(s) = &self.spectral_scan {
            stages.push(Stage::Scan(s));
        }
        if let Some(o) = &self.output {
            stages.push(Stage::Output(o));
        }
        stages
    }

    fn label(&self) -> String {
        match self.tuner_id() {
            Some(id) => format!("channel {} ({id})", self.index),
            None => format!("channel {}", self.index),
        }
    }

    fn not_implemented(&self, verb: &str) -> ControlError {
        ControlError::NotImplemented {
            module: self.label(),
            verb: verb.into(),
        }
    }

    /// Whether every module of the chain is enabled
    pub async fn enabled(&self) -> Result<bool> {
        let stages = self.stages();
        if stages.is_empty() {
            return Ok(false);
        }
        for stage in &stages {
            if !stage.enabled().await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Enable the chain tuner-first, or disable it output-first
    ///
    /// A failed enable turns off again the modules this call turned on. A
    /// channel with children keeps its tuner running when disabled.
    pub async fn set_enable(&self, on: bool) -> Result<()> {
        let stages = self.stages();
        if on {
            let mut turned_on: Vec<&Stage<'_>> = Vec::new();
            for stage in &stages {
                let result = match stage.enabled().await {
                    Ok(true) => continue,
                    Ok(false) => stage.set_enabled(true).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!("{}: enabling {} failed: {}", self.label(), stage.id(), e);
                    for done in turned_on.iter().rev() {
                        if let Err(revert) = done.set_enabled(false).await {
                            warn!("{}: could not disable {}: {}", self.label(), done.id(), revert);
                        }
                    }
                    return Err(e);
                }
                turned_on.push(stage);
            }
            debug!("{} enabled", self.label());
        } else {
            let keep_tuner = !self.children.is_empty();
            for stage in stages.iter().rev() {
                if keep_tuner && stage.is_tuner() {
                    debug!("{}: {} feeds child channels, left on", self.label(), stage.id());
                    continue;
                }
                stage.set_enabled(false).await?;
            }
            debug!("{} disabled", self.label());
        }
        Ok(())
    }

    // Frequency

    /// Tuned RF frequency (Hz); a spectral scan reports its span centre
    pub async fn frequency(&self) -> Result<f64> {
        if let Some(a) = &self.analog {
            return a.frequency().await;
        }
        if let Some(d) = &self.digital {
            return d.frequency().await;
        }
        if let Some(s) = &self.spectral_scan {
            let (start, stop) = s.span().await?;
            return Ok((start + stop) / 2.0);
        }
        Err(self.not_implemented("FRQ"))
    }

    pub async fn frequency_range(&self) -> Result<ValueRange> {
        if let Some(a) = &self.analog {
            return a.frequency_range().await;
        }
        if let Some(d) = &self.digital {
            return d.frequency_range().await;
        }
        if let Some(s) = &self.spectral_scan {
            return s.span_range().await;
        }
        Err(self.not_implemented("FRQL"))
    }

    pub async fn valid_frequency(&self, hz: f64) -> Result<f64> {
        if let Some(a) = &self.analog {
            return a.valid_frequency(hz).await;
        }
        if let Some(d) = &self.digital {
            return d.valid_frequency(hz).await;
        }
        Err(self.not_implemented("FRQ"))
    }

    /// Tune this channel only; children are the controller's concern
    pub async fn set_frequency(&self, hz: f64) -> Result<()> {
        if let Some(a) = &self.analog {
            return a.set_frequency(hz).await;
        }
        if let Some(d) = &self.digital {
            return d.set_frequency(hz).await;
        }
        Err(self.not_implemented("FRQ"))
    }

    /// RF frequency the tuner's IF is relative to (Hz)
    pub fn rf_offset(&self) -> f64 {
        match (&self.analog, &self.digital) {
            (None, Some(d)) => d.rf_offset(),
            _ => 0.0,
        }
    }

    // Rates

    /// Current sample rate (Hz)
    pub async fn sample_rate(&self) -> Result<f64> {
        if let Some(sw) = &self.swddc {
            return sw.sample_rate().await;
        }
        match &self.digital {
            Some(d) => d.sample_rate().await,
            None => Err(self.not_implemented("DEC")),
        }
    }

    /// Current bandwidth (Hz)
    pub async fn bandwidth(&self) -> Result<f64> {
        if let Some(d) = &self.digital {
            let bw = d.bandwidth().await?;
            return match &self.swddc {
                Some(sw) => Ok(bw.min(sw.sample_rate().await?)),
                None => Ok(bw),
            };
        }
        if let Some(a) = &self.analog {
            return a.bandwidth().await;
        }
        if let Some(s) = &self.spectral_scan {
            let (start, stop) = s.span().await?;
            return Ok(stop - start);
        }
        Err(self.not_implemented("BWT"))
    }

    /// Legal rate combinations, computed on first use
    pub async fn rate_table(&self) -> Result<RateTable> {
        self.rates.get_or_fetch(move || self.build_rate_table()).await
    }

    async fn build_rate_table(&self) -> Result<RateTable> {
        let mut table = RateTable::default();
        let Some(digital) = &self.digital else {
            if let Some(a) = &self.analog {
                for bw in a.bandwidths().await? {
                    table.insert_bandwidth(RateTuple {
                        analog_bandwidth: Some(bw),
                        hw_decimation: None,
                        sw_decimation: None,
                        bandwidth: bw,
                        sample_rate: 0.0,
                    });
                }
            }
            return Ok(table);
        };

        let decimations = digital.decimations().await?.values();
        let rates = digital.sample_rates().await?;
        let bandwidths = digital.bandwidths().await?;
        let analog_bandwidths = match &self.analog {
            Some(a) => a.bandwidths().await?,
            None => Vec::new(),
        };
        let mut sw_decimations = match &self.swddc {
            Some(sw) => sw.decimations().await?.values(),
            None => Vec::new(),
        };
        sw_decimations.sort_by(f64::total_cmp);

        for ((&decimation, &rate), &bw) in decimations.iter().zip(&rates).zip(&bandwidths) {
            if sw_decimations.is_empty() {
                table.insert(RateTuple {
                    analog_bandwidth: covering_bandwidth(&analog_bandwidths, bw),
                    hw_decimation: Some(decimation),
                    sw_decimation: None,
                    bandwidth: bw,
                    sample_rate: rate,
                });
                continue;
            }
            for &sw in &sw_decimations {
                let sample_rate = rate / sw;
                let bandwidth = bw.min(sample_rate);
                table.insert(RateTuple {
                    analog_bandwidth: covering_bandwidth(&analog_bandwidths, bandwidth),
                    hw_decimation: Some(decimation),
                    sw_decimation: Some(sw),
                    bandwidth,
                    sample_rate,
                });
            }
        }
        debug!(
            "{}: {} sample rates, {} bandwidths",
            self.label(),
            table.by_sample_rate.len(),
            table.by_bandwidth.len()
        );
        Ok(table)
    }

    pub async fn valid_sample_rates(&self) -> Result<Vec<f64>> {
        Ok(self.rate_table().await?.sample_rates())
    }

    pub async fn valid_bandwidths(&self) -> Result<Vec<f64>> {
        Ok(self.rate_table().await?.bandwidths())
    }

    /// Pick the legal sample rate for a request, rounding up
    pub async fn valid_sample_rate(&self, hz: f64, tolerance_percent: f64) -> Result<f64> {
        let rates = self.valid_sample_rates().await?;
        if rates.is_empty() {
            return Err(self.not_implemented("DEC"));
        }
        get_value_valid_list(Some(hz), tolerance_percent, &rates, false)
            .map_err(|e| ControlError::from_protocol(&self.label(), "DEC", "", e))
    }

    /// Pick the legal bandwidth for a request, rounding up
    pub async fn valid_bandwidth(&self, hz: f64, tolerance_percent: f64) -> Result<f64> {
        let bandwidths = self.valid_bandwidths().await?;
        if bandwidths.is_empty() {
            return Err(self.not_implemented("BWT"));
        }
        get_value_valid_list(Some(hz), tolerance_percent, &bandwidths, false)
            .map_err(|e| ControlError::from_protocol(&self.label(), "BWT", "", e))
    }

    /// Bandwidth that comes with a legal sample rate
    pub async fn bandwidth_for_sample_rate(&self, hz: f64) -> Result<f64> {
        let table = self.rate_table().await?;
        table
            .for_sample_rate(hz)
            .map(|t| t.bandwidth)
            .ok_or_else(|| ControlError::invalid(&self.label(), "DEC", hz, "not a legal sample rate"))
    }

    /// Sample rate that comes with a legal bandwidth
    pub async fn sample_rate_for_bandwidth(&self, hz: f64) -> Result<f64> {
        let table = self.rate_table().await?;
        table
            .for_bandwidth(hz)
            .map(|t| t.sample_rate)
            .ok_or_else(|| ControlError::invalid(&self.label(), "BWT", hz, "not a legal bandwidth"))
    }

    async fn apply(&self, tuple: &RateTuple) -> Result<()> {
        if let (Some(a), Some(bw)) = (&self.analog, tuple.analog_bandwidth) {
            a.set_bandwidth(bw, 0.0).await?;
        }
        if let (Some(d), Some(dec)) = (&self.digital, tuple.hw_decimation) {
            d.set_decimation(dec).await?;
        }
        if let (Some(sw), Some(dec)) = (&self.swddc, tuple.sw_decimation) {
            sw.set_decimation(dec).await?;
        }
        Ok(())
    }

    /// Set the chain's sample rate; returns the rate applied
    pub async fn set_sample_rate(&self, hz: f64, tolerance_percent: f64) -> Result<f64> {
        let rate = self.valid_sample_rate(hz, tolerance_percent).await?;
        let table = self.rate_table().await?;
        let tuple = table
            .for_sample_rate(rate)
            .ok_or_else(|| ControlError::invalid(&self.label(), "DEC", rate, "not a legal sample rate"))?;
        self.apply(tuple).await?;
        Ok(tuple.sample_rate)
    }

    /// Set the chain's bandwidth; returns the bandwidth applied
    pub async fn set_bandwidth(&self, hz: f64, tolerance_percent: f64) -> Result<f64> {
        let bw = self.valid_bandwidth(hz, tolerance_percent).await?;
        let table = self.rate_table().await?;
        let tuple = table
            .for_bandwidth(bw)
            .ok_or_else(|| ControlError::invalid(&self.label(), "BWT", bw, "not a legal bandwidth"))?;
        self.apply(tuple).await?;
        Ok(tuple.bandwidth)
    }

    // Gain stages

    pub async fn gain(&self) -> Result<f64> {
        match (&self.analog, &self.digital) {
            (Some(a), _) => a.gain().await,
            (None, Some(d)) => d.gain().await,
            _ => Err(self.not_implemented("GAI")),
        }
    }

    pub async fn set_gain(&self, db: f64) -> Result<()> {
        match (&self.analog, &self.digital) {
            (Some(a), _) => a.set_gain(db).await,
            (None, Some(d)) => d.set_gain(db).await,
            _ => Err(self.not_implemented("GAI")),
        }
    }

    pub async fn attenuation(&self) -> Result<f64> {
        match (&self.analog, &self.digital) {
            (Some(a), _) => a.attenuation().await,
            (None, Some(d)) => d.attenuation().await,
            _ => Err(self.not_implemented("ATN")),
        }
    }

    pub async fn set_attenuation(&self, db: f64) -> Result<()> {
        match (&self.analog, &self.digital) {
            (Some(a), _) => a.set_attenuation(db).await,
            (None, Some(d)) => d.set_attenuation(db).await,
            _ => Err(self.not_implemented("ATN")),
        }
    }

    /// Forget the rate table and every module's cached declarations
    pub fn invalidate_capabilities(&self) {
        self.rates.clear();
        if let Some(a) = &self.analog {
            a.invalidate();
        }
        for ddc in self.digital.iter().chain(&self.swddc) {
            ddc.invalidate();
        }
        if let Some(o) = &self.output {
            o.invalidate();
        }
        if let Some(f) = &self.fft_channel {
            f.fft.invalidate();
            f.output.invalidate();
        }
        if let Some(s) = &self.spectral_scan {
            s.invalidate();
        }
    }

    /// Forget the rate table only
    pub(crate) fn invalidate_rates(&self) {
        self.rates.clear();
    }

    // Status

    pub async fn status(&self) -> Result<ChannelStatus> {
        Ok(ChannelStatus {
            index: self.index,
            rx_type: self.rx_type,
            tuner: self.tuner_id().map(ToString::to_string),
            enabled: self.enabled().await?,
            frequency: optional(self.frequency().await)?,
            bandwidth: optional(self.bandwidth().await)?,
            sample_rate: optional(self.sample_rate().await)?,
            output: self.output.as_ref().map(|o| o.base().name()),
            parent: self.parent,
            children: self.children.clone(),
        })
    }

    pub async fn output_status(&self) -> Result<Option<OutputStatus>> {
        match &self.output {
            Some(o) => o.status().await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn fft_status(&self) -> Result<Option<FftStatus>> {
        match &self.fft_channel {
            Some(f) => f.status().await.map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context_for;
    use rxctl_protocol::ModuleKind;
    use rxctl_sim::{spawn_local, SimConfig, SimHandle};

    fn tuple(sample_rate: f64, bandwidth: f64, sw: Option<f64>) -> RateTuple {
        RateTuple {
            analog_bandwidth: None,
            hw_decimation: Some(1.0),
            sw_decimation: sw,
            bandwidth,
            sample_rate,
        }
    }

    #[test]
    fn test_rate_table_preferences() {
        let mut table = RateTable::default();
        table.insert(tuple(100e3, 80e3, Some(1.0)));
        table.insert(tuple(100e3, 100e3, Some(2.0)));
        table.insert(tuple(50e3, 80e3, Some(4.0)));
        assert_eq!(table.for_sample_rate(100e3).unwrap().sw_decimation, Some(1.0));
        assert_eq!(table.for_bandwidth(80e3).unwrap().sample_rate, 50e3);
        assert_eq!(table.sample_rates(), vec![50e3, 100e3]);
        assert_eq!(table.bandwidths(), vec![80e3, 100e3]);
    }

    #[test]
    fn test_covering_bandwidth() {
        assert_eq!(covering_bandwidth(&[80e6, 20e6], 15e6), Some(20e6));
        assert_eq!(covering_bandwidth(&[80e6, 20e6], 40e6), Some(80e6));
        assert_eq!(covering_bandwidth(&[80e6, 20e6], 90e6), Some(80e6));
        assert_eq!(covering_bandwidth(&[], 1.0), None);
    }

    async fn digital_channel(sim: &SimHandle) -> RxChannel {
        let ctx = context_for(sim).await;
        let rcv = Receiver::new(ctx.base("RCV:1".parse().unwrap(), ModuleKind::WideReceiver));
        let wb = Ddc::new(ctx.base("WBDDC:1".parse().unwrap(), ModuleKind::WbDdc), 0.8);
        let out = Output::new(ctx.base("OUT:1".parse().unwrap(), ModuleKind::Output));
        let mut ch = RxChannel::new(0, RxType::Digital)
            .with_analog(Arc::new(rcv))
            .with_digital(Arc::new(wb));
        ch.set_output(Some(Arc::new(out)));
        ch
    }

    #[tokio::test]
    async fn test_digital_rates_pick_receiver_bandwidth() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let ch = digital_channel(&sim).await;
        assert_eq!(ch.valid_sample_rates().await.unwrap(), vec![25e6, 50e6]);
        assert_eq!(ch.bandwidth_for_sample_rate(25e6).await.unwrap(), 20e6);
        assert_eq!(ch.sample_rate_for_bandwidth(40e6).await.unwrap(), 50e6);

        assert_eq!(ch.set_sample_rate(25e6, 0.0).await.unwrap(), 25e6);
        assert_eq!(ch.sample_rate().await.unwrap(), 25e6);
        assert_eq!(ch.analog().unwrap().bandwidth().await.unwrap(), 20e6);

        assert_eq!(ch.set_bandwidth(30e6, 50.0).await.unwrap(), 40e6);
        assert_eq!(ch.sample_rate().await.unwrap(), 50e6);
        assert_eq!(ch.analog().unwrap().bandwidth().await.unwrap(), 80e6);
    }

    #[tokio::test]
    async fn test_enable_chain_and_disable() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let ch = digital_channel(&sim).await;
        assert!(!ch.enabled().await.unwrap());
        ch.set_enable(true).await.unwrap();
        assert!(ch.enabled().await.unwrap());
        for id in ["RCV:1", "WBDDC:1", "OUT:1"] {
            assert_eq!(sim.with_radio(|r| r.is_enabled(id)), Some(true), "{id}");
        }
        ch.set_enable(false).await.unwrap();
        assert_eq!(sim.with_radio(|r| r.is_enabled("RCV:1")), Some(false));
        assert!(!ch.enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_parent_keeps_tuner_when_disabled() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let mut ch = digital_channel(&sim).await;
        ch.add_child(3);
        ch.set_enable(true).await.unwrap();
        ch.set_enable(false).await.unwrap();
        assert_eq!(sim.with_radio(|r| r.is_enabled("RCV:1")), Some(true));
        assert_eq!(sim.with_radio(|r| r.is_enabled("WBDDC:1")), Some(true));
        assert_eq!(sim.with_radio(|r| r.is_enabled("OUT:1")), Some(false));
    }

    #[tokio::test]
    async fn test_failed_enable_reverts() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let mut ch = digital_channel(&sim).await;
        // not installed, so the radio answers ERR
        let ctx = context_for(&sim).await;
        let missing = Output::new(ctx.base("OUT:99".parse().unwrap(), ModuleKind::Output));
        ch.set_output(Some(Arc::new(missing)));
        assert!(ch.set_enable(true).await.is_err());
        assert_eq!(sim.with_radio(|r| r.is_enabled("RCV:1")), Some(false));
        assert_eq!(sim.with_radio(|r| r.is_enabled("WBDDC:1")), Some(false));
    }

    #[tokio::test]
    async fn test_inline_software_stage() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        sim.with_radio(|r| {
            let _ = r.handle_line("SRT LNK NBDDC:1,SWDDCDEC2:1");
        });
        let ctx = context_for(&sim).await;
        let nb = Ddc::new(ctx.base("NBDDC:1".parse().unwrap(), ModuleKind::NbDdc), 0.8);
        let sw = Ddc::new(ctx.base("SWDDCDEC2:1".parse().unwrap(), ModuleKind::SwDdc), 0.8);
        let mut ch = RxChannel::new(2, RxType::HwDdc).with_digital(Arc::new(nb));
        ch.set_swddc(Some(Arc::new(sw)));

        let rates = ch.valid_sample_rates().await.unwrap();
        assert_eq!(rates.first().copied(), Some(100e3 / 8.0));
        assert_eq!(rates.last().copied(), Some(1.6e6));
        // 200 kHz is reachable at NB decimation 128 without software decimation
        let t = *ch.rate_table().await.unwrap().for_sample_rate(200e3).unwrap();
        assert_eq!(t.sw_decimation, Some(1.0));
        assert_eq!(t.hw_decimation, Some(128.0));

        ch.set_sample_rate(50e3, 0.0).await.unwrap();
        assert_eq!(ch.sample_rate().await.unwrap(), 50e3);
        assert!(ch.bandwidth().await.unwrap() <= 50e3);
    }
}
