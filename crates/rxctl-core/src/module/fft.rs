//! FFT engines (`FFT:n`) and spectral scanners (`SPC:n`)

use rxctl_protocol::units::{format_mhz, format_number, mhz_to_hz};
use rxctl_protocol::{parse_number, Declared, ValueRange};

use super::receiver::HZ_TOLERANCE;
use super::{range_to_hz, Cache, ModuleBase, Tolerance};
use crate::error::{ControlError, Result};

/// Snap an averaging count onto its declaration
///
/// The request is clamped to the declared bounds, then rounded up: to the
/// first listed value at or above it, or to the next grid point of a range.
pub fn snap_average(declared: &Declared, requested: u32) -> Option<u32> {
    let (min, max) = (declared.min()?, declared.max()?);
    let n = f64::from(requested).clamp(min, max);
    let snapped = match declared {
        Declared::List(values) => {
            let mut sorted = values.clone();
            sorted.sort_by(f64::total_cmp);
            sorted.into_iter().find(|&v| v >= n)?
        }
        Declared::Range(range) => {
            if range.step <= 0.0 {
                n
            } else {
                let k = ((n - range.min) / range.step).ceil();
                (range.min + k * range.step).min(range.max)
            }
        }
    };
    Some(snapped as u32)
}

fn check_in(base: &ModuleBase, verb: &str, range: &ValueRange, value: f64) -> Result<()> {
    if range.contains_on_grid(value) {
        Ok(())
    } else {
        Err(base.invalid(
            verb,
            value,
            format!("outside {}:{}:{}", range.min, range.max, range.step),
        ))
    }
}

/// An FFT engine
#[derive(Debug)]
pub struct Fft {
    base: ModuleBase,
    sizes: Cache<Vec<u32>>,
    averages: Cache<Declared>,
    interval_range: Cache<ValueRange>,
    bin_range: Cache<ValueRange>,
    windows: Cache<Vec<String>>,
    peak_modes: Cache<Vec<String>>,
}

impl Fft {
    pub fn new(base: ModuleBase) -> Self {
        Self {
            base,
            sizes: Cache::default(),
            averages: Cache::default(),
            interval_range: Cache::default(),
            bin_range: Cache::default(),
            windows: Cache::default(),
            peak_modes: Cache::default(),
        }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    pub fn invalidate(&self) {
        self.sizes.clear();
        self.averages.clear();
        self.interval_range.clear();
        self.bin_range.clear();
        self.windows.clear();
        self.peak_modes.clear();
    }

    /// Selectable transform sizes
    pub async fn sizes(&self) -> Result<Vec<u32>> {
        self.sizes
            .get_or_fetch(move || self.base.get_numbers("SIZL"))
            .await
    }

    pub async fn size(&self) -> Result<u32> {
        let index: usize = self.base.get_first("SIZ").await?;
        let sizes = self.sizes().await?;
        sizes.get(index).copied().ok_or_else(|| ControlError::ParseFailure {
            module: self.base.name(),
            verb: "SIZ".into(),
            reply: index.to_string(),
            reason: format!("position outside {} sizes", sizes.len()),
        })
    }

    pub async fn set_size(&self, size: u32) -> Result<()> {
        let sizes = self.sizes().await?;
        let index = sizes
            .iter()
            .position(|&s| s == size)
            .ok_or_else(|| self.base.invalid("SIZ", size, format!("not one of {sizes:?}")))?;
        self.base.set_index_validated("SIZ", index).await
    }

    /// Declared averaging counts
    pub async fn averages(&self) -> Result<Declared> {
        self.averages
            .get_or_fetch(move || self.base.get_declared("AVGL"))
            .await
    }

    /// Legal averaging count for a request
    pub async fn get_valid_average(&self, requested: u32) -> Result<u32> {
        let declared = self.averages().await?;
        snap_average(&declared, requested)
            .ok_or_else(|| self.base.invalid("AVG", requested, "no averaging declared"))
    }

    pub async fn averaging(&self) -> Result<u32> {
        self.base.get_first("AVG").await
    }

    /// Set the averaging count, snapped to the declaration; returns the value applied
    pub async fn set_averaging(&self, requested: u32) -> Result<u32> {
        let n = self.get_valid_average(requested).await?;
        self.base
            .set_number_validated("AVG", f64::from(n), Tolerance::Exact)
            .await?;
        Ok(n)
    }

    /// Integration interval (ms)
    pub async fn interval(&self) -> Result<u32> {
        self.base.get_first("INT").await
    }

    pub async fn set_interval(&self, ms: u32) -> Result<()> {
        let range = self
            .interval_range
            .get_or_fetch(move || self.base.get_range("INTL"))
            .await?;
        check_in(&self.base, "INT", &range, f64::from(ms))?;
        self.base
            .set_number_validated("INT", f64::from(ms), Tolerance::Exact)
            .await
    }

    /// Output bins per frame
    pub async fn bins(&self) -> Result<u32> {
        self.base.get_first("BIN").await
    }

    pub async fn set_bins(&self, bins: u32) -> Result<()> {
        let range = self
            .bin_range
            .get_or_fetch(move || self.base.get_range("BINL"))
            .await?;
        check_in(&self.base, "BIN", &range, f64::from(bins))?;
        self.base
            .set_number_validated("BIN", f64::from(bins), Tolerance::Exact)
            .await
    }

    pub async fn windows(&self) -> Result<Vec<String>> {
        self.windows
            .get_or_fetch(move || self.base.choices("WINL"))
            .await
    }

    pub async fn window(&self) -> Result<String> {
        let windows = self.windows().await?;
        self.base.get_choice("WIN", &windows).await
    }

    pub async fn set_window(&self, name: &str) -> Result<()> {
        let windows = self.windows().await?;
        self.base.set_choice("WIN", &windows, name).await
    }

    pub async fn peak_modes(&self) -> Result<Vec<String>> {
        self.peak_modes
            .get_or_fetch(move || self.base.choices("PKML"))
            .await
    }

    pub async fn peak_mode(&self) -> Result<String> {
        let modes = self.peak_modes().await?;
        self.base.get_choice("PKM", &modes).await
    }

    pub async fn set_peak_mode(&self, name: &str) -> Result<()> {
        let modes = self.peak_modes().await?;
        self.base.set_choice("PKM", &modes, name).await
    }

    pub async fn enabled(&self) -> Result<bool> {
        self.base.get_flag("ENB").await
    }

    pub async fn set_enabled(&self, on: bool) -> Result<()> {
        self.enable(on, None).await
    }

    /// Enable, optionally stopping after `sets` frames
    pub async fn enable(&self, on: bool, sets: Option<u32>) -> Result<()> {
        let extra: Vec<String> = sets.iter().map(ToString::to_string).collect();
        self.base.set_enable_args(on, &extra).await
    }
}

/// A spectral scanner sweeping a frequency span
#[derive(Debug)]
pub struct SpectralScan {
    base: ModuleBase,
    span_range: Cache<ValueRange>,
    bins: Cache<Vec<u32>>,
    averages: Cache<Declared>,
    tipping_modes: Cache<Vec<String>>,
}

impl SpectralScan {
    pub fn new(base: ModuleBase) -> Self {
        Self {
            base,
            span_range: Cache::default(),
            bins: Cache::default(),
            averages: Cache::default(),
            tipping_modes: Cache::default(),
        }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    pub fn invalidate(&self) {
        self.span_range.clear();
        self.bins.clear();
        self.averages.clear();
        self.tipping_modes.clear();
    }

    /// Start and stop frequency (Hz)
    pub async fn span(&self) -> Result<(f64, f64)> {
        self.base
            .read("FRQ", &[], |r| {
                let fields = r.fields(',', Some(2))?;
                let start: f64 = parse_number(fields[0])?;
                let stop: f64 = parse_number(fields[1])?;
                Ok((mhz_to_hz(start), mhz_to_hz(stop)))
            })
            .await
    }

    /// Sweepable range (Hz)
    pub async fn span_range(&self) -> Result<ValueRange> {
        self.span_range
            .get_or_fetch(move || async move {
                let range = self.base.get_range("FRQL").await?;
                Ok::<_, ControlError>(range_to_hz(range))
            })
            .await
    }

    pub async fn set_span(&self, start: f64, stop: f64) -> Result<()> {
        let range = self.span_range().await?;
        let requested = format!("{start},{stop}");
        if start >= stop {
            return Err(self.base.invalid("FRQ", requested, "start must be below stop"));
        }
        if !range.contains(start) || !range.contains(stop) {
            return Err(self.base.invalid(
                "FRQ",
                requested,
                format!("outside {}..{} Hz", range.min, range.max),
            ));
        }
        let base = &self.base;
        let ok = base
            .set_with_validation(
                (start, stop),
                move |(a, b)| async move { base.set("FRQ", &[format_mhz(a), format_mhz(b)]).await },
                move || async move { self.span().await },
                Tolerance::Absolute(HZ_TOLERANCE),
            )
            .await?;
        base.validated("FRQ", requested, ok)
    }

    pub async fn bin_choices(&self) -> Result<Vec<u32>> {
        self.bins
            .get_or_fetch(move || self.base.get_numbers("BINL"))
            .await
    }

    pub async fn bins(&self) -> Result<u32> {
        self.base.get_first("BIN").await
    }

    pub async fn set_bins(&self, bins: u32) -> Result<()> {
        let choices = self.bin_choices().await?;
        if !choices.contains(&bins) {
            return Err(self.base.invalid("BIN", bins, format!("not one of {choices:?}")));
        }
        self.base
            .set_number_validated("BIN", f64::from(bins), Tolerance::Exact)
            .await
    }

    /// Detection thresholds (dB): low, high
    pub async fn thresholds(&self) -> Result<(f64, f64)> {
        self.base
            .read("THR", &[], |r| {
                let fields = r.fields(',', Some(2))?;
                Ok((parse_number(fields[0])?, parse_number(fields[1])?))
            })
            .await
    }

    pub async fn set_thresholds(&self, low: f64, high: f64) -> Result<()> {
        let requested = format!("{low},{high}");
        if low > high {
            return Err(self.base.invalid("THR", requested, "low above high"));
        }
        let base = &self.base;
        let ok = base
            .set_with_validation(
                (low, high),
                move |(lo, hi)| async move {
                    base.set("THR", &[format_number(lo), format_number(hi)]).await
                },
                move || async move { self.thresholds().await },
                Tolerance::Exact,
            )
            .await?;
        base.validated("THR", requested, ok)
    }

    pub async fn tipping_modes(&self) -> Result<Vec<String>> {
        self.tipping_modes
            .get_or_fetch(move || self.base.choices("TIPL"))
            .await
    }

    pub async fn tipping_mode(&self) -> Result<String> {
        let modes = self.tipping_modes().await?;
        self.base.get_choice("TIP", &modes).await
    }

    pub async fn set_tipping_mode(&self, name: &str) -> Result<()> {
        let modes = self.tipping_modes().await?;
        self.base.set_choice("TIP", &modes, name).await
    }

    pub async fn averages(&self) -> Result<Declared> {
        self.averages
            .get_or_fetch(move || self.base.get_declared("AVGL"))
            .await
    }

    pub async fn get_valid_average(&self, requested: u32) -> Result<u32> {
        let declared = self.averages().await?;
        snap_average(&declared, requested)
            .ok_or_else(|| self.base.invalid("AVG", requested, "no averaging declared"))
    }

    pub async fn averaging(&self) -> Result<u32> {
        self.base.get_first("AVG").await
    }

    pub async fn set_averaging(&self, requested: u32) -> Result<u32> {
        let n = self.get_valid_average(requested).await?;
        self.base
            .set_number_validated("AVG", f64::from(n), Tolerance::Exact)
            .await?;
        Ok(n)
    }

    pub async fn enabled(&self) -> Result<bool> {
        self.base.get_flag("ENB").await
    }

    pub async fn set_enabled(&self, on: bool) -> Result<()> {
        self.base.set_flag_validated("ENB", on).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::base_for;
    use rxctl_protocol::ModuleKind;
    use rxctl_sim::{spawn_local, SimConfig};

    #[test]
    fn test_snap_average_to_list() {
        let declared = Declared::List(vec![1.0, 2.0, 4.0, 8.0, 16.0]);
        assert_eq!(snap_average(&declared, 0), Some(1));
        assert_eq!(snap_average(&declared, 3), Some(4));
        assert_eq!(snap_average(&declared, 8), Some(8));
        assert_eq!(snap_average(&declared, 1000), Some(16));
        assert_eq!(snap_average(&Declared::List(Vec::new()), 3), None);
    }

    #[test]
    fn test_snap_average_to_range() {
        let declared = Declared::Range(ValueRange::new(4.0, 64.0, 4.0));
        assert_eq!(snap_average(&declared, 1), Some(4));
        assert_eq!(snap_average(&declared, 5), Some(8));
        assert_eq!(snap_average(&declared, 12), Some(12));
        assert_eq!(snap_average(&declared, 65), Some(64));
    }

    #[tokio::test]
    async fn test_fft_settings() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let fft = Fft::new(base_for(&sim, "FFT:1", ModuleKind::Fft).await);
        assert_eq!(fft.size().await.unwrap(), 1024);
        fft.set_size(4096).await.unwrap();
        assert_eq!(fft.size().await.unwrap(), 4096);
        assert!(fft.set_size(1000).await.is_err());

        assert_eq!(fft.set_averaging(100).await.unwrap(), 128);
        assert_eq!(fft.averaging().await.unwrap(), 128);

        fft.set_window("blackman").await.unwrap();
        assert_eq!(fft.window().await.unwrap(), "BLACKMAN");
        fft.set_peak_mode("MAX").await.unwrap();
        assert_eq!(fft.peak_mode().await.unwrap(), "MAX");

        fft.set_bins(512).await.unwrap();
        assert_eq!(fft.bins().await.unwrap(), 512);
        let err = fft.set_bins(100).await.unwrap_err();
        assert!(matches!(err, ControlError::InvalidValue { .. }));
        fft.set_interval(250).await.unwrap();
        assert_eq!(fft.interval().await.unwrap(), 250);
    }

    #[tokio::test]
    async fn test_fft_enable_with_sets() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let fft = Fft::new(base_for(&sim, "FFT:1", ModuleKind::Fft).await);
        fft.enable(true, Some(10)).await.unwrap();
        assert!(fft.enabled().await.unwrap());
        assert_eq!(sim.with_radio(|r| r.enable_args("FFT:1")).unwrap(), vec!["10"]);
        fft.set_enabled(false).await.unwrap();
        assert_eq!(sim.with_radio(|r| r.is_enabled("FFT:1")), Some(false));
    }

    #[tokio::test]
    async fn test_spectral_scan() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let spc = SpectralScan::new(base_for(&sim, "SPC:1", ModuleKind::SpectralScan).await);
        assert_eq!(spc.span().await.unwrap(), (30e6, 3000e6));
        spc.set_span(88e6, 108e6).await.unwrap();
        assert_eq!(spc.span().await.unwrap(), (88e6, 108e6));
        assert!(spc.set_span(108e6, 88e6).await.is_err());
        assert!(spc.set_span(10e6, 88e6).await.is_err());

        spc.set_thresholds(-100.0, -30.0).await.unwrap();
        assert_eq!(spc.thresholds().await.unwrap(), (-100.0, -30.0));
        assert!(spc.set_thresholds(0.0, -10.0).await.is_err());

        spc.set_bins(512).await.unwrap();
        assert!(spc.set_bins(300).await.is_err());
        spc.set_tipping_mode("RISING").await.unwrap();
        assert_eq!(spc.tipping_mode().await.unwrap(), "RISING");
        assert_eq!(spc.set_averaging(100).await.unwrap(), 64);
    }
}
