//! Time-of-day (`TOD`)
//!
//! The radio stamps packets from its own clock. In the free-running modes
//! (`SIM`, `ONEPPS`) the host sets that clock: the value written with `TIM`
//! takes effect on the next PPS edge, expressed either as seconds from the
//! start of the year (SDDS family) or as GPS seconds (VITA-49).

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rxctl_protocol::units::{format_number, unix_to_gps};
use rxctl_protocol::OutputProtocol;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{Cache, ModuleBase, Tolerance};
use crate::config::TimeConfig;
use crate::error::Result;

/// Time reference mode, in the radio's `MODL` order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TodMode {
    Sim,
    OnePps,
    IrigB,
    Nav,
    Tfn,
}

impl TodMode {
    pub const ALL: [TodMode; 5] = [
        TodMode::Sim,
        TodMode::OnePps,
        TodMode::IrigB,
        TodMode::Nav,
        TodMode::Tfn,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sim => "SIM",
            Self::OnePps => "ONEPPS",
            Self::IrigB => "IRIGB",
            Self::Nav => "NAV",
            Self::Tfn => "TFN",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.name().eq_ignore_ascii_case(name.trim()))
    }

    /// Whether the host is expected to set the radio clock
    pub fn is_free_running(&self) -> bool {
        matches!(self, Self::Sim | Self::OnePps)
    }
}

/// Reference tracking (`TRK`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackMode {
    Off,
    Calibrate,
    Track,
}

impl TrackMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Calibrate => "CALIBRATE",
            Self::Track => "TRACK",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Off, Self::Calibrate, Self::Track]
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// Encoding of `TIM` values (`TFM`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFormat {
    /// Seconds from the start of the current UTC year
    Soy,
    /// Seconds since the GPS epoch
    Gps,
}

impl TimeFormat {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Soy => "SOY",
            Self::Gps => "GPS",
        }
    }

    /// Format the radio expects for packets of `protocol`
    pub fn for_protocol(protocol: OutputProtocol) -> Self {
        if protocol.uses_year_time() {
            Self::Soy
        } else {
            Self::Gps
        }
    }

    /// Encode a Unix time
    pub fn encode(&self, unix: i64) -> Option<f64> {
        match self {
            Self::Soy => {
                let now: DateTime<Utc> = DateTime::from_timestamp(unix, 0)?;
                let start = Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0).single()?;
                Some((unix - start.timestamp()) as f64)
            }
            Self::Gps => Some(unix_to_gps(unix as f64)),
        }
    }
}

/// Time-of-day module
#[derive(Debug)]
pub struct TimeOfDay {
    base: ModuleBase,
    modes: Cache<Vec<String>>,
    track_modes: Cache<Vec<String>>,
    formats: Cache<Vec<String>>,
}

impl TimeOfDay {
    pub fn new(base: ModuleBase) -> Self {
        Self {
            base,
            modes: Cache::default(),
            track_modes: Cache::default(),
            formats: Cache::default(),
        }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    pub async fn modes(&self) -> Result<Vec<String>> {
        self.modes
            .get_or_fetch(move || self.base.choices("MODL"))
            .await
    }

    pub async fn mode_name(&self) -> Result<String> {
        let modes = self.modes().await?;
        self.base.get_choice("MOD", &modes).await
    }

    pub async fn mode(&self) -> Result<Option<TodMode>> {
        Ok(TodMode::from_name(&self.mode_name().await?))
    }

    pub async fn set_mode(&self, mode: TodMode) -> Result<()> {
        let modes = self.modes().await?;
        self.base.set_choice("MOD", &modes, mode.name()).await
    }

    pub async fn set_mode_index(&self, index: usize) -> Result<()> {
        let modes = self.modes().await?;
        self.base.set_choice_index("MOD", &modes, index).await
    }

    /// Reference adjust (ns/s)
    pub async fn reference_adjust(&self) -> Result<i64> {
        self.base.get_first("ADJ").await
    }

    pub async fn set_reference_adjust(&self, ns_per_s: i64) -> Result<()> {
        self.base
            .set_number_validated("ADJ", ns_per_s as f64, Tolerance::Exact)
            .await
    }

    pub async fn track_modes(&self) -> Result<Vec<String>> {
        self.track_modes
            .get_or_fetch(move || self.base.choices("TRKL"))
            .await
    }

    pub async fn reference_track(&self) -> Result<Option<TrackMode>> {
        let modes = self.track_modes().await?;
        let name = self.base.get_choice("TRK", &modes).await?;
        Ok(TrackMode::from_name(&name))
    }

    pub async fn set_reference_track(&self, mode: TrackMode) -> Result<()> {
        let modes = self.track_modes().await?;
        self.base.set_choice("TRK", &modes, mode.name()).await
    }

    pub async fn toy_mode(&self) -> Result<u32> {
        self.base.get_first("TOY").await
    }

    pub async fn set_toy_mode(&self, mode: u32) -> Result<()> {
        self.base
            .set_number_validated("TOY", f64::from(mode), Tolerance::Exact)
            .await
    }

    /// PPS detection voltage (V)
    pub async fn pps_voltage(&self) -> Result<f64> {
        self.base.get_first("PPV").await
    }

    pub async fn set_pps_voltage(&self, volts: f64) -> Result<()> {
        self.base
            .set_number_validated("PPV", volts, Tolerance::Absolute(0.001))
            .await
    }

    /// Sub-second mismatch threshold
    pub async fn mismatch_threshold(&self) -> Result<u32> {
        self.base.get_first("SSM").await
    }

    pub async fn set_mismatch_threshold(&self, threshold: u32) -> Result<()> {
        self.base
            .set_number_validated("SSM", f64::from(threshold), Tolerance::Exact)
            .await
    }

    pub async fn meters(&self) -> Result<Vec<f64>> {
        self.base.get_numbers("MTR").await
    }

    pub async fn bit(&self) -> Result<u64> {
        self.base.get("BIT").await
    }

    pub async fn formats(&self) -> Result<Vec<String>> {
        self.formats
            .get_or_fetch(move || self.base.choices("TFML"))
            .await
    }

    pub async fn time_format(&self) -> Result<Option<TimeFormat>> {
        let formats = self.formats().await?;
        let name = self.base.get_choice("TFM", &formats).await?;
        Ok([TimeFormat::Soy, TimeFormat::Gps]
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(&name)))
    }

    pub async fn set_time_format(&self, format: TimeFormat) -> Result<()> {
        let formats = self.formats().await?;
        self.base.set_choice("TFM", &formats, format.name()).await
    }

    /// Radio clock as Unix seconds
    pub async fn radio_time(&self) -> Result<f64> {
        self.base.get_first("TIM").await
    }

    /// Write `TIM`; applied at the next PPS edge in the current format
    pub async fn set_time(&self, value: f64) -> Result<()> {
        self.base.set("TIM", &[format_number(value)]).await
    }

    /// Radio clock minus host clock (seconds)
    pub async fn time_variance(&self) -> Result<f64> {
        let radio = self.radio_time().await?;
        Ok(radio - host_now())
    }

    /// Select the configured mode and, in the free-running modes, set the
    /// radio clock for the next PPS edge
    ///
    /// Returns the `TIM` value written, or `None` when the clock was left alone.
    pub async fn initialize(&self, config: &TimeConfig, protocol: OutputProtocol) -> Result<Option<f64>> {
        if let Some(mode) = config.mode {
            self.set_mode(mode).await?;
        }
        if !config.initialize {
            return Ok(None);
        }
        let mode = self.mode().await?;
        if !mode.is_some_and(|m| m.is_free_running()) {
            debug!("Time of day follows an external reference ({:?}), not setting it", mode);
            return Ok(None);
        }

        let format = TimeFormat::for_protocol(protocol);
        self.set_time_format(format).await?;
        let next_edge = Utc::now().timestamp() + 1;
        let value = format
            .encode(next_edge)
            .ok_or_else(|| self.base.invalid("TIM", next_edge, "not a representable time"))?;
        self.set_time(value).await?;
        info!("Radio time set to {} ({}) for the next PPS", value, format.name());
        Ok(Some(value))
    }
}

fn host_now() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::base_for;
    use rxctl_protocol::ModuleKind;
    use rxctl_sim::{spawn_local, SimConfig};

    #[test]
    fn test_time_encoding() {
        // 2024-03-01T00:00:00Z
        let unix = 1_709_251_200;
        assert_eq!(TimeFormat::Soy.encode(unix), Some(60.0 * 86_400.0));
        assert_eq!(TimeFormat::Gps.encode(315_964_800), Some(18.0));
        assert_eq!(TimeFormat::for_protocol(OutputProtocol::Vita49), TimeFormat::Gps);
        assert_eq!(TimeFormat::for_protocol(OutputProtocol::Sddsa), TimeFormat::Soy);
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(TodMode::from_name("onepps"), Some(TodMode::OnePps));
        assert_eq!(serde_json::to_string(&TodMode::IrigB).unwrap(), "\"IRIGB\"");
        assert!(!TodMode::Nav.is_free_running());
    }

    #[tokio::test]
    async fn test_settings() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let tod = TimeOfDay::new(base_for(&sim, "TOD", ModuleKind::TimeOfDay).await);
        assert_eq!(tod.mode().await.unwrap(), Some(TodMode::Sim));
        tod.set_mode(TodMode::IrigB).await.unwrap();
        assert_eq!(tod.mode().await.unwrap(), Some(TodMode::IrigB));
        tod.set_reference_track(TrackMode::Calibrate).await.unwrap();
        assert_eq!(tod.reference_track().await.unwrap(), Some(TrackMode::Calibrate));
        tod.set_reference_adjust(-12).await.unwrap();
        assert_eq!(tod.reference_adjust().await.unwrap(), -12);
        tod.set_pps_voltage(2.5).await.unwrap();
        assert_eq!(tod.pps_voltage().await.unwrap(), 2.5);
        assert_eq!(tod.meters().await.unwrap(), vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_initialize_sets_clock_in_free_running_mode() {
        let sim = spawn_local(SimConfig {
            time_offset_s: 5_000.0,
            ..SimConfig::default()
        })
        .await
        .unwrap();
        let tod = TimeOfDay::new(base_for(&sim, "TOD", ModuleKind::TimeOfDay).await);
        assert!(tod.time_variance().await.unwrap() > 4_000.0);

        let written = tod
            .initialize(&TimeConfig::default(), OutputProtocol::Vita49)
            .await
            .unwrap();
        assert!(written.is_some());
        assert_eq!(tod.time_format().await.unwrap(), Some(TimeFormat::Gps));
        let offset = sim.with_radio(|r| r.time_offset()).unwrap();
        assert!(offset.abs() <= 1.0, "offset {offset}");
        assert!(tod.time_variance().await.unwrap().abs() <= 1.5);
    }

    #[tokio::test]
    async fn test_initialize_leaves_external_reference_alone() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let tod = TimeOfDay::new(base_for(&sim, "TOD", ModuleKind::TimeOfDay).await);
        let config = TimeConfig {
            initialize: true,
            mode: Some(TodMode::Nav),
        };
        assert_eq!(tod.initialize(&config, OutputProtocol::Sdds).await.unwrap(), None);
        assert_eq!(tod.mode().await.unwrap(), Some(TodMode::Nav));
    }
}
