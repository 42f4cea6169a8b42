//! Global command console (`CON`)

use rxctl_protocol::is_error;
use rxctl_protocol::units::mhz_to_hz;
use serde::Serialize;
use tracing::debug;

use super::ModuleBase;
use crate::error::{ControlError, Result};

/// Configuration items readable with `CON CFG? KEY`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConsoleKey {
    /// ADC clock (MHz)
    AdcClock,
    /// Lowest tunable frequency (MHz)
    TuneMin,
    /// Highest tunable frequency (MHz)
    TuneMax,
    /// Number of receivers
    Receivers,
    /// Number of wideband DDCs
    WbDdcs,
    /// Number of narrowband DDCs
    NbDdcs,
    /// Number of software DDCs
    SwDdcs,
    /// Number of outputs
    Outputs,
    /// Number of FFT engines
    Ffts,
    /// Batch filename loaded at boot
    Batch,
    /// FPGA image filename
    Fpga,
    /// Wideband filter bandwidth (MHz)
    WidebandBandwidth,
    /// Minimum WBDDC sample rate (MHz)
    MinSampleRate,
}

impl ConsoleKey {
    /// Key as sent on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdcClock => "ADCCLK",
            Self::TuneMin => "TUNEMIN",
            Self::TuneMax => "TUNEMAX",
            Self::Receivers => "NUMRCV",
            Self::WbDdcs => "NUMWBDDC",
            Self::NbDdcs => "NUMNBDDC",
            Self::SwDdcs => "NUMSWDDC",
            Self::Outputs => "NUMOUT",
            Self::Ffts => "NUMFFT",
            Self::Batch => "BATCH",
            Self::Fpga => "FPGA",
            Self::WidebandBandwidth => "WBBW",
            Self::MinSampleRate => "MINSRATE",
        }
    }
}

/// Model, serial number and software load reported by `CON IDN?`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Identity {
    pub model: String,
    pub serial: String,
    pub load: String,
}

/// Command console
#[derive(Debug)]
pub struct Console {
    base: ModuleBase,
}

impl Console {
    pub fn new(base: ModuleBase) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    /// Model, serial number and load
    pub async fn identity(&self) -> Result<Identity> {
        self.base
            .read("IDN", &[], |r| {
                let fields = r.fields(',', Some(3))?;
                Ok(Identity {
                    model: fields[0].to_string(),
                    serial: fields[1].to_string(),
                    load: fields[2].to_string(),
                })
            })
            .await
    }

    /// Management address
    pub async fn ip_address(&self) -> Result<String> {
        self.base.get_text("IPP").await
    }

    /// Software compile date
    pub async fn compile_date(&self) -> Result<String> {
        self.base.get_text("CPL").await
    }

    /// Whether requests are echoed
    pub async fn echo(&self) -> Result<bool> {
        self.base.get_flag("ECH").await
    }

    /// Turn echo on or off, validated by readback
    pub async fn set_echo(&self, on: bool) -> Result<()> {
        self.base.set_flag_validated("ECH", on).await
    }

    /// Turn echo on at connect time
    ///
    /// With echo off the radio's empty reply is consumed as the echo, so a
    /// timeout on this one command is tolerated; the transport is flushed
    /// afterwards either way.
    pub async fn enable_echo(&self) -> Result<()> {
        match self.base.set("ECH", &["1"]).await {
            Ok(()) => {}
            Err(e) if e.is_timeout() => debug!("No echo while enabling echo: {}", e),
            Err(e) => return Err(e),
        }
        self.base.flush().await;
        Ok(())
    }

    /// Raw configuration item
    pub async fn config_item(&self, key: ConsoleKey) -> Result<String> {
        self.base
            .read("CFG", &[key.as_str()], |r| Ok(r.payload().to_string()))
            .await
    }

    /// Numeric configuration item
    pub async fn config_number(&self, key: ConsoleKey) -> Result<f64> {
        self.base.read("CFG", &[key.as_str()], |r| r.value()).await
    }

    /// ADC clock in Hz
    pub async fn adc_clock_hz(&self) -> Result<f64> {
        self.config_number(ConsoleKey::AdcClock).await.map(mhz_to_hz)
    }

    /// Tunable range in Hz
    pub async fn tune_range_hz(&self) -> Result<(f64, f64)> {
        let min = self.config_number(ConsoleKey::TuneMin).await?;
        let max = self.config_number(ConsoleKey::TuneMax).await?;
        Ok((mhz_to_hz(min), mhz_to_hz(max)))
    }

    /// Installed count of a module class (`NUM…` keys)
    pub async fn module_count(&self, key: ConsoleKey) -> Result<u32> {
        self.base.read("CFG", &[key.as_str()], |r| r.value()).await
    }

    /// Batch filename loaded at boot
    pub async fn batch_filename(&self) -> Result<String> {
        self.config_item(ConsoleKey::Batch).await
    }

    /// FPGA image filename
    pub async fn fpga_image(&self) -> Result<String> {
        self.config_item(ConsoleKey::Fpga).await
    }

    /// Wideband filter bandwidth in Hz
    pub async fn wideband_bandwidth_hz(&self) -> Result<f64> {
        self.config_number(ConsoleKey::WidebandBandwidth)
            .await
            .map(mhz_to_hz)
    }

    /// Minimum WBDDC sample rate in Hz
    pub async fn min_sample_rate_hz(&self) -> Result<f64> {
        self.config_number(ConsoleKey::MinSampleRate)
            .await
            .map(mhz_to_hz)
    }

    /// WBDDC bandwidth as a fraction of its sample rate
    pub async fn wideband_ratio(&self) -> Result<f64> {
        let bw = self.wideband_bandwidth_hz().await?;
        let rate = self.min_sample_rate_hz().await?;
        if rate <= 0.0 {
            return Err(self
                .base
                .invalid("CFG", rate, "minimum sample rate must be positive"));
        }
        Ok(bw / rate)
    }

    /// Send a raw request line and return the reply text
    ///
    /// An `ERR` reply becomes a `CommandFailure` naming the line's module
    /// and verb.
    pub async fn send_custom_command(&self, line: &str) -> Result<String> {
        let reply = self.base.transport().send_raw(line).await?;
        if is_error(&reply) {
            let mut words = line.split_whitespace();
            let module = words.next().unwrap_or_default().to_string();
            let verb = words.next().unwrap_or_default().trim_end_matches('?').to_string();
            return Err(ControlError::CommandFailure { module, verb, reply });
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::base_for;
    use rxctl_protocol::ModuleKind;
    use rxctl_sim::{spawn_local, SimConfig};

    #[tokio::test]
    async fn test_identity_and_config() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let con = Console::new(base_for(&sim, "CON", ModuleKind::Console).await);
        let id = con.identity().await.unwrap();
        assert_eq!(id.model, "NDR-SIM");
        assert_eq!(id.load, "3.1.0");
        assert_eq!(con.batch_filename().await.unwrap(), "ndr_Gen2_Map.bat");
        assert_eq!(con.adc_clock_hz().await.unwrap(), 100e6);
        assert_eq!(con.tune_range_hz().await.unwrap(), (30e6, 3000e6));
        assert_eq!(con.module_count(ConsoleKey::NbDdcs).await.unwrap(), 4);
        assert!((con.wideband_ratio().await.unwrap() - 0.8).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_enable_echo_when_off() {
        let sim = spawn_local(SimConfig {
            echo: false,
            ..SimConfig::default()
        })
        .await
        .unwrap();
        let con = Console::new(base_for(&sim, "CON", ModuleKind::Console).await);
        con.enable_echo().await.unwrap();
        assert_eq!(sim.with_radio(|r| r.echo()), Some(true));
        assert!(con.echo().await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_command_passthrough() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let con = Console::new(base_for(&sim, "CON", ModuleKind::Console).await);
        let reply = con.send_custom_command("RCV:1 FRQ?").await.unwrap();
        assert_eq!(reply, "RCV:1 FRQ 100.000000");

        let err = con.send_custom_command("RCV:1 XYZ?").await.unwrap_err();
        assert!(matches!(err, ControlError::CommandFailure { ref verb, .. } if verb == "XYZ"));
    }
}
