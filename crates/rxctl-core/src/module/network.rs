//! Network interfaces (`NET:n`)

use tracing::debug;

use super::ModuleBase;
use crate::error::{ControlError, Result};

/// A network interface
#[derive(Debug)]
pub struct Network {
    base: ModuleBase,
}

impl Network {
    pub fn new(base: ModuleBase) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    pub async fn ip_address(&self) -> Result<String> {
        self.base.get_text("IPP").await
    }

    pub async fn set_ip_address(&self, address: &str) -> Result<()> {
        self.base.set_text_validated("IPP", address).await
    }

    pub async fn mac_address(&self) -> Result<String> {
        self.base.get_text("MAC").await
    }

    pub async fn enabled(&self) -> Result<bool> {
        self.base.get_flag("ENB").await
    }

    pub async fn set_enabled(&self, on: bool) -> Result<()> {
        self.base.set_flag_validated("ENB", on).await
    }

    /// Link rate in bit/s
    pub async fn bit_rate(&self) -> Result<u64> {
        self.base.get("BRT").await
    }

    /// Fail with `ConnectionRateFailure` when the link is slower than `minimum`
    pub async fn check_min_rate(&self, minimum: u64) -> Result<u64> {
        let rate = self.bit_rate().await?;
        if rate < minimum {
            return Err(ControlError::ConnectionRateFailure {
                module: self.base.name(),
                rate,
                minimum,
            });
        }
        debug!("{} link rate {} bit/s meets {} bit/s", self.base.id(), rate, minimum);
        Ok(rate)
    }
}
