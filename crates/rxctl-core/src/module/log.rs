//! Syslog forwarding (`LOG`)

use rxctl_protocol::{decode_bitmask, encode_bitmask};

use super::{Cache, ModuleBase, Tolerance};
use crate::error::Result;

/// Log forwarding module
#[derive(Debug)]
pub struct Log {
    base: ModuleBase,
    mask_names: Cache<Vec<String>>,
}

impl Log {
    pub fn new(base: ModuleBase) -> Self {
        Self {
            base,
            mask_names: Cache::default(),
        }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    /// Syslog destination `host:port`
    pub async fn ip_address(&self) -> Result<String> {
        self.base.get_text("IPP").await
    }

    pub async fn set_ip_address(&self, destination: &str) -> Result<()> {
        self.base.set_text_validated("IPP", destination).await
    }

    /// Active severity mask
    pub async fn mask(&self) -> Result<u64> {
        self.base.get("MSK").await
    }

    pub async fn set_mask(&self, mask: u64) -> Result<()> {
        self.base
            .set_number_validated("MSK", mask as f64, Tolerance::Exact)
            .await
    }

    /// Bit names of the mask, LSB first
    pub async fn mask_names(&self) -> Result<Vec<String>> {
        self.mask_names
            .get_or_fetch(move || self.base.get_list("MSKL"))
            .await
    }

    /// Names of the active mask bits as CSV
    pub async fn mask_readable(&self) -> Result<String> {
        let mask = self.mask().await?;
        let names = self.mask_names().await?;
        Ok(decode_bitmask(mask, &names))
    }

    /// Set the mask from a CSV of bit names; unknown names are ignored
    pub async fn set_mask_names(&self, csv: &str) -> Result<()> {
        let names = self.mask_names().await?;
        self.set_mask(encode_bitmask(csv, &names)).await
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

    #[tokio::test]
    async fn test_mask_by_name() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let log = Log::new(base_for(&sim, "LOG", ModuleKind::Log).await);
        assert_eq!(log.mask_readable().await.unwrap(), "ERRORS");
        log.set_mask_names("ERRORS,INFO,BOGUS").await.unwrap();
        assert_eq!(log.mask().await.unwrap(), 0b101);
        assert_eq!(log.mask_readable().await.unwrap(), "ERRORS,INFO");
    }

    #[tokio::test]
    async fn test_destination_and_enable() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let log = Log::new(base_for(&sim, "LOG", ModuleKind::Log).await);
        log.set_ip_address("10.1.1.1:514").await.unwrap();
        assert_eq!(log.ip_address().await.unwrap(), "10.1.1.1:514");
        log.set_enabled(true).await.unwrap();
        assert!(log.enabled().await.unwrap());
    }
}
