//! Board health (`BRD`): built-in test, meters, external reference

use rxctl_protocol::decode_bitmask;

use super::{Cache, ModuleBase};
use crate::error::{ControlError, Result};

/// Board module
#[derive(Debug)]
pub struct Board {
    base: ModuleBase,
    bit_names: Cache<Vec<String>>,
    meter_names: Cache<Vec<String>>,
    references: Cache<Vec<String>>,
}

impl Board {
    pub fn new(base: ModuleBase) -> Self {
        Self {
            base,
            bit_names: Cache::default(),
            meter_names: Cache::default(),
            references: Cache::default(),
        }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    /// Built-in-test result mask
    pub async fn bit(&self) -> Result<u64> {
        self.base.get("BIT").await
    }

    pub async fn bit_names(&self) -> Result<Vec<String>> {
        self.bit_names
            .get_or_fetch(move || self.base.get_list("BITL"))
            .await
    }

    /// Names of the failing built-in tests as CSV
    pub async fn bit_readable(&self) -> Result<String> {
        let bits = self.bit().await?;
        let names = self.bit_names().await?;
        Ok(decode_bitmask(bits, &names))
    }

    pub async fn meter_names(&self) -> Result<Vec<String>> {
        self.meter_names
            .get_or_fetch(move || self.base.get_list("MTRL"))
            .await
    }

    /// Meter readings paired with their names
    pub async fn meters(&self) -> Result<Vec<(String, f64)>> {
        let values: Vec<f64> = self.base.get_numbers("MTR").await?;
        let names = self.meter_names().await?;
        if values.len() != names.len() {
            return Err(ControlError::ParseFailure {
                module: self.base.name(),
                verb: "MTR".into(),
                reply: format!("{values:?}"),
                reason: format!("{} readings for {} meters", values.len(), names.len()),
            });
        }
        Ok(names.into_iter().zip(values).collect())
    }

    /// Reference sources, in position order
    pub async fn references(&self) -> Result<Vec<String>> {
        self.references
            .get_or_fetch(move || self.base.choices("EXRL"))
            .await
    }

    /// Selected reference position
    pub async fn external_reference(&self) -> Result<usize> {
        self.base.get_first("EXR").await
    }

    /// Selected reference name
    pub async fn external_reference_name(&self) -> Result<String> {
        let refs = self.references().await?;
        self.base.get_choice("EXR", &refs).await
    }

    pub async fn set_external_reference(&self, index: usize) -> Result<()> {
        let refs = self.references().await?;
        self.base.set_choice_index("EXR", &refs, index).await
    }

    pub async fn set_external_reference_name(&self, name: &str) -> Result<()> {
        let refs = self.references().await?;
        self.base.set_choice("EXR", &refs, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::base_for;
    use rxctl_protocol::ModuleKind;
    use rxctl_sim::{spawn_local, SimConfig};

    #[tokio::test]
    async fn test_health() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let brd = Board::new(base_for(&sim, "BRD", ModuleKind::Board).await);
        assert_eq!(brd.bit_readable().await.unwrap(), "PLL_LOCK,TEMP_WARN");
        let meters = brd.meters().await.unwrap();
        assert_eq!(meters[0], ("TEMP_C".to_string(), 42.5));
        assert_eq!(meters.len(), 3);
    }

    #[tokio::test]
    async fn test_reference_selection() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let brd = Board::new(base_for(&sim, "BRD", ModuleKind::Board).await);
        assert_eq!(brd.external_reference_name().await.unwrap(), "INTERNAL");
        brd.set_external_reference_name("external").await.unwrap();
        assert_eq!(brd.external_reference().await.unwrap(), 1);
        brd.set_external_reference(0).await.unwrap();
        assert_eq!(brd.external_reference_name().await.unwrap(), "INTERNAL");
        assert!(brd.set_external_reference(2).await.is_err());
    }
}
