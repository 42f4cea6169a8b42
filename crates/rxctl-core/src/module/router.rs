//! Dataflow graph manager (`SRT`)
//!
//! The router owns the radio's inventory (classes, channels, installation
//! names) and its dataflow edges. An edge `src -> dst` feeds `dst` from
//! `src`; a destination has at most one source, so linking replaces any
//! existing inbound edge.

use rxctl_protocol::{parse_list, ModuleId, ParseError};
use tracing::debug;

use super::{ModuleBase, Tolerance};
use crate::error::{ControlError, Result};

/// Reply the router gives for an empty edge list
const NO_EDGES: &str = "NONE";

fn parse_ids(payload: &str) -> std::result::Result<Vec<ModuleId>, ParseError> {
    if payload.eq_ignore_ascii_case(NO_EDGES) {
        return Ok(Vec::new());
    }
    parse_list(payload).iter().map(|s| s.parse()).collect()
}

/// Stream router
#[derive(Debug)]
pub struct StreamRouter {
    base: ModuleBase,
}

impl StreamRouter {
    pub fn new(base: ModuleBase) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &ModuleBase {
        &self.base
    }

    /// Registration names of every installed class
    pub async fn module_classes(&self) -> Result<Vec<String>> {
        self.base.get_list("MODL").await
    }

    /// Channel numbers installed for a registration name
    pub async fn channels_for(&self, registration: &str) -> Result<Vec<u32>> {
        self.base
            .read("CHL", &[registration], |r| r.numbers())
            .await
    }

    /// Installation name (hardware class) of a module
    pub async fn install_name(&self, id: &ModuleId) -> Result<String> {
        let id = id.to_string();
        self.base
            .read("INS", &[&id], |r| Ok(r.payload().to_string()))
            .await
    }

    /// Registration name used for an installation name
    pub async fn registration_name(&self, install: &str) -> Result<String> {
        self.base
            .read("REG", &[install], |r| Ok(r.payload().to_string()))
            .await
    }

    /// Modules feeding `dst`
    pub async fn sources_of(&self, dst: &ModuleId) -> Result<Vec<ModuleId>> {
        let id = dst.to_string();
        self.base
            .read("SRC", &[&id], |r| parse_ids(r.payload()))
            .await
    }

    /// Modules fed by `src`
    pub async fn destinations_of(&self, src: &ModuleId) -> Result<Vec<ModuleId>> {
        let id = src.to_string();
        self.base
            .read("DST", &[&id], |r| parse_ids(r.payload()))
            .await
    }

    /// Feed `dst` from `src`, replacing any existing source of `dst`
    ///
    /// Confirmed by finding `dst` among the destinations of `src`.
    pub async fn link(&self, src: &ModuleId, dst: &ModuleId) -> Result<()> {
        let base = &self.base;
        let (s, d) = (src.to_string(), dst.to_string());
        let ok = base
            .set_with_validation(
                true,
                |_| {
                    let (s, d) = (s.clone(), d.clone());
                    async move { base.set("LNK", &[s, d]).await }
                },
                || async move {
                    let destinations = self.destinations_of(src).await?;
                    Ok::<_, ControlError>(destinations.contains(dst))
                },
                Tolerance::Exact,
            )
            .await?;
        base.validated("LNK", format!("{src} -> {dst}"), ok)?;
        debug!("Linked {} -> {}", src, dst);
        Ok(())
    }

    /// Remove the inbound edge of `dst`
    ///
    /// Confirmed by `dst` having no sources left.
    pub async fn unlink(&self, dst: &ModuleId) -> Result<()> {
        let base = &self.base;
        let d = dst.to_string();
        let ok = base
            .set_with_validation(
                true,
                |_| {
                    let d = d.clone();
                    async move { base.set("ULNK", &[d]).await }
                },
                || async move {
                    let sources = self.sources_of(dst).await?;
                    Ok::<_, ControlError>(sources.is_empty())
                },
                Tolerance::Exact,
            )
            .await?;
        base.validated("ULNK", dst, ok)?;
        debug!("Unlinked {}", dst);
        Ok(())
    }
}
