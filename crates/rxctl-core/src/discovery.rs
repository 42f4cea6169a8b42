//! Module discovery and channel synthesis
//!
//! Discovery walks the router's inventory, instantiates a facade per module,
//! fills the resource pools and stitches receive channels out of the
//! factory wiring. Failures on a single module are logged and skipped;
//! timeouts and link-rate failures end construction.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rxctl_protocol::{MappingVersion, ModuleId, ModuleKind};
use tracing::{debug, info, warn};

use crate::channel::{FftChannel, RxChannel, RxType};
use crate::config::FeatureFlags;
use crate::error::Result;
use crate::module::{Console, Ddc, DdcKind, Fft, Module, ModuleContext, Output, StreamRouter};
use crate::pool::ResourcePool;

/// One installed module as reported by the router
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleDescriptor {
    /// Wire identity
    pub id: ModuleId,
    /// Hardware class name
    pub install_name: String,
}

/// Keep `Ok`, drop non-fatal errors with a log line, pass fatal ones on
pub(crate) fn tolerate<T>(result: Result<T>, what: impl std::fmt::Display) -> Result<Option<T>> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_fatal() => Err(e),
        Err(e) => {
            debug!("Skipping {}: {}", what, e);
            Ok(None)
        }
    }
}

/// Mapping version from the batch filename, V1 when it cannot be read
pub async fn detect_version(console: &Console) -> Result<MappingVersion> {
    let batch = tolerate(console.batch_filename().await, "batch filename")?;
    let version = batch
        .as_deref()
        .map(MappingVersion::from_batch_filename)
        .unwrap_or_default();
    debug!("Mapping version {} (batch {:?})", version.as_u8(), batch);
    Ok(version)
}

/// List every installed module
///
/// Installation names this library does not know fall back to the class
/// implied by the registration name under `version`.
pub async fn enumerate(router: &StreamRouter, version: MappingVersion) -> Result<Vec<ModuleDescriptor>> {
    let mut found = Vec::new();
    for registration in router.module_classes().await? {
        let Some(channels) = tolerate(router.channels_for(&registration).await, &registration)? else {
            continue;
        };
        for channel in channels {
            let id = ModuleId::new(registration.as_str(), channel);
            let Some(install) = tolerate(router.install_name(&id).await, &id)? else {
                continue;
            };
            let install_name = if ModuleKind::from_install_name(&install).is_some() {
                install
            } else if let Some(kind) = ModuleKind::from_registration_name(&registration, version) {
                debug!("{}: unknown install name {:?}, using {}", id, install, kind.install_name());
                kind.install_name().to_string()
            } else {
                debug!("{}: unsupported install name {:?}", id, install);
                continue;
            };
            found.push(ModuleDescriptor { id, install_name });
        }
    }
    Ok(found)
}

/// Everything discovery produces
#[derive(Debug)]
pub struct Topology {
    pub modules: BTreeMap<ModuleId, Module>,
    pub channels: Vec<RxChannel>,
    pub channel_index: BTreeMap<ModuleId, usize>,
    pub outputs: ResourcePool<Arc<Output>>,
    pub swddcs: ResourcePool<Arc<Ddc>>,
    pub fft_channels: ResourcePool<FftChannel>,
}

/// Channel synthesis over an instantiated module set
pub struct Discovery<'a> {
    router: &'a StreamRouter,
    features: FeatureFlags,
    topology: Topology,
}

impl<'a> Discovery<'a> {
    /// Instantiate facades for `descriptors` and fill the pools
    pub fn new(
        router: &'a StreamRouter,
        ctx: &ModuleContext,
        features: FeatureFlags,
        descriptors: &[ModuleDescriptor],
    ) -> Self {
        let mut modules = BTreeMap::new();
        for d in descriptors {
            match Module::create(&d.install_name, d.id.clone(), ctx) {
                Some(module) => {
                    modules.insert(d.id.clone(), module);
                }
                None => debug!("{}: no facade for {:?}", d.id, d.install_name),
            }
        }
        let outputs = ResourcePool::from_free(
            "output",
            modules.values().filter_map(Module::as_output).cloned(),
        );
        let swddcs = ResourcePool::from_free(
            "software DDC",
            modules
                .values()
                .filter_map(Module::as_ddc)
                .filter(|d| d.ddc_kind() == DdcKind::Software)
                .cloned(),
        );
        Self {
            router,
            features,
            topology: Topology {
                modules,
                channels: Vec::new(),
                channel_index: BTreeMap::new(),
                outputs,
                swddcs,
                fft_channels: ResourcePool::new("FFT channel"),
            },
        }
    }

    /// Run the synthesis steps in order
    pub async fn run(mut self) -> Result<Topology> {
        self.claim_linked_outputs().await?;
        self.receiver_channels().await?;
        self.hardware_ddc_channels().await?;
        if self.features.enable_secondary_tuners {
            self.secondary_channels().await?;
        }
        if self.features.enable_fft_channels {
            self.fft_channels().await?;
        }
        self.spectral_scan_channels().await?;
        self.index_channels();
        self.link_parents().await?;
        info!(
            "Discovered {} modules, {} channels, {} FFT channels",
            self.topology.modules.len(),
            self.topology.channels.len(),
            self.topology.fft_channels.len()
        );
        Ok(self.topology)
    }

    fn ddcs(&self, kind: DdcKind) -> Vec<Arc<Ddc>> {
        self.topology
            .modules
            .values()
            .filter_map(Module::as_ddc)
            .filter(|d| d.ddc_kind() == kind)
            .cloned()
            .collect()
    }

    fn ddc(&self, id: &ModuleId, kind: DdcKind) -> Option<Arc<Ddc>> {
        self.topology
            .modules
            .get(id)
            .and_then(Module::as_ddc)
            .filter(|d| d.ddc_kind() == kind)
            .cloned()
    }

    fn output(&self, id: &ModuleId) -> Option<Arc<Output>> {
        self.topology.modules.get(id).and_then(Module::as_output).cloned()
    }

    async fn destinations(&self, src: &ModuleId) -> Result<Vec<ModuleId>> {
        let found = tolerate(self.router.destinations_of(src).await, src)?;
        Ok(found.unwrap_or_default())
    }

    fn push_channel(&mut self, channel: RxChannel) -> usize {
        let index = self.topology.channels.len();
        debug!("Channel {}: {:?} {:?}", index, channel.rx_type(), channel.tuner_id());
        self.topology.channels.push(channel);
        index
    }

    /// Outputs already fed by something are taken out of the pool and
    /// switched off
    async fn claim_linked_outputs(&mut self) -> Result<()> {
        let outputs: Vec<Arc<Output>> = self.topology.outputs.free().to_vec();
        for output in outputs {
            let id = output.base().id().clone();
            let Some(sources) = tolerate(self.router.sources_of(&id).await, &id)? else {
                continue;
            };
            if sources.is_empty() {
                continue;
            }
            self.topology.outputs.mark_used(&id);
            tolerate(output.set_enabled(false).await, format_args!("disabling {id}"))?;
            debug!("{} is fed by {:?}, claimed", id, sources);
        }
        Ok(())
    }

    /// The output `src` already feeds, or a free one linked to it
    async fn bind_output(&mut self, src: &ModuleId) -> Result<Option<Arc<Output>>> {
        for dst in self.destinations(src).await? {
            if let Some(output) = self.output(&dst) {
                self.topology.outputs.mark_used(&dst);
                return Ok(Some(output));
            }
        }
        let output = match self.topology.outputs.get() {
            Ok(output) => output,
            Err(e) => {
                warn!("{} left without an output: {}", src, e);
                return Ok(None);
            }
        };
        let dst = output.base().id().clone();
        match tolerate(self.router.link(src, &dst).await, format_args!("link {src} -> {dst}")) {
            Ok(Some(())) => Ok(Some(output)),
            Ok(None) => {
                self.topology.outputs.put(output);
                Ok(None)
            }
            Err(e) => {
                self.topology.outputs.put(output);
                Err(e)
            }
        }
    }

    async fn receiver_channels(&mut self) -> Result<()> {
        let receivers: Vec<_> = self
            .topology
            .modules
            .values()
            .filter_map(Module::as_receiver)
            .cloned()
            .collect();
        let mut paired = BTreeSet::new();

        for receiver in receivers {
            let rcv_id = receiver.base().id().clone();
            let wideband = self
                .destinations(&rcv_id)
                .await?
                .iter()
                .find_map(|d| self.ddc(d, DdcKind::Wideband));
            let index = self.topology.channels.len();
            let mut channel = match &wideband {
                Some(wb) => RxChannel::new(index, RxType::Digital)
                    .with_analog(receiver)
                    .with_digital(wb.clone()),
                None => RxChannel::new(index, RxType::AnalogOnly).with_analog(receiver),
            };
            if let Some(wb) = wideband {
                let wb_id = wb.base().id().clone();
                channel.set_output(self.bind_output(&wb_id).await?);
                paired.insert(wb_id);
            }
            self.push_channel(channel);
        }

        for wb in self.ddcs(DdcKind::Wideband) {
            let wb_id = wb.base().id().clone();
            if paired.contains(&wb_id) {
                continue;
            }
            let index = self.topology.channels.len();
            let mut channel = RxChannel::new(index, RxType::Digital).with_digital(wb);
            channel.set_output(self.bind_output(&wb_id).await?);
            self.push_channel(channel);
        }
        Ok(())
    }

    async fn hardware_ddc_channels(&mut self) -> Result<()> {
        for nb in self.ddcs(DdcKind::Narrowband) {
            let nb_id = nb.base().id().clone();
            let index = self.topology.channels.len();
            let mut channel = RxChannel::new(index, RxType::HwDdc).with_digital(nb);

            let inline = self
                .destinations(&nb_id)
                .await?
                .iter()
                .find_map(|d| self.ddc(d, DdcKind::Software));
            match inline {
                Some(sw) => {
                    let sw_id = sw.base().id().clone();
                    self.topology.swddcs.mark_used(&sw_id);
                    channel.set_output(self.bind_output(&sw_id).await?);
                    channel.set_swddc(Some(sw));
                }
                None => {
                    let output = self.bind_output(&nb_id).await?;
                    if self.features.enable_inline_swddc {
                        let sw = self.insert_inline(&nb_id, output.as_ref()).await?;
                        channel.set_swddc(sw);
                    }
                    channel.set_output(output);
                }
            }
            self.push_channel(channel);
        }
        Ok(())
    }

    /// Put a free software DDC between `nb` and its output
    async fn insert_inline(&mut self, nb: &ModuleId, output: Option<&Arc<Output>>) -> Result<Option<Arc<Ddc>>> {
        let sw = match self.topology.swddcs.get() {
            Ok(sw) => sw,
            Err(e) => {
                debug!("{}: no in-line software DDC: {}", nb, e);
                return Ok(None);
            }
        };
        let sw_id = sw.base().id().clone();
        let linked = match output {
            Some(output) => {
                let out_id = output.base().id();
                match self.router.link(nb, &sw_id).await {
                    Ok(()) => self.router.link(&sw_id, out_id).await,
                    Err(e) => Err(e),
                }
            }
            None => self.router.link(nb, &sw_id).await,
        };
        match tolerate(linked, format_args!("in-line {sw_id} after {nb}")) {
            Ok(Some(())) => {
                debug!("{} in-line after {}", sw_id, nb);
                Ok(Some(sw))
            }
            Ok(None) => {
                self.topology.swddcs.put(sw);
                Ok(None)
            }
            Err(e) => {
                self.topology.swddcs.put(sw);
                Err(e)
            }
        }
    }

    /// Hand the remaining software DDCs to narrowband channels, round-robin
    async fn secondary_channels(&mut self) -> Result<()> {
        let parents: Vec<(usize, ModuleId)> = self
            .topology
            .channels
            .iter()
            .filter(|c| c.rx_type() == RxType::HwDdc)
            .filter_map(|c| c.digital().map(|d| (c.index(), d.base().id().clone())))
            .collect();
        if parents.is_empty() {
            return Ok(());
        }
        let mut turn = 0;
        while let Ok(sw) = self.topology.swddcs.get() {
            let sw_id = sw.base().id().clone();
            let (parent, nb_id) = &parents[turn % parents.len()];
            turn += 1;
            if tolerate(self.router.link(nb_id, &sw_id).await, format_args!("link {nb_id} -> {sw_id}"))?
                .is_none()
            {
                self.topology.swddcs.put(sw);
                continue;
            }
            let index = self.topology.channels.len();
            let mut channel = RxChannel::new(index, RxType::SwDdc).with_digital(sw);
            channel.set_output(self.bind_output(&sw_id).await?);
            debug!("{} is a secondary tuner of channel {}", sw_id, parent);
            self.push_channel(channel);
        }
        Ok(())
    }

    /// Pair each FFT with an output and park the pair in the pool
    async fn fft_channels(&mut self) -> Result<()> {
        let ffts: Vec<Arc<Fft>> = self
            .topology
            .modules
            .values()
            .filter_map(Module::as_fft)
            .cloned()
            .collect();
        for fft in ffts {
            let fft_id = fft.base().id().clone();
            if tolerate(self.router.unlink(&fft_id).await, format_args!("unlink {fft_id}"))?.is_none() {
                continue;
            }
            let output = match self.topology.outputs.get() {
                Ok(output) => output,
                Err(e) => {
                    warn!("{} left without an output: {}", fft_id, e);
                    break;
                }
            };
            let out_id = output.base().id().clone();
            if tolerate(self.router.link(&fft_id, &out_id).await, format_args!("link {fft_id} -> {out_id}"))?
                .is_none()
            {
                self.topology.outputs.put(output);
                continue;
            }
            self.topology.fft_channels.put(FftChannel::new(fft, output));
        }
        Ok(())
    }

    async fn spectral_scan_channels(&mut self) -> Result<()> {
        let scans: Vec<_> = self
            .topology
            .modules
            .values()
            .filter_map(Module::as_spectral_scan)
            .cloned()
            .collect();
        for scan in scans {
            let id = scan.base().id().clone();
            let index = self.topology.channels.len();
            let mut channel = RxChannel::new(index, RxType::Spc).with_spectral_scan(scan);
            channel.set_output(self.bind_output(&id).await?);
            self.push_channel(channel);
        }
        Ok(())
    }

    fn index_channels(&mut self) {
        let topology = &mut self.topology;
        topology.channel_index = topology
            .channels
            .iter()
            .flat_map(|c| c.module_ids().into_iter().map(move |id| (id, c.index())))
            .collect();
    }

    /// Hang channels below the channel whose tuner feeds them
    async fn link_parents(&mut self) -> Result<()> {
        let mut edges = Vec::new();
        for channel in &self.topology.channels {
            let tuners = channel
                .analog()
                .map(|a| a.base().id().clone())
                .into_iter()
                .chain(channel.digital().map(|d| d.base().id().clone()));
            for src in tuners {
                for dst in self.destinations(&src).await? {
                    if let Some(&child) = self.topology.channel_index.get(&dst) {
                        if child != channel.index() && self.topology.channels[child].can_be_child() {
                            edges.push((channel.index(), child));
                        }
                    }
                }
            }
        }

        for (parent, child) in edges {
            if self.topology.channels[child].parent().is_some() {
                continue;
            }
            self.topology.channels[child].set_parent(Some(parent));
            self.topology.channels[parent].add_child(child);
            let parent_channel = &self.topology.channels[parent];
            let Some(frequency) = tolerate(parent_channel.frequency().await, format_args!("channel {parent} frequency"))?
            else {
                continue;
            };
            let bandwidth = match self.topology.channels[child].rx_type() {
                RxType::SwDdc => tolerate(parent_channel.bandwidth().await, format_args!("channel {parent} bandwidth"))?,
                _ => None,
            };
            if let Some(ddc) = self.topology.channels[child].digital() {
                ddc.set_rf_offset(frequency);
                ddc.set_parent_bandwidth(bandwidth);
            }
            debug!("Channel {} is a child of channel {} at {} Hz", child, parent, frequency);
        }
        Ok(())
    }
}

/// Fail construction on a network link slower than `minimum`
pub async fn check_link_rates(modules: &BTreeMap<ModuleId, Module>, minimum: u64) -> Result<()> {
    for network in modules.values().filter_map(Module::as_network) {
        let rate = network.check_min_rate(minimum).await?;
        info!("{} link rate {} bit/s", network.base().id(), rate);
    }
    Ok(())
}
