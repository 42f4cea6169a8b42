//! Radio controller
//!
//! [`Controller::connect`] opens the transport, discovers the installed
//! modules and synthesises receive channels. The controller then owns the
//! channel arena, the resource pools and the topology operations that span
//! more than one channel: relinking children, propagating a parent's retune
//! to its children and handing out FFT channels.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use rxctl_protocol::{MappingVersion, ModuleId, ModuleKind};
use tracing::{debug, info, warn};

use crate::channel::{FftChannel, RxChannel, RxType};
use crate::config::ControllerConfig;
use crate::discovery::{self, tolerate, Discovery};
use crate::error::{ControlError, Result};
use crate::module::{
    Board, Console, Ddc, DdcKind, Identity, Log, Module, ModuleContext, Network, Output,
    StreamRouter, TimeOfDay,
};
use crate::monitor::VarianceMonitor;
use crate::pool::ResourcePool;
use crate::transport::Transport;

/// Wideband bandwidth ratio used until the console reports one
const DEFAULT_WIDEBAND_RATIO: f64 = 0.8;

/// A connected radio
#[derive(Debug)]
pub struct Controller {
    config: ControllerConfig,
    transport: Arc<Transport>,
    version: MappingVersion,
    identity: Identity,
    console: Arc<Console>,
    router: Arc<StreamRouter>,
    modules: BTreeMap<ModuleId, Module>,
    channels: Vec<RxChannel>,
    channel_index: BTreeMap<ModuleId, usize>,
    outputs: ResourcePool<Arc<Output>>,
    swddcs: ResourcePool<Arc<Ddc>>,
    fft_channels: ResourcePool<FftChannel>,
    time_of_day: Option<Arc<TimeOfDay>>,
    time_variance: Arc<Mutex<Option<f64>>>,
    monitor: Option<VarianceMonitor>,
}

impl Controller {
    /// Connect to the radio and discover its modules
    pub async fn connect(config: ControllerConfig) -> Result<Self> {
        info!("Connecting to radio at {}:{}", config.host, config.port);
        let transport =
            Arc::new(Transport::connect(&config.host, config.port, config.timeout()).await?);
        let mut ctx = ModuleContext {
            transport: transport.clone(),
            validation: config.validation,
            flush_retries: config.flush_retries,
            wideband_ratio: DEFAULT_WIDEBAND_RATIO,
        };

        let console = Arc::new(Console::new(ctx.base(
            ModuleId::global(ModuleKind::Console.registration_name(MappingVersion::default())),
            ModuleKind::Console,
        )));
        console.enable_echo().await?;
        let identity = console.identity().await?;
        let version = discovery::detect_version(&console).await?;
        if let Some(ratio) = tolerate(console.wideband_ratio().await, "wideband ratio")? {
            ctx.wideband_ratio = ratio;
        }

        let router = Arc::new(StreamRouter::new(ctx.base(
            ModuleId::global(ModuleKind::StreamRouter.registration_name(version)),
            ModuleKind::StreamRouter,
        )));
        let descriptors = discovery::enumerate(&router, version).await?;
        let topology = Discovery::new(&router, &ctx, config.features, &descriptors)
            .run()
            .await?;

        if let Some(minimum) = config.min_bit_rate {
            discovery::check_link_rates(&topology.modules, minimum).await?;
        }

        let time_of_day = topology
            .modules
            .values()
            .find_map(Module::as_time_of_day)
            .cloned();
        if let Some(tod) = &time_of_day {
            match tod.initialize(&config.time, config.output_protocol).await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("Time of day not initialized: {}", e),
            }
        }

        let time_variance = Arc::new(Mutex::new(None));
        let monitor = match &time_of_day {
            Some(tod) if config.monitor.enabled => {
                let slot = time_variance.clone();
                Some(VarianceMonitor::spawn(
                    tod.clone(),
                    config.monitor.interval(),
                    move |delta| {
                        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(delta);
                    },
                ))
            }
            _ => None,
        };

        info!(
            "Connected to {} {} (load {}, mapping V{})",
            identity.model,
            identity.serial,
            identity.load,
            version.as_u8()
        );
        Ok(Self {
            config,
            transport,
            version,
            identity,
            console,
            router,
            modules: topology.modules,
            channels: topology.channels,
            channel_index: topology.channel_index,
            outputs: topology.outputs,
            swddcs: topology.swddcs,
            fft_channels: topology.fft_channels,
            time_of_day,
            time_variance,
            monitor,
        })
    }

    // Inventory

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn mapping_version(&self) -> MappingVersion {
        self.version
    }

    pub fn console(&self) -> &Arc<Console> {
        &self.console
    }

    pub fn router(&self) -> &Arc<StreamRouter> {
        &self.router
    }

    /// Every discovered module, by id
    pub fn modules(&self) -> &BTreeMap<ModuleId, Module> {
        &self.modules
    }

    pub fn module(&self, id: &ModuleId) -> Result<&Module> {
        self.modules
            .get(id)
            .ok_or_else(|| ControlError::ModuleNotFound(id.to_string()))
    }

    pub fn boards(&self) -> Vec<&Arc<Board>> {
        self.modules.values().filter_map(Module::as_board).collect()
    }

    pub fn networks(&self) -> Vec<&Arc<Network>> {
        self.modules.values().filter_map(Module::as_network).collect()
    }

    pub fn logs(&self) -> Vec<&Arc<Log>> {
        self.modules.values().filter_map(Module::as_log).collect()
    }

    pub fn time_of_day(&self) -> Option<&Arc<TimeOfDay>> {
        self.time_of_day.as_ref()
    }

    /// Latest `radio - host` clock difference from the monitor (seconds)
    pub fn time_variance(&self) -> Option<f64> {
        *self.time_variance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Channels

    pub fn channels(&self) -> &[RxChannel] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Result<&RxChannel> {
        self.channels
            .get(index)
            .ok_or(ControlError::ChannelNotFound(index))
    }

    /// Channel containing module `id`
    pub fn channel_by_id(&self, id: &ModuleId) -> Option<&RxChannel> {
        self.channel_index
            .get(id)
            .and_then(|&index| self.channels.get(index))
    }

    // Pools

    pub fn output_pool(&self) -> &ResourcePool<Arc<Output>> {
        &self.outputs
    }

    pub fn swddc_pool(&self) -> &ResourcePool<Arc<Ddc>> {
        &self.swddcs
    }

    pub fn fft_pool(&self) -> &ResourcePool<FftChannel> {
        &self.fft_channels
    }

    /// Claim a free FFT channel
    pub fn get_fft_channel(&mut self) -> Result<FftChannel> {
        let fft = self.fft_channels.get()?;
        debug!("Claimed FFT channel {}", fft.id());
        Ok(fft)
    }

    /// Feed a claimed FFT channel from `source`
    pub async fn link_fft_channel(&mut self, fft: &mut FftChannel, source: &ModuleId) -> Result<()> {
        self.module(source)?;
        if !self.fft_channels.is_used(fft.id()) {
            return Err(ControlError::Topology(format!("{} has not been claimed", fft.id())));
        }
        self.router.link(source, fft.id()).await?;
        fft.upstream = Some(source.clone());
        self.fft_channels.update_used(fft.clone());
        debug!("FFT channel {} fed from {}", fft.id(), source);
        Ok(())
    }

    /// Disable, unlink and return an FFT channel to the pool
    ///
    /// The channel goes back to the pool even when the radio refuses the
    /// disable or the unlink; the first such error is returned.
    pub async fn save_fft_channel(&mut self, mut fft: FftChannel) -> Result<()> {
        let disabled = fft.fft.set_enabled(false).await;
        let unlinked = match &fft.upstream {
            Some(_) => self.router.unlink(fft.id()).await,
            None => Ok(()),
        };
        fft.upstream = None;
        debug!("Released FFT channel {}", fft.id());
        self.fft_channels.put(fft);
        disabled.and(unlinked)
    }

    // Graph helpers

    /// Output fed by module `id`
    pub async fn get_output_module_of(&self, id: &ModuleId) -> Result<Option<Arc<Output>>> {
        let destinations = self.router.destinations_of(id).await?;
        Ok(destinations
            .iter()
            .find_map(|d| self.modules.get(d).and_then(Module::as_output).cloned()))
    }

    /// Software DDC fed by module `id`
    pub async fn get_inline_swddc_of(&self, id: &ModuleId) -> Result<Option<Arc<Ddc>>> {
        let destinations = self.router.destinations_of(id).await?;
        Ok(destinations.iter().find_map(|d| {
            self.modules
                .get(d)
                .and_then(Module::as_ddc)
                .filter(|ddc| ddc.ddc_kind() == DdcKind::Software)
                .cloned()
        }))
    }

    /// FFT channel fed by module `id`
    pub async fn get_fft_channel_of(&self, id: &ModuleId) -> Result<Option<FftChannel>> {
        let destinations = self.router.destinations_of(id).await?;
        let pool = &self.fft_channels;
        Ok(destinations.iter().find_map(|d| {
            pool.used()
                .iter()
                .chain(pool.free())
                .find(|f| f.id() == d)
                .cloned()
        }))
    }

    // Topology

    fn is_ancestor(&self, ancestor: usize, mut index: usize) -> bool {
        let mut hops = 0;
        while let Some(parent) = self.channels.get(index).and_then(RxChannel::parent) {
            if parent == ancestor {
                return true;
            }
            index = parent;
            hops += 1;
            if hops > self.channels.len() {
                return true;
            }
        }
        false
    }

    /// Move channel `child` under channel `parent`
    ///
    /// The router link replaces the child's previous inbound edge, then the
    /// arena and the child's RF offset follow.
    pub async fn add_child_tuner(&mut self, parent: usize, child: usize) -> Result<()> {
        if parent == child {
            return Err(ControlError::Topology(format!("channel {child} cannot feed itself")));
        }
        let parent_channel = self.channel(parent)?;
        let child_channel = self.channel(child)?;
        if !child_channel.can_be_child() {
            return Err(ControlError::Topology(format!(
                "channel {child} ({:?}) cannot be a child",
                child_channel.rx_type()
            )));
        }
        if self.is_ancestor(child, parent) {
            return Err(ControlError::Topology(format!(
                "channel {child} already feeds channel {parent}"
            )));
        }
        let source = match child_channel.rx_type() {
            RxType::SwDdc => parent_channel.digital().map(|d| d.base().id().clone()),
            _ => parent_channel
                .analog()
                .map(|a| a.base().id().clone())
                .or_else(|| parent_channel.digital().map(|d| d.base().id().clone())),
        };
        let source = source.ok_or_else(|| {
            ControlError::Topology(format!("channel {parent} has no tuner to feed from"))
        })?;
        let ddc = child_channel
            .digital()
            .cloned()
            .ok_or_else(|| ControlError::Topology(format!("channel {child} has no DDC")))?;

        let old_parent = child_channel.parent();
        self.router.link(&source, ddc.base().id()).await?;

        let frequency = parent_channel.frequency().await?;
        let bandwidth = match child_channel.rx_type() {
            RxType::SwDdc => Some(parent_channel.bandwidth().await?),
            _ => None,
        };
        ddc.set_rf_offset(frequency);
        ddc.set_parent_bandwidth(bandwidth);
        child_channel.invalidate_rates();

        if let Some(old) = old_parent {
            self.channels[old].remove_child(child);
        }
        self.channels[child].set_parent(Some(parent));
        self.channels[parent].add_child(child);
        info!("Channel {} now fed from channel {} ({})", child, parent, source);
        Ok(())
    }

    /// Tune channel `index`, optionally carrying its children along
    ///
    /// Every child is visited even when one of them fails; the first
    /// failure is returned afterwards.
    pub async fn set_frequency(&self, index: usize, hz: f64, update_offsets: bool) -> Result<()> {
        let channel = self.channel(index)?;
        channel.set_frequency(hz).await?;
        if !update_offsets || channel.children().is_empty() {
            return Ok(());
        }
        let frequency = channel.frequency().await?;
        self.follow_parents(channel.children().iter().map(|&c| (c, frequency)).collect())
            .await
    }

    /// Re-anchor channel `index` (and its own children) to a parent now at `hz`
    ///
    /// A child keeps its absolute frequency when the new IF range still
    /// covers it and is disabled otherwise.
    pub async fn update_rf_frequency_offset(&self, index: usize, hz: f64) -> Result<()> {
        self.follow_parents(vec![(index, hz)]).await
    }

    async fn follow_parents(&self, mut pending: Vec<(usize, f64)>) -> Result<()> {
        let mut first_error = None;
        while let Some((index, offset)) = pending.pop() {
            match self.reanchor(index, offset).await {
                Ok(frequency) => {
                    let children = self.channel(index).map(RxChannel::children).unwrap_or_default();
                    pending.extend(children.iter().map(|&c| (c, frequency)));
                }
                Err(e) => {
                    warn!("Channel {} did not follow its parent to {} Hz: {}", index, offset, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Move one channel under a parent now at `offset`; returns where it
    /// ends up
    ///
    /// The new offset stays only if the channel was retuned or disabled.
    async fn reanchor(&self, index: usize, offset: f64) -> Result<f64> {
        let channel = self.channel(index)?;
        let ddc = channel
            .digital()
            .ok_or_else(|| ControlError::Topology(format!("channel {index} has no DDC")))?;
        let previous = ddc.rf_offset();
        let absolute = ddc.frequency().await;
        ddc.set_rf_offset(offset);

        let retuned = match absolute {
            Ok(absolute) => match ddc.frequency_range().await {
                Ok(range) if range.contains(absolute) => {
                    ddc.set_frequency(absolute).await.map(|()| Some(absolute))
                }
                Ok(_) => Ok(None),
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };
        match retuned {
            Ok(Some(absolute)) => {
                debug!("Channel {} kept at {} Hz under {} Hz", index, absolute, offset);
            }
            Ok(None) => {
                warn!(
                    "Channel {} is outside its parent's passband at {} Hz, disabling",
                    index, offset
                );
                if let Err(e) = channel.set_enable(false).await {
                    ddc.set_rf_offset(previous);
                    return Err(e);
                }
            }
            Err(e) => {
                if let Err(disable) = channel.set_enable(false).await {
                    debug!("Channel {} could not be disabled: {}", index, disable);
                    ddc.set_rf_offset(previous);
                }
                return Err(e);
            }
        }
        ddc.frequency().await
    }

    /// Forget the children's rate tables after a parent's rate changed
    async fn refresh_children(&self, index: usize) -> Result<()> {
        let channel = self.channel(index)?;
        for &child in channel.children() {
            let child = self.channel(child)?;
            child.invalidate_rates();
            if child.rx_type() == RxType::SwDdc {
                if let Some(ddc) = child.digital() {
                    ddc.set_parent_bandwidth(Some(channel.bandwidth().await?));
                }
            }
        }
        Ok(())
    }

    /// Set the sample rate of channel `index` within the configured tolerance
    pub async fn set_sample_rate(&self, index: usize, hz: f64) -> Result<f64> {
        let tolerance = self.config.validation.tolerance_percent;
        let rate = self.channel(index)?.set_sample_rate(hz, tolerance).await?;
        self.refresh_children(index).await?;
        Ok(rate)
    }

    /// Set the bandwidth of channel `index` within the configured tolerance
    pub async fn set_bandwidth(&self, index: usize, hz: f64) -> Result<f64> {
        let tolerance = self.config.validation.tolerance_percent;
        let bandwidth = self.channel(index)?.set_bandwidth(hz, tolerance).await?;
        self.refresh_children(index).await?;
        Ok(bandwidth)
    }

    /// Stop the background monitor
    pub async fn shutdown(mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop().await;
        }
        info!("Disconnected from {}", self.transport.peer());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rxctl_sim::{spawn_local, SimConfig, SimHandle};

    async fn connect(sim: &SimHandle) -> Controller {
        let mut config = ControllerConfig::new("127.0.0.1", sim.addr().port());
        config.validation.interval_ms = 5;
        Controller::connect(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_reports_inventory() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let controller = connect(&sim).await;
        assert_eq!(controller.identity().model, "NDR-SIM");
        assert_eq!(controller.mapping_version(), MappingVersion::V2);
        assert_eq!(controller.boards().len(), 1);
        assert_eq!(controller.networks().len(), 1);
        assert!(controller.time_of_day().is_some());
        let nb: ModuleId = "NBDDC:3".parse().unwrap();
        assert_eq!(controller.channel_by_id(&nb).map(RxChannel::index), Some(4));
        assert!(matches!(
            controller.channel(99),
            Err(ControlError::ChannelNotFound(99))
        ));
        assert!(matches!(
            controller.module(&"OUT:42".parse().unwrap()),
            Err(ControlError::ModuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_add_child_tuner_relinks() {
        let sim = spawn_local(SimConfig::default()).await.unwrap();
        let mut controller = connect(&sim).await;
        controller.set_frequency(1, 300e6, false).await.unwrap();
        // NBDDC:1 moves from RCV:1 to RCV:2
        controller.add_child_tuner(1, 2).await.unwrap();
        assert_eq!(controller.channel(2).unwrap().parent(), Some(1));
        assert!(!controller.channel(0).unwrap().children().contains(&2));
        assert!(controller.channel(1).unwrap().children().contains(&2));
        assert_eq!(controller.channel(2).unwrap().rf_offset(), 300e6);
        let sources = controller
            .router()
            .sources_of(&"NBDDC:1".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(sources, vec!["RCV:2".parse::<ModuleId>().unwrap()]);

        assert!(matches!(
            controller.add_child_tuner(2, 2).await,
            Err(ControlError::Topology(_))
        ));
        assert!(matches!(
            controller.add_child_tuner(2, 0).await,
            Err(ControlError::Topology(_))
        ));
    }

    #[tokio::test]
    async fn test_monitor_records_variance() {
        let sim = spawn_local(SimConfig {
            time_offset_s: -3.0,
            ..SimConfig::default()
        })
        .await
        .unwrap();
        let mut config = ControllerConfig::new("127.0.0.1", sim.addr().port());
        config.time.initialize = false;
        config.monitor.enabled = true;
        config.monitor.interval_ms = 20;
        let controller = Controller::connect(config).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        let variance = controller.time_variance().unwrap();
        assert!((variance + 3.0).abs() < 0.5, "{variance}");
        controller.shutdown().await;
    }

    #[tokio::test]
    async fn test_slow_link_aborts_connect() {
        let sim = spawn_local(SimConfig {
            link_rate_bps: 100_000_000,
            ..SimConfig::default()
        })
        .await
        .unwrap();
        let mut config = ControllerConfig::new("127.0.0.1", sim.addr().port());
        config.min_bit_rate = Some(1_000_000_000);
        let err = Controller::connect(config).await.unwrap_err();
        assert!(matches!(err, ControlError::ConnectionRateFailure { rate: 100_000_000, .. }));
    }
}
