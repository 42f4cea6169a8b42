//! Virtual receiver simulation
//!
//! Holds the module inventory of a radio and answers request lines the way
//! the hardware does: the request is echoed first, then a query gets
//! `MOD[:CH] VERB VALUE`, a successful set gets an empty line and a refused
//! command gets `MOD[:CH] VERB ERR CODE`.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rxctl_protocol::units::{format_number, gps_to_unix};
use rxctl_protocol::{decode_request, parse_number, Command, MappingVersion, ModuleId, ModuleKind};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::property::{Decl, Property};

/// Unknown module
pub const E_MODULE: &str = "E_MODULE";
/// Unknown verb for this module
pub const E_VERB: &str = "E_VERB";
/// Malformed arguments
pub const E_SYNTAX: &str = "E_SYNTAX";
/// Value outside its declaration
pub const E_RANGE: &str = "E_RANGE";
/// Illegal dataflow edge
pub const E_LINK: &str = "E_LINK";

/// Narrowband filter bandwidth as a fraction of the output sample rate
const NB_BANDWIDTH_RATIO: f64 = 0.8;

type Outcome = Result<Option<String>, &'static str>;

/// Configuration for creating a virtual receiver
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Model name reported by `CON IDN?`
    pub model: String,
    /// Serial number reported by `CON IDN?`
    pub serial: String,
    /// Software load reported by `CON IDN?`
    pub load: String,
    /// FPGA image reported by `CON CFG? FPGA`
    pub fpga: String,
    /// Batch filename reported by `CON CFG? BATCH`; selects the mapping version
    pub batch: String,
    /// Address reported by `CON IPP?` and `NET IPP?`
    pub ip_address: String,
    /// Host used for the default output destinations
    pub output_host: String,
    /// Number of wideband (`MSDR3000`) receivers
    pub wide_receivers: u32,
    /// Number of serial (`MSDR_RS422`) receivers, numbered after the wide ones
    pub serial_receivers: u32,
    /// Number of wideband DDCs
    pub wbddcs: u32,
    /// Number of narrowband DDCs
    pub nbddcs: u32,
    /// Number of software DDCs
    pub swddcs: u32,
    /// Number of outputs
    pub outputs: u32,
    /// Number of FFT engines
    pub ffts: u32,
    /// Number of spectral scan engines
    pub spectral_scans: u32,
    /// Number of network interfaces
    pub networks: u32,
    /// ADC clock, the WBDDC input rate (MHz)
    pub adc_clock_mhz: f64,
    /// NBDDC input rate (MHz)
    pub nbddc_input_mhz: f64,
    /// SWDDC input rate when no NBDDC feeds it (MHz)
    pub swddc_input_mhz: f64,
    /// `CON CFG? WBBW` (MHz)
    pub wideband_bandwidth_mhz: f64,
    /// `CON CFG? MINSRATE` (MHz)
    pub min_sample_rate_mhz: f64,
    /// `NET BRT?` (bit/s)
    pub link_rate_bps: u64,
    /// Echo requests at power-up
    pub echo: bool,
    /// Factory-link WBDDC:k to OUT:k
    pub prewired_outputs: bool,
    /// Initial offset of radio time from host time (seconds)
    pub time_offset_s: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            model: "NDR-SIM".to_string(),
            serial: "SIM0001".to_string(),
            load: "3.1.0".to_string(),
            fpga: "ndr_sim_rev7.bit".to_string(),
            batch: "ndr_Gen2_Map.bat".to_string(),
            ip_address: "127.0.0.1".to_string(),
            output_host: "10.0.0.100".to_string(),
            wide_receivers: 2,
            serial_receivers: 0,
            wbddcs: 2,
            nbddcs: 4,
            swddcs: 2,
            outputs: 16,
            ffts: 1,
            spectral_scans: 1,
            networks: 1,
            adc_clock_mhz: 100.0,
            nbddc_input_mhz: 25.6,
            swddc_input_mhz: 1.6,
            wideband_bandwidth_mhz: 20.0,
            min_sample_rate_mhz: 25.0,
            link_rate_bps: 10_000_000_000,
            echo: true,
            prewired_outputs: false,
            time_offset_s: 0.0,
        }
    }
}

/// One installed module
#[derive(Debug, Clone)]
pub struct SimModule {
    /// Wire identity
    pub id: ModuleId,
    /// Class
    pub kind: ModuleKind,
    /// Installation name reported by `SRT INS?`
    pub install_name: String,
    props: BTreeMap<&'static str, Property>,
    enable_args: Vec<String>,
}

impl SimModule {
    fn value(&self, verb: &str) -> Option<&str> {
        self.props.get(verb).map(|p| p.value.as_str())
    }

    fn number(&self, verb: &str) -> f64 {
        self.props.get(verb).map(Property::number).unwrap_or_default()
    }
}

/// A simulated receiver
#[derive(Debug)]
pub struct SimRadio {
    config: SimConfig,
    version: MappingVersion,
    modules: Vec<SimModule>,
    index: BTreeMap<ModuleId, usize>,
    /// Dataflow edges `(source, destination)`
    links: Vec<(ModuleId, ModuleId)>,
    echo: bool,
    silent: bool,
    time_offset: f64,
}

impl SimRadio {
    /// Create a radio from configuration, with factory wiring in place
    pub fn new(config: SimConfig) -> Self {
        let version = MappingVersion::from_batch_filename(&config.batch);
        let mut radio = Self {
            version,
            modules: Vec::new(),
            index: BTreeMap::new(),
            links: Vec::new(),
            echo: config.echo,
            silent: false,
            time_offset: config.time_offset_s,
            config,
        };

        radio.install(ModuleKind::Console, 0);
        radio.install(ModuleKind::StreamRouter, 0);
        radio.install(ModuleKind::Board, 0);
        radio.install(ModuleKind::Log, 0);
        radio.install(ModuleKind::TimeOfDay, 0);
        let c = radio.config.clone();
        for ch in 1..=c.networks {
            radio.install(ModuleKind::Network, ch);
        }
        for ch in 1..=c.wide_receivers {
            radio.install(ModuleKind::WideReceiver, ch);
        }
        for ch in 1..=c.serial_receivers {
            radio.install(ModuleKind::SerialReceiver, c.wide_receivers + ch);
        }
        for ch in 1..=c.wbddcs {
            radio.install(ModuleKind::WbDdc, ch);
        }
        for ch in 1..=c.nbddcs {
            radio.install(ModuleKind::NbDdc, ch);
        }
        for ch in 1..=c.swddcs {
            radio.install(ModuleKind::SwDdc, ch);
        }
        for ch in 1..=c.ffts {
            radio.install(ModuleKind::Fft, ch);
        }
        for ch in 1..=c.spectral_scans {
            radio.install(ModuleKind::SpectralScan, ch);
        }
        for ch in 1..=c.outputs {
            radio.install(ModuleKind::Output, ch);
        }
        radio.factory_wiring();
        debug!(
            "Simulated radio {} ready: {} modules, mapping v{}",
            radio.config.model,
            radio.modules.len(),
            version.as_u8()
        );
        radio
    }

    fn install(&mut self, kind: ModuleKind, channel: u32) {
        let id = ModuleId::new(kind.registration_name(self.version), channel);
        let props = properties(kind, channel, &self.config)
            .into_iter()
            .collect::<BTreeMap<_, _>>();
        self.index.insert(id.clone(), self.modules.len());
        self.modules.push(SimModule {
            id,
            kind,
            install_name: kind.install_name().to_string(),
            props,
            enable_args: Vec::new(),
        });
    }

    fn ids_of(&self, kind: ModuleKind) -> Vec<ModuleId> {
        self.modules
            .iter()
            .filter(|m| m.kind == kind)
            .map(|m| m.id.clone())
            .collect()
    }

    fn factory_wiring(&mut self) {
        let receivers: Vec<ModuleId> = self
            .modules
            .iter()
            .filter(|m| m.kind.is_receiver())
            .map(|m| m.id.clone())
            .collect();
        let wbddcs = self.ids_of(ModuleKind::WbDdc);
        let nbddcs = self.ids_of(ModuleKind::NbDdc);
        let ffts = self.ids_of(ModuleKind::Fft);
        let scans = self.ids_of(ModuleKind::SpectralScan);
        let outputs = self.ids_of(ModuleKind::Output);

        for (rcv, wb) in receivers.iter().zip(&wbddcs) {
            self.links.push((rcv.clone(), wb.clone()));
        }
        if !receivers.is_empty() {
            for (i, nb) in nbddcs.iter().enumerate() {
                self.links
                    .push((receivers[i % receivers.len()].clone(), nb.clone()));
            }
            for scan in &scans {
                self.links.push((receivers[0].clone(), scan.clone()));
            }
        }
        for (wb, fft) in wbddcs.iter().zip(&ffts) {
            self.links.push((wb.clone(), fft.clone()));
        }
        if self.config.prewired_outputs {
            for (wb, out) in wbddcs.iter().zip(&outputs) {
                self.links.push((wb.clone(), out.clone()));
            }
        }
    }

    /// Mapping version implied by the batch filename
    pub fn mapping_version(&self) -> MappingVersion {
        self.version
    }

    /// Whether requests are echoed
    pub fn echo(&self) -> bool {
        self.echo
    }

    /// Turn echo on or off, as `CON ECH` does
    pub fn set_echo(&mut self, echo: bool) {
        self.echo = echo;
        if let Some(p) = self.module_mut_by_name("CON").and_then(|m| m.props.get_mut("ECH")) {
            p.value = if echo { "1" } else { "0" }.to_string();
        }
    }

    /// Stop answering entirely (the radio dropped off the network)
    pub fn set_silent(&mut self, silent: bool) {
        self.silent = silent;
    }

    /// Offset of radio time from host time (seconds)
    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    /// Shift radio time relative to host time
    pub fn set_time_offset(&mut self, offset: f64) {
        self.time_offset = offset;
    }

    /// All installed module ids, in install order
    pub fn module_ids(&self) -> Vec<ModuleId> {
        self.modules.iter().map(|m| m.id.clone()).collect()
    }

    /// Current dataflow edges `(source, destination)`
    pub fn links(&self) -> &[(ModuleId, ModuleId)] {
        &self.links
    }

    /// Current wire value of `verb` on module `id` (e.g. `"OUT:1"`)
    pub fn value(&self, id: &str, verb: &str) -> Option<String> {
        let id = id.parse::<ModuleId>().ok()?;
        let idx = *self.index.get(&id)?;
        self.modules[idx].value(verb).map(str::to_string)
    }

    /// Overwrite a value without validation
    pub fn force_value(&mut self, id: &str, verb: &str, value: &str) -> bool {
        let Some(idx) = id
            .parse::<ModuleId>()
            .ok()
            .and_then(|id| self.index.get(&id).copied())
        else {
            return false;
        };
        match self.modules[idx].props.get_mut(verb) {
            Some(p) => {
                p.value = value.to_string();
                true
            }
            None => false,
        }
    }

    /// Whether module `id` is enabled
    pub fn is_enabled(&self, id: &str) -> bool {
        self.value(id, "ENB").as_deref() == Some("1")
    }

    /// Arguments carried by the last `ENB` of module `id` beyond the flag
    pub fn enable_args(&self, id: &str) -> Vec<String> {
        id.parse::<ModuleId>()
            .ok()
            .and_then(|id| self.index.get(&id))
            .map(|&idx| self.modules[idx].enable_args.clone())
            .unwrap_or_default()
    }

    fn module_mut_by_name(&mut self, name: &str) -> Option<&mut SimModule> {
        let idx = *self.index.get(&ModuleId::global(name))?;
        self.modules.get_mut(idx)
    }

    /// Process one received datagram and return the datagrams to send back
    pub fn handle_datagram(&mut self, data: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(data).into_owned();
        let lines: Vec<&str> = text.lines().collect();
        if lines.is_empty() {
            return self.handle_line("");
        }
        lines
            .into_iter()
            .flat_map(|line| self.handle_line(line))
            .collect()
    }

    /// Process one request line and return the datagrams to send back
    pub fn handle_line(&mut self, line: &str) -> Vec<String> {
        if self.silent {
            return Vec::new();
        }
        let line = line.trim_end_matches(|c: char| c.is_ascii_control());
        let mut out = Vec::new();
        if self.echo {
            out.push(format!("{line}\n"));
        }
        if line.trim().is_empty() {
            return out;
        }

        let reply = match decode_request(line) {
            Ok(cmd) => self.reply_to(&cmd),
            Err(e) => {
                debug!("Rejecting malformed request {:?}: {}", line, e);
                let head = line.split_whitespace().next().unwrap_or_default();
                format!("{head} ERR {E_SYNTAX}")
            }
        };
        trace!("sim <- {:?} -> {:?}", line, reply);
        out.push(format!("{reply}\n"));
        out
    }

    fn reply_to(&mut self, cmd: &Command) -> String {
        let head = format!("{} {}", cmd.module, cmd.verb);
        match self.execute(cmd) {
            Ok(Some(value)) => format!("{head} {value}"),
            Ok(None) => String::new(),
            Err(code) => format!("{head} ERR {code}"),
        }
    }

    fn execute(&mut self, cmd: &Command) -> Outcome {
        let idx = *self.index.get(&cmd.module).ok_or(E_MODULE)?;
        let kind = self.modules[idx].kind;
        match (kind, cmd.verb.as_str(), cmd.query) {
            (ModuleKind::StreamRouter, _, _) => self.route(cmd),
            (ModuleKind::Console, "CFG", true) => self.config_item(cmd),
            (ModuleKind::Console, "ECH", false) => {
                self.generic(idx, cmd)?;
                self.echo = self.modules[idx].value("ECH") == Some("1");
                Ok(None)
            }
            (k, "ISR", true) if k.is_ddc() => Ok(Some(format!("{:.6}", self.input_rate_mhz(idx)))),
            (ModuleKind::NbDdc, "BWT", true) => Ok(Some(format!(
                "{:.6}",
                self.sample_rate_mhz(idx) * NB_BANDWIDTH_RATIO
            ))),
            (k, "ENB", false) if k.is_ddc() || k == ModuleKind::Fft => {
                self.enable_with_args(idx, cmd)
            }
            (ModuleKind::Output, "PKR", true) => Ok(Some(self.packet_rate(idx))),
            (ModuleKind::SpectralScan, "FRQ", false) => self.scan_span(idx, cmd),
            (ModuleKind::SpectralScan, "THR", false) => self.thresholds(idx, cmd),
            (ModuleKind::TimeOfDay, "TIM", true) => {
                Ok(Some(format!("{:.6}", now_unix() + self.time_offset)))
            }
            (ModuleKind::TimeOfDay, "TIM", false) => self.set_time(idx, cmd),
            _ => self.generic(idx, cmd),
        }
    }

    fn generic(&mut self, idx: usize, cmd: &Command) -> Outcome {
        let module = &mut self.modules[idx];
        if cmd.query {
            if let Some(p) = module.props.get(cmd.verb.as_str()) {
                return Ok(Some(p.value.clone()));
            }
            return module
                .props
                .values()
                .find(|p| p.decl.list_verb() == Some(cmd.verb.as_str()))
                .map(|p| Some(p.decl.describe(p.precision)))
                .ok_or(E_VERB);
        }

        let prop = module.props.get_mut(cmd.verb.as_str()).ok_or(E_VERB)?;
        let raw = match prop.decl {
            Decl::Free => cmd.args.join(","),
            _ => cmd.args.first().cloned().unwrap_or_default(),
        };
        if raw.is_empty() {
            return Err(E_SYNTAX);
        }
        prop.set(&raw).map_err(|r| r.code())?;
        Ok(None)
    }

    fn config_item(&self, cmd: &Command) -> Outcome {
        let key = cmd.args.first().ok_or(E_SYNTAX)?;
        let c = &self.config;
        let count = |kind: ModuleKind| self.ids_of(kind).len().to_string();
        let value = match key.to_ascii_uppercase().as_str() {
            "ADCCLK" => format_number(c.adc_clock_mhz),
            "TUNEMIN" => "30".to_string(),
            "TUNEMAX" => "3000".to_string(),
            "NUMRCV" => (c.wide_receivers + c.serial_receivers).to_string(),
            "NUMWBDDC" => count(ModuleKind::WbDdc),
            "NUMNBDDC" => count(ModuleKind::NbDdc),
            "NUMSWDDC" => count(ModuleKind::SwDdc),
            "NUMOUT" => count(ModuleKind::Output),
            "NUMFFT" => count(ModuleKind::Fft),
            "BATCH" => c.batch.clone(),
            "FPGA" => c.fpga.clone(),
            "WBBW" => format_number(c.wideband_bandwidth_mhz),
            "MINSRATE" => format_number(c.min_sample_rate_mhz),
            _ => return Err(E_RANGE),
        };
        Ok(Some(value))
    }

    fn enable_with_args(&mut self, idx: usize, cmd: &Command) -> Outcome {
        let (flag, rest) = cmd.args.split_first().ok_or(E_SYNTAX)?;
        for arg in rest {
            parse_number::<i64>(arg).map_err(|_| E_SYNTAX)?;
        }
        let module = &mut self.modules[idx];
        module
            .props
            .get_mut("ENB")
            .ok_or(E_VERB)?
            .set(flag)
            .map_err(|r| r.code())?;
        module.enable_args = rest.to_vec();
        Ok(None)
    }

    fn decimation(&self, idx: usize) -> f64 {
        let Some(prop) = self.modules[idx].props.get("DEC") else {
            return 1.0;
        };
        match &prop.decl {
            Decl::Choice { choices, .. } => prop
                .value
                .parse::<usize>()
                .ok()
                .and_then(|i| choices.get(i))
                .and_then(|c| c.parse().ok())
                .unwrap_or(1.0),
            _ => prop.number().max(1.0),
        }
    }

    fn input_rate_mhz(&self, idx: usize) -> f64 {
        let module = &self.modules[idx];
        match module.kind {
            ModuleKind::WbDdc => self.config.adc_clock_mhz,
            ModuleKind::NbDdc => self.config.nbddc_input_mhz,
            _ => self
                .sources(&module.id)
                .iter()
                .filter_map(|s| self.index.get(s).copied())
                .find(|&i| matches!(self.modules[i].kind, ModuleKind::WbDdc | ModuleKind::NbDdc))
                .map(|i| self.sample_rate_mhz(i))
                .unwrap_or(self.config.swddc_input_mhz),
        }
    }

    fn sample_rate_mhz(&self, idx: usize) -> f64 {
        self.input_rate_mhz(idx) / self.decimation(idx)
    }

    fn packet_rate(&self, idx: usize) -> String {
        let spf = self.modules[idx].number("SPF").max(1.0);
        let rate = self
            .sources(&self.modules[idx].id)
            .iter()
            .filter_map(|s| self.index.get(s).copied())
            .find(|&i| self.modules[i].kind.is_ddc())
            .map(|i| self.sample_rate_mhz(i) * 1e6 / spf)
            .unwrap_or_default();
        format!("{rate:.3}")
    }

    fn scan_span(&mut self, idx: usize, cmd: &Command) -> Outcome {
        let [start, stop] = two_numbers(cmd)?;
        if start >= stop || start < 30.0 || stop > 3000.0 {
            return Err(E_RANGE);
        }
        set_raw(&mut self.modules[idx], "FRQ", format!("{start:.6},{stop:.6}"))
    }

    fn thresholds(&mut self, idx: usize, cmd: &Command) -> Outcome {
        let [lo, hi] = two_numbers(cmd)?;
        if lo > hi {
            return Err(E_RANGE);
        }
        set_raw(
            &mut self.modules[idx],
            "THR",
            format!("{},{}", format_number(lo), format_number(hi)),
        )
    }

    fn set_time(&mut self, idx: usize, cmd: &Command) -> Outcome {
        let value: f64 = cmd
            .args
            .first()
            .ok_or(E_SYNTAX)
            .and_then(|a| parse_number(a).map_err(|_| E_SYNTAX))?;
        let now = now_unix();
        let format = self.modules[idx].value("TFM").unwrap_or("0");
        let target = match format {
            "1" => gps_to_unix(value),
            _ => start_of_year(now) + value,
        };
        let next_edge = now.floor() + 1.0;
        self.time_offset = target - next_edge;
        debug!("Radio time set, offset {:.6} s from host", self.time_offset);
        Ok(None)
    }

    fn lookup(&self, raw: &str) -> Result<ModuleId, &'static str> {
        let id = raw.parse::<ModuleId>().map_err(|_| E_SYNTAX)?;
        if self.index.contains_key(&id) {
            Ok(id)
        } else {
            Err(E_MODULE)
        }
    }

    fn sources(&self, dst: &ModuleId) -> Vec<ModuleId> {
        self.links
            .iter()
            .filter(|(_, d)| d == dst)
            .map(|(s, _)| s.clone())
            .collect()
    }

    fn destinations(&self, src: &ModuleId) -> Vec<ModuleId> {
        self.links
            .iter()
            .filter(|(s, _)| s == src)
            .map(|(_, d)| d.clone())
            .collect()
    }

    fn route(&mut self, cmd: &Command) -> Outcome {
        let arg = |i: usize| cmd.args.get(i).map(String::as_str).ok_or(E_SYNTAX);
        let csv = |ids: Vec<ModuleId>| {
            if ids.is_empty() {
                "NONE".to_string()
            } else {
                ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(",")
            }
        };
        match (cmd.verb.as_str(), cmd.query) {
            ("MODL", true) => {
                let mut names: Vec<&str> = Vec::new();
                for m in &self.modules {
                    if !names.contains(&m.id.name.as_str()) {
                        names.push(&m.id.name);
                    }
                }
                Ok(Some(names.join(",")))
            }
            ("CHL", true) => {
                let reg = arg(0)?;
                let channels: Vec<String> = self
                    .modules
                    .iter()
                    .filter(|m| m.id.name.eq_ignore_ascii_case(reg))
                    .map(|m| m.id.channel.to_string())
                    .collect();
                if channels.is_empty() {
                    return Err(E_MODULE);
                }
                Ok(Some(channels.join(",")))
            }
            ("INS", true) => {
                let id = self.lookup(arg(0)?)?;
                let idx = *self.index.get(&id).ok_or(E_MODULE)?;
                Ok(Some(self.modules[idx].install_name.clone()))
            }
            ("REG", true) => {
                let install = arg(0)?;
                self.modules
                    .iter()
                    .find(|m| m.install_name.eq_ignore_ascii_case(install))
                    .map(|m| Some(m.id.name.clone()))
                    .ok_or(E_MODULE)
            }
            ("SRC", true) => {
                let id = self.lookup(arg(0)?)?;
                Ok(Some(csv(self.sources(&id))))
            }
            ("DST", true) => {
                let id = self.lookup(arg(0)?)?;
                Ok(Some(csv(self.destinations(&id))))
            }
            ("LNK", false) => {
                let src = self.lookup(arg(0)?)?;
                let dst = self.lookup(arg(1)?)?;
                self.link(src, dst)?;
                Ok(None)
            }
            ("ULNK", false) => {
                let dst = self.lookup(arg(0)?)?;
                self.links.retain(|(_, d)| d != &dst);
                Ok(None)
            }
            _ => Err(E_VERB),
        }
    }

    fn link(&mut self, src: ModuleId, dst: ModuleId) -> Result<(), &'static str> {
        let kind_of = |id: &ModuleId| self.index.get(id).map(|&i| self.modules[i].kind);
        let (Some(src_kind), Some(dst_kind)) = (kind_of(&src), kind_of(&dst)) else {
            return Err(E_MODULE);
        };
        let legal = src != dst
            && src_kind != ModuleKind::Output
            && !src_kind.is_global()
            && !dst_kind.is_global()
            && !dst_kind.is_receiver()
            && dst_kind != ModuleKind::Network;
        if !legal {
            return Err(E_LINK);
        }
        self.links.retain(|(_, d)| d != &dst);
        debug!("Linking {} -> {}", src, dst);
        self.links.push((src, dst));
        Ok(())
    }
}

fn two_numbers(cmd: &Command) -> Result<[f64; 2], &'static str> {
    match cmd.args.as_slice() {
        [a, b] => Ok([
            parse_number(a).map_err(|_| E_SYNTAX)?,
            parse_number(b).map_err(|_| E_SYNTAX)?,
        ]),
        _ => Err(E_SYNTAX),
    }
}

fn set_raw(module: &mut SimModule, verb: &str, value: String) -> Outcome {
    module.props.get_mut(verb).ok_or(E_VERB)?.value = value;
    Ok(None)
}

fn now_unix() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1e6
}

fn start_of_year(unix: f64) -> f64 {
    let now: DateTime<Utc> = DateTime::from_timestamp(unix as i64, 0).unwrap_or_default();
    Utc.with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0)
        .single()
        .map(|t| t.timestamp() as f64)
        .unwrap_or_default()
}

fn ro(value: impl Into<String>) -> Property {
    Property::new(Decl::ReadOnly, value)
}

fn properties(kind: ModuleKind, ch: u32, c: &SimConfig) -> Vec<(&'static str, Property)> {
    match kind {
        ModuleKind::Console => vec![
            ("IDN", ro(format!("{},{},{}", c.model, c.serial, c.load))),
            ("IPP", ro(c.ip_address.clone())),
            ("CPL", ro("20240501")),
            ("ECH", Property::new(Decl::Flag, if c.echo { "1" } else { "0" })),
        ],
        ModuleKind::StreamRouter => Vec::new(),
        ModuleKind::Log => vec![
            ("IPP", Property::new(Decl::Free, "0.0.0.0:514")),
            ("MSK", Property::new(Decl::number(0.0, 255.0, 1.0), "1")),
            ("MSKL", ro("ERRORS,WARNINGS,INFO,DEBUG")),
            ("ENB", Property::new(Decl::Flag, "0")),
        ],
        ModuleKind::Board => vec![
            ("BIT", ro("5")),
            ("BITL", ro("PLL_LOCK,FAN_FAULT,TEMP_WARN,PS_FAULT")),
            ("MTR", ro("42.5,12.1,3.3")),
            ("MTRL", ro("TEMP_C,VOLT_12,VOLT_3V3")),
            ("EXR", Property::new(Decl::choice("EXRL", &["INTERNAL", "EXTERNAL"]), "0")),
        ],
        ModuleKind::Network => vec![
            ("IPP", Property::new(Decl::Free, c.ip_address.clone())),
            ("MAC", ro(format!("00:1A:2B:3C:4D:{ch:02X}"))),
            ("ENB", Property::new(Decl::Flag, "1")),
            ("BRT", ro(c.link_rate_bps.to_string())),
        ],
        ModuleKind::WideReceiver | ModuleKind::SerialReceiver => {
            let mut props = vec![
                ("FRQ", Property::mhz(Decl::range("FRQL", 30.0, 3000.0, 0.001), 100.0)),
                ("ATN", Property::new(Decl::range("ATNL", 0.0, 30.0, 1.0), "0")),
                ("GAI", Property::new(Decl::range("GAIL", -10.0, 20.0, 1.0), "0")),
                ("ENB", Property::new(Decl::Flag, "0")),
                ("EXR", Property::new(Decl::Flag, "0")),
                ("BIT", ro("0")),
                ("BITL", ro("SYNTH_LOCK,ADC_OVERRANGE,TEMP")),
                ("ADM", ro("1048576,0,8191")),
            ];
            if kind == ModuleKind::SerialReceiver {
                props.push(("BWT", Property::new(Decl::choice("BWCL", &["5", "10", "20", "40"]), "3")));
            } else {
                props.push(("BWT", Property::new(Decl::values("BWTL", &[20.0, 80.0]), "80")));
            }
            props
        }
        ModuleKind::WbDdc | ModuleKind::NbDdc | ModuleKind::SwDdc => {
            let mut props = vec![
                ("FRQ", Property::mhz(Decl::range("FRQL", -40.0, 40.0, 0.000001), 0.0)),
                ("ENB", Property::new(Decl::Flag, "0")),
            ];
            props.push(match kind {
                ModuleKind::WbDdc => ("DEC", Property::new(Decl::choice("DECL", &["2", "4"]), "0")),
                ModuleKind::NbDdc => ("DEC", Property::new(Decl::range("DECL", 16.0, 256.0, 16.0), "128")),
                _ => ("DEC", Property::new(Decl::choice("DECL", &["1", "2", "4", "8"]), "0")),
            });
            if kind != ModuleKind::SwDdc {
                props.extend([
                    ("ATN", Property::new(Decl::range("ATNL", 0.0, 30.0, 1.0), "0")),
                    ("GAI", Property::new(Decl::range("GAIL", -10.0, 20.0, 1.0), "0")),
                    ("BIT", ro("0")),
                    ("BITL", ro("DDC_LOCK,OVERFLOW")),
                ]);
            }
            props
        }
        ModuleKind::Fft => vec![
            ("SIZ", Property::new(Decl::choice("SIZL", &["256", "512", "1024", "2048", "4096"]), "2")),
            (
                "AVG",
                Property::new(
                    Decl::values("AVGL", &[1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0, 256.0, 512.0, 1024.0]),
                    "1",
                ),
            ),
            ("INT", Property::new(Decl::range("INTL", 0.0, 10000.0, 1.0), "100")),
            ("BIN", Property::new(Decl::range("BINL", 64.0, 4096.0, 64.0), "1024")),
            ("WIN", Property::new(Decl::choice("WINL", &["RECT", "HANN", "HAMMING", "BLACKMAN"]), "1")),
            ("PKM", Property::new(Decl::choice("PKML", &["OFF", "MAX", "MIN"]), "0")),
            ("ENB", Property::new(Decl::Flag, "0")),
        ],
        ModuleKind::SpectralScan => vec![
            ("FRQ", Property::new(Decl::Free, "30.000000,3000.000000")),
            ("FRQL", ro("30.000000:3000.000000:0.001")),
            ("BIN", Property::new(Decl::values("BINL", &[256.0, 512.0, 1024.0]), "1024")),
            ("THR", Property::new(Decl::Free, "-120,-20")),
            ("TIP", Property::new(Decl::choice("TIPL", &["OFF", "RISING", "FALLING"]), "0")),
            ("AVG", Property::new(Decl::range("AVGL", 1.0, 64.0, 1.0), "1")),
            ("ENB", Property::new(Decl::Flag, "0")),
        ],
        ModuleKind::Output => vec![
            ("IPP", Property::new(Decl::Free, format!("{}:{}", c.output_host, 5000 + ch))),
            ("POL", Property::new(Decl::choice("POLL", &["SDDS", "SDDSX", "SDDSA", "RAW", "VITA49"]), "0")),
            ("END", Property::new(Decl::choice("ENDL", &["BIG", "LITTLE"]), "0")),
            ("SPF", Property::new(Decl::range("SPFL", 64.0, 4096.0, 64.0), "1024")),
            ("DWD", Property::new(Decl::values("DWDL", &[8.0, 16.0, 32.0]), "16")),
            ("SID", Property::new(Decl::number(0.0, 65535.0, 1.0), ch.to_string())),
            ("VLANEN", Property::new(Decl::Flag, "0")),
            ("VLANTCI", Property::new(Decl::number(0.0, 65535.0, 1.0), "0")),
            ("CDR", Property::new(Decl::number(0.0, 1000.0, 1.0), "0")),
            ("CCR", Property::new(Decl::number(0.0, 1000.0, 1.0), "0")),
            ("MFP", Property::new(Decl::number(0.0, 255.0, 1.0), "0")),
            ("TSO", Property::new(Decl::number(-1_000_000.0, 1_000_000.0, 1.0), "0")),
            ("TSR", Property::new(Decl::choice("TSRL", &["UTC", "GPS", "RELATIVE"]), "0")),
            ("GRB", Property::new(Decl::Flag, "0")),
            ("ENB", Property::new(Decl::Flag, "0")),
        ],
        ModuleKind::TimeOfDay => vec![
            ("MOD", Property::new(Decl::choice("MODL", &["SIM", "ONEPPS", "IRIGB", "NAV", "TFN"]), "0")),
            ("ADJ", Property::new(Decl::number(-1000.0, 1000.0, 1.0), "0")),
            ("TRK", Property::new(Decl::choice("TRKL", &["OFF", "CALIBRATE", "TRACK"]), "0")),
            ("TOY", Property::new(Decl::number(0.0, 3.0, 1.0), "0")),
            ("PPV", Property::new(Decl::number(0.0, 5.0, 0.1), "3.3")),
            ("SSM", Property::new(Decl::number(0.0, 1_000_000.0, 1.0), "1000")),
            ("MTR", ro("0,1")),
            ("BIT", ro("0")),
            ("TFM", Property::new(Decl::choice("TFML", &["SOY", "GPS"]), "0")),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn radio() -> SimRadio {
        SimRadio::new(SimConfig::default())
    }

    fn reply(radio: &mut SimRadio, line: &str) -> String {
        let out = radio.handle_line(line);
        assert_eq!(out.len(), 2, "expected echo and reply for {line:?}: {out:?}");
        assert_eq!(out[0].trim_end(), line);
        out[1].trim_end().to_string()
    }

    #[test]
    fn test_echo_then_reply() {
        let mut radio = radio();
        let out = radio.handle_line("RCV:1 FRQ?");
        assert_eq!(out, vec!["RCV:1 FRQ?\n".to_string(), "RCV:1 FRQ 100.000000\n".to_string()]);
    }

    #[test]
    fn test_set_replies_with_empty_line() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "RCV:1 FRQ 101.5"), "");
        assert_eq!(radio.value("RCV:1", "FRQ").unwrap(), "101.500000");
        assert_eq!(reply(&mut radio, "RCV:1 FRQ 5000"), "RCV:1 FRQ ERR E_RANGE");
    }

    #[test]
    fn test_unknown_module_and_verb() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "BOGUS:1 FRQ?"), "BOGUS:1 FRQ ERR E_MODULE");
        assert_eq!(reply(&mut radio, "RCV:1 XYZ?"), "RCV:1 XYZ ERR E_VERB");
        assert_eq!(reply(&mut radio, "RCV:x FRQ?"), "RCV:x ERR E_SYNTAX");
    }

    #[test]
    fn test_echo_toggle() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "CON ECH 0"), "");
        assert!(!radio.echo());
        assert_eq!(radio.handle_line("CON ECH?"), vec!["CON ECH 0\n".to_string()]);
        radio.set_echo(true);
        assert_eq!(reply(&mut radio, "CON ECH?"), "CON ECH 1");
    }

    #[test]
    fn test_blank_line_only_echoes() {
        let mut radio = radio();
        assert_eq!(radio.handle_datagram(b"\n"), vec!["\n".to_string()]);
        radio.set_silent(true);
        assert!(radio.handle_line("CON IDN?").is_empty());
    }

    #[test]
    fn test_list_verbs() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "RCV:1 FRQL?"), "RCV:1 FRQL 30.000000:3000.000000:0.001");
        assert_eq!(reply(&mut radio, "WBDDC:1 DECL?"), "WBDDC:1 DECL 2,4");
        assert_eq!(reply(&mut radio, "NBDDC:1 DECL?"), "NBDDC:1 DECL 16:256:16");
        assert_eq!(reply(&mut radio, "OUT:1 POLL?"), "OUT:1 POLL SDDS,SDDSX,SDDSA,RAW,VITA49");
    }

    #[test]
    fn test_ddc_rates() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "WBDDC:1 ISR?"), "WBDDC:1 ISR 100.000000");
        assert_eq!(reply(&mut radio, "WBDDC:1 DEC 1"), "");
        assert_eq!(reply(&mut radio, "WBDDC:1 DEC?"), "WBDDC:1 DEC 1");
        assert_eq!(reply(&mut radio, "NBDDC:1 DEC 32"), "");
        assert_eq!(reply(&mut radio, "NBDDC:1 BWT?"), "NBDDC:1 BWT 0.640000");
        assert_eq!(reply(&mut radio, "NBDDC:1 DEC 33"), "NBDDC:1 DEC ERR E_RANGE");
    }

    #[test]
    fn test_swddc_input_follows_source() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "SWDDCDEC2:1 ISR?"), "SWDDCDEC2:1 ISR 1.600000");
        assert_eq!(reply(&mut radio, "SRT LNK NBDDC:1,SWDDCDEC2:1"), "");
        assert_eq!(reply(&mut radio, "NBDDC:1 DEC 16"), "");
        assert_eq!(reply(&mut radio, "SWDDCDEC2:1 ISR?"), "SWDDCDEC2:1 ISR 1.600000");
        assert_eq!(reply(&mut radio, "NBDDC:1 DEC 32"), "");
        assert_eq!(reply(&mut radio, "SWDDCDEC2:1 ISR?"), "SWDDCDEC2:1 ISR 0.800000");
        assert_eq!(reply(&mut radio, "SWDDCDEC2:1 ATN?"), "SWDDCDEC2:1 ATN ERR E_VERB");
    }

    #[test]
    fn test_enable_with_args() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "WBDDC:1 ENB 1,4096,0"), "");
        assert!(radio.is_enabled("WBDDC:1"));
        assert_eq!(radio.enable_args("WBDDC:1"), vec!["4096", "0"]);
        assert_eq!(reply(&mut radio, "FFT:1 ENB 1,x"), "FFT:1 ENB ERR E_SYNTAX");
    }

    #[test]
    fn test_router_inventory() {
        let mut radio = radio();
        let modl = reply(&mut radio, "SRT MODL?");
        assert!(modl.starts_with("SRT MODL CON,SRT,BRD,LOG,TOD,NET,RCV,WBDDC,NBDDC,SWDDCDEC2"));
        assert_eq!(reply(&mut radio, "SRT CHL? NBDDC"), "SRT CHL 1,2,3,4");
        assert_eq!(reply(&mut radio, "SRT INS? RCV:1"), "SRT INS MSDR3000");
        assert_eq!(reply(&mut radio, "SRT REG? SWDDCDEC2"), "SRT REG SWDDCDEC2");
        assert_eq!(reply(&mut radio, "SRT DST? RCV:1"), "SRT DST WBDDC:1,NBDDC:1,NBDDC:3,SPC:1");
        assert_eq!(reply(&mut radio, "SRT SRC? OUT:1"), "SRT SRC NONE");
    }

    #[test]
    fn test_link_replaces_inbound_edge() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "SRT LNK WBDDC:1,OUT:1"), "");
        assert_eq!(reply(&mut radio, "SRT LNK NBDDC:2,OUT:1"), "");
        assert_eq!(reply(&mut radio, "SRT SRC? OUT:1"), "SRT SRC NBDDC:2");
        assert_eq!(reply(&mut radio, "SRT ULNK OUT:1"), "");
        assert_eq!(reply(&mut radio, "SRT SRC? OUT:1"), "SRT SRC NONE");
        assert_eq!(reply(&mut radio, "SRT LNK OUT:1,OUT:2"), "SRT LNK ERR E_LINK");
        assert_eq!(reply(&mut radio, "SRT LNK OUT:1,OUT:99"), "SRT LNK ERR E_MODULE");
    }

    #[test]
    fn test_packet_rate_tracks_source() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "OUT:1 PKR?"), "OUT:1 PKR 0.000");
        reply(&mut radio, "SRT LNK WBDDC:1,OUT:1");
        assert_eq!(reply(&mut radio, "OUT:1 PKR?"), "OUT:1 PKR 48828.125");
    }

    #[test]
    fn test_console_config() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "CON CFG? BATCH"), "CON CFG ndr_Gen2_Map.bat");
        assert_eq!(reply(&mut radio, "CON CFG? NUMNBDDC"), "CON CFG 4");
        assert_eq!(reply(&mut radio, "CON CFG? WBBW"), "CON CFG 20");
        assert_eq!(reply(&mut radio, "CON IDN?"), "CON IDN NDR-SIM,SIM0001,3.1.0");
    }

    #[test]
    fn test_legacy_mapping_registers_aliases() {
        let mut radio = SimRadio::new(SimConfig {
            batch: "ndr_legacy.bat".into(),
            serial_receivers: 1,
            ..SimConfig::default()
        });
        assert_eq!(radio.mapping_version(), MappingVersion::V1);
        assert_eq!(reply(&mut radio, "SRT CHL? RX"), "SRT CHL 1,2,3");
        assert_eq!(reply(&mut radio, "SRT INS? RX:3"), "SRT INS MSDR_RS422");
        assert_eq!(reply(&mut radio, "RX:3 BWCL?"), "RX:3 BWCL 5,10,20,40");
    }

    #[test]
    fn test_spectral_scan_pairs() {
        let mut radio = radio();
        assert_eq!(reply(&mut radio, "SPC:1 FRQ 100,200"), "");
        assert_eq!(reply(&mut radio, "SPC:1 FRQ?"), "SPC:1 FRQ 100.000000,200.000000");
        assert_eq!(reply(&mut radio, "SPC:1 FRQ 200,100"), "SPC:1 FRQ ERR E_RANGE");
        assert_eq!(reply(&mut radio, "SPC:1 THR -90,-30"), "");
        assert_eq!(reply(&mut radio, "SPC:1 THR -90"), "SPC:1 THR ERR E_SYNTAX");
    }

    #[test]
    fn test_time_set_in_gps_seconds() {
        let mut radio = radio();
        reply(&mut radio, "TOD TFM 1");
        let next = now_unix().floor() + 1.0;
        let gps = rxctl_protocol::units::unix_to_gps(next) + 10.0;
        assert_eq!(reply(&mut radio, &format!("TOD TIM {gps}")), "");
        assert!((radio.time_offset() - 10.0).abs() < 1.5);
    }

    #[test]
    fn test_time_set_from_start_of_year() {
        let mut radio = radio();
        let next = now_unix().floor() + 1.0;
        let soy = next - start_of_year(next);
        assert_eq!(reply(&mut radio, &format!("TOD TIM {soy}")), "");
        assert!(radio.time_offset().abs() < 1.5);
        let tim = reply(&mut radio, "TOD TIM?");
        let radio_time: f64 = tim.rsplit(' ').next().unwrap().parse().unwrap();
        assert!((radio_time - now_unix()).abs() < 2.0);
    }

    proptest! {
        #[test]
        fn prop_any_line_gets_echo_then_one_reply(line in "[ -~]{0,48}") {
            let mut radio = radio();
            let out = radio.handle_line(&line);
            prop_assert!(!out.is_empty());
            prop_assert_eq!(out[0].trim_end(), line.trim_end());
            if line.trim().is_empty() {
                prop_assert_eq!(out.len(), 1);
            } else {
                prop_assert_eq!(out.len(), 2);
                prop_assert!(out[1].ends_with('\n'));
                prop_assert_eq!(out[1].matches('\n').count(), 1);
            }
        }
    }
}
