//! Typed module facades
//!
//! Every hardware block on the radio is addressed as `(registration name,
//! channel)`. [`ModuleBase`] carries that identity plus the shared transport
//! and provides the query/set primitives, typed getters and the validated
//! setter every facade builds on. [`Module`] is the tagged union the
//! controller stores, created from an installation name by [`Module::create`].

use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError};

use rxctl_protocol::units::mhz_to_hz;
use rxctl_protocol::{
    encode_flag, index_of, is_error, Declared, ModuleId, ModuleKind, ParseError,
    ProtocolError, Reply, ValueRange,
};
use tracing::{debug, warn};

use crate::config::ValidationConfig;
use crate::error::{ControlError, Result};
use crate::transport::Transport;

pub mod board;
pub mod console;
pub mod ddc;
pub mod fft;
pub mod log;
pub mod network;
pub mod output;
pub mod receiver;
pub mod router;
pub mod tod;

pub use board::Board;
pub use console::{Console, ConsoleKey, Identity};
pub use ddc::{Ddc, DdcKind};
pub use fft::{Fft, SpectralScan};
pub use log::Log;
pub use network::Network;
pub use output::{Destination, Output, OutputStatus};
pub use receiver::{AdcMeter, Receiver};
pub use router::StreamRouter;
pub use tod::{TimeFormat, TimeOfDay, TodMode, TrackMode};

/// How a read-back value is compared with the requested one
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    /// Values must be equal
    Exact,
    /// `|actual - requested| <= tolerance`
    Absolute(f64),
}

/// A value a validated setter can read back and compare
pub trait Readback: Clone + fmt::Debug + Send + Sync {
    /// Whether `actual` satisfies a request for `self`
    fn matches(&self, actual: &Self, tolerance: Tolerance) -> bool;
}

impl Readback for f64 {
    fn matches(&self, actual: &Self, tolerance: Tolerance) -> bool {
        match tolerance {
            Tolerance::Exact => self == actual,
            Tolerance::Absolute(tol) => (self - actual).abs() <= tol,
        }
    }
}

impl Readback for (f64, f64) {
    fn matches(&self, actual: &Self, tolerance: Tolerance) -> bool {
        self.0.matches(&actual.0, tolerance) && self.1.matches(&actual.1, tolerance)
    }
}

macro_rules! exact_readback {
    ($($t:ty),*) => {
        $(impl Readback for $t {
            fn matches(&self, actual: &Self, _tolerance: Tolerance) -> bool {
                self == actual
            }
        })*
    };
}

exact_readback!(bool, u32, u64, usize, i64, String);

/// A lazily filled value, cleared by explicit invalidation
#[derive(Debug)]
pub struct Cache<T>(Mutex<Option<T>>);

impl<T> Default for Cache<T> {
    fn default() -> Self {
        Self(Mutex::new(None))
    }
}

impl<T: Clone> Cache<T> {
    /// Cached value, if filled
    pub fn get(&self) -> Option<T> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Fill the cache
    pub fn set(&self, value: T) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    /// Empty the cache
    pub fn clear(&self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Return the cached value or fetch and store it
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get() {
            return Ok(value);
        }
        let value = fetch().await?;
        self.set(value.clone());
        Ok(value)
    }
}

/// Identity, transport handle and validation policy shared by every facade
#[derive(Debug, Clone)]
pub struct ModuleBase {
    id: ModuleId,
    kind: ModuleKind,
    transport: Arc<Transport>,
    validation: ValidationConfig,
    flush_retries: u32,
}

impl ModuleBase {
    /// Create a base for module `id`
    pub fn new(
        id: ModuleId,
        kind: ModuleKind,
        transport: Arc<Transport>,
        validation: ValidationConfig,
        flush_retries: u32,
    ) -> Self {
        Self {
            id,
            kind,
            transport,
            validation,
            flush_retries,
        }
    }

    /// Wire identity
    pub fn id(&self) -> &ModuleId {
        &self.id
    }

    /// Canonical id string (`NAME:CH`, or `NAME` for global modules)
    pub fn name(&self) -> String {
        self.id.to_string()
    }

    /// Module class
    pub fn kind(&self) -> ModuleKind {
        self.kind
    }

    /// Shared transport
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    /// Validated-setter policy
    pub fn validation(&self) -> &ValidationConfig {
        &self.validation
    }

    /// Drain the transport after a failed exchange
    pub async fn flush(&self) {
        if let Err(e) = self.transport.flush(self.flush_retries).await {
            warn!("{}: flush failed: {}", self.id, e);
        }
    }

    /// Error for a capability this module class lacks
    pub fn not_implemented(&self, verb: &str) -> ControlError {
        ControlError::NotImplemented {
            module: self.name(),
            verb: verb.into(),
        }
    }

    /// Error for a value refused before any wire I/O
    pub fn invalid(&self, verb: &str, value: impl ToString, reason: impl Into<String>) -> ControlError {
        ControlError::invalid(&self.name(), verb, value, reason)
    }

    /// Attach this module's context to a selector error
    pub fn protocol_error(&self, verb: &str, err: ProtocolError) -> ControlError {
        ControlError::from_protocol(&self.name(), verb, "", err)
    }

    /// Send `MOD VERB?` and decode the reply
    pub async fn query(&self, verb: &str) -> Result<Reply> {
        self.query_args(verb, &[]).await
    }

    /// Send `MOD VERB? ARGS` and decode the reply
    pub async fn query_args(&self, verb: &str, args: &[&str]) -> Result<Reply> {
        let cmd = self.id.query(verb).args(args.iter());
        let text = self.transport.send(&cmd, true, true).await?;
        match Reply::parse(&text) {
            Ok(reply) => Ok(reply),
            Err(err @ ProtocolError::CommandFailure { .. }) => {
                Err(ControlError::from_protocol(&self.name(), verb, &text, err))
            }
            Err(err) => {
                self.flush().await;
                Err(ControlError::from_protocol(&self.name(), verb, &text, err))
            }
        }
    }

    /// Send `MOD VERB ARGS`, expecting no output
    pub async fn set<A: ToString>(&self, verb: &str, args: &[A]) -> Result<()> {
        let cmd = self.id.set(verb).args(args.iter().map(ToString::to_string));
        match self.transport.send(&cmd, true, false).await {
            Ok(_) => Ok(()),
            Err(ControlError::UnexpectedOutput { reply, .. }) if is_error(&reply) => {
                Err(ControlError::CommandFailure {
                    module: self.name(),
                    verb: verb.into(),
                    reply,
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Query `verb` and decode the reply with `decode`, flushing on failure
    pub async fn read<T, F>(&self, verb: &str, args: &[&str], decode: F) -> Result<T>
    where
        F: FnOnce(&Reply) -> std::result::Result<T, ParseError>,
    {
        let reply = self.query_args(verb, args).await?;
        match decode(&reply) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.flush().await;
                Err(ControlError::parse(&self.name(), verb, reply.raw(), e))
            }
        }
    }

    /// Payload as a single value
    pub async fn get<T: FromStr>(&self, verb: &str) -> Result<T> {
        self.read(verb, &[], |r| r.value()).await
    }

    /// First comma-separated field as a value
    pub async fn get_first<T: FromStr>(&self, verb: &str) -> Result<T> {
        self.read(verb, &[], |r| r.first()).await
    }

    /// Payload as a `0`/`1` flag
    pub async fn get_flag(&self, verb: &str) -> Result<bool> {
        self.read(verb, &[], |r| r.flag()).await
    }

    /// Payload as text
    pub async fn get_text(&self, verb: &str) -> Result<String> {
        self.read(verb, &[], |r| Ok(r.payload().to_string())).await
    }

    /// Payload as a comma-separated list
    pub async fn get_list(&self, verb: &str) -> Result<Vec<String>> {
        self.read(verb, &[], |r| Ok(r.list())).await
    }

    /// Payload as a list of numbers
    pub async fn get_numbers<T: FromStr>(&self, verb: &str) -> Result<Vec<T>> {
        self.read(verb, &[], |r| r.numbers()).await
    }

    /// Payload as a `min:max:step` range
    pub async fn get_range(&self, verb: &str) -> Result<ValueRange> {
        self.read(verb, &[], |r| r.range()).await
    }

    /// Payload as a range or enumeration, whichever form it has
    pub async fn get_declared(&self, verb: &str) -> Result<Declared> {
        self.read(verb, &[], |r| Declared::parse(r.payload())).await
    }

    /// MHz payload converted to Hz
    pub async fn get_mhz(&self, verb: &str) -> Result<f64> {
        self.get::<f64>(verb).await.map(mhz_to_hz)
    }

    /// MHz `min:max:step` payload converted to Hz
    pub async fn get_mhz_range(&self, verb: &str) -> Result<ValueRange> {
        self.get_range(verb).await.map(range_to_hz)
    }

    /// Set a value and confirm it by readback, retrying on mismatch
    ///
    /// - `NotImplemented` from the setter counts as success.
    /// - `InvalidValue` is returned immediately.
    /// - Transport timeouts flush the transport and are retried; if every
    ///   attempt timed out the last timeout is returned.
    /// - A command, parse or unexpected-output failure flushes the transport
    ///   and yields `Ok(false)`.
    pub async fn set_with_validation<T, S, SF, G, GF>(
        &self,
        value: T,
        set: S,
        get: G,
        tolerance: Tolerance,
    ) -> Result<bool>
    where
        T: Readback,
        S: Fn(T) -> SF,
        SF: Future<Output = Result<()>>,
        G: Fn() -> GF,
        GF: Future<Output = Result<T>>,
    {
        let attempts = self.validation.retries.max(1);
        let mut last_timeout = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.validation.interval()).await;
            }
            match set(value.clone()).await {
                Ok(()) => {}
                Err(ControlError::NotImplemented { .. }) => return Ok(true),
                Err(e @ ControlError::InvalidValue { .. }) => return Err(e),
                Err(e) if e.is_timeout() => {
                    debug!("{}: set attempt {} timed out: {}", self.id, attempt, e);
                    self.flush().await;
                    last_timeout = Some(e);
                    continue;
                }
                Err(e) if is_soft_failure(&e) => {
                    warn!("{}: set {:?} failed: {}", self.id, value, e);
                    self.flush().await;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
            match get().await {
                Ok(actual) if value.matches(&actual, tolerance) => return Ok(true),
                Ok(actual) => {
                    debug!(
                        "{}: readback {:?} does not match {:?} (attempt {})",
                        self.id, actual, value, attempt
                    );
                    last_timeout = None;
                }
                Err(ControlError::NotImplemented { .. }) => return Ok(true),
                Err(e) if e.is_timeout() => {
                    debug!("{}: readback attempt {} timed out: {}", self.id, attempt, e);
                    self.flush().await;
                    last_timeout = Some(e);
                }
                Err(e) if is_soft_failure(&e) => {
                    warn!("{}: readback of {:?} failed: {}", self.id, value, e);
                    self.flush().await;
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        match last_timeout {
            Some(e) => Err(e),
            None => Ok(false),
        }
    }

    /// Turn a validation outcome into `ValidationFailed`
    pub fn validated(&self, verb: &str, requested: impl fmt::Display, ok: bool) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(ControlError::ValidationFailed {
                module: self.name(),
                verb: verb.into(),
                requested: requested.to_string(),
            })
        }
    }

    /// Set a plain number and read it back
    pub async fn set_number_validated(&self, verb: &str, value: f64, tolerance: Tolerance) -> Result<()> {
        let ok = self
            .set_with_validation(
                value,
                move |v| async move { self.set(verb, &[rxctl_protocol::units::format_number(v)]).await },
                move || async move { self.get_first::<f64>(verb).await },
                tolerance,
            )
            .await?;
        self.validated(verb, value, ok)
    }

    /// Set a Hz value as MHz on the wire and read it back in Hz
    pub async fn set_mhz_validated(&self, verb: &str, hz: f64, tolerance: Tolerance) -> Result<()> {
        let ok = self
            .set_with_validation(
                hz,
                move |v| async move { self.set(verb, &[rxctl_protocol::format_mhz(v)]).await },
                move || async move { self.get_mhz(verb).await },
                tolerance,
            )
            .await?;
        self.validated(verb, rxctl_protocol::units::display_hz(hz), ok)
    }

    /// Set a `0`/`1` flag and read it back
    pub async fn set_flag_validated(&self, verb: &str, on: bool) -> Result<()> {
        let ok = self
            .set_with_validation(
                on,
                move |v| async move { self.set(verb, &[encode_flag(v)]).await },
                move || async move { self.get_flag(verb).await },
                Tolerance::Exact,
            )
            .await?;
        self.validated(verb, on, ok)
    }

    /// Set an enumeration position and read it back
    pub async fn set_index_validated(&self, verb: &str, index: usize) -> Result<()> {
        let ok = self
            .set_with_validation(
                index,
                move |v| async move { self.set(verb, &[v]).await },
                move || async move { self.get_first::<usize>(verb).await },
                Tolerance::Exact,
            )
            .await?;
        self.validated(verb, index, ok)
    }

    /// Set `ENB` with trailing arguments and confirm the flag by readback
    pub async fn set_enable_args(&self, on: bool, extra: &[String]) -> Result<()> {
        let ok = self
            .set_with_validation(
                on,
                move |v| {
                    let mut args = vec![encode_flag(v).to_string()];
                    args.extend_from_slice(extra);
                    async move { self.set("ENB", &args).await }
                },
                move || async move { self.get_flag("ENB").await },
                Tolerance::Exact,
            )
            .await?;
        self.validated("ENB", on, ok)
    }

    /// Set a text value and read it back
    pub async fn set_text_validated(&self, verb: &str, text: &str) -> Result<()> {
        let ok = self
            .set_with_validation(
                text.to_string(),
                move |v| async move { self.set(verb, &[v]).await },
                move || async move { self.get_text(verb).await },
                Tolerance::Exact,
            )
            .await?;
        self.validated(verb, text, ok)
    }

    /// Names of an enumeration
    pub async fn choices(&self, list_verb: &str) -> Result<Vec<String>> {
        self.get_list(list_verb).await
    }

    /// Current enumeration entry, by name
    pub async fn get_choice(&self, verb: &str, choices: &[String]) -> Result<String> {
        let index = self.get_first::<usize>(verb).await?;
        choices.get(index).cloned().ok_or_else(|| ControlError::ParseFailure {
            module: self.name(),
            verb: verb.into(),
            reply: index.to_string(),
            reason: format!("position {index} outside {} choices", choices.len()),
        })
    }

    /// Select an enumeration entry by name
    pub async fn set_choice(&self, verb: &str, choices: &[String], name: &str) -> Result<()> {
        let index = index_of(choices, name)
            .map_err(|e| self.invalid(verb, name, e.to_string()))?;
        self.set_index_validated(verb, index).await
    }

    /// Set an enumeration position after checking it against the list
    pub async fn set_choice_index(&self, verb: &str, choices: &[String], index: usize) -> Result<()> {
        if index >= choices.len() {
            return Err(self.invalid(
                verb,
                index,
                format!("only {} choices declared", choices.len()),
            ));
        }
        self.set_index_validated(verb, index).await
    }
}

fn is_soft_failure(err: &ControlError) -> bool {
    matches!(
        err,
        ControlError::CommandFailure { .. }
            | ControlError::ParseFailure { .. }
            | ControlError::UnexpectedOutput { .. }
    )
}

/// Convert a MHz range to Hz
pub fn range_to_hz(range: ValueRange) -> ValueRange {
    ValueRange::new(mhz_to_hz(range.min), mhz_to_hz(range.max), mhz_to_hz(range.step))
}

/// Settings shared by every module created during discovery
#[derive(Debug, Clone)]
pub struct ModuleContext {
    /// Shared transport
    pub transport: Arc<Transport>,
    /// Validated-setter policy
    pub validation: ValidationConfig,
    /// Consecutive empty reads that end a flush
    pub flush_retries: u32,
    /// Wideband bandwidth as a fraction of the WBDDC sample rate
    pub wideband_ratio: f64,
}

impl ModuleContext {
    /// Base for module `id` of class `kind`
    pub fn base(&self, id: ModuleId, kind: ModuleKind) -> ModuleBase {
        ModuleBase::new(
            id,
            kind,
            self.transport.clone(),
            self.validation,
            self.flush_retries,
        )
    }
}

/// A typed module of any class
#[derive(Debug, Clone)]
pub enum Module {
    Console(Arc<Console>),
    Log(Arc<Log>),
    Board(Arc<Board>),
    Network(Arc<Network>),
    StreamRouter(Arc<StreamRouter>),
    Receiver(Arc<Receiver>),
    Ddc(Arc<Ddc>),
    Fft(Arc<Fft>),
    SpectralScan(Arc<SpectralScan>),
    Output(Arc<Output>),
    TimeOfDay(Arc<TimeOfDay>),
}

impl Module {
    /// Instantiate the facade for an installation name
    ///
    /// Returns `None` for classes this library does not know.
    pub fn create(install_name: &str, id: ModuleId, ctx: &ModuleContext) -> Option<Self> {
        let kind = ModuleKind::from_install_name(install_name)?;
        Some(Self::of_kind(kind, id, ctx))
    }

    /// Instantiate the facade for a known class
    pub fn of_kind(kind: ModuleKind, id: ModuleId, ctx: &ModuleContext) -> Self {
        let base = ctx.base(id, kind);
        match kind {
            ModuleKind::Console => Self::Console(Arc::new(Console::new(base))),
            ModuleKind::Log => Self::Log(Arc::new(Log::new(base))),
            ModuleKind::Board => Self::Board(Arc::new(Board::new(base))),
            ModuleKind::Network => Self::Network(Arc::new(Network::new(base))),
            ModuleKind::StreamRouter => Self::StreamRouter(Arc::new(StreamRouter::new(base))),
            ModuleKind::WideReceiver | ModuleKind::SerialReceiver => {
                Self::Receiver(Arc::new(Receiver::new(base)))
            }
            ModuleKind::WbDdc | ModuleKind::NbDdc | ModuleKind::SwDdc => {
                Self::Ddc(Arc::new(Ddc::new(base, ctx.wideband_ratio)))
            }
            ModuleKind::Fft => Self::Fft(Arc::new(Fft::new(base))),
            ModuleKind::SpectralScan => Self::SpectralScan(Arc::new(SpectralScan::new(base))),
            ModuleKind::Output => Self::Output(Arc::new(Output::new(base))),
            ModuleKind::TimeOfDay => Self::TimeOfDay(Arc::new(TimeOfDay::new(base))),
        }
    }

    /// Shared base
    pub fn base(&self) -> &ModuleBase {
        match self {
            Self::Console(m) => m.base(),
            Self::Log(m) => m.base(),
            Self::Board(m) => m.base(),
            Self::Network(m) => m.base(),
            Self::StreamRouter(m) => m.base(),
            Self::Receiver(m) => m.base(),
            Self::Ddc(m) => m.base(),
            Self::Fft(m) => m.base(),
            Self::SpectralScan(m) => m.base(),
            Self::Output(m) => m.base(),
            Self::TimeOfDay(m) => m.base(),
        }
    }

    /// Wire identity
    pub fn id(&self) -> &ModuleId {
        self.base().id()
    }

    /// Module class
    pub fn kind(&self) -> ModuleKind {
        self.base().kind()
    }

    /// Receiver facade, if this is a receiver
    pub fn as_receiver(&self) -> Option<&Arc<Receiver>> {
        match self {
            Self::Receiver(m) => Some(m),
            _ => None,
        }
    }

    /// DDC facade, if this is a down-converter
    pub fn as_ddc(&self) -> Option<&Arc<Ddc>> {
        match self {
            Self::Ddc(m) => Some(m),
            _ => None,
        }
    }

    /// Output facade
    pub fn as_output(&self) -> Option<&Arc<Output>> {
        match self {
            Self::Output(m) => Some(m),
            _ => None,
        }
    }

    /// FFT facade
    pub fn as_fft(&self) -> Option<&Arc<Fft>> {
        match self {
            Self::Fft(m) => Some(m),
            _ => None,
        }
    }

    /// Spectral scan facade
    pub fn as_spectral_scan(&self) -> Option<&Arc<SpectralScan>> {
        match self {
            Self::SpectralScan(m) => Some(m),
            _ => None,
        }
    }

    /// Time-of-day facade
    pub fn as_time_of_day(&self) -> Option<&Arc<TimeOfDay>> {
        match self {
            Self::TimeOfDay(m) => Some(m),
            _ => None,
        }
    }

    /// Board facade
    pub fn as_board(&self) -> Option<&Arc<Board>> {
        match self {
            Self::Board(m) => Some(m),
            _ => None,
        }
    }

    /// Network facade
    pub fn as_network(&self) -> Option<&Arc<Network>> {
        match self {
            Self::Network(m) => Some(m),
            _ => None,
        }
    }

    /// Log facade
    pub fn as_log(&self) -> Option<&Arc<Log>> {
        match self {
            Self::Log(m) => Some(m),
            _ => None,
        }
    }
}
