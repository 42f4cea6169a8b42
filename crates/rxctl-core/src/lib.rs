//! Receiver Controller
//!
//! This crate drives a multi-channel software-defined receiver over its UDP
//! control protocol. It discovers the installed modules, wraps each in a
//! typed facade and composes them into receive channels.
//!
//! # Architecture
//!
//! - [`transport`]: the single UDP exchange (send, drain echo, read reply)
//! - [`module`]: typed facades per module class over a shared base with
//!   validated setters and lazily filled caches
//! - [`discovery`]: inventory walk and channel synthesis
//! - [`channel`]: Rx channels and their rate tables
//! - [`pool`]: free/used pools of outputs, software DDCs and FFT channels
//! - [`controller`]: the arena of channels and the topology operations
//! - [`monitor`]: background radio/host clock comparison
//!
//! # Example
//!
//! ```rust,no_run
//! use rxctl_core::{Controller, ControllerConfig};
//!
//! # async fn run() -> rxctl_core::Result<()> {
//! let controller = Controller::connect(ControllerConfig::new("192.168.0.10", 8617)).await?;
//! controller.set_frequency(0, 100e6, true).await?;
//! controller.set_sample_rate(0, 25e6).await?;
//! controller.channel(0)?.set_enable(true).await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod error;
pub mod module;
pub mod monitor;
pub mod pool;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use channel::{ChannelStatus, FftChannel, FftStatus, RateTable, RateTuple, RxChannel, RxType};
pub use config::{ControllerConfig, FeatureFlags, MonitorConfig, TimeConfig, ValidationConfig};
pub use controller::Controller;
pub use error::{ControlError, Result};
pub use module::{Destination, Module, OutputStatus, TodMode};
pub use monitor::VarianceMonitor;
pub use pool::{Identified, ResourcePool};
pub use transport::{Phase, Transport};
