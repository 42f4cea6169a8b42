//! Receiver Simulation Library
//!
//! This crate provides a simulated multi-channel receiver for testing the
//! rxctl controller without hardware. It includes:
//!
//! - **SimRadio**: module inventory, dataflow graph and per-module settings,
//!   answering request lines exactly as the radio does (echo, reply, `ERR`)
//! - **spawn_sim**: a tokio UDP task serving a `SimRadio`
//!
//! # Example
//!
//! ```rust
//! use rxctl_sim::{SimConfig, SimRadio};
//!
//! let mut radio = SimRadio::new(SimConfig::default());
//! let out = radio.handle_line("WBDDC:1 DECL?");
//! assert_eq!(out, vec!["WBDDC:1 DECL?\n", "WBDDC:1 DECL 2,4\n"]);
//! ```

pub mod error;
pub mod property;
pub mod radio;
pub mod server;

pub use error::SimError;
pub use radio::{SimConfig, SimModule, SimRadio};
pub use server::{run_sim_task, spawn_local, spawn_sim, SimHandle};
