//! Core library for the memdaq measurement engine.
//!
//! This library contains the sweep and pulse-timing model, the hardware
//! profile registry, the pulse sequencer, and the characterization
//! protocols built on top of them. It is used by the `memdaq` command-line
//! binary and by embedders that drive real instruments behind the
//! [`instrument::SourceMeasure`] trait.

pub mod config;
pub mod error;
pub mod hooks;
pub mod instrument;
pub mod profile;
pub mod protocols;
pub mod sample;
pub mod sequencer;
pub mod service;
pub mod storage;
pub mod sweep;
pub mod timing;
