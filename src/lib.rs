//! Capture/playout core for an SDI/HDMI I/O plugin over AJA hardware.
//!
//! This crate implements the channel-configuration, DMA-ring, routing,
//! and ancillary-data handling shared by a capture element (C6) and a
//! playout element (C7), plus the demux/combine stages (C8, C9) that
//! connect them to separate audio and video pads. It does not implement
//! any particular plugin framework's element lifecycle, pad negotiation,
//! or scheduling; [`pipeline`] gives the narrow surface this core
//! actually needs from one.

#[macro_use]
mod macros;

pub mod anc;
pub mod channel;
pub mod clock;
pub mod combiner;
pub mod demux;
pub mod device;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod queue;
pub mod timecode;
pub mod vpid;

pub mod capture;
pub mod playout;

pub use error::{Error, Result};
