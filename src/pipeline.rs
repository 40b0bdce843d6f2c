//! Minimal stand-ins for the surrounding element framework (§6 "External
//! interfaces").
//!
//! The real plugin runs inside GStreamer: pads, caps negotiation, buffer
//! pools and the push/pull scheduling model are all supplied by that
//! framework and are explicitly out of scope here (§1 Non-goals). What
//! follows is the narrow surface this core actually calls into or
//! produces, expressed as plain traits and structs rather than bindings to
//! any particular framework.

use std::time::Duration;

use crate::format::VideoFormat;

/// Lifecycle states mirroring GStreamer's element state machine closely
/// enough for the engines to drive, without depending on it (§4.5.1,
/// §4.6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Null,
    Ready,
    Paused,
    Playing,
}

impl ElementState {
    /// Whether autocirculate / vertical-interrupt activity should be
    /// running in this state.
    pub fn is_active(self) -> bool {
        matches!(self, ElementState::Playing)
    }
}

/// A pool handing out buffers sized for one frame's worth of video, audio,
/// or ANC payload (§6). Capture uses this to obtain the destination for a
/// DMA transfer; playout uses it only indirectly, via the upstream
/// element.
pub trait BufferPool: Send + Sync {
    fn acquire(&self, size: usize) -> Option<Vec<u8>>;
    fn release(&self, buffer: Vec<u8>);
}

/// Per-frame video metadata attached alongside the sample data (§4.5.5).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoFrameMeta {
    pub format: Option<VideoFormat>,
    pub field_dominance_top_first: Option<bool>,
    /// Pixel aspect ratio, colorimetry, transfer, and range derived from
    /// the input VPID (§4.5.5); `None` when no VPID was read (playout, or
    /// a capture source with no signal).
    pub vpid: Option<crate::vpid::VpidInfo>,
    pub pixel_aspect_ratio: Option<(u32, u32)>,
}

/// CEA-608/708 closed-caption payload, already demultiplexed from VANC
/// (§4.5.5, GLOSSARY "CDP").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClosedCaptionMeta {
    pub cea608: Option<Vec<u8>>,
    pub cea708_cdp: Option<Vec<u8>>,
}

/// SMPTE ST 2016-1 Active Format Description.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AfdMeta {
    pub afd: u8,
    pub aspect_ratio: u8,
    /// Field this packet was carried on (0 = progressive/field 1, 1 = field 2).
    pub field: u8,
    pub is_letterbox: bool,
}

/// SMPTE ST 2016-1 Bar Data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BarMeta {
    pub top: u16,
    pub bottom: u16,
    pub left: u16,
    pub right: u16,
    pub field: u8,
    pub is_letterbox: bool,
}

/// A decoded RP188 timecode, independent of which register it came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimecodeMeta {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
    pub drop_frame: bool,
}

/// Interleaved PCM audio alongside a video frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioMeta {
    pub sample_rate: u32,
    pub channel_count: u32,
    pub data: Vec<u8>,
}

/// One fully assembled unit flowing out of capture (C6) before the egress
/// combiner (C9) splits it into separate video/audio/caption streams, or
/// flowing into playout (C7) after the ingest demuxer (C8) has paired them
/// back up (§4.5.5, §4.8, §4.9).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompositeFrame {
    pub video: Vec<u8>,
    pub video_meta: VideoFrameMeta,
    pub audio: Option<AudioMeta>,
    pub captions: ClosedCaptionMeta,
    pub afd: Option<AfdMeta>,
    pub bar: Option<BarMeta>,
    pub timecode: Option<TimecodeMeta>,
    /// Pipeline-clock running time at which this frame should be
    /// presented or was captured (§4.5.3 step 4).
    pub running_time: Duration,
    /// Set on the first frame following a queue-overrun drop, so
    /// downstream can reset its expectations (§4.5.3 step 4).
    pub discont: bool,
}

/// How a [`CompositeFrame`]'s memory was produced, mirroring the one tag
/// a real buffer pool would carry in the `GstMemory` it wraps (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemType {
    Aja,
}
