//! Device handle and the narrow hardware capability surface it exposes
//! (C1, §4.1).
//!
//! The real plugin links AJA's C++ `libajantv2` SDK; no Rust binding for it
//! exists in the wild, so the hardware boundary is expressed here as a
//! trait, [`DeviceBackend`], object-safe and shared via `Arc` the way the
//! teacher's `Device` owns a `File` — except reference-counted, since
//! multiple engines (capture + playout, possibly on several channels) share
//! one physical device (§3 "Ownership").

pub mod dma;
pub mod frame_range;
pub mod routing;
pub mod setup_mutex;

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;

use std::sync::Mutex as StdMutex;

use crate::channel::{AudioSource, Multiplier, ReferenceSource, SdiMode, TimecodeIndex};
use crate::format::VideoFormat;
use crate::Result;

pub use frame_range::FrameRangePlanner;
pub use routing::{CrosspointEdge, RoutingTransaction};
pub use setup_mutex::SetupMutex;

bitflags! {
    /// Device capability flags consulted during configuration (§4.1,
    /// §9 "intersecting with the device's advertised capabilities").
    pub struct DeviceCapabilities: u32 {
        const CUSTOM_ANC          = 1 << 0;
        const BIDIRECTIONAL_SDI   = 1 << 1;
        const QUAD_QUAD           = 1 << 2;
        const RP188               = 1 << 3;
        const HDMI_INPUT          = 1 << 4;
    }
}

/// Whether a channel is operating as a capture (input) or playout (output).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    Capture,
    Display,
}

/// Whether the vertical-ancillary region is included in the frame geometry
/// (§4.5.2 step 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VancMode {
    Off,
    Tall,
}

/// Options passed to `AutoCirculateInitForInput`/`...ForOutput` (§4.5.2 step
/// 10, §4.6.1).
#[derive(Debug, Clone, Copy)]
pub struct AutoCirculateOpts {
    pub start_frame: u32,
    pub end_frame: u32,
    pub with_rp188: bool,
    pub with_custom_anc: bool,
}

/// Audio configuration applied during the configuration protocol (§4.5.2
/// step 8): source, channel count, rate, buffering, embedded-audio
/// clocking, and loopback.
#[derive(Debug, Clone, Copy)]
pub struct AudioConfig {
    pub source: AudioSource,
    /// Capture always requests the device maximum for `source`; playout
    /// requests the channel count of the frame being rendered.
    pub channel_count: u32,
    pub sample_rate: u32,
    /// Large-buffer mode, to absorb scheduling jitter (§4.5.2 step 8).
    pub large_buffer: bool,
    /// Embedded audio clocked from the video reference rather than a
    /// free-running audio clock.
    pub video_clocked: bool,
    pub loopback: bool,
}

/// Snapshot returned by `AutoCirculateGetStatus` (§4.5.3 step 4, §4.6.3).
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoCirculateStatus {
    pub available_frames: u32,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub is_running: bool,
}

/// A single DMA transfer's descriptor, filled in by the engine and handed
/// to [`DeviceBackend::autocirculate_transfer`].
pub struct Transfer<'a> {
    pub channel: u8,
    pub video: &'a mut [u8],
    pub audio: Option<&'a mut [u8]>,
    pub anc_f1: Option<&'a mut [u8]>,
    pub anc_f2: Option<&'a mut [u8]>,
    /// On capture, set by the backend to the number of audio bytes actually
    /// captured (§4.5.3 step 4, `GetCapturedAudioByteCount`).
    pub captured_audio_bytes: u32,
    pub captured_anc_f1_bytes: u32,
    pub captured_anc_f2_bytes: u32,
    /// Driver frame-stamp time, 100ns units, for the timestamp derivation
    /// in §4.5.3 step 4.
    pub frame_stamp_time_100ns: u64,
}

/// The narrow capability set the engines actually use (§4.1).
///
/// Implementations must be internally thread-safe: concurrent calls from
/// different channels are permitted (§5 "Shared data and locks").
pub trait DeviceBackend: Send + Sync + fmt::Debug {
    fn identifier(&self) -> &str;
    fn capabilities(&self) -> DeviceCapabilities;
    fn can_do_video_format(&self, format: VideoFormat) -> bool;

    fn enable_channel(&self, channel: u8, enabled: bool) -> Result<()>;
    fn set_channel_mode(&self, channel: u8, mode: ChannelMode) -> Result<()>;
    fn set_geometry(&self, channel: u8, format: VideoFormat, vanc: VancMode) -> Result<()>;
    fn set_reference_source(&self, source: ReferenceSource) -> Result<()>;
    fn set_sdi_transmit(&self, channel: u8, transmit: bool) -> Result<()>;

    fn apply_routing(&self, txn: &RoutingTransaction) -> Result<()>;

    /// The device's maximum audio channel count for `source` on `channel`,
    /// used to size the capture-side `AudioConfig` (§4.5.2 step 8, "device
    /// maximum for capture").
    fn max_audio_channels(&self, channel: u8, source: AudioSource) -> u32;
    fn configure_audio(&self, channel: u8, audio: AudioConfig) -> Result<()>;

    /// Enables LTC timecode input (§4.5.2 step 9).
    fn set_ltc_input_enabled(&self, enabled: bool) -> Result<()>;
    /// Widens the RP188 source filter to accept any timecode source
    /// (§4.5.2 step 9, "RP188 source filter wide open").
    fn set_rp188_filter_wide_open(&self, channel: u8) -> Result<()>;

    fn autocirculate_init(&self, channel: u8, mode: ChannelMode, opts: AutoCirculateOpts) -> Result<()>;
    fn autocirculate_start(&self, channel: u8) -> Result<()>;
    fn autocirculate_stop(&self, channel: u8) -> Result<()>;
    fn autocirculate_status(&self, channel: u8) -> AutoCirculateStatus;
    fn autocirculate_transfer(&self, xfer: &mut Transfer<'_>) -> Result<()>;

    fn subscribe_vertical_interrupt(&self, channel: u8, mode: ChannelMode) -> Result<()>;
    fn unsubscribe_vertical_interrupt(&self, channel: u8, mode: ChannelMode) -> Result<()>;
    /// Blocks until the next vertical interrupt for `channel`, or returns
    /// promptly if `shutdown` is observed (§5 "Suspension points").
    fn wait_for_vertical_interrupt(&self, channel: u8, mode: ChannelMode) -> Result<()>;

    fn dma_lock(&self, ptr: *mut u8, len: usize) -> Result<()>;
    fn dma_unlock(&self, ptr: *mut u8, len: usize) -> Result<()>;

    fn input_video_format(&self, channel: u8) -> Option<VideoFormat>;
    fn input_vpid(&self, channel: u8) -> (u32, u32);
    fn input_timecode(&self, channel: u8, index: TimecodeIndex) -> Option<u64>;

    fn sdi_mode_enable(&self, base_channel: u8, mode: SdiMode);
}

/// Reference-counted handle over one open hardware device (C1).
///
/// Cloning is cheap (an `Arc` bump); the last clone dropped releases the
/// hardware (§3 "Ownership").
#[derive(Clone)]
pub struct Device {
    backend: Arc<dyn DeviceBackend>,
    setup_mutex: Arc<SetupMutex>,
    planner: Arc<StdMutex<FrameRangePlanner>>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("identifier", &self.backend.identifier())
            .finish()
    }
}

impl Device {
    /// Acquires a device by string identifier (index or serial), sharing
    /// the system-wide setup mutex used to serialize configuration across
    /// processes (§4.1), and the single frame-range planner (C4, §4.3)
    /// shared by every channel on this device.
    pub fn open(backend: Arc<dyn DeviceBackend>, total_frames: u32) -> Result<Self> {
        let setup_mutex = Arc::new(SetupMutex::open("/gstreamer-aja-sem")?);
        let planner = Arc::new(StdMutex::new(FrameRangePlanner::new(total_frames)));
        Ok(Self { backend, setup_mutex, planner })
    }

    pub fn backend(&self) -> &Arc<dyn DeviceBackend> {
        &self.backend
    }

    pub fn identifier(&self) -> &str {
        self.backend.identifier()
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.backend.capabilities()
    }

    /// Runs `f` with the global setup mutex held (§4.1: "held only around
    /// configuration phases, never across DMA transfers or vertical
    /// waits").
    pub fn with_setup_lock<T>(&self, f: impl FnOnce(&Arc<dyn DeviceBackend>) -> T) -> T {
        let _guard = self.setup_mutex.lock();
        f(&self.backend)
    }

    /// Plans an auto-assigned frame range for `ring_size * multiplier`
    /// slots (§4.3).
    pub fn plan_frame_range(&self, ring_size: u32, multiplier: Multiplier) -> Result<(u32, u32)> {
        self.planner
            .lock()
            .unwrap()
            .plan(ring_size, multiplier)
            .map_err(Into::into)
    }

    /// Reserves a caller-chosen frame range, e.g. when the channel config
    /// names an explicit `[start, end]` (§3).
    pub fn reserve_frame_range(&self, start: u32, end: u32) -> Result<()> {
        self.planner.lock().unwrap().reserve(start, end).map_err(Into::into)
    }

    pub fn release_frame_range(&self, start: u32) {
        self.planner.lock().unwrap().release(start);
    }
}

#[cfg(test)]
pub(crate) mod test_backend {
    use super::*;
    use std::sync::Mutex;

    /// Deterministic backend double used by unit tests across the crate:
    /// no real hardware, but the same call shape as [`DeviceBackend`].
    #[derive(Debug)]
    pub struct NullBackend {
        pub identifier: String,
        pub caps: DeviceCapabilities,
        inner: Mutex<Inner>,
    }

    #[derive(Default)]
    struct Inner {
        detected_format: Option<VideoFormat>,
        status: AutoCirculateStatus,
        running: Vec<u8>,
        last_audio_config: Option<AudioConfig>,
    }

    impl NullBackend {
        pub fn new(caps: DeviceCapabilities) -> Arc<Self> {
            Arc::new(Self {
                identifier: "null0".into(),
                caps,
                inner: Mutex::new(Inner::default()),
            })
        }

        pub fn set_detected_format(&self, format: Option<VideoFormat>) {
            self.inner.lock().unwrap().detected_format = format;
        }

        pub fn set_available_frames(&self, n: u32) {
            self.inner.lock().unwrap().status.available_frames = n;
        }

        pub fn last_audio_config(&self) -> Option<AudioConfig> {
            self.inner.lock().unwrap().last_audio_config
        }
    }

    impl DeviceBackend for NullBackend {
        fn identifier(&self) -> &str {
            &self.identifier
        }

        fn capabilities(&self) -> DeviceCapabilities {
            self.caps
        }

        fn can_do_video_format(&self, _format: VideoFormat) -> bool {
            true
        }

        fn enable_channel(&self, _channel: u8, _enabled: bool) -> Result<()> {
            Ok(())
        }

        fn set_channel_mode(&self, _channel: u8, _mode: ChannelMode) -> Result<()> {
            Ok(())
        }

        fn set_geometry(&self, _channel: u8, _format: VideoFormat, _vanc: VancMode) -> Result<()> {
            Ok(())
        }

        fn set_reference_source(&self, _source: ReferenceSource) -> Result<()> {
            Ok(())
        }

        fn set_sdi_transmit(&self, _channel: u8, _transmit: bool) -> Result<()> {
            Ok(())
        }

        fn apply_routing(&self, _txn: &RoutingTransaction) -> Result<()> {
            Ok(())
        }

        fn max_audio_channels(&self, _channel: u8, _source: AudioSource) -> u32 {
            16
        }

        fn configure_audio(&self, _channel: u8, audio: AudioConfig) -> Result<()> {
            self.inner.lock().unwrap().last_audio_config = Some(audio);
            Ok(())
        }

        fn set_ltc_input_enabled(&self, _enabled: bool) -> Result<()> {
            Ok(())
        }

        fn set_rp188_filter_wide_open(&self, _channel: u8) -> Result<()> {
            Ok(())
        }

        fn autocirculate_init(
            &self,
            channel: u8,
            _mode: ChannelMode,
            _opts: AutoCirculateOpts,
        ) -> Result<()> {
            self.inner.lock().unwrap().running.push(channel);
            Ok(())
        }

        fn autocirculate_start(&self, _channel: u8) -> Result<()> {
            self.inner.lock().unwrap().status.is_running = true;
            Ok(())
        }

        fn autocirculate_stop(&self, channel: u8) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.running.retain(|c| *c != channel);
            inner.status.is_running = false;
            Ok(())
        }

        fn autocirculate_status(&self, _channel: u8) -> AutoCirculateStatus {
            self.inner.lock().unwrap().status
        }

        fn autocirculate_transfer(&self, _xfer: &mut Transfer<'_>) -> Result<()> {
            Ok(())
        }

        fn subscribe_vertical_interrupt(&self, _channel: u8, _mode: ChannelMode) -> Result<()> {
            Ok(())
        }

        fn unsubscribe_vertical_interrupt(&self, _channel: u8, _mode: ChannelMode) -> Result<()> {
            Ok(())
        }

        fn wait_for_vertical_interrupt(&self, _channel: u8, _mode: ChannelMode) -> Result<()> {
            Ok(())
        }

        fn dma_lock(&self, _ptr: *mut u8, _len: usize) -> Result<()> {
            Ok(())
        }

        fn dma_unlock(&self, _ptr: *mut u8, _len: usize) -> Result<()> {
            Ok(())
        }

        fn input_video_format(&self, _channel: u8) -> Option<VideoFormat> {
            self.inner.lock().unwrap().detected_format
        }

        fn input_vpid(&self, _channel: u8) -> (u32, u32) {
            (0, 0)
        }

        fn input_timecode(&self, _channel: u8, _index: TimecodeIndex) -> Option<u64> {
            None
        }

        fn sdi_mode_enable(&self, _base_channel: u8, _mode: SdiMode) {}
    }
}
