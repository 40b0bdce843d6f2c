//! Channel configuration value object (§3 "Channel configuration").

use std::time::Duration;

use crate::format::VideoFormat;

/// How a channel carries SDI: a single link, or one of two quad-link
/// framings (§4.5.2 step 7, GLOSSARY "Quad-link SQD / TSI").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdiMode {
    SingleLink,
    QuadLinkSquareDivision,
    QuadLinkTwoSampleInterleave,
}

impl SdiMode {
    /// The routing/frame-buffer multiplier used by the frame-range planner
    /// (C4, §4.3): 1 for single-link, 4 for any quad-link mode.
    ///
    /// Quad-quad (8K) bumps this to 8 via [`Multiplier`] instead, since the
    /// multiplier also depends on resolution, not just `SdiMode`.
    pub fn is_quad(self) -> bool {
        !matches!(self, SdiMode::SingleLink)
    }
}

/// Frame-buffer index multiplier used by the planner (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Multiplier {
    Single = 1,
    Quad = 4,
    QuadQuad = 8,
}

impl Multiplier {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Derives the multiplier from the SDI mode and whether the format is a
    /// quad-quad (8K) tier (§4.5.2 step 5).
    pub fn for_mode(mode: SdiMode, is_quad_quad: bool) -> Self {
        match (mode.is_quad(), is_quad_quad) {
            (false, _) => Multiplier::Single,
            (true, false) => Multiplier::Quad,
            (true, true) => Multiplier::QuadQuad,
        }
    }
}

/// Audio system selection; device audio systems are numbered 1-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSystem {
    Auto,
    System(u8),
}

/// Input or output destination for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Auto,
    Sdi(u8),
    Hdmi(u8),
    Analog,
}

impl Destination {
    /// HDMI inputs are internally quad (§4.5.2 step 1).
    pub fn is_hdmi(self) -> bool {
        matches!(self, Destination::Hdmi(_))
    }
}

/// Where embedded/analog audio is sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSource {
    Embedded,
    Aes,
    Analog,
    Hdmi,
    Mic,
}

/// Genlock reference source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceSource {
    Auto,
    External,
    Freerun,
    Sdi(u8),
}

/// Which timecode register to read/write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimecodeIndex {
    EmbeddedVitc,
    AtcLtc,
    AnalogLtc1,
    AnalogLtc2,
}

/// Closed-caption capture/render policy (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CcPolicy {
    Cea708AndCea608,
    Cea708OrCea608,
    Cea608OrCea708,
    Cea708Only,
    Cea608Only,
    None,
}

impl CcPolicy {
    pub fn wants_708(self) -> bool {
        !matches!(self, CcPolicy::Cea608Only | CcPolicy::None)
    }

    pub fn wants_608(self) -> bool {
        !matches!(self, CcPolicy::Cea708Only | CcPolicy::None)
    }

    /// Resolves attachment when *both* a 708 and a 608 packet are present in
    /// the same VANC, per the "or" variants in scenario 4 of §8.
    pub fn prefer_708_over_608(self, have_708: bool, have_608: bool) -> (bool, bool) {
        match self {
            CcPolicy::Cea708AndCea608 => (have_708, have_608),
            CcPolicy::Cea708OrCea608 => {
                if have_708 {
                    (true, false)
                } else {
                    (false, have_608)
                }
            }
            CcPolicy::Cea608OrCea708 => {
                if have_608 {
                    (false, true)
                } else {
                    (have_708, false)
                }
            }
            CcPolicy::Cea708Only => (have_708, false),
            CcPolicy::Cea608Only => (false, have_608),
            CcPolicy::None => (false, false),
        }
    }
}

/// Frame-buffer allocation range. `start == end` requests auto-assignment
/// of `ring_size` contiguous frames via the planner (C4, §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameRange {
    pub start_frame: u32,
    pub end_frame: u32,
}

impl FrameRange {
    pub fn is_auto(self) -> bool {
        self.start_frame == self.end_frame
    }

    pub fn len(self) -> u32 {
        if self.is_auto() {
            0
        } else {
            self.end_frame - self.start_frame + 1
        }
    }
}

/// Full per-channel configuration (§3 "Channel configuration").
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Channel index, 0-7.
    pub channel: u8,
    pub video_format: VideoFormat,
    pub sdi_mode: SdiMode,
    pub audio_system: AudioSystem,
    pub destination: Destination,
    pub audio_source: AudioSource,
    pub reference_source: ReferenceSource,
    pub timecode_index: TimecodeIndex,
    pub cc_policy: CcPolicy,
    pub ring_size: u32,
    pub allocation_range: FrameRange,
    pub core_affinity: Option<usize>,
    pub rp188_enabled: bool,
}

impl ChannelConfig {
    /// Whether quad-mode is required, per §4.5.2 step 1.
    pub fn wants_quad(&self) -> bool {
        self.sdi_mode.is_quad() || self.destination.is_hdmi()
    }

    /// Validates the configuration-time constraints from §4.5.2 step 1:
    /// non-HDMI quad is only allowed on channels 1 or 5 (0-indexed: 0 or 4),
    /// and quad requires either HDMI or an auto destination.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.wants_quad() && !self.destination.is_hdmi() {
            if !matches!(self.destination, Destination::Auto) {
                return Err(crate::Error::FatalConfig(format!(
                    "channel {}: quad-link requested with non-auto, non-HDMI destination {:?}",
                    self.channel, self.destination
                )));
            }
            if self.channel != 0 && self.channel != 4 {
                return Err(crate::Error::FatalConfig(format!(
                    "channel {}: non-HDMI quad is only valid starting at channel 1 or 5",
                    self.channel
                )));
            }
        }
        Ok(())
    }

    /// One field/frame period at the configured (or detected) format's rate.
    pub fn frame_period(&self, effective: VideoFormat) -> Duration {
        let rec = effective.record().or_else(|| self.video_format.record());
        match rec {
            Some(rec) => {
                Duration::from_secs_f64(rec.fps_den as f64 / rec.fps_num as f64)
            }
            None => Duration::from_millis(33),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ChannelConfig {
        ChannelConfig {
            channel: 0,
            video_format: VideoFormat::Hd1080p_2997,
            sdi_mode: SdiMode::SingleLink,
            audio_system: AudioSystem::Auto,
            destination: Destination::Sdi(1),
            audio_source: AudioSource::Embedded,
            reference_source: ReferenceSource::Auto,
            timecode_index: TimecodeIndex::EmbeddedVitc,
            cc_policy: CcPolicy::Cea708AndCea608,
            ring_size: 16,
            allocation_range: FrameRange { start_frame: 0, end_frame: 0 },
            core_affinity: None,
            rp188_enabled: true,
        }
    }

    #[test]
    fn quad_on_non_hdmi_requires_channel_0_or_4() {
        let mut cfg = base();
        cfg.sdi_mode = SdiMode::QuadLinkTwoSampleInterleave;
        cfg.destination = Destination::Auto;
        cfg.channel = 2;
        assert!(cfg.validate().is_err());
        cfg.channel = 0;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn quad_with_fixed_non_hdmi_destination_rejected() {
        let mut cfg = base();
        cfg.sdi_mode = SdiMode::QuadLinkSquareDivision;
        cfg.destination = Destination::Sdi(1);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hdmi_quad_always_allowed() {
        let mut cfg = base();
        cfg.destination = Destination::Hdmi(1);
        cfg.channel = 3;
        assert!(cfg.validate().is_ok());
        assert!(cfg.wants_quad());
    }

    #[test]
    fn cc_policy_prefers_first_named_kind() {
        assert_eq!(
            CcPolicy::Cea708OrCea608.prefer_708_over_608(true, true),
            (true, false)
        );
        assert_eq!(
            CcPolicy::Cea608OrCea708.prefer_708_over_608(true, true),
            (false, true)
        );
    }
}
