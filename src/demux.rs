//! Ingest demuxer (C8, §4.7).
//!
//! Exactly one sink and two sources (audio, video). Splits a composite
//! buffer's audio back out from the attached `aja-audio-meta`, forwarding
//! each half downstream independently; synthesizes a gap on the audio
//! source when no audio was attached.

use crate::pipeline::{AudioMeta, CompositeFrame};
use std::time::Duration;

/// One demultiplexed output: a buffer destined for a specific source pad,
/// or a gap when no corresponding data exists for this interval.
#[derive(Debug, Clone, PartialEq)]
pub enum DemuxedItem {
    Video(CompositeFrame),
    Audio(AudioMeta),
    /// No audio meta was present on the incoming buffer (§4.7).
    AudioGap { pts: Duration, duration: Duration },
}

/// Whether a source pad is linked downstream, mirroring the flow-return
/// combination rules in §4.7 (`NOT_LINKED` only when both sources are
/// unlinked).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowReturn {
    Ok,
    NotLinked,
    Eos,
    Flushing,
    Error,
}

impl FlowReturn {
    /// Combines the two source pads' flow returns per §4.7: `NOT_LINKED`
    /// iff both are `NOT_LINKED`; `EOS` iff both are `EOS`; otherwise the
    /// first of {flushing, error} wins; else `OK`.
    pub fn combine(video: FlowReturn, audio: FlowReturn) -> FlowReturn {
        use FlowReturn::*;
        if video == NotLinked && audio == NotLinked {
            return NotLinked;
        }
        if video == Eos && audio == Eos {
            return Eos;
        }
        for candidate in [video, audio] {
            if candidate == Flushing {
                return Flushing;
            }
        }
        for candidate in [video, audio] {
            if candidate == Error {
                return Error;
            }
        }
        Ok
    }
}

/// Demultiplexes one composite buffer into its video item and either its
/// audio item or a gap (§4.7).
pub fn demux(mut frame: CompositeFrame, duration: Duration) -> (DemuxedItem, DemuxedItem) {
    let pts = frame.running_time;
    let audio_item = match frame.audio.take() {
        Some(audio) => DemuxedItem::Audio(audio),
        None => DemuxedItem::AudioGap { pts, duration },
    };
    (DemuxedItem::Video(frame), audio_item)
}

/// Caps synthesis for the two source pads (§4.7 "On caps received from
/// upstream"): `audio_channels` is stripped for the video source; the
/// audio source gets S32LE interleaved 48kHz N-channel caps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioCaps {
    pub sample_rate: u32,
    pub channels: u32,
    pub format: &'static str,
}

pub fn derive_audio_caps(audio_channels: u32) -> AudioCaps {
    AudioCaps {
        sample_rate: 48_000,
        channels: audio_channels,
        format: "S32LE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_audio_produces_gap() {
        let frame = CompositeFrame {
            running_time: Duration::from_millis(100),
            ..CompositeFrame::default()
        };
        let (_video, audio) = demux(frame, Duration::from_millis(33));
        match audio {
            DemuxedItem::AudioGap { pts, duration } => {
                assert_eq!(pts, Duration::from_millis(100));
                assert_eq!(duration, Duration::from_millis(33));
            }
            other => panic!("expected gap, got {other:?}"),
        }
    }

    #[test]
    fn present_audio_forwards_meta() {
        let frame = CompositeFrame {
            audio: Some(AudioMeta {
                sample_rate: 48_000,
                channel_count: 2,
                data: vec![1, 2, 3],
            }),
            ..CompositeFrame::default()
        };
        let (_video, audio) = demux(frame, Duration::from_millis(33));
        assert!(matches!(audio, DemuxedItem::Audio(_)));
    }

    #[test]
    fn flow_combination_rules() {
        use FlowReturn::*;
        assert_eq!(FlowReturn::combine(NotLinked, NotLinked), NotLinked);
        assert_eq!(FlowReturn::combine(Ok, NotLinked), Ok);
        assert_eq!(FlowReturn::combine(Eos, Eos), Eos);
        assert_eq!(FlowReturn::combine(Flushing, Ok), Flushing);
        assert_eq!(FlowReturn::combine(Error, Ok), Error);
        assert_eq!(FlowReturn::combine(Flushing, Error), Flushing);
    }
}
