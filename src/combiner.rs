//! Egress combiner (C9, §4.8).
//!
//! Two sinks (audio, video), one source. Pairs exactly one video buffer
//! per frame interval with its corresponding audio chunk, attaching the
//! audio buffer to the video buffer via the `aja-audio-meta` marker
//! rather than emitting two separate buffers downstream.

use std::time::Duration;

use crate::pipeline::{AudioMeta, CompositeFrame};

/// State of the audio sink pad, needed to decide whether to defer or
/// proceed without audio (§4.8: "if an audio buffer is not yet available
/// and the audio pad is not EOS, it defers").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioPadState {
    Available,
    Empty,
    Eos,
    Unused,
}

/// One step of the combiner's pull loop: given a pending video buffer and
/// the current state of the audio side, decides whether to emit, defer,
/// or pass through unpaired.
pub enum CombineOutcome {
    /// Hold the video buffer; audio has not arrived yet.
    Defer,
    /// Emit the video buffer, with `audio` attached if it was available.
    Emit(CompositeFrame),
}

/// Combines one pending video frame with at most one pending audio chunk
/// (§4.8).
pub fn combine(
    mut video: CompositeFrame,
    audio_state: AudioPadState,
    pending_audio: Option<AudioMeta>,
) -> CombineOutcome {
    match audio_state {
        AudioPadState::Empty => CombineOutcome::Defer,
        AudioPadState::Available => {
            video.audio = pending_audio;
            CombineOutcome::Emit(video)
        }
        AudioPadState::Eos | AudioPadState::Unused => {
            video.audio = None;
            CombineOutcome::Emit(video)
        }
    }
}

/// Source-pad caps derived from the video caps with `audio_channels=N`
/// appended, `N` being 0 when the audio pad is unused (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombinedCaps {
    pub audio_channels: u32,
}

pub fn derive_caps(audio_state: AudioPadState, audio_channel_count: u32) -> CombinedCaps {
    match audio_state {
        AudioPadState::Unused => CombinedCaps { audio_channels: 0 },
        _ => CombinedCaps { audio_channels: audio_channel_count },
    }
}

/// The aggregator's source-pad segment position, updated to the emitted
/// video buffer's PTS + duration (§4.8, last sentence).
pub fn next_segment_position(frame: &CompositeFrame, duration: Duration) -> Duration {
    frame.running_time + duration
}
