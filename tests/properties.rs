//! Cross-module property tests exercising the public API the way a
//! downstream integrator would: through `ChannelConfig`, `Device`, the
//! engines, and the demux/combine free functions, rather than through
//! any single module's internals.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use aja_io_core::channel::{
    AudioSource, AudioSystem, CcPolicy, ChannelConfig, Destination, FrameRange, ReferenceSource,
    SdiMode, TimecodeIndex,
};
use aja_io_core::combiner::{combine, AudioPadState, CombineOutcome};
use aja_io_core::demux::{demux, DemuxedItem};
use aja_io_core::format::VideoFormat;
use aja_io_core::pipeline::{AudioMeta, CompositeFrame};
use aja_io_core::queue::{FrameQueue, QueueItem};

fn base_channel_config(channel: u8) -> ChannelConfig {
    ChannelConfig {
        channel,
        video_format: VideoFormat::Hd1080p_2997,
        sdi_mode: SdiMode::SingleLink,
        audio_system: AudioSystem::Auto,
        destination: Destination::Sdi(channel + 1),
        audio_source: AudioSource::Embedded,
        reference_source: ReferenceSource::Auto,
        timecode_index: TimecodeIndex::EmbeddedVitc,
        cc_policy: CcPolicy::Cea708AndCea608,
        ring_size: 8,
        allocation_range: FrameRange { start_frame: 0, end_frame: 0 },
        core_affinity: None,
        rp188_enabled: true,
    }
}

#[test]
fn queue_never_exceeds_capacity_under_concurrent_producers() {
    let queue = Arc::new(FrameQueue::new(16));
    let producers: Vec<_> = (0..4)
        .map(|_| {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for _ in 0..200 {
                    queue.push_tail(QueueItem::Frame(CompositeFrame::default()));
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    assert!(queue.len() <= queue.capacity());
}

#[test]
fn queue_reports_every_dropped_frame_exactly_once() {
    let queue = FrameQueue::new(4);
    for _ in 0..40 {
        queue.push_tail(QueueItem::Frame(CompositeFrame::default()));
    }

    let mut remaining = 0u64;
    let mut drop_events = 0u64;
    while let Some(item) = queue.pop_head_timeout(Duration::from_millis(10)) {
        match item {
            QueueItem::Frame(_) => remaining += 1,
            QueueItem::FramesDropped { driver_side, .. } => {
                assert!(!driver_side);
                drop_events += 1;
            }
            _ => {}
        }
    }
    // The queue coalesces every run of consecutive drops into one
    // FramesDropped item, so events <= dropped frames <= total pushed.
    assert!(drop_events >= 1);
    assert!(remaining < 40);
}

#[test]
fn channel_config_validation_rejects_conflicting_quad_destination() {
    let mut cfg = base_channel_config(2);
    cfg.sdi_mode = SdiMode::QuadLinkSquareDivision;
    cfg.destination = Destination::Sdi(3); // fixed, non-HDMI, non-auto: rejected
    assert!(cfg.validate().is_err());

    cfg.destination = Destination::Auto; // now valid only on channel 0 or 4
    assert!(cfg.validate().is_err());

    cfg.channel = 4;
    assert!(cfg.validate().is_ok());
}

#[test]
fn demux_then_combine_round_trips_video_payload() {
    let frame = CompositeFrame {
        video: vec![1, 2, 3, 4],
        audio: Some(AudioMeta {
            sample_rate: 48_000,
            channel_count: 2,
            data: vec![9, 9, 9],
        }),
        ..CompositeFrame::default()
    };
    let original_video = frame.video.clone();
    let original_audio = frame.audio.clone();

    let (video_item, audio_item) = demux(frame, Duration::from_millis(33));
    let DemuxedItem::Video(video_frame) = video_item else {
        panic!("expected a video item");
    };
    let DemuxedItem::Audio(audio_meta) = audio_item else {
        panic!("expected an audio item, not a gap");
    };
    assert_eq!(video_frame.video, original_video);
    assert!(video_frame.audio.is_none(), "audio must be stripped from the video item");
    assert_eq!(Some(audio_meta.clone()), original_audio);

    match combine(video_frame, AudioPadState::Available, Some(audio_meta)) {
        CombineOutcome::Emit(recombined) => {
            assert_eq!(recombined.video, original_video);
            assert_eq!(recombined.audio, original_audio);
        }
        CombineOutcome::Defer => panic!("expected an emit, not a defer"),
    }
}

#[test]
fn demux_synthesizes_gap_when_no_audio_was_attached() {
    let frame = CompositeFrame {
        video: vec![5, 6],
        audio: None,
        ..CompositeFrame::default()
    };
    let (_video, audio_item) = demux(frame, Duration::from_millis(16));
    assert!(matches!(audio_item, DemuxedItem::AudioGap { .. }));
}
