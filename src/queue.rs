//! Bounded inter-thread frame queue (C5, §4.4).
//!
//! The capture engine's hardware-facing thread pushes items; the
//! downstream consumer (demux, or a test harness) pops them. The queue is
//! bounded by item count, not byte count, and applies a drop-oldest
//! coalescing policy on overrun rather than blocking the producer
//! (§4.4 "Overrun policy") — a stalled consumer must never stall the
//! capture thread, since that thread also services the vertical-interrupt
//! wait.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::format::VideoFormat;
use crate::pipeline::CompositeFrame;

/// One entry in the queue: either a captured frame, or an out-of-band
/// notification that must be delivered in order relative to the frames
/// around it (§4.4).
#[derive(Debug, Clone)]
pub enum QueueItem {
    Frame(CompositeFrame),
    /// The detected input signal changed, per §3's data model. `have_signal`
    /// is false on loss, true when signal returns; `vpid` carries the
    /// `(vpid_a, vpid_b)` pair read alongside the format, when known.
    SignalChange {
        have_signal: bool,
        detected_format: Option<VideoFormat>,
        vpid: Option<(u32, u32)>,
    },
    /// A non-fatal error occurred producing a frame; delivered in-band so
    /// the consumer can decide whether to continue.
    Error(String),
    /// Frames were dropped to keep the queue within its bound, or lost by
    /// the driver before ever reaching it (§4.4 "Overrun policy", §4.5.3
    /// step 5). `driver_side` distinguishes `acFramesDropped` losses from
    /// this queue's own drop-oldest coalescing; `span` is the dropped
    /// interval in running-time.
    FramesDropped {
        driver_side: bool,
        span: (Duration, Duration),
    },
}

#[derive(Debug, Default)]
struct Inner {
    items: VecDeque<QueueItem>,
    /// Coalesced queue-side drops pending delivery, as `(count, span_start,
    /// span_end)`; `None` once flushed, set on the first drop after a flush.
    pending_drop: Option<(u64, Duration, Duration)>,
    /// Set when a drop just happened; the next `Frame` pushed gets
    /// `discont = true` (§4.5.3 step 4 "mark discont on the next outgoing
    /// Frame").
    discont_pending: bool,
    shutdown: bool,
}

/// A bounded, multi-producer single-consumer queue of [`QueueItem`]s.
///
/// On overrun, the oldest `Frame` item is dropped and coalesced into a
/// trailing `FramesDropped` counter rather than growing unbounded or
/// blocking the producer (§4.4).
#[derive(Debug)]
pub struct FrameQueue {
    capacity: usize,
    state: Mutex<Inner>,
    not_empty: Condvar,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(Inner::default()),
            not_empty: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends `item` to the tail. If the queue is at capacity, the oldest
    /// `Frame` item is dropped first; `SignalChange`/`Error`/`FramesDropped`
    /// items are never dropped to make room (§4.4 "overrun never discards
    /// control items"). A dropped frame's `running_time` extends the
    /// pending coalesced span, and the next `Frame` pushed after a drop is
    /// marked `discont` (§4.5.3 step 4).
    pub fn push_tail(&self, mut item: QueueItem) {
        let mut inner = self.state.lock().unwrap();
        if inner.items.len() >= self.capacity {
            if let Some(idx) = inner.items.iter().position(|i| matches!(i, QueueItem::Frame(_))) {
                if let Some(QueueItem::Frame(dropped)) = inner.items.remove(idx) {
                    let t = dropped.running_time;
                    inner.pending_drop = Some(match inner.pending_drop {
                        Some((count, start, _end)) => (count + 1, start, t),
                        None => (1, t, t),
                    });
                    inner.discont_pending = true;
                }
            }
        }
        if let QueueItem::Frame(frame) = &mut item {
            if inner.discont_pending {
                frame.discont = true;
                inner.discont_pending = false;
            }
        }
        inner.items.push_back(item);
        self.not_empty.notify_one();
    }

    /// Pops the head item, blocking until one is available or the queue is
    /// shut down. If frames were coalesced away since the last pop, a
    /// synthetic [`QueueItem::FramesDropped`] is returned first.
    pub fn pop_head(&self) -> Option<QueueItem> {
        let mut inner = self.state.lock().unwrap();
        loop {
            if let Some(item) = Self::take_pending_drop(&mut inner) {
                return Some(item);
            }
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.shutdown {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Like [`Self::pop_head`] but gives up after `timeout`, returning
    /// `None` without distinguishing "empty" from "shut down" (callers
    /// that care check [`Self::is_shutdown`] separately).
    pub fn pop_head_timeout(&self, timeout: Duration) -> Option<QueueItem> {
        let mut inner = self.state.lock().unwrap();
        loop {
            if let Some(item) = Self::take_pending_drop(&mut inner) {
                return Some(item);
            }
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.shutdown {
                return None;
            }
            let (guard, result) = self.not_empty.wait_timeout(inner, timeout).unwrap();
            inner = guard;
            if result.timed_out() && inner.items.is_empty() {
                return None;
            }
        }
    }

    fn take_pending_drop(inner: &mut Inner) -> Option<QueueItem> {
        let (_count, start, end) = inner.pending_drop.take()?;
        Some(QueueItem::FramesDropped {
            driver_side: false,
            span: (start, end),
        })
    }

    /// Looks at the `n`th item from the head without removing it, for
    /// tests and diagnostics.
    pub fn peek_nth(&self, n: usize) -> Option<QueueItem> {
        self.state.lock().unwrap().items.get(n).cloned()
    }

    /// Wakes any blocked consumer and makes future `pop_head` calls return
    /// `None` once drained (§4.5.4 "shutdown/flush").
    pub fn shutdown(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.shutdown = true;
        self.not_empty.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().unwrap().shutdown
    }

    /// Drops every queued item without delivering it, for the flush path
    /// (§4.5.4).
    pub fn clear(&self) {
        let mut inner = self.state.lock().unwrap();
        inner.items.clear();
        inner.pending_drop = None;
        inner.discont_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CompositeFrame;
    use std::sync::Arc;
    use std::thread;

    fn frame() -> QueueItem {
        QueueItem::Frame(CompositeFrame::default())
    }

    fn frame_at(running_time: Duration) -> QueueItem {
        QueueItem::Frame(CompositeFrame {
            running_time,
            ..CompositeFrame::default()
        })
    }

    #[test]
    fn overrun_drops_oldest_and_coalesces() {
        let q = FrameQueue::new(2);
        q.push_tail(frame_at(Duration::from_millis(0)));
        q.push_tail(frame_at(Duration::from_millis(33)));
        q.push_tail(frame_at(Duration::from_millis(66))); // drops the first, len stays 2

        assert_eq!(q.len(), 2);
        match q.pop_head().unwrap() {
            QueueItem::FramesDropped { driver_side, span } => {
                assert!(!driver_side);
                assert_eq!(span, (Duration::from_millis(0), Duration::from_millis(0)));
            }
            other => panic!("expected FramesDropped, got {other:?}"),
        }
    }

    #[test]
    fn dropped_frame_marks_discont_on_next_frame() {
        let q = FrameQueue::new(1);
        q.push_tail(frame());
        q.push_tail(frame()); // drops the first, marks the next Frame discont
        let _ = q.pop_head(); // the synthetic FramesDropped item
        match q.pop_head().unwrap() {
            QueueItem::Frame(f) => assert!(f.discont),
            other => panic!("expected Frame, got {other:?}"),
        }
    }

    #[test]
    fn control_items_are_never_evicted_by_overrun() {
        let q = FrameQueue::new(1);
        q.push_tail(QueueItem::SignalChange {
            have_signal: false,
            detected_format: None,
            vpid: None,
        });
        q.push_tail(frame()); // nothing to evict but a frame: frame itself fills the slot after eviction attempt fails
        // the SignalChange item must still be the first thing popped
        match q.pop_head().unwrap() {
            QueueItem::SignalChange { .. } => {}
            other => panic!("expected SignalChange first, got {other:?}"),
        }
    }

    #[test]
    fn shutdown_wakes_blocked_consumer() {
        let q = Arc::new(FrameQueue::new(4));
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || q2.pop_head());
        thread::sleep(Duration::from_millis(20));
        q.shutdown();
        assert!(handle.join().unwrap().is_none());
    }

    #[test]
    fn fifo_order_preserved_absent_overrun() {
        let q = FrameQueue::new(8);
        q.push_tail(QueueItem::Error("a".into()));
        q.push_tail(QueueItem::Error("b".into()));
        match (q.pop_head().unwrap(), q.pop_head().unwrap()) {
            (QueueItem::Error(a), QueueItem::Error(b)) => {
                assert_eq!(a, "a");
                assert_eq!(b, "b");
            }
            _ => panic!("unexpected order"),
        }
    }
}
