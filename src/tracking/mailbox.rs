use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::common::Frame;
use crate::config::OverflowPolicy;

/// What happened to a frame offered to the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    Accepted,
    /// The frame was queued and the pending frame with this id was discarded.
    Replaced { dropped: u64 },
    /// The mailbox was full and kept its pending frames, the offered frame was discarded.
    Rejected { dropped: u64 },
    Closed,
}

#[derive(Debug)]
pub enum Take {
    Frame(Frame),
    Timeout,
    Closed,
}

#[derive(Debug, Default)]
struct MailboxState {
    pending: VecDeque<Frame>,
    closed: bool,
}

/// Bounded, lossy handoff from the reception path to the detection worker.
///
/// `offer` never blocks beyond the lock. Frames leave in the order they were offered, so the
/// worker never sees ids out of order, only gaps.
#[derive(Debug)]
pub struct FrameMailbox {
    state: Mutex<MailboxState>,
    ready: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
}

impl FrameMailbox {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            state: Mutex::new(MailboxState::default()),
            ready: Condvar::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn offer(&self, frame: Frame) -> Handoff {
        let mut state = self.lock();
        if state.closed {
            return Handoff::Closed;
        }
        let outcome = if state.pending.len() < self.capacity {
            state.pending.push_back(frame);
            Handoff::Accepted
        } else {
            match self.policy {
                OverflowPolicy::DropOldest => {
                    let dropped = state.pending.pop_front().map(|f| f.sequence_id());
                    state.pending.push_back(frame);
                    match dropped {
                        Some(dropped) => Handoff::Replaced { dropped },
                        None => Handoff::Accepted,
                    }
                }
                OverflowPolicy::DropNewest => Handoff::Rejected {
                    dropped: frame.sequence_id(),
                },
            }
        };
        drop(state);
        self.ready.notify_one();
        outcome
    }

    /// Waits up to `timeout` for a frame. Returns `Closed` as soon as the mailbox is closed,
    /// abandoning anything still pending.
    pub fn take(&self, timeout: Duration) -> Take {
        let state = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.pending.is_empty() && !s.closed)
            .unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return Take::Closed;
        }
        match state.pending.pop_front() {
            Some(frame) => Take::Frame(frame),
            None => Take::Timeout,
        }
    }

    pub fn close(&self) {
        self.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use image::RgbImage;
    use std::sync::Arc;

    fn frame(id: u64) -> Frame {
        Frame::new(id, RgbImage::new(1, 1), Utc::now())
    }

    fn taken_id(take: Take) -> u64 {
        match take {
            Take::Frame(frame) => frame.sequence_id(),
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[test]
    fn drop_oldest_keeps_the_most_recent_frame() {
        let mailbox = FrameMailbox::new(1, OverflowPolicy::DropOldest);
        assert_eq!(mailbox.offer(frame(0)), Handoff::Accepted);
        assert_eq!(mailbox.offer(frame(1)), Handoff::Replaced { dropped: 0 });
        assert_eq!(mailbox.offer(frame(2)), Handoff::Replaced { dropped: 1 });
        assert_eq!(mailbox.pending(), 1);
        assert_eq!(taken_id(mailbox.take(Duration::ZERO)), 2);
    }

    #[test]
    fn drop_newest_keeps_what_is_pending() {
        let mailbox = FrameMailbox::new(1, OverflowPolicy::DropNewest);
        mailbox.offer(frame(0));
        assert_eq!(mailbox.offer(frame(1)), Handoff::Rejected { dropped: 1 });
        assert_eq!(taken_id(mailbox.take(Duration::ZERO)), 0);
    }

    #[test]
    fn larger_capacity_preserves_order() {
        let mailbox = FrameMailbox::new(3, OverflowPolicy::DropOldest);
        for id in 0..5 {
            mailbox.offer(frame(id));
        }
        let ids: Vec<u64> = (0..3).map(|_| taken_id(mailbox.take(Duration::ZERO))).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn empty_take_times_out() {
        let mailbox = FrameMailbox::new(1, OverflowPolicy::DropOldest);
        assert!(matches!(mailbox.take(Duration::from_millis(5)), Take::Timeout));
    }

    #[test]
    fn close_wakes_a_waiting_taker() {
        let mailbox = Arc::new(FrameMailbox::new(1, OverflowPolicy::DropOldest));
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            std::thread::spawn(move || mailbox.take(Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        mailbox.close();
        assert!(matches!(waiter.join().unwrap(), Take::Closed));
        assert_eq!(mailbox.offer(frame(0)), Handoff::Closed);
    }

    #[test]
    fn offer_wakes_a_waiting_taker() {
        let mailbox = Arc::new(FrameMailbox::new(1, OverflowPolicy::DropOldest));
        let waiter = {
            let mailbox = Arc::clone(&mailbox);
            std::thread::spawn(move || mailbox.take(Duration::from_secs(10)))
        };
        std::thread::sleep(Duration::from_millis(20));
        mailbox.offer(frame(4));
        assert_eq!(taken_id(waiter.join().unwrap()), 4);
    }
}
