//! Bounded outbound queue with a buffering/playing state machine (§4.4).
//!
//! The pacer calls [`JitterBuffer::next_frame`] once per tick; everything
//! else (wall-clock sleeping) lives in the session supervisor's pacer task.

use crate::frame::{Frame, SwitchCodec};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Buffering,
    Playing,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JitterStats {
    pub underruns: u64,
    pub dropped_old: u64,
}

pub struct JitterBuffer {
    queue: VecDeque<Frame>,
    capacity: usize,
    preroll_bytes: usize,
    buffered_bytes: usize,
    mode: Mode,
    pub stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(capacity: usize, preroll_bytes: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            capacity,
            preroll_bytes,
            buffered_bytes: 0,
            mode: Mode::Buffering,
            stats: JitterStats::default(),
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Enqueues a normal frame at the tail. Drops the oldest frame (not the
    /// newest) on overflow.
    pub fn push(&mut self, frame: Frame) {
        self.make_room();
        self.buffered_bytes += frame.len();
        self.queue.push_back(frame);
    }

    /// Prepends a high-priority frame ahead of ordinary audio, FIFO among
    /// priority frames already at the head.
    pub fn push_priority(&mut self, frame: Frame) {
        self.make_room();
        let insert_at = self.queue.iter().take_while(|f| f.priority).count();
        self.buffered_bytes += frame.len();
        self.queue.insert(insert_at, frame);
    }

    fn make_room(&mut self) {
        if self.queue.len() >= self.capacity {
            if let Some(dropped) = self.queue.pop_front() {
                self.buffered_bytes = self.buffered_bytes.saturating_sub(dropped.len());
            }
            self.stats.dropped_old += 1;
        }
    }

    /// Drops all non-priority frames (barge-in, §4.5/§8 scenario 6).
    /// Already-queued priority frames are retained.
    pub fn flush_non_priority(&mut self) {
        let mut buffered = 0usize;
        self.queue.retain(|f| {
            if f.priority {
                buffered += f.len();
                true
            } else {
                false
            }
        });
        self.buffered_bytes = buffered;
    }

    /// Advances one pacer tick, returning the frame to emit. Transitions
    /// between buffering and playing per the pre-roll / underrun rules.
    pub fn next_frame(&mut self, frame_bytes: usize, codec: SwitchCodec) -> Frame {
        if self.mode == Mode::Buffering {
            if self.buffered_bytes >= self.preroll_bytes && !self.queue.is_empty() {
                self.mode = Mode::Playing;
            } else {
                return Frame::silence(codec, frame_bytes);
            }
        }

        match self.queue.pop_front() {
            Some(frame) => {
                self.buffered_bytes = self.buffered_bytes.saturating_sub(frame.len());
                frame
            }
            None => {
                self.stats.underruns += 1;
                self.mode = Mode::Buffering;
                Frame::silence(codec, frame_bytes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pcm_frame(n: usize) -> Frame {
        Frame::new(vec![1u8; n], SwitchCodec::Linear16_8k)
    }

    #[test]
    fn stays_in_buffering_until_preroll_met() {
        let mut buf = JitterBuffer::new(200, 1000);
        buf.push(pcm_frame(320));
        let frame = buf.next_frame(320, SwitchCodec::Linear16_8k);
        assert_eq!(buf.mode(), Mode::Buffering);
        assert_eq!(frame.data[0], 0); // silence
    }

    #[test]
    fn switches_to_playing_once_preroll_met() {
        let mut buf = JitterBuffer::new(200, 640);
        buf.push(pcm_frame(320));
        buf.push(pcm_frame(320));
        let frame = buf.next_frame(320, SwitchCodec::Linear16_8k);
        assert_eq!(buf.mode(), Mode::Playing);
        assert_eq!(frame.len(), 320);
    }

    #[test]
    fn underrun_reenters_buffering_and_counts() {
        let mut buf = JitterBuffer::new(200, 320);
        buf.push(pcm_frame(320));
        let _ = buf.next_frame(320, SwitchCodec::Linear16_8k); // transitions to playing, consumes frame
        let frame = buf.next_frame(320, SwitchCodec::Linear16_8k); // queue now empty -> underrun
        assert_eq!(buf.mode(), Mode::Buffering);
        assert_eq!(buf.stats.underruns, 1);
        assert_eq!(frame.data[0], 0);
    }

    #[test]
    fn overflow_drops_oldest_frame_and_counts() {
        let mut buf = JitterBuffer::new(2, 0);
        buf.push(pcm_frame(10));
        buf.push(pcm_frame(20));
        buf.push(pcm_frame(30));
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.stats.dropped_old, 1);
        assert_eq!(buf.queue.front().expect("frame").len(), 20);
    }

    #[test]
    fn queue_length_never_exceeds_capacity() {
        let mut buf = JitterBuffer::new(5, 0);
        for _ in 0..50 {
            buf.push(pcm_frame(10));
            assert!(buf.len() <= 5);
        }
        assert_eq!(buf.stats.dropped_old, 45);
    }

    #[test]
    fn priority_frames_are_fifo_among_themselves() {
        let mut buf = JitterBuffer::new(10, 0);
        buf.push(pcm_frame(1));
        let mut first = Frame::priority_of(vec![0xAA], SwitchCodec::Linear16_8k);
        first.data = bytes::Bytes::from_static(&[1]);
        let mut second = Frame::priority_of(vec![0xBB], SwitchCodec::Linear16_8k);
        second.data = bytes::Bytes::from_static(&[2]);
        buf.push_priority(first);
        buf.push_priority(second);
        assert_eq!(buf.queue[0].data[0], 1);
        assert_eq!(buf.queue[1].data[0], 2);
        assert!(!buf.queue[2].priority);
    }

    #[test]
    fn flush_non_priority_keeps_priority_frames() {
        let mut buf = JitterBuffer::new(10, 0);
        buf.push(pcm_frame(100));
        buf.push_priority(Frame::priority_of(vec![1u8; 50], SwitchCodec::Linear16_8k));
        buf.flush_non_priority();
        assert_eq!(buf.len(), 1);
        assert!(buf.queue[0].priority);
    }
}
