/// Frame buffer for detector engines
///
/// Collects streamed samples until a full analysis frame is available. Partial frames
/// are carried across `write` calls, which is why engines must clear this buffer at
/// utterance boundaries.

use crate::audio::AudioSample;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;
use tracing::trace;

/// Ring buffer slicing a sample stream into fixed-size frames
pub struct FrameBuffer {
    ring: HeapRb<AudioSample>,
    frame_size: usize,
}

impl FrameBuffer {
    /// Create a buffer producing frames of `frame_size` samples
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);

        Self {
            ring: HeapRb::new(frame_size),
            frame_size,
        }
    }

    /// Push samples and call `on_frame` for every completed frame
    pub fn write<F>(&mut self, mut samples: &[AudioSample], mut on_frame: F)
    where
        F: FnMut(&[AudioSample]),
    {
        let mut frame = vec![0; self.frame_size];

        while !samples.is_empty() {
            let written = self.ring.push_slice(samples);
            samples = &samples[written..];

            if self.ring.occupied_len() == self.frame_size {
                self.ring.pop_slice(&mut frame);
                trace!("Frame complete: {} samples", self.frame_size);
                on_frame(&frame);
            }
        }
    }

    /// Samples waiting for the rest of their frame
    pub fn pending(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Drop any partial frame
    pub fn clear(&mut self) {
        self.ring.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_complete_frames_only() {
        let mut buffer = FrameBuffer::new(4);
        let mut frames = Vec::new();

        buffer.write(&[1, 2, 3, 4, 5, 6], |frame| frames.push(frame.to_vec()));

        assert_eq!(frames, vec![vec![1, 2, 3, 4]]);
        assert_eq!(buffer.pending(), 2);
    }

    #[test]
    fn test_partial_frame_carries_across_writes() {
        let mut buffer = FrameBuffer::new(4);
        let mut frames = Vec::new();

        buffer.write(&[1, 2, 3], |frame| frames.push(frame.to_vec()));
        assert!(frames.is_empty());

        buffer.write(&[4, 5], |frame| frames.push(frame.to_vec()));
        assert_eq!(frames, vec![vec![1, 2, 3, 4]]);
        assert_eq!(buffer.pending(), 1);
    }

    #[test]
    fn test_large_write_spans_many_frames() {
        let mut buffer = FrameBuffer::new(100);
        let samples: Vec<i16> = (0..1050).map(|i| i as i16).collect();
        let mut count = 0;

        buffer.write(&samples, |frame| {
            assert_eq!(frame.len(), 100);
            count += 1;
        });

        assert_eq!(count, 10);
        assert_eq!(buffer.pending(), 50);
    }

    #[test]
    fn test_clear_drops_partial_frame() {
        let mut buffer = FrameBuffer::new(4);
        buffer.write(&[1, 2, 3], |_| {});
        buffer.clear();
        assert_eq!(buffer.pending(), 0);

        let mut frames = Vec::new();
        buffer.write(&[7, 8, 9, 10], |frame| frames.push(frame.to_vec()));
        assert_eq!(frames, vec![vec![7, 8, 9, 10]]);
    }

    #[test]
    fn test_zero_frame_size_is_clamped() {
        let buffer = FrameBuffer::new(0);
        assert_eq!(buffer.frame_size(), 1);
    }
}
