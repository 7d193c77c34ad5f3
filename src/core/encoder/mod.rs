//! PCM frame encoder.
//!
//! Converts normalized `f32` samples from the capture path into fixed-size
//! frames of 16-bit signed little-endian PCM. The encoder is a leaf: it knows
//! nothing about the network or session state, and its only output is a
//! completed [`AudioFrame`] handed to the caller.

use bytes::Bytes;

/// One fixed-size block of PCM16 mono audio, immutable once produced.
///
/// Ownership transfers to the session client, which base64-encodes the bytes
/// into an outbound message and drops the frame.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pcm: Bytes,
}

impl AudioFrame {
    /// The little-endian PCM16 payload.
    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    /// Number of samples in the frame.
    pub fn sample_count(&self) -> usize {
        self.pcm.len() / 2
    }

    /// Consume the frame, yielding the payload.
    pub fn into_bytes(self) -> Bytes {
        self.pcm
    }
}

/// Convert one normalized sample to PCM16.
///
/// Input is clamped to [-1.0, 1.0]. Negative samples scale by 32768 and
/// positive by 32767 so the full negative range is used without overflowing
/// the positive extreme. Downstream decoding relies on this exact mapping.
#[inline]
pub fn encode_sample(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    let scaled = if clamped < 0.0 {
        clamped * 32768.0
    } else {
        clamped * 32767.0
    };
    scaled.round() as i16
}

/// Accumulates samples and emits full frames at block boundaries.
///
/// The remainder below a block boundary is carried over to the next push, so
/// no audio is lost between calls.
pub struct PcmFrameEncoder {
    frame_samples: usize,
    buffer: Vec<i16>,
}

impl PcmFrameEncoder {
    /// Create an encoder emitting frames of `frame_samples` samples.
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            buffer: Vec::with_capacity(frame_samples),
        }
    }

    /// Push a block of normalized samples, returning every frame completed by
    /// this push (possibly none, possibly several).
    pub fn push(&mut self, samples: &[f32]) -> Vec<AudioFrame> {
        let mut frames = Vec::new();

        for &sample in samples {
            self.buffer.push(encode_sample(sample));

            if self.buffer.len() == self.frame_samples {
                frames.push(self.flush());
            }
        }

        frames
    }

    /// Number of buffered samples below the next block boundary.
    pub fn pending_samples(&self) -> usize {
        self.buffer.len()
    }

    fn flush(&mut self) -> AudioFrame {
        let mut pcm = Vec::with_capacity(self.buffer.len() * 2);
        for sample in self.buffer.drain(..) {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }

        AudioFrame { pcm: Bytes::from(pcm) }
    }
}
