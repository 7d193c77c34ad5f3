//! Mono block resampler for the capture path.
//!
//! Devices rarely capture at the pipeline rate, so blocks are resampled to
//! 16 kHz before they reach the encoder. Input is buffered to a fixed chunk
//! size because the FFT resampler needs uniform input lengths.

use rubato::{FftFixedIn, Resampler};

use crate::errors::{VoiceError, VoiceResult};

/// Input chunk size fed to the resampler.
const CHUNK_SAMPLES: usize = 1024;

/// Resamples mono `f32` blocks from the device rate to the pipeline rate.
///
/// Pass-through when the rates already match.
pub struct BlockResampler {
    resampler: Option<FftFixedIn<f32>>,
    chunk_in: Vec<f32>,
}

impl BlockResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> VoiceResult<Self> {
        let resampler = if in_rate == out_rate {
            None
        } else {
            Some(
                FftFixedIn::new(in_rate as usize, out_rate as usize, CHUNK_SAMPLES, 1, 1)
                    .map_err(|e| {
                        VoiceError::Audio(format!(
                            "cannot resample {in_rate}Hz capture to {out_rate}Hz: {e}"
                        ))
                    })?,
            )
        };

        Ok(Self {
            resampler,
            chunk_in: Vec::with_capacity(CHUNK_SAMPLES),
        })
    }

    /// Push a block of mono samples, emitting resampled output as full
    /// chunks complete. The sub-chunk remainder carries to the next push.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(&[f32])) {
        let Some(resampler) = self.resampler.as_mut() else {
            emit(samples);
            return;
        };

        while !samples.is_empty() {
            let space = CHUNK_SAMPLES - self.chunk_in.len();
            let take = space.min(samples.len());
            self.chunk_in.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.chunk_in.len() == CHUNK_SAMPLES {
                match resampler.process(&[&self.chunk_in[..]], None) {
                    Ok(output) => {
                        if let Some(channel) = output.first() {
                            emit(channel);
                        }
                    }
                    Err(e) => tracing::warn!("Resampler error, dropping chunk: {e}"),
                }
                self.chunk_in.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_when_rates_match() {
        let mut resampler = BlockResampler::new(16000, 16000).unwrap();
        let mut out = Vec::new();
        resampler.push(&[0.25; 100], |block| out.extend_from_slice(block));
        assert_eq!(out.len(), 100);
        assert!(out.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn downsamples_48k_to_16k_at_one_third_rate() {
        let mut resampler = BlockResampler::new(48000, 16000).unwrap();
        let mut out = Vec::new();
        // Feed 4 full chunks of silence.
        resampler.push(&[0.0; CHUNK_SAMPLES * 4], |block| {
            out.extend_from_slice(block)
        });
        // 48k -> 16k yields roughly one output sample per three input
        // samples; the FFT windowing shifts the exact count slightly.
        let expected = CHUNK_SAMPLES * 4 / 3;
        assert!(
            out.len().abs_diff(expected) <= CHUNK_SAMPLES / 3,
            "unexpected output length {}",
            out.len()
        );
        assert!(out.iter().all(|&s| s.abs() < 1e-3));
    }

    #[test]
    fn partial_chunk_is_held_until_complete() {
        let mut resampler = BlockResampler::new(48000, 16000).unwrap();
        let mut out = Vec::new();
        resampler.push(&[0.0; CHUNK_SAMPLES / 2], |block| {
            out.extend_from_slice(block)
        });
        assert!(out.is_empty());

        resampler.push(&[0.0; CHUNK_SAMPLES / 2], |block| {
            out.extend_from_slice(block)
        });
        assert!(!out.is_empty());
    }
}
