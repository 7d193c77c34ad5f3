//! Microphone capture.
//!
//! One [`SampleSource`] capability, two implementations: the low-latency
//! [`WorkerSampleSource`] (fixed hardware buffer, processing on a dedicated
//! worker thread) and the [`FallbackSampleSource`] (device-default stream
//! config, processing inside the device callback). [`start_capture`] probes
//! the primary backend and substitutes the fallback transparently; behavior
//! and output are identical, only the sample-delivery mechanism differs.
//!
//! Capture runs off the async runtime entirely: cpal streams are not `Send`,
//! so each source owns its stream on a plain thread, the same way Handy-style
//! capture managers do. Blocks that the consumer cannot take are dropped,
//! never queued.

mod fallback;
mod resample;
mod worker;

pub use fallback::FallbackSampleSource;
pub use resample::BlockResampler;
pub use worker::WorkerSampleSource;

use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::{Device, SampleFormat, Stream, StreamConfig};
use tracing::{debug, warn};

use crate::errors::{VoiceError, VoiceResult};

/// Receives blocks of normalized mono samples at the pipeline rate.
///
/// Invoked from a capture-owned thread; implementations must hand off
/// quickly and never block.
pub type SampleBlockSink = Arc<dyn Fn(Vec<f32>) + Send + Sync>;

/// A running microphone capture backend.
pub trait SampleSource: Send {
    /// Stop capture and release the device. Idempotent.
    fn stop(&mut self);

    /// Short backend identifier for logs.
    fn backend_name(&self) -> &'static str;
}

/// Probe the primary low-latency backend, falling back to the
/// callback-driven one if it fails to initialize.
pub fn start_capture(
    device_name: Option<&str>,
    target_rate: u32,
    sink: SampleBlockSink,
) -> VoiceResult<Box<dyn SampleSource>> {
    match WorkerSampleSource::start(device_name, target_rate, sink.clone()) {
        Ok(source) => {
            debug!("Audio capture running on the {} backend", source.backend_name());
            Ok(Box::new(source))
        }
        Err(err) => {
            warn!("Low-latency capture backend unavailable ({err}); using fallback");
            let source = FallbackSampleSource::start(device_name, target_rate, sink)?;
            debug!("Audio capture running on the {} backend", source.backend_name());
            Ok(Box::new(source))
        }
    }
}

/// Resolve the capture device: by configured name, else the system default.
pub(crate) fn select_device(device_name: Option<&str>) -> VoiceResult<Device> {
    let host = cpal::default_host();

    match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| VoiceError::Audio(format!("cannot enumerate input devices: {e}")))?
            .find(|device| device.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| VoiceError::Audio(format!("input device '{name}' not found"))),
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::Audio("no default input device".to_string())),
    }
}

/// Average interleaved channels down to mono.
pub(crate) fn downmix_to_mono(data: &[f32], channels: u16, out: &mut Vec<f32>) {
    out.clear();

    if channels <= 1 {
        out.extend_from_slice(data);
        return;
    }

    let channels = channels as usize;
    out.reserve(data.len() / channels);
    for frame in data.chunks_exact(channels) {
        out.push(frame.iter().sum::<f32>() / channels as f32);
    }
}

/// Build an input stream delivering interleaved `f32` samples regardless of
/// the device's native format.
pub(crate) fn build_input_stream(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    mut on_samples: impl FnMut(&[f32]) + Send + 'static,
) -> VoiceResult<Stream> {
    let err_fn = |e| warn!("Capture stream error: {e}");

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            config,
            move |data: &[f32], _| on_samples(data),
            err_fn,
            None,
        ),
        SampleFormat::I16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                config,
                move |data: &[i16], _| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| s as f32 / 32768.0));
                    on_samples(&scratch);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::U16 => {
            let mut scratch = Vec::new();
            device.build_input_stream(
                config,
                move |data: &[u16], _| {
                    scratch.clear();
                    scratch.extend(data.iter().map(|&s| (s as f32 - 32768.0) / 32768.0));
                    on_samples(&scratch);
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(VoiceError::Audio(format!(
                "unsupported capture sample format: {other:?}"
            )));
        }
    };

    stream.map_err(|e| VoiceError::Audio(format!("failed to open capture stream: {e}")))
}
