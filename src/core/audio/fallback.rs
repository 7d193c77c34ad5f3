//! Callback-driven capture backend.
//!
//! Substituted when the low-latency backend cannot initialize. Uses the
//! device's default stream config and performs downmix/resample inside the
//! device callback itself; output is identical to the primary backend, only
//! the delivery mechanism differs.

use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, StreamTrait};
use tracing::{debug, info, warn};

use super::{BlockResampler, SampleBlockSink, SampleSource, build_input_stream, downmix_to_mono, select_device};
use crate::errors::{VoiceError, VoiceResult};

/// Capture backend processing samples in the device callback.
pub struct FallbackSampleSource {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl FallbackSampleSource {
    pub fn start(
        device_name: Option<&str>,
        target_rate: u32,
        sink: SampleBlockSink,
    ) -> VoiceResult<Self> {
        let device = select_device(device_name)?;
        let supported = device
            .default_input_config()
            .map_err(|e| VoiceError::Audio(format!("no usable input config: {e}")))?;

        let sample_format = supported.sample_format();
        let channels = supported.channels();
        let device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let mut resampler = BlockResampler::new(device_rate, target_rate)?;

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<()>>();

        let thread = std::thread::Builder::new()
            .name("tablescribe-capture-fallback".to_string())
            .spawn(move || {
                let mut mono = Vec::new();
                let stream = match build_input_stream(
                    &device,
                    &config,
                    sample_format,
                    move |data| {
                        downmix_to_mono(data, channels, &mut mono);
                        resampler.push(&mono, |resampled| sink(resampled.to_vec()));
                    },
                ) {
                    Ok(stream) => stream,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(VoiceError::Audio(format!(
                        "failed to start capture stream: {e}"
                    ))));
                    return;
                }

                let _ = ready_tx.send(Ok(()));
                info!("Fallback capture started ({device_rate}Hz, {channels}ch, default buffer)");

                // Park until stop; the stream lives on this thread.
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Fallback capture thread finished");
            })
            .map_err(|e| VoiceError::Audio(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                drop(stop_tx);
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                drop(stop_tx);
                let _ = thread.join();
                Err(VoiceError::Audio(
                    "capture thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }
}

impl SampleSource for FallbackSampleSource {
    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked during shutdown");
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "callback-fallback"
    }
}

impl Drop for FallbackSampleSource {
    fn drop(&mut self) {
        self.stop();
    }
}
