//! Low-latency capture backend.
//!
//! Requests a fixed hardware buffer and keeps the device callback minimal:
//! raw blocks are handed to a dedicated worker thread over a bounded channel
//! and downmixed/resampled there. Blocks are dropped, not queued, when the
//! worker lags.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender, TrySendError};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::BufferSize;
use cpal::traits::{DeviceTrait, StreamTrait};
use tracing::{debug, info, warn};

use super::{BlockResampler, SampleBlockSink, SampleSource, build_input_stream, downmix_to_mono, select_device};
use crate::errors::{VoiceError, VoiceResult};

/// Fixed hardware buffer requested from the device, in frames.
const HARDWARE_BUFFER_FRAMES: u32 = 1024;

/// Raw blocks queued between the device callback and the worker.
const RAW_BLOCK_QUEUE: usize = 8;

/// Capture backend with a fixed low-latency buffer and a worker thread.
pub struct WorkerSampleSource {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerSampleSource {
    /// Probe the device for a fixed-buffer stream and start capturing.
    ///
    /// Fails when the device rejects the fixed buffer size, letting the
    /// caller substitute the fallback backend.
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
        let mut config: cpal::StreamConfig = supported.into();
        config.buffer_size = BufferSize::Fixed(HARDWARE_BUFFER_FRAMES);

        let (raw_tx, raw_rx) = mpsc::sync_channel::<Vec<f32>>(RAW_BLOCK_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<()>>();

        let thread_stop = stop.clone();
        let thread = std::thread::Builder::new()
            .name("tablescribe-capture".to_string())
            .spawn(move || {
                // The stream must live on this thread; cpal streams are not
                // Send.
                let stream = match build_input_stream(
                    &device,
                    &config,
                    sample_format,
                    move |data| forward_raw_block(&raw_tx, data),
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

                let mut resampler = match BlockResampler::new(device_rate, target_rate) {
                    Ok(resampler) => resampler,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));
                info!(
                    "Low-latency capture started ({device_rate}Hz, {channels}ch, {HARDWARE_BUFFER_FRAMES}-frame buffer)"
                );

                let mut mono = Vec::new();
                while !thread_stop.load(Ordering::Acquire) {
                    match raw_rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(block) => {
                            downmix_to_mono(&block, channels, &mut mono);
                            resampler.push(&mono, |resampled| sink(resampled.to_vec()));
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }

                drop(stream);
                debug!("Low-latency capture thread finished");
            })
            .map_err(|e| VoiceError::Audio(format!("failed to spawn capture thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop,
                thread: Some(thread),
            }),
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoiceError::Audio(
                    "capture thread exited before reporting readiness".to_string(),
                ))
            }
        }
    }
}

fn forward_raw_block(raw_tx: &SyncSender<Vec<f32>>, data: &[f32]) {
    match raw_tx.try_send(data.to_vec()) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => {
            debug!("Dropping capture block (worker not keeping up)");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}

impl SampleSource for WorkerSampleSource {
    fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Capture thread panicked during shutdown");
            }
        }
    }

    fn backend_name(&self) -> &'static str {
        "low-latency"
    }
}

impl Drop for WorkerSampleSource {
    fn drop(&mut self) {
        self.stop();
    }
}
