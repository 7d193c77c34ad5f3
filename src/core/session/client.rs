//! WebSocket session client for the realtime transcription service.
//!
//! Lifecycle: `Idle → AcquiringCredential → Connecting → Connected →
//! {Idle | Error}`. One client owns at most one live connection; starting
//! while a session is active is rejected rather than silently replacing it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐      ┌───────────────────┐      ┌─────────────────┐
//! │  FrameSink   │─────▶│ audio (mpsc, 32)  │─────▶│ connection task │
//! └──────────────┘      └───────────────────┘      └───────┬─────────┘
//!                                                          │
//!                       ┌───────────────────┐              │
//!                       │ events / errors   │◀─────────────┘
//!                       │ (mpsc, unbounded) │
//!                       └───────────────────┘
//! ```
//!
//! The audio channel is bounded and frames are dropped, not queued, when it
//! fills: stale audio is worse than missing audio for a live session.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use base64::prelude::*;
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use parking_lot::RwLock as SyncRwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};
use url::Url;

use super::credential::{SessionCredential, fetch_credential};
use super::messages::{EndOfStream, InputAudioChunk, ServerMessage, SetConfig};
use super::state::{SessionFlags, SessionStatus, StatusCell, classify_close};
use super::{StatusCallback, TranscriptEvent};
use crate::config::VoiceConfig;
use crate::core::encoder::AudioFrame;
use crate::errors::{VoiceError, VoiceResult};

/// Bounded capacity of the outbound audio channel.
const AUDIO_CHANNEL_CAPACITY: usize = 32;

/// How long `stop()` waits for the connection task to drain before aborting.
const STOP_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Receiving ends of one session's event and error streams.
///
/// Returned by [`TranscriptionSession::start`]; dropped when the session
/// ends.
pub struct SessionStream {
    pub events: mpsc::UnboundedReceiver<TranscriptEvent>,
    pub errors: mpsc::UnboundedReceiver<VoiceError>,
}

/// Cloneable, non-blocking handoff from the capture thread into the session.
///
/// Frames are dropped when the consumer is not keeping up; bounded memory is
/// preferred over buffering stale audio.
#[derive(Clone)]
pub struct FrameSink {
    tx: mpsc::Sender<Bytes>,
}

impl FrameSink {
    /// Deliver one frame. Never blocks; drops the frame when the channel is
    /// full or the session is gone.
    pub fn deliver(&self, frame: AudioFrame) {
        let len = frame.pcm().len();
        if self.tx.try_send(frame.into_bytes()).is_err() {
            debug!("Dropping {len}-byte audio frame (session not consuming)");
        }
    }
}

/// Client for one transcription session at a time.
pub struct TranscriptionSession {
    config: VoiceConfig,
    http: reqwest::Client,
    status: Arc<StatusCell>,
    flags: Arc<SessionFlags>,
    session_id: Arc<SyncRwLock<Option<String>>>,
    audio_tx: Option<mpsc::Sender<Bytes>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    connection_handle: Option<JoinHandle<()>>,
}

impl TranscriptionSession {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            status: Arc::new(StatusCell::default()),
            flags: Arc::new(SessionFlags::default()),
            session_id: Arc::new(SyncRwLock::new(None)),
            audio_tx: None,
            shutdown_tx: None,
            connection_handle: None,
        }
    }

    /// Current lifecycle status.
    pub fn status(&self) -> SessionStatus {
        self.status.get()
    }

    /// The most specific message for the current error, if any.
    pub fn error_message(&self) -> Option<String> {
        self.status.error_message()
    }

    /// Session id assigned by the service, once started.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    /// Register a callback invoked on every status transition.
    pub fn set_status_callback(&self, callback: Option<StatusCallback>) {
        self.status.set_callback(callback);
    }

    /// Handoff for encoded audio frames. `None` until `start()` succeeds.
    pub fn frame_sink(&self) -> Option<FrameSink> {
        self.audio_tx.clone().map(|tx| FrameSink { tx })
    }

    /// Start a session: fetch a fresh credential, open the stream, and wait
    /// for the service's session-started event.
    ///
    /// Valid only from `Idle` or `Error`. Resolves once the session is ready
    /// for audio, returning the event/error streams for this session.
    pub async fn start(&mut self) -> VoiceResult<SessionStream> {
        match self.status.get() {
            SessionStatus::Idle | SessionStatus::Error => {}
            other => {
                return Err(VoiceError::Config(format!(
                    "cannot start while session is {other}; call stop() first"
                )));
            }
        }

        self.flags.reset();
        self.status.clear_error();
        self.session_id.write().take();
        self.status.set(SessionStatus::AcquiringCredential).await;

        let credential = match fetch_credential(&self.http, &self.config.token_endpoint).await {
            Ok(credential) => credential,
            Err(err) => {
                error!("{err}");
                self.status.set_error(&err).await;
                return Err(err);
            }
        };

        let url = match credential {
            SessionCredential::SignedUrl(url) => url,
            SessionCredential::Token(token) => build_stream_url(&self.config, &token)?,
        };

        self.status.set(SessionStatus::Connecting).await;

        let (audio_tx, audio_rx) = mpsc::channel::<Bytes>(AUDIO_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<TranscriptEvent>();
        let (error_tx, mut error_rx) = mpsc::unbounded_channel::<VoiceError>();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(run_connection(ConnectionContext {
            url,
            sample_rate: self.config.sample_rate,
            send_remote_vad_config: self.config.send_remote_vad_config,
            status: self.status.clone(),
            flags: self.flags.clone(),
            session_id: self.session_id.clone(),
            audio_rx,
            shutdown_rx,
            event_tx,
            error_tx,
            ready_tx,
        }));

        self.audio_tx = Some(audio_tx);
        self.shutdown_tx = Some(shutdown_tx);
        self.connection_handle = Some(handle);

        let start_timeout = Duration::from_secs(self.config.session_start_timeout_secs);
        match timeout(start_timeout, ready_rx).await {
            Ok(Ok(())) => {
                info!("Transcription session ready");
                Ok(SessionStream {
                    events: event_rx,
                    errors: error_rx,
                })
            }
            Ok(Err(_)) => {
                // The connection task ended before the session started; it
                // has already recorded the specific error.
                self.abort_connection();
                let err = error_rx.try_recv().unwrap_or_else(|_| {
                    VoiceError::Connection(
                        "connection closed before session start".to_string(),
                    )
                });
                Err(err)
            }
            Err(_) => {
                self.abort_connection();
                let err = VoiceError::Connection(format!(
                    "timed out after {}s waiting for session start",
                    start_timeout.as_secs()
                ));
                error!("{err}");
                self.status.set_error(&err).await;
                Err(err)
            }
        }
    }

    /// Stop the session: mark intent, drain the stream with an `eos`
    /// courtesy message, and force `Idle` regardless of the close event.
    ///
    /// A `stop()` while already idle is a no-op with no status emission.
    pub async fn stop(&mut self) {
        if self.status.get() == SessionStatus::Idle && self.connection_handle.is_none() {
            debug!("stop() while idle; nothing to do");
            return;
        }

        self.flags.intentional_stop.store(true, Ordering::Release);

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.connection_handle.take() {
            let abort = handle.abort_handle();
            if timeout(STOP_DRAIN_TIMEOUT, handle).await.is_err() {
                warn!("Stream task did not drain in time; aborting");
                abort.abort();
            }
        }

        self.audio_tx = None;
        self.session_id.write().take();
        self.flags.reset();
        self.status.clear_error();
        self.status.set(SessionStatus::Idle).await;
        info!("Transcription session stopped");
    }

    /// Drop the connection task without the eos/close drain. Used when the
    /// session never became ready.
    fn abort_connection(&mut self) {
        self.shutdown_tx = None;
        self.audio_tx = None;
        if let Some(handle) = self.connection_handle.take() {
            handle.abort();
        }
    }
}

/// Build the stream URL for a plain token credential.
fn build_stream_url(config: &VoiceConfig, token: &str) -> VoiceResult<String> {
    let mut url = Url::parse(&config.asr_endpoint)
        .map_err(|e| VoiceError::Config(format!("invalid asr_endpoint: {e}")))?;

    url.query_pairs_mut()
        .append_pair("token", token)
        .append_pair("model_id", &config.model_id)
        .append_pair("audio_format", &format!("pcm_{}", config.sample_rate));

    if let Some(language) = &config.language {
        url.query_pairs_mut().append_pair("language_code", language);
    }

    Ok(url.into())
}

struct ConnectionContext {
    url: String,
    sample_rate: u32,
    send_remote_vad_config: bool,
    status: Arc<StatusCell>,
    flags: Arc<SessionFlags>,
    session_id: Arc<SyncRwLock<Option<String>>>,
    audio_rx: mpsc::Receiver<Bytes>,
    shutdown_rx: oneshot::Receiver<()>,
    event_tx: mpsc::UnboundedSender<TranscriptEvent>,
    error_tx: mpsc::UnboundedSender<VoiceError>,
    ready_tx: oneshot::Sender<()>,
}

/// The connection task: one per session, owns the socket until it closes.
async fn run_connection(ctx: ConnectionContext) {
    let ConnectionContext {
        url,
        sample_rate,
        send_remote_vad_config,
        status,
        flags,
        session_id,
        mut audio_rx,
        mut shutdown_rx,
        event_tx,
        error_tx,
        ready_tx,
    } = ctx;

    let (ws_stream, _response) = match connect_async(url.as_str()).await {
        Ok(pair) => pair,
        Err(e) => {
            let err = VoiceError::Connection(format!("failed to open stream: {e}"));
            error!("{err}");
            status.set_error(&err).await;
            let _ = error_tx.send(err);
            return;
        }
    };

    info!("Transcription stream opened");
    status.clear_error();
    status.set(SessionStatus::Connected).await;

    let opened_at = Instant::now();
    let (mut ws_sink, mut ws_source) = ws_stream.split();
    let mut ready_tx = Some(ready_tx);

    loop {
        tokio::select! {
            Some(pcm) = audio_rx.recv() => {
                if !flags.session_ready.load(Ordering::Acquire) {
                    debug!("Dropping {}-byte frame before session start", pcm.len());
                    continue;
                }

                let chunk = InputAudioChunk::new(BASE64_STANDARD.encode(&pcm), sample_rate);
                let json = match serde_json::to_string(&chunk) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("Failed to serialize audio chunk: {e}");
                        continue;
                    }
                };

                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    let err = VoiceError::Connection(format!("failed to send audio: {e}"));
                    error!("{err}");
                    status.set_error(&err).await;
                    let _ = error_tx.send(err);
                    break;
                }

                debug!("Sent {}-byte audio frame", pcm.len());
            }

            inbound = ws_source.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_text_message(
                            &text,
                            &mut ws_sink,
                            &mut ready_tx,
                            send_remote_vad_config,
                            &flags,
                            &session_id,
                            &event_tx,
                        )
                        .await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        if flags.intentional_stop.load(Ordering::Acquire) {
                            info!("Stream closed after stop request");
                        } else {
                            let code = frame.as_ref().map(|f| u16::from(f.code));
                            let err = classify_close(code, opened_at.elapsed());
                            error!("{err}");
                            status.set_error(&err).await;
                            let _ = error_tx.send(err);
                        }
                        break;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        debug!("Answering ping from service");
                        let _ = ws_sink.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Pong(_))) => {
                        debug!("Received pong from service");
                    }
                    Some(Ok(_)) => {
                        debug!("Ignoring non-text frame from service");
                    }
                    Some(Err(e)) => {
                        if !flags.intentional_stop.load(Ordering::Acquire) {
                            // A transport failure arrives with no close
                            // status; classify it like one.
                            warn!("Stream transport error: {e}");
                            let err = classify_close(None, opened_at.elapsed());
                            error!("{err}");
                            status.set_error(&err).await;
                            let _ = error_tx.send(err);
                        }
                        break;
                    }
                    None => {
                        if !flags.intentional_stop.load(Ordering::Acquire) {
                            let err = classify_close(None, opened_at.elapsed());
                            error!("{err}");
                            status.set_error(&err).await;
                            let _ = error_tx.send(err);
                        }
                        break;
                    }
                }
            }

            requested = &mut shutdown_rx => {
                // A dropped sender is an abort, not a stop request; only a
                // real stop gets the eos courtesy drain.
                if requested.is_ok() {
                    info!("Stop requested; draining stream");
                    if let Ok(eos) = serde_json::to_string(&EndOfStream::default()) {
                        let _ = ws_sink.send(Message::Text(eos.into())).await;
                    }
                    let _ = ws_sink.send(Message::Close(None)).await;
                }
                break;
            }
        }
    }

    info!("Transcription stream task finished");
}

/// Dispatch one inbound text message.
async fn handle_text_message(
    text: &str,
    ws_sink: &mut (impl Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    ready_tx: &mut Option<oneshot::Sender<()>>,
    send_remote_vad_config: bool,
    flags: &SessionFlags,
    session_id: &SyncRwLock<Option<String>>,
    event_tx: &mpsc::UnboundedSender<TranscriptEvent>,
) {
    match ServerMessage::parse(text) {
        Ok(ServerMessage::SessionStarted { session_id: id }) => {
            info!("Transcription session started: {id}");
            *session_id.write() = Some(id.clone());
            flags.session_ready.store(true, Ordering::Release);

            if let Some(tx) = ready_tx.take() {
                let _ = tx.send(());
            }

            // One-shot end-of-speech tuning for the service's own detector.
            if send_remote_vad_config && !flags.config_sent.swap(true, Ordering::AcqRel) {
                match serde_json::to_string(&SetConfig::default()) {
                    Ok(json) => {
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            warn!("Failed to send set_config: {e}");
                        }
                    }
                    Err(e) => warn!("Failed to serialize set_config: {e}"),
                }
            }

            let _ = event_tx.send(TranscriptEvent::SessionStarted { session_id: id });
        }
        Ok(ServerMessage::Partial { text, words }) => {
            let _ = event_tx.send(TranscriptEvent::Partial { text, words });
        }
        Ok(ServerMessage::Committed { text, words }) => {
            let _ = event_tx.send(TranscriptEvent::Committed { text, words });
        }
        Ok(ServerMessage::ConfigAck) => {
            debug!("Remote VAD config acknowledged");
            let _ = event_tx.send(TranscriptEvent::ConfigAck);
        }
        Ok(ServerMessage::Error { code, message }) => {
            error!("Service error ({code}): {message}");
            let _ = event_tx.send(TranscriptEvent::Error { code, message });
        }
        Ok(ServerMessage::Unknown(raw)) => {
            debug!("Ignoring unknown message type: {raw}");
        }
        Err(e) => {
            // Recovered locally; a malformed message never fails the session.
            let err = VoiceError::ProtocolParse(e.to_string());
            warn!("{err} (message dropped)");
        }
    }
}
