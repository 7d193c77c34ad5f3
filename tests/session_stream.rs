//! Streaming session behavior against an in-test recognition server.

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::routing::get;
use base64::prelude::*;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

use tablescribe::core::encoder::PcmFrameEncoder;
use tablescribe::core::session::{SessionStatus, TranscriptionSession};
use tablescribe::{TranscriptEvent, VoiceConfig};

type ServerSocket = WebSocketStream<TcpStream>;

const SESSION_STARTED: &str = r#"{"message_type":"session_started","session_id":"sess_test"}"#;

/// Bind a raw WebSocket listener for the mock recognition service.
async fn bind_asr_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Serve a signed URL pointing at the mock recognition service.
async fn spawn_signed_url_endpoint(asr_addr: SocketAddr) -> SocketAddr {
    let app = Router::new().route(
        "/token",
        get(move || async move {
            axum::Json(json!({"signed_url": format!("ws://{asr_addr}/stream")}))
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config_for(token_addr: SocketAddr, send_remote_vad_config: bool) -> VoiceConfig {
    VoiceConfig {
        token_endpoint: format!("http://{token_addr}/token"),
        send_remote_vad_config,
        ..VoiceConfig::default()
    }
}

/// Accept one connection and confirm session start.
async fn accept_session(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = listener.accept().await.unwrap();
    let mut socket = accept_async(stream).await.unwrap();
    socket
        .send(Message::Text(SESSION_STARTED.into()))
        .await
        .unwrap();
    socket
}

/// Read the next text message as JSON.
async fn next_json(socket: &mut ServerSocket) -> Value {
    loop {
        match socket.next().await.expect("socket ended").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn wait_for_status(session: &TranscriptionSession, expected: SessionStatus) {
    for _ in 0..200 {
        if session.status() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "session never reached {expected}; stuck at {} ({:?})",
        session.status(),
        session.error_message()
    );
}

#[tokio::test]
async fn start_uses_signed_url_and_streams_audio_frames() {
    let (listener, asr_addr) = bind_asr_listener().await;
    let token_addr = spawn_signed_url_endpoint(asr_addr).await;

    let server = tokio::spawn(async move {
        let mut socket = accept_session(&listener).await;

        let chunk = next_json(&mut socket).await;
        assert_eq!(chunk["message_type"], "input_audio_chunk");
        assert_eq!(chunk["sample_rate"], 16000);

        let pcm = BASE64_STANDARD
            .decode(chunk["audio_base_64"].as_str().unwrap())
            .unwrap();
        pcm
    });

    let mut session = TranscriptionSession::new(config_for(token_addr, false));
    let _stream = session.start().await.unwrap();
    assert_eq!(session.status(), SessionStatus::Connected);
    assert_eq!(session.session_id().as_deref(), Some("sess_test"));

    // Encode one full frame and push it through the sink.
    let mut encoder = PcmFrameEncoder::new(4);
    let frames = encoder.push(&[0.0, 0.5, -0.5, 1.0]);
    let expected_pcm = frames[0].pcm().to_vec();
    session.frame_sink().unwrap().deliver(frames[0].clone());

    let received = server.await.unwrap();
    assert_eq!(received, expected_pcm);

    session.stop().await;
    assert_eq!(session.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn remote_vad_config_is_sent_once_after_session_start() {
    let (listener, asr_addr) = bind_asr_listener().await;
    let token_addr = spawn_signed_url_endpoint(asr_addr).await;

    let server = tokio::spawn(async move {
        let mut socket = accept_session(&listener).await;
        next_json(&mut socket).await
    });

    let mut session = TranscriptionSession::new(config_for(token_addr, true));
    let _stream = session.start().await.unwrap();

    let set_config = server.await.unwrap();
    assert_eq!(set_config["message_type"], "set_config");
    assert_eq!(set_config["config"]["commit_strategy"], "vad");
    assert_eq!(set_config["config"]["vad_silence_threshold_secs"], 0.5);

    session.stop().await;
}

#[tokio::test]
async fn transcript_events_flow_to_the_consumer() {
    let (listener, asr_addr) = bind_asr_listener().await;
    let token_addr = spawn_signed_url_endpoint(asr_addr).await;

    tokio::spawn(async move {
        let mut socket = accept_session(&listener).await;
        socket
            .send(Message::Text(
                r#"{"message_type":"partial_transcript","text":"we open the"}"#.into(),
            ))
            .await
            .unwrap();
        socket
            .send(Message::Text(
                r#"{"message_type":"committed_transcript","text":"we open the door"}"#.into(),
            ))
            .await
            .unwrap();
        // Unknown types must be dropped without ending the session.
        socket
            .send(Message::Text(r#"{"message_type":"telemetry","x":1}"#.into()))
            .await
            .unwrap();
        socket
            .send(Message::Text(
                r#"{"type":"quotaExceededError","message":"quota exhausted"}"#.into(),
            ))
            .await
            .unwrap();

        // Keep the socket open until the client hangs up.
        while socket.next().await.is_some() {}
    });

    let mut session = TranscriptionSession::new(config_for(token_addr, false));
    let mut stream = session.start().await.unwrap();

    let mut partials = Vec::new();
    let mut committed = Vec::new();
    let mut service_errors = Vec::new();

    while let Some(event) = stream.events.recv().await {
        match event {
            TranscriptEvent::SessionStarted { .. } => {}
            TranscriptEvent::Partial { text, .. } => partials.push(text),
            TranscriptEvent::Committed { text, .. } => committed.push(text),
            TranscriptEvent::Error { code, message } => {
                service_errors.push((code, message));
                break;
            }
            TranscriptEvent::ConfigAck => {}
        }
    }

    assert_eq!(partials, ["we open the"]);
    assert_eq!(committed, ["we open the door"]);
    assert_eq!(
        service_errors,
        [("quotaExceededError".to_string(), "quota exhausted".to_string())]
    );

    session.stop().await;
}

#[tokio::test]
async fn policy_close_reports_credential_expiry() {
    let (listener, asr_addr) = bind_asr_listener().await;
    let token_addr = spawn_signed_url_endpoint(asr_addr).await;

    tokio::spawn(async move {
        let mut socket = accept_session(&listener).await;
        tokio::time::sleep(Duration::from_millis(180)).await;
        socket
            .close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "token expired".into(),
            }))
            .await
            .unwrap();
    });

    let mut session = TranscriptionSession::new(config_for(token_addr, false));
    let _stream = session.start().await.unwrap();

    wait_for_status(&session, SessionStatus::Error).await;
    let message = session.error_message().unwrap();
    assert!(
        message.contains("credential"),
        "expected a credential-specific message, got '{message}'"
    );
}

#[tokio::test]
async fn unrequested_clean_close_is_an_error() {
    let (listener, asr_addr) = bind_asr_listener().await;
    let token_addr = spawn_signed_url_endpoint(asr_addr).await;

    tokio::spawn(async move {
        let mut socket = accept_session(&listener).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        socket
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }))
            .await
            .unwrap();
    });

    let mut session = TranscriptionSession::new(config_for(token_addr, false));
    let _stream = session.start().await.unwrap();

    wait_for_status(&session, SessionStatus::Error).await;
    let message = session.error_message().unwrap();
    assert!(
        message.contains("without a stop request"),
        "expected the unrequested-close message, got '{message}'"
    );
}

#[tokio::test]
async fn mid_session_drop_is_classified_as_unexpected() {
    let (listener, asr_addr) = bind_asr_listener().await;
    let token_addr = spawn_signed_url_endpoint(asr_addr).await;

    tokio::spawn(async move {
        let socket = accept_session(&listener).await;
        tokio::time::sleep(Duration::from_millis(600)).await;
        // Drop the TCP stream without a close handshake.
        drop(socket);
    });

    let mut session = TranscriptionSession::new(config_for(token_addr, false));
    let _stream = session.start().await.unwrap();

    wait_for_status(&session, SessionStatus::Error).await;
    let message = session.error_message().unwrap();
    assert!(
        message.contains("unexpected") || message.contains("mid-session"),
        "expected an unexpected-drop message, got '{message}'"
    );
}

#[tokio::test]
async fn stop_sends_eos_before_closing() {
    let (listener, asr_addr) = bind_asr_listener().await;
    let token_addr = spawn_signed_url_endpoint(asr_addr).await;

    let server = tokio::spawn(async move {
        let mut socket = accept_session(&listener).await;
        let eos = next_json(&mut socket).await;
        let saw_close = matches!(socket.next().await, Some(Ok(Message::Close(_))));
        (eos, saw_close)
    });

    let mut session = TranscriptionSession::new(config_for(token_addr, false));
    let _stream = session.start().await.unwrap();
    session.stop().await;

    let (eos, saw_close) = server.await.unwrap();
    assert_eq!(eos["message_type"], "eos");
    assert!(saw_close);
    assert_eq!(session.status(), SessionStatus::Idle);
    assert!(session.error_message().is_none());
}

#[tokio::test]
async fn session_start_timeout_is_a_connection_error() {
    let (listener, asr_addr) = bind_asr_listener().await;
    let token_addr = spawn_signed_url_endpoint(asr_addr).await;

    tokio::spawn(async move {
        // Accept but never send session_started.
        let (stream, _) = listener.accept().await.unwrap();
        let socket = accept_async(stream).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    });

    let config = VoiceConfig {
        session_start_timeout_secs: 1,
        ..config_for(token_addr, false)
    };

    let mut session = TranscriptionSession::new(config);
    let err = session.start().await.unwrap_err();
    assert!(err.to_string().contains("timed out"));
    assert_eq!(session.status(), SessionStatus::Error);
}
