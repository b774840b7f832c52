//! End-to-end tests against an in-process inference server stub

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use sign_stream::{
    Prediction, PredictionHandler, StreamConfig, StreamConfigUpdate, StreamSession,
    TestPatternBackend, TransportState,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, Instant};
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// How the stub reacts to inbound frame submissions.
#[derive(Clone, Copy)]
enum ServerMode {
    /// Reply to every frame with a fixed prediction
    PredictEachFrame,
    /// Reply to the first frame with garbage, a server error, then a prediction
    NoisyThenPredict,
    /// Close the connection after the first frame
    CloseAfterFirstFrame,
    /// Accept frames, never reply
    Silent,
}

struct TestServer {
    url: String,
    frames: Arc<Mutex<Vec<Value>>>,
    accepts: Arc<AtomicUsize>,
}

impl TestServer {
    async fn spawn(mode: ServerMode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let frames = Arc::new(Mutex::new(Vec::new()));
        let accepts = Arc::new(AtomicUsize::new(0));

        let frames_clone = Arc::clone(&frames);
        let accepts_clone = Arc::clone(&accepts);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accepts_clone.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_client(stream, Arc::clone(&frames_clone), mode));
            }
        });

        Self {
            url: format!("http://{addr}"),
            frames,
            accepts,
        }
    }

    fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    fn accepts(&self) -> usize {
        self.accepts.load(Ordering::SeqCst)
    }
}

async fn handle_client(stream: TcpStream, frames: Arc<Mutex<Vec<Value>>>, mode: ServerMode) {
    let Ok(mut ws) = accept_async(stream).await else {
        return;
    };

    let mut replied = false;

    while let Some(Ok(msg)) = ws.next().await {
        let Message::Text(text) = msg else { continue };
        let Ok(value) = serde_json::from_str::<Value>(text.as_str()) else {
            continue;
        };
        if value["type"] != "frame" {
            continue;
        }

        frames.lock().push(value);

        let prediction = json!({
            "type": "prediction",
            "prediction": { "letter": "A", "confidence": 0.92 }
        });

        match mode {
            ServerMode::PredictEachFrame => {
                let _ = ws.send(Message::Text(prediction.to_string().into())).await;
            }
            ServerMode::NoisyThenPredict => {
                if !replied {
                    replied = true;
                    let _ = ws.send(Message::Text("{{not json".into())).await;
                    let _ = ws
                        .send(Message::Text(
                            json!({"type": "error", "message": "x"}).to_string().into(),
                        ))
                        .await;
                    let _ = ws.send(Message::Text(prediction.to_string().into())).await;
                }
            }
            ServerMode::CloseAfterFirstFrame => {
                let _ = ws.close(None).await;
                break;
            }
            ServerMode::Silent => {}
        }
    }
}

fn test_config(server_url: &str) -> StreamConfig {
    StreamConfig {
        server_url: server_url.to_string(),
        frame_rate: 20.0,
        quality: 0.7,
        width: 32,
        height: 24,
    }
}

fn collecting_handler() -> (PredictionHandler, Arc<Mutex<Vec<Prediction>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    let handler: PredictionHandler = Arc::new(move |p| sink.lock().push(p));
    (handler, received)
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn streams_frames_and_delivers_predictions() -> Result<()> {
    let server = TestServer::spawn(ServerMode::PredictEachFrame).await;
    let backend = Arc::new(TestPatternBackend::new());
    let mut session = StreamSession::new(backend, test_config(&server.url))?;

    let (handler, received) = collecting_handler();
    session.connect(handler).await?;

    assert_eq!(session.status(), TransportState::Streaming);

    wait_until("first prediction", || !received.lock().is_empty()).await;

    let prediction = received.lock()[0].clone();
    assert_eq!(prediction.letter, "A");
    assert!((prediction.confidence - 0.92).abs() < 1e-6);

    // Frame submissions carry a base64 image and an epoch-ms timestamp
    let frame = server.frames.lock()[0].clone();
    assert!(frame["image"].as_str().is_some_and(|s| !s.is_empty()));
    assert!(frame["timestamp"].as_u64().is_some_and(|t| t > 0));

    session.disconnect().await;
    assert_eq!(session.status(), TransportState::Closed);
    Ok(())
}

#[tokio::test]
async fn malformed_and_error_messages_are_dropped_without_crashing() -> Result<()> {
    let server = TestServer::spawn(ServerMode::NoisyThenPredict).await;
    let backend = Arc::new(TestPatternBackend::new());
    let mut session = StreamSession::new(backend, test_config(&server.url))?;

    let (handler, received) = collecting_handler();
    session.connect(handler).await?;

    wait_until("prediction after noise", || !received.lock().is_empty()).await;

    // Only the well-formed prediction reached the handler
    assert_eq!(received.lock().len(), 1);
    assert_eq!(received.lock()[0].letter, "A");

    let stats = session.transport_stats();
    assert_eq!(stats.messages_dropped, 1);
    assert_eq!(stats.server_errors, 1);
    assert_eq!(session.status(), TransportState::Streaming);

    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn connect_is_reentrant_and_opens_one_socket() -> Result<()> {
    let server = TestServer::spawn(ServerMode::Silent).await;
    let backend = Arc::new(TestPatternBackend::new());
    let mut session = StreamSession::new(backend, test_config(&server.url))?;

    let (handler, _) = collecting_handler();
    session.connect(Arc::clone(&handler)).await?;
    session.connect(handler).await?;

    wait_until("first frame", || server.frame_count() > 0).await;

    assert_eq!(server.accepts(), 1);
    assert_eq!(
        session
            .state_log()
            .iter()
            .filter(|s| **s == TransportState::Connecting)
            .count(),
        1
    );

    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn disconnect_twice_is_idempotent() -> Result<()> {
    let server = TestServer::spawn(ServerMode::Silent).await;
    let backend = Arc::new(TestPatternBackend::new());
    let mut session = StreamSession::new(backend, test_config(&server.url))?;

    let (handler, _) = collecting_handler();
    session.connect(handler).await?;

    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(session.status(), TransportState::Closed);
    assert_eq!(
        session
            .state_log()
            .iter()
            .filter(|s| **s == TransportState::Closed)
            .count(),
        1,
        "second disconnect must be a pure no-op"
    );
    Ok(())
}

#[tokio::test]
async fn size_and_quality_update_never_interrupts_the_stream() -> Result<()> {
    let server = TestServer::spawn(ServerMode::Silent).await;
    let backend = Arc::new(TestPatternBackend::new());
    let mut session = StreamSession::new(backend, test_config(&server.url))?;

    let (handler, _) = collecting_handler();
    session.connect(handler).await?;
    wait_until("first frame", || server.frame_count() > 0).await;

    let log_before = session.state_log();

    session
        .update_config(StreamConfigUpdate {
            width: Some(64),
            height: Some(48),
            quality: Some(0.9),
            ..Default::default()
        })
        .await?;

    assert_eq!(session.status(), TransportState::Streaming);
    assert_eq!(session.state_log(), log_before, "no transition allowed");

    // Frames keep flowing at the new size
    let count = server.frame_count();
    wait_until("frames after live update", || server.frame_count() > count).await;

    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn server_url_update_restarts_exactly_once() -> Result<()> {
    let server_a = TestServer::spawn(ServerMode::Silent).await;
    let server_b = TestServer::spawn(ServerMode::Silent).await;
    let backend = Arc::new(TestPatternBackend::new());
    let mut session = StreamSession::new(backend, test_config(&server_a.url))?;

    let (handler, _) = collecting_handler();
    session.connect(handler).await?;
    wait_until("frames on server A", || server_a.frame_count() > 0).await;

    session
        .update_config(StreamConfigUpdate {
            server_url: Some(server_b.url.clone()),
            ..Default::default()
        })
        .await?;

    use TransportState::*;
    assert_eq!(
        session.state_log(),
        vec![Idle, Connecting, Open, Streaming, Closing, Closed, Connecting, Open, Streaming],
        "exactly one disconnect-reconnect cycle"
    );

    wait_until("frames on server B", || server_b.frame_count() > 0).await;
    assert_eq!(server_b.accepts(), 1);

    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn frame_rate_update_restarts_and_keeps_surface() -> Result<()> {
    let server = TestServer::spawn(ServerMode::Silent).await;
    let backend = Arc::new(TestPatternBackend::new());
    let mut session =
        StreamSession::new(Arc::clone(&backend) as _, test_config(&server.url))?;

    let (handler, _) = collecting_handler();
    session.connect(handler).await?;
    wait_until("first frame", || server.frame_count() > 0).await;

    session
        .update_config(StreamConfigUpdate {
            frame_rate: Some(40.0),
            ..Default::default()
        })
        .await?;

    assert_eq!(session.status(), TransportState::Streaming);
    // Same camera stream survives the restart; no re-acquisition happened
    assert_eq!(backend.open_calls(), 1);
    assert_eq!(server.accepts(), 2);

    let count = server.frame_count();
    wait_until("frames after restart", || server.frame_count() > count).await;

    session.disconnect().await;
    Ok(())
}

#[tokio::test]
async fn unexpected_server_close_stops_sampling_without_reconnect() -> Result<()> {
    let server = TestServer::spawn(ServerMode::CloseAfterFirstFrame).await;
    let backend = Arc::new(TestPatternBackend::new());
    let mut session = StreamSession::new(backend, test_config(&server.url))?;

    let (handler, _) = collecting_handler();
    session.connect(handler).await?;

    wait_until("transport closed", || {
        session.status() == TransportState::Closed
    })
    .await;

    // Sampling stopped with the connection
    let encoded = session.encoder_stats().map(|s| s.frames_encoded);
    sleep(Duration::from_millis(300)).await;
    assert_eq!(session.encoder_stats().map(|s| s.frames_encoded), encoded);

    // No automatic reconnect: one Connecting, ever
    assert_eq!(
        session
            .state_log()
            .iter()
            .filter(|s| **s == TransportState::Connecting)
            .count(),
        1
    );
    assert_eq!(server.accepts(), 1);
    Ok(())
}

#[tokio::test]
async fn pause_discards_frames_and_resume_recovers() -> Result<()> {
    let server = TestServer::spawn(ServerMode::Silent).await;
    let backend = Arc::new(TestPatternBackend::new());
    let mut session = StreamSession::new(backend, test_config(&server.url))?;

    let (handler, _) = collecting_handler();
    session.connect(handler).await?;
    wait_until("first frame", || server.frame_count() > 0).await;

    session.pause();
    assert_eq!(session.status(), TransportState::Paused);

    // Allow in-flight frames to drain, then confirm the flow stops
    sleep(Duration::from_millis(200)).await;
    let paused_count = server.frame_count();
    sleep(Duration::from_millis(300)).await;
    assert_eq!(server.frame_count(), paused_count);

    session.resume();
    assert_eq!(session.status(), TransportState::Streaming);
    wait_until("frames after resume", || server.frame_count() > paused_count).await;

    session.disconnect().await;
    Ok(())
}
