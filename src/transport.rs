//! WebSocket stream transport
//!
//! Maintains the persistent connection to the inference endpoint, ships
//! encoded frames outbound (fire-and-forget) and surfaces inbound prediction
//! events in arrival order. Connection loss stops frame sampling and is
//! surfaced as state; the transport never reconnects on its own — retry
//! policy belongs to the caller.

use crate::capture::CaptureSurface;
use crate::config::StreamConfig;
use crate::encoder::{EncoderHandle, EncoderStats, FrameEncoder};
use crate::protocol::{self, ClientMessage, Prediction, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Observer for asynchronous prediction events.
pub type PredictionHandler = Arc<dyn Fn(Prediction) + Send + Sync>;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Transport lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Open,
    Streaming,
    Paused,
    Closing,
    Closed,
    /// Absorbing error state; only `disconnect` leaves it.
    Errored,
}

impl TransportState {
    /// Whether a connection attempt or live connection exists.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            TransportState::Connecting
                | TransportState::Open
                | TransportState::Streaming
                | TransportState::Paused
        )
    }
}

/// The single live transport state per controller.
///
/// Shared into the transport so every incarnation of the connection writes
/// the same cell; the transition log makes restart cycles observable.
pub struct StateCell {
    current: Mutex<TransportState>,
    log: Mutex<Vec<TransportState>>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(TransportState::Idle),
            log: Mutex::new(vec![TransportState::Idle]),
        }
    }

    pub fn get(&self) -> TransportState {
        *self.current.lock()
    }

    /// Every state entered since creation, in order.
    pub fn log(&self) -> Vec<TransportState> {
        self.log.lock().clone()
    }

    fn set(&self, next: TransportState) {
        let mut current = self.current.lock();
        if *current == next {
            return;
        }
        trace!(from = ?*current, to = ?next, "Transport state transition");
        *current = next;
        self.log.lock().push(next);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Transport statistics snapshot.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub frames_sent: u64,
    pub predictions_received: u64,
    pub messages_dropped: u64,
    pub server_errors: u64,
}

#[derive(Default)]
struct Counters {
    frames_sent: AtomicU64,
    predictions_received: AtomicU64,
    messages_dropped: AtomicU64,
    server_errors: AtomicU64,
}

/// Persistent connection carrying frames out and prediction events in.
pub struct StreamTransport {
    config: Arc<RwLock<StreamConfig>>,
    state: Arc<StateCell>,
    handler: Arc<Mutex<Option<PredictionHandler>>>,
    paused: Arc<AtomicBool>,
    counters: Arc<Counters>,
    encoder: Option<EncoderHandle>,
    shutdown: Option<watch::Sender<bool>>,
    send_task: Option<JoinHandle<()>>,
    recv_task: Option<JoinHandle<()>>,
}

impl StreamTransport {
    pub fn new(config: Arc<RwLock<StreamConfig>>, state: Arc<StateCell>) -> Self {
        Self {
            config,
            state,
            handler: Arc::new(Mutex::new(None)),
            paused: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            encoder: None,
            shutdown: None,
            send_task: None,
            recv_task: None,
        }
    }

    /// Opens the connection and starts streaming frames from `surface`.
    ///
    /// No-op when a connection attempt or live connection already exists —
    /// calling connect twice never opens two sockets. Resolves once the
    /// transport has reached `Streaming`.
    pub async fn connect(
        &mut self,
        surface: Arc<dyn CaptureSurface>,
        on_prediction: PredictionHandler,
    ) -> Result<(), TransportError> {
        if self.state.get().is_active() {
            debug!("Transport already active, ignoring connect");
            return Ok(());
        }

        let url = protocol::ws_url(&self.config.read().server_url);
        info!(url = %url, "Connecting to inference server");
        self.state.set(TransportState::Connecting);

        let ws = match connect_async(url.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(e) => {
                warn!(url = %url, error = %e, "WebSocket connect failed");
                self.state.set(TransportState::Errored);
                return Err(e.into());
            }
        };

        self.state.set(TransportState::Open);
        *self.handler.lock() = Some(on_prediction);
        self.paused.store(false, Ordering::Release);

        let (encoder, frame_rx) = FrameEncoder::start(surface, Arc::clone(&self.config));
        self.encoder = Some(encoder.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.shutdown = Some(shutdown_tx);

        let (ws_tx, ws_rx) = ws.split();

        self.send_task = Some(tokio::spawn(run_send_loop(
            ws_tx,
            frame_rx,
            shutdown_rx.clone(),
            Arc::clone(&self.paused),
            Arc::clone(&self.state),
            encoder.clone(),
            Arc::clone(&self.counters),
        )));

        self.recv_task = Some(tokio::spawn(run_recv_loop(
            ws_rx,
            shutdown_rx,
            Arc::clone(&self.handler),
            Arc::clone(&self.state),
            encoder,
            Arc::clone(&self.counters),
        )));

        self.state.set(TransportState::Streaming);
        info!("Streaming started");
        Ok(())
    }

    /// Tears the connection down: sampling stops first (no frames in flight
    /// afterwards), then the socket closes, then the callback reference is
    /// dropped so late results are discarded. Idempotent; safe when already
    /// Closed or Idle.
    pub async fn disconnect(&mut self) {
        let state = self.state.get();
        if matches!(state, TransportState::Idle | TransportState::Closed) {
            debug!(state = ?state, "Transport already down, ignoring disconnect");
            return;
        }

        info!("Disconnecting stream transport");
        self.state.set(TransportState::Closing);

        if let Some(encoder) = self.encoder.take() {
            encoder.stop();
        }

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }

        // Let the send loop flush its close frame, then reap the reader.
        if let Some(task) = self.send_task.take() {
            let _ = task.await;
        }
        if let Some(task) = self.recv_task.take() {
            task.abort();
            let _ = task.await;
        }

        *self.handler.lock() = None;
        self.paused.store(false, Ordering::Release);
        self.state.set(TransportState::Closed);
        info!("Stream transport closed");
    }

    /// Stops forwarding frames while keeping the connection open.
    pub fn pause(&self) {
        if self.state.get() == TransportState::Streaming {
            self.paused.store(true, Ordering::Release);
            self.state.set(TransportState::Paused);
        }
    }

    /// Resumes frame forwarding after a pause.
    pub fn resume(&self) {
        if self.state.get() == TransportState::Paused {
            self.paused.store(false, Ordering::Release);
            self.state.set(TransportState::Streaming);
        }
    }

    pub fn state(&self) -> TransportState {
        self.state.get()
    }

    pub fn stats(&self) -> TransportStats {
        TransportStats {
            frames_sent: self.counters.frames_sent.load(Ordering::Relaxed),
            predictions_received: self.counters.predictions_received.load(Ordering::Relaxed),
            messages_dropped: self.counters.messages_dropped.load(Ordering::Relaxed),
            server_errors: self.counters.server_errors.load(Ordering::Relaxed),
        }
    }

    pub fn encoder_stats(&self) -> Option<EncoderStats> {
        self.encoder.as_ref().map(|e| e.stats())
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        // Best-effort teardown; disconnect() is the proper path
        if let Some(encoder) = self.encoder.take() {
            encoder.stop();
        }
        if let Some(task) = self.send_task.take() {
            task.abort();
        }
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
    }
}

/// Forwards encoded frames to the socket, fire-and-forget per frame.
async fn run_send_loop(
    mut ws_tx: WsSink,
    mut frame_rx: mpsc::Receiver<crate::protocol::EncodedFrame>,
    mut shutdown: watch::Receiver<bool>,
    paused: Arc<AtomicBool>,
    state: Arc<StateCell>,
    encoder: EncoderHandle,
    counters: Arc<Counters>,
) {
    debug!("Frame send loop started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    // Encoder stopped; nothing more to send
                    break;
                };

                if paused.load(Ordering::Acquire) {
                    continue;
                }

                let payload = ClientMessage::frame(&frame).to_json();
                if let Err(e) = ws_tx.send(Message::Text(payload.into())).await {
                    warn!(error = %e, "Failed to send frame, stopping sampling");
                    encoder.stop();
                    if !matches!(state.get(), TransportState::Closing | TransportState::Closed) {
                        state.set(TransportState::Errored);
                    }
                    break;
                }
                counters.frames_sent.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    debug!("Frame send loop stopped");
}

/// Delivers inbound messages to the registered handler in arrival order.
async fn run_recv_loop(
    mut ws_rx: WsStream,
    mut shutdown: watch::Receiver<bool>,
    handler: Arc<Mutex<Option<PredictionHandler>>>,
    state: Arc<StateCell>,
    encoder: EncoderHandle,
    counters: Arc<Counters>,
) {
    debug!("Receive loop started");

    loop {
        let msg = tokio::select! {
            _ = shutdown.changed() => break,
            msg = ws_rx.next() => msg,
        };

        match msg {
            Some(Ok(Message::Text(text))) => match ServerMessage::parse(text.as_str()) {
                Some(ServerMessage::Prediction { prediction }) => {
                    counters.predictions_received.fetch_add(1, Ordering::Relaxed);
                    trace!(letter = %prediction.letter, confidence = prediction.confidence,
                        "Prediction received");
                    let callback = handler.lock().clone();
                    if let Some(callback) = callback {
                        callback(prediction);
                    }
                }
                Some(ServerMessage::Error { message }) => {
                    counters.server_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(message = %message, "Server reported an error");
                }
                None => {
                    counters.messages_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!("Dropping unparseable server message");
                }
            },
            // Pings are answered by the library; other frames carry nothing for us
            Some(Ok(Message::Close(_))) | None => {
                info!("Connection closed by server");
                encoder.stop();
                if !matches!(state.get(), TransportState::Closing | TransportState::Closed) {
                    state.set(TransportState::Closed);
                }
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error, stopping sampling");
                encoder.stop();
                if !matches!(state.get(), TransportState::Closing | TransportState::Closed) {
                    state.set(TransportState::Errored);
                }
                break;
            }
        }
    }

    debug!("Receive loop stopped");
}
