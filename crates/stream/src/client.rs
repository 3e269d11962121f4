//! Persistent WebSocket client for the job event stream.
//!
//! [`StreamClient`] owns one logical connection to the server's
//! `/jobs/ws` endpoint. A single spawned task runs the whole
//! lifecycle: connect, read frames into the [`Dispatcher`], flush the
//! log buffer on an interval, forward outbound frames, and reconnect
//! with exponential backoff after abnormal closes. Connection state is
//! published through a [`watch`] channel that never reports the same
//! state twice in a row.

use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use shelfsync_core::Timestamp;

use crate::config::StreamConfig;
use crate::dispatcher::Dispatcher;
use crate::queue::{OutboundQueue, QueueFull, DEFAULT_QUEUE_CAPACITY};
use crate::reconnect::{delay_for_attempt, ReconnectConfig};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of a [`StreamClient`].
///
/// Owned exclusively by the connection task; external code observes it
/// via [`StreamClient::state`] / [`StreamClient::watch_state`] and can
/// only influence it through `connect()` / `disconnect()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted. Terminal until an explicit
    /// [`StreamClient::connect`] call.
    Failed,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }
}

/// Errors surfaced by [`StreamClient::send`].
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// The connection is not open (and queueing does not apply).
    #[error("not connected to the job stream")]
    NotConnected,

    /// Queueing is enabled but the outbound queue is at capacity.
    #[error(transparent)]
    QueueFull(#[from] QueueFull),
}

/// How a live session ended, deciding the next state transition.
enum SessionEnd {
    /// `disconnect()` was called.
    Cancelled,
    /// The server closed with a normal close code.
    NormalClose,
    /// Socket error, unexpected EOF, or non-normal close code.
    Abnormal,
}

struct RunHandle {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

/// Resilient push-channel client for the job stream.
pub struct StreamClient {
    ws_url: String,
    reconnect: ReconnectConfig,
    log_flush_interval: std::time::Duration,
    dispatcher: Arc<Dispatcher>,
    /// Present only when queueing-while-connecting is enabled.
    outbound: Option<OutboundQueue>,
    state_tx: watch::Sender<ConnectionState>,
    /// Sender into the live session's write half; `None` while closed.
    writer: Mutex<Option<mpsc::UnboundedSender<String>>>,
    connected_at: Mutex<Option<Timestamp>>,
    /// Cause of the most recent connect failure or abnormal close.
    last_error: Mutex<Option<String>>,
    run: Mutex<Option<RunHandle>>,
}

impl StreamClient {
    /// Build a client from configuration. Does not connect yet.
    pub fn new(config: &StreamConfig, dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            ws_url: config.ws_url.clone(),
            reconnect: config.reconnect.clone(),
            log_flush_interval: config.log_flush_interval,
            dispatcher,
            outbound: config
                .outbound_queue_capacity
                .map(|cap| OutboundQueue::new(cap.max(1))),
            state_tx,
            writer: Mutex::new(None),
            connected_at: Mutex::new(None),
            last_error: Mutex::new(None),
            run: Mutex::new(None),
        })
    }

    /// Convenience constructor with queueing enabled at the default
    /// capacity ([`DEFAULT_QUEUE_CAPACITY`]).
    pub fn with_outbound_queue(config: &StreamConfig, dispatcher: Arc<Dispatcher>) -> Arc<Self> {
        let mut config = config.clone();
        config.outbound_queue_capacity = Some(
            config
                .outbound_queue_capacity
                .unwrap_or(DEFAULT_QUEUE_CAPACITY),
        );
        Self::new(&config, dispatcher)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch channel for connection-state changes.
    ///
    /// The channel only notifies on actual changes; two consecutive
    /// identical states are never reported.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// When the current connection opened, if one is open.
    pub fn connected_at(&self) -> Option<Timestamp> {
        *self.connected_at.lock().unwrap()
    }

    /// Why the client last left `Connected` (or failed to get there):
    /// the most recent connect failure or abnormal close. Cleared when
    /// a connection opens, so `None` after a clean lifecycle.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().unwrap().clone()
    }

    /// The dispatcher frames from this connection are routed into.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Start (or restart) the connection task.
    ///
    /// Idempotent while already connecting, connected, or
    /// reconnecting. After `Failed` or `Disconnected` a new task is
    /// spawned with a fresh attempt counter.
    pub fn connect(self: &Arc<Self>) {
        let mut run = self.run.lock().unwrap();
        if let Some(existing) = run.as_ref() {
            let state = self.state();
            if !existing.task.is_finished()
                && !existing.cancel.is_cancelled()
                && state != ConnectionState::Failed
                && state != ConnectionState::Disconnected
            {
                return;
            }
        }

        let cancel = CancellationToken::new();
        self.set_state(ConnectionState::Connecting);

        let client = Arc::clone(self);
        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            run_connection_loop(client, task_cancel).await;
        });

        *run = Some(RunHandle { cancel, task });
    }

    /// Intentional close: suppress reconnects, drop the session, and
    /// report `Disconnected` immediately. A reconnect timer firing
    /// after this call is a no-op.
    pub fn disconnect(&self) {
        {
            let mut run = self.run.lock().unwrap();
            if let Some(handle) = run.take() {
                handle.cancel.cancel();
            }
            // Published under the same lock the task publishes under,
            // so a just-cancelled task can never overwrite this.
            self.set_state(ConnectionState::Disconnected);
        }
        self.writer.lock().unwrap().take();
        self.connected_at.lock().unwrap().take();
    }

    /// Send one text frame to the server.
    ///
    /// Fails with [`StreamClientError::NotConnected`] unless the state
    /// is `Connected`, or `Connecting` with queueing enabled -- in the
    /// latter case the frame is held in FIFO order and flushed when
    /// the socket opens.
    pub fn send(&self, frame: String) -> Result<(), StreamClientError> {
        // The state check happens under the writer lock, which also
        // guards the session's drain-and-flip to `Connected`: a frame
        // can never land in the queue after it has been drained.
        let writer = self.writer.lock().unwrap();
        match self.state() {
            ConnectionState::Connected => writer
                .as_ref()
                .and_then(|tx| tx.send(frame).ok())
                .ok_or(StreamClientError::NotConnected),
            ConnectionState::Connecting => match &self.outbound {
                Some(queue) => Ok(queue.push(frame)?),
                None => Err(StreamClientError::NotConnected),
            },
            _ => Err(StreamClientError::NotConnected),
        }
    }

    /// Record a state change, notifying watchers only on an actual
    /// change.
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                tracing::debug!(from = ?current, to = ?next, "Connection state change");
                *current = next;
                true
            }
        });
    }

    /// State change on behalf of the connection task.
    ///
    /// Serialized against [`disconnect`](Self::disconnect) through the
    /// run-handle lock: once the task's token is cancelled its writes
    /// are discarded, so a stale task that wakes up after an
    /// intentional close can never overwrite the `Disconnected`
    /// reported there.
    fn set_state_from_task(&self, cancel: &CancellationToken, next: ConnectionState) {
        let _run = self.run.lock().unwrap();
        if cancel.is_cancelled() {
            return;
        }
        self.set_state(next);
    }

    fn record_error(&self, cause: String) {
        *self.last_error.lock().unwrap() = Some(cause);
    }
}

/// Connect to the `/jobs/ws` endpoint with a fresh client id.
async fn connect_ws(ws_url: &str) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let client_id = uuid::Uuid::new_v4();
    let url = format!("{ws_url}/jobs/ws?clientId={client_id}");
    let (ws_stream, _response) = connect_async(&url).await?;
    tracing::info!(%client_id, "Connected to job stream at {ws_url}");
    Ok(ws_stream)
}

/// Whole-lifecycle loop: connect, run the session, evaluate reconnect.
///
/// Exits on intentional disconnect, normal server close, or attempt
/// exhaustion (leaving the state at `Failed`).
async fn run_connection_loop(client: Arc<StreamClient>, cancel: CancellationToken) {
    let mut attempts: u32 = 0;

    loop {
        // All task-side publications go through the cancellation-aware
        // helper: `disconnect()` reports `Disconnected` synchronously,
        // and a cancelled task waking up afterwards must not undo it.
        client.set_state_from_task(&cancel, ConnectionState::Connecting);

        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect_ws(&client.ws_url) => result,
        };

        match connected {
            Ok(ws_stream) => {
                attempts = 0;
                *client.connected_at.lock().unwrap() = Some(chrono::Utc::now());
                client.last_error.lock().unwrap().take();

                let end = run_session(&client, ws_stream, &cancel).await;

                client.writer.lock().unwrap().take();
                client.connected_at.lock().unwrap().take();

                match end {
                    SessionEnd::Cancelled => return,
                    SessionEnd::NormalClose => {
                        client.set_state_from_task(&cancel, ConnectionState::Disconnected);
                        return;
                    }
                    SessionEnd::Abnormal => {
                        tracing::warn!("Job stream connection lost");
                    }
                }
            }
            Err(e) => {
                client.record_error(e.to_string());
                tracing::warn!(error = %e, "Failed to connect to job stream");
            }
        }

        // Reconnect evaluation.
        if cancel.is_cancelled() {
            return;
        }
        if attempts >= client.reconnect.max_attempts {
            tracing::error!(attempts, "Reconnect attempts exhausted, giving up");
            client.set_state_from_task(&cancel, ConnectionState::Failed);
            return;
        }

        client.set_state_from_task(&cancel, ConnectionState::Reconnecting);
        let delay = delay_for_attempt(attempts, &client.reconnect);
        attempts += 1;
        tracing::info!(
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect",
        );

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Drive one open socket until it closes.
///
/// Moves the outbound queue into the write channel ahead of any later
/// send (strict FIFO), then multiplexes inbound frames, queued writes,
/// the log-flush interval, and cancellation on the one task that owns
/// the socket.
async fn run_session(
    client: &Arc<StreamClient>,
    ws_stream: WsStream,
    cancel: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = ws_stream.split();

    let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<String>();
    {
        // One critical section over drain + writer install + state
        // flip. A concurrent send() holds the same lock, so it observes
        // either `Connecting` (and lands in the queue drained here) or
        // `Connected` (and lands in the channel, after every drained
        // frame) -- nothing can slip between the drain and the flip.
        let mut writer = client.writer.lock().unwrap();
        if cancel.is_cancelled() {
            return SessionEnd::Cancelled;
        }
        if let Some(queue) = &client.outbound {
            for frame in queue.drain() {
                let _ = writer_tx.send(frame);
            }
        }
        *writer = Some(writer_tx);
        client.set_state_from_task(cancel, ConnectionState::Connected);
    }

    // Armed only while connected; amortizes high-frequency log lines.
    let mut flush = tokio::time::interval(client.log_flush_interval);
    flush.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SessionEnd::Cancelled;
            }
            _ = flush.tick() => {
                client.dispatcher.flush_logs();
            }
            Some(frame) = writer_rx.recv() => {
                if sink.send(Message::Text(frame.into())).await.is_err() {
                    client.record_error("failed to write to the job stream".into());
                    return SessionEnd::Abnormal;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    client.dispatcher.dispatch_frame(text.as_str());
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::trace!("Ignoring binary frame on job stream");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                    // Handled automatically by tungstenite.
                }
                Some(Ok(Message::Close(frame))) => {
                    // Deliver anything still buffered before reporting
                    // the close.
                    client.dispatcher.flush_logs();
                    return if is_normal_close(frame.as_ref()) {
                        tracing::info!("Job stream closed by server");
                        SessionEnd::NormalClose
                    } else {
                        client.record_error("closed by server with a non-normal code".into());
                        SessionEnd::Abnormal
                    };
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    client.record_error(e.to_string());
                    tracing::error!(error = %e, "Job stream receive error");
                    return SessionEnd::Abnormal;
                }
                None => {
                    client.record_error("connection closed unexpectedly".into());
                    return SessionEnd::Abnormal;
                }
            }
        }
    }
}

fn is_normal_close(frame: Option<&CloseFrame>) -> bool {
    matches!(
        frame,
        Some(CloseFrame {
            code: CloseCode::Normal,
            ..
        })
    )
}
