//! WebSocket Control Channel (C3, spec.md §4.2).
//!
//! Connects to the control-server URL returned by
//! [`crate::api::LiveStreamApi::get_websocket_url`], dispatches incoming
//! frames, answers correlated requests, and sends a heartbeat after every
//! received frame once 30s have elapsed since the last one went out
//! (matching the original's `_try_heartbeat`, which never fires on a bare
//! receive timeout — only after a frame actually arrives).

pub mod protocol;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

use crate::error::{Disconnect, WsError};
use protocol::{Frame, Request, ResponseRegistry, RESPONSE_NAME};

/// Interval after which a heartbeat is due, and the receive-timeout bound
/// used by the main loop (original: `heartbeat_interval = 30`).
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How long a generic [`FC2WebSocket::send_and_wait`] call waits for a
/// correlated response, absent a more specific timeout.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);
/// Per-attempt timeout for [`FC2WebSocket::get_hls_information`] (§4.2: "5s
/// per attempt").
const HLS_INFO_TIMEOUT: Duration = Duration::from_secs(5);
/// Retry budget for [`FC2WebSocket::get_hls_information`].
const HLS_INFO_MAX_TRIES: u32 = 5;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the main loop stopped running — carries only `Clone`-able data so it
/// can sit behind a [`watch::Receiver`] and be observed by multiple callers.
#[derive(Debug, Clone)]
enum Termination {
    ServerDisconnection(Disconnect),
    ReceiveTimeout,
    Closed,
}

impl From<Termination> for WsError {
    fn from(t: Termination) -> Self {
        match t {
            Termination::ServerDisconnection(d) => WsError::ServerDisconnection(d),
            Termination::ReceiveTimeout => WsError::ReceiveTimeout(HEARTBEAT_INTERVAL),
            Termination::Closed => WsError::Closed,
        }
    }
}

/// A connected control channel. Comments arrive on the receiver handed back
/// by [`FC2WebSocket::connect`]; disconnection is observed via
/// [`FC2WebSocket::wait_disconnection`].
pub struct FC2WebSocket {
    registry: Arc<ResponseRegistry>,
    out_tx: mpsc::UnboundedSender<Message>,
    termination_rx: watch::Receiver<Option<Termination>>,
    main_loop: Mutex<Option<JoinHandle<()>>>,
}

impl FC2WebSocket {
    /// Connect and start the background read/heartbeat loop. `dump_path`,
    /// when set, mirrors every frame (sent and received) as a JSON line
    /// (`--dump-websocket`, §6).
    pub async fn connect(
        url: &str,
        dump_path: Option<PathBuf>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Value>), WsError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url).await?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (comments_tx, comments_rx) = mpsc::unbounded_channel();
        let (termination_tx, termination_rx) = watch::channel(None);
        let registry = Arc::new(ResponseRegistry::new());

        let dump_file = match dump_path {
            Some(path) => Some(tokio::fs::File::create(path).await?),
            None => None,
        };

        let main_loop = tokio::spawn(run_main_loop(
            stream,
            out_rx,
            Arc::clone(&registry),
            comments_tx,
            termination_tx,
            dump_file,
        ));

        Ok((
            Self {
                registry,
                out_tx,
                termination_rx,
                main_loop: Mutex::new(Some(main_loop)),
            },
            comments_rx,
        ))
    }

    /// Send `name(arguments)` and wait up to [`RESPONSE_TIMEOUT`] for the
    /// correlated response frame (original: `_send_message_and_wait`).
    pub async fn send_and_wait(&self, name: &str, arguments: Value) -> Result<Value, WsError> {
        self.send_and_wait_timeout(name, arguments, RESPONSE_TIMEOUT)
            .await
    }

    async fn send_and_wait_timeout(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<Value, WsError> {
        let (id, rx) = self.registry.register();
        let request = Request {
            name: name.to_string(),
            arguments,
            id,
        };
        let text = serde_json::to_string(&request)?;
        self.out_tx
            .send(Message::Text(text.into()))
            .map_err(|_| WsError::Closed)?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(WsError::Closed),
            Err(_) => Err(WsError::ReceiveTimeout(timeout)),
        }
    }

    /// Request the HLS playlist information, retrying with exponential
    /// backoff (`2^tries` seconds) up to [`HLS_INFO_MAX_TRIES`] times while
    /// the server has not yet populated `arguments.playlists` (original:
    /// `get_hls_information`). Each attempt times out after
    /// [`HLS_INFO_TIMEOUT`]; a timeout counts as a failed attempt exactly
    /// like a response missing `playlists`.
    pub async fn get_hls_information(&self) -> Result<Value, WsError> {
        for tries in 0..HLS_INFO_MAX_TRIES {
            let msg = self
                .send_and_wait_timeout("get_hls_information", json!({}), HLS_INFO_TIMEOUT)
                .await;
            match msg {
                Ok(arguments) if arguments.get("playlists").is_some() => return Ok(arguments),
                Ok(_) => debug!(tries, "hls information missing playlists, retrying"),
                Err(WsError::ReceiveTimeout(_)) => {
                    debug!(tries, "timeout reached waiting for hls information, retrying")
                }
                Err(e) => return Err(e),
            }
            let backoff = Duration::from_secs(1u64 << tries);
            tokio::time::sleep(backoff).await;
        }
        Err(WsError::EmptyPlaylist)
    }

    /// Resolve once the server disconnects or the connection is otherwise
    /// closed.
    pub async fn wait_disconnection(&self) -> WsError {
        let mut rx = self.termination_rx.clone();
        loop {
            if let Some(reason) = rx.borrow().clone() {
                return reason.into();
            }
            if rx.changed().await.is_err() {
                return WsError::Closed;
            }
        }
    }

    /// Cleanly shut down the underlying connection (drops the outbound
    /// sender so the writer side of the main loop observes end-of-stream).
    pub async fn close(&self) {
        if let Some(handle) = self.main_loop.lock().await.take() {
            handle.abort();
        }
    }
}

async fn run_main_loop(
    mut stream: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
    registry: Arc<ResponseRegistry>,
    comments_tx: mpsc::UnboundedSender<Value>,
    termination_tx: watch::Sender<Option<Termination>>,
    mut dump_file: Option<tokio::fs::File>,
) {
    let mut last_heartbeat = Instant::now();

    let termination = loop {
        tokio::select! {
            outgoing = out_rx.recv() => {
                match outgoing {
                    Some(msg) => {
                        dump_frame(&mut dump_file, "send", msg.to_text().unwrap_or_default()).await;
                        if let Err(e) = stream.send(msg).await {
                            warn!(error = %e, "failed to send websocket frame");
                            break Termination::Closed;
                        }
                    }
                    None => break Termination::Closed,
                }
            }
            received = tokio::time::timeout(HEARTBEAT_INTERVAL, stream.next()) => {
                match received {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        dump_frame(&mut dump_file, "recv", &text).await;
                        match dispatch(&text, &registry, &comments_tx) {
                            Ok(None) => {}
                            Ok(Some(reason)) => break reason,
                            Err(e) => {
                                warn!(error = %e, "malformed control frame");
                                continue;
                            }
                        }
                        if let Err(e) = try_heartbeat(&mut stream, &registry, &mut last_heartbeat).await {
                            warn!(error = %e, "failed to send heartbeat");
                            break Termination::Closed;
                        }
                    }
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        let _ = stream.send(Message::Pong(payload)).await;
                    }
                    Ok(Some(Ok(_))) => {}
                    Ok(Some(Err(e))) => {
                        warn!(error = %e, "websocket read error");
                        break Termination::Closed;
                    }
                    Ok(None) => break Termination::Closed,
                    // Receive timeout: fatal (§4.2, §5) — the original's
                    // `asyncio.wait_for(..., heartbeat_interval)` raises
                    // `TimeoutError`, ending the receive loop and surfacing
                    // through `wait_disconnection`. No heartbeat is ever
                    // sent on a bare timeout tick; it only fires after a
                    // frame is actually received.
                    Err(_elapsed) => {
                        warn!("no frame received within the heartbeat interval, disconnecting");
                        break Termination::ReceiveTimeout;
                    }
                }
            }
        }
    };

    registry.clear();
    let _ = termination_tx.send(Some(termination));
}

/// Dispatch one received frame; `Ok(Some(_))` means the loop should stop.
fn dispatch(
    text: &str,
    registry: &ResponseRegistry,
    comments_tx: &mpsc::UnboundedSender<Value>,
) -> Result<Option<Termination>, serde_json::Error> {
    let frame: Frame = serde_json::from_str(text)?;

    if frame.name == RESPONSE_NAME {
        if let Some(id) = frame.id {
            registry.fulfill(id, frame.arguments);
        } else {
            warn!("response frame missing id, dropping");
        }
        return Ok(None);
    }

    match frame.name.as_str() {
        "connect_complete" => trace!("control channel ready"),
        "control_disconnection" => {
            let code = frame.arguments.get("code").and_then(Value::as_i64).unwrap_or(0);
            return Ok(Some(Termination::ServerDisconnection(Disconnect::from_code(code))));
        }
        "comment" => {
            if let Some(comments) = frame.arguments.get("comments").and_then(Value::as_array) {
                for comment in comments {
                    let _ = comments_tx.send(comment.clone());
                }
            }
        }
        other => trace!(name = other, "ignoring unhandled control frame"),
    }
    Ok(None)
}

async fn try_heartbeat(
    stream: &mut WsStream,
    registry: &ResponseRegistry,
    last_heartbeat: &mut Instant,
) -> Result<(), WsError> {
    if last_heartbeat.elapsed() < HEARTBEAT_INTERVAL {
        return Ok(());
    }
    let request = Request {
        name: "heartbeat".to_string(),
        arguments: json!({}),
        id: registry.next_id(),
    };
    let text = serde_json::to_string(&request)?;
    stream.send(Message::Text(text.into())).await?;
    *last_heartbeat = Instant::now();
    Ok(())
}

async fn dump_frame(file: &mut Option<tokio::fs::File>, direction: &str, text: &str) {
    if let Some(file) = file {
        let line = format!("{direction} {text}\n");
        if let Err(e) = file.write_all(line.as_bytes()).await {
            warn!(error = %e, "failed to write websocket dump");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_routes_each_comment_to_comments_channel() {
        let registry = ResponseRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = dispatch(
            r#"{"name":"comment","arguments":{"comments":[{"text":"hi"},{"text":"there"}]}}"#,
            &registry,
            &tx,
        )
        .unwrap();
        assert!(result.is_none());
        assert_eq!(rx.try_recv().unwrap()["text"], "hi");
        assert_eq!(rx.try_recv().unwrap()["text"], "there");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dispatch_recognises_control_disconnection() {
        let registry = ResponseRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = dispatch(
            r#"{"name":"control_disconnection","arguments":{"code":4101}}"#,
            &registry,
            &tx,
        )
        .unwrap();
        match result {
            Some(Termination::ServerDisconnection(Disconnect::PaidProgram)) => {}
            other => panic!("unexpected termination: {other:?}"),
        }
    }

    #[test]
    fn dispatch_routes_response_frame_to_registry() {
        let registry = ResponseRegistry::new();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (id, response_rx) = registry.register();
        dispatch(
            &format!(r#"{{"name":"_response_","id":{id},"arguments":{{"ok":true}}}}"#),
            &registry,
            &tx,
        )
        .unwrap();
        assert_eq!(response_rx.try_recv().unwrap()["ok"], true);
    }
}
