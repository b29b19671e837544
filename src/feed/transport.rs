//! Streaming transport seam and the WebSocket implementation.
//!
//! A [`Transport`] opens one socket per call and reports everything that
//! happens on it through an [`EventSink`]. The supervisor never touches the
//! socket directly; it only keeps the [`SocketHandle`] to close it.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::debug;

use crate::feed::supervisor::SupervisorEvent;
use crate::market::MarketId;

/// Close code reserved for closes requested by this crate.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame without a status code.
pub const NO_STATUS_RECEIVED: u16 = 1005;
/// Connection dropped without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// What a socket reports back, in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    /// Transport-level failure. A `Closed` event always follows.
    Error(String),
    Closed { code: u16, reason: String },
}

/// Posts socket events for one (market, epoch) pair to the supervisor.
#[derive(Debug, Clone)]
pub struct EventSink {
    market: MarketId,
    epoch: u64,
    events: mpsc::UnboundedSender<SupervisorEvent>,
}

impl EventSink {
    pub(crate) fn new(
        market: MarketId,
        epoch: u64,
        events: mpsc::UnboundedSender<SupervisorEvent>,
    ) -> Self {
        Self {
            market,
            epoch,
            events,
        }
    }

    pub fn market(&self) -> MarketId {
        self.market
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns false once the supervisor is gone.
    pub fn emit(&self, event: SocketEvent) -> bool {
        self.events
            .send(SupervisorEvent::Socket {
                market: self.market,
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// Owner's grip on an open socket.
pub trait SocketHandle: Send {
    /// Asks the transport to close with `code`. Idempotent.
    fn close(&mut self, code: u16);
}

/// Opens streaming sockets.
///
/// `open` must not block: connecting happens in the background and is
/// reported through `sink` as `Opened`, or as `Error` + `Closed` on failure.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn SocketHandle>;
}

/// WebSocket transport over tokio-tungstenite. Each socket runs in its own task.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsTransport;

struct WsHandle {
    close_tx: Option<oneshot::Sender<u16>>,
}

impl SocketHandle for WsHandle {
    fn close(&mut self, code: u16) {
        if let Some(tx) = self.close_tx.take() {
            // The task may already have finished on its own.
            let _ = tx.send(code);
        }
    }
}

impl Transport for WsTransport {
    fn open(&self, url: &str, sink: EventSink) -> Box<dyn SocketHandle> {
        let (close_tx, close_rx) = oneshot::channel();
        tokio::spawn(run_socket(url.to_string(), sink, close_rx));
        Box::new(WsHandle {
            close_tx: Some(close_tx),
        })
    }
}

/// Drives one WebSocket until it closes. Dropping the handle counts as a
/// normal close request.
async fn run_socket(url: String, sink: EventSink, mut close_rx: oneshot::Receiver<u16>) {
    let market = sink.market();

    let connected = tokio::select! {
        biased;
        requested = &mut close_rx => {
            let code = requested.unwrap_or(NORMAL_CLOSURE);
            sink.emit(SocketEvent::Closed { code, reason: "closed before open".to_string() });
            return;
        }
        result = connect_async(url.as_str()) => result,
    };

    let ws_stream = match connected {
        Ok((ws_stream, _response)) => ws_stream,
        Err(e) => {
            sink.emit(SocketEvent::Error(e.to_string()));
            sink.emit(SocketEvent::Closed {
                code: ABNORMAL_CLOSURE,
                reason: format!("connect failed: {e}"),
            });
            return;
        }
    };

    sink.emit(SocketEvent::Opened);
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            biased;
            requested = &mut close_rx => {
                let code = requested.unwrap_or(NORMAL_CLOSURE);
                let frame = CloseFrame {
                    code: CloseCode::from(code),
                    reason: String::new().into(),
                };
                if let Err(e) = write.send(Message::Close(Some(frame))).await {
                    debug!(market = %market, error = %e, "close frame not delivered");
                }
                sink.emit(SocketEvent::Closed { code, reason: "closed by client".to_string() });
                return;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    sink.emit(SocketEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        sink.emit(SocketEvent::Message(text));
                    }
                    Err(e) => debug!(market = %market, error = %e, "ignoring non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.as_str().to_owned()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    sink.emit(SocketEvent::Closed { code, reason });
                    return;
                }
                // Ping/pong are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    sink.emit(SocketEvent::Error(e.to_string()));
                    sink.emit(SocketEvent::Closed { code: ABNORMAL_CLOSURE, reason: e.to_string() });
                    return;
                }
                None => {
                    sink.emit(SocketEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "stream ended".to_string(),
                    });
                    return;
                }
            }
        }
    }
}
