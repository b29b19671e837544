//! Per-market connection record and its state machine.
//!
//! A [`ConnectionRecord`] owns the socket handle and the reconnection
//! bookkeeping for one market. It only records transitions; scheduling and
//! opening sockets is left to the supervisor that owns it.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::feed::backoff::ReconnectPolicy;
use crate::feed::transport::{NORMAL_CLOSURE, SocketHandle};
use crate::market::MarketId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Close requested, waiting for the transport to confirm.
    Closing,
    Closed,
}

/// What the supervisor should do after a close event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Normal closure or no longer subscribed; nothing to schedule.
    Finished,
    /// Schedule reconnection attempt number `attempt` (1-based) after `delay`.
    Reconnect { delay: Duration, attempt: u32 },
    /// Ceiling reached; stays closed until re-subscribed.
    Exhausted { attempts: u32 },
}

struct PendingReconnect {
    delay: Duration,
    timer: JoinHandle<()>,
}

pub struct ConnectionRecord {
    market: MarketId,
    url: String,
    state: ConnectionState,
    socket: Option<Box<dyn SocketHandle>>,
    reconnect_attempts: u32,
    pending_reconnect: Option<PendingReconnect>,
    epoch: u64,
}

impl ConnectionRecord {
    pub fn new(market: MarketId, url: impl Into<String>) -> Self {
        Self {
            market,
            url: url.into(),
            state: ConnectionState::Closed,
            socket: None,
            reconnect_attempts: 0,
            pending_reconnect: None,
            epoch: 0,
        }
    }

    pub fn market(&self) -> MarketId {
        self.market
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Generation of the current (or last) socket.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn pending_reconnect_delay(&self) -> Option<Duration> {
        self.pending_reconnect.as_ref().map(|pending| pending.delay)
    }

    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open && self.socket.is_some()
    }

    /// Installs a freshly opened socket under `epoch`. Any previous socket is
    /// closed first so only one is ever live.
    pub(crate) fn begin_open(&mut self, epoch: u64, socket: Box<dyn SocketHandle>) {
        if let Some(mut previous) = self.socket.replace(socket) {
            previous.close(NORMAL_CLOSURE);
        }
        self.epoch = epoch;
        self.state = ConnectionState::Connecting;
    }

    pub(crate) fn mark_open(&mut self) {
        self.state = ConnectionState::Open;
        self.reconnect_attempts = 0;
    }

    /// Records a close reported by the transport and decides what follows.
    /// On `Reconnect` the attempt counter has already been incremented.
    pub(crate) fn mark_closed(
        &mut self,
        code: u16,
        policy: &ReconnectPolicy,
        subscribed: bool,
    ) -> CloseOutcome {
        self.state = ConnectionState::Closed;
        self.socket = None;

        if code == NORMAL_CLOSURE || !subscribed {
            return CloseOutcome::Finished;
        }
        if !policy.allows(self.reconnect_attempts) {
            return CloseOutcome::Exhausted {
                attempts: self.reconnect_attempts,
            };
        }

        let delay = policy.backoff.delay(self.reconnect_attempts);
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        CloseOutcome::Reconnect {
            delay,
            attempt: self.reconnect_attempts,
        }
    }

    pub(crate) fn arm_reconnect(&mut self, delay: Duration, timer: JoinHandle<()>) {
        if let Some(previous) = self.pending_reconnect.replace(PendingReconnect { delay, timer }) {
            previous.timer.abort();
        }
    }

    /// Clears the pending reconnect once its timer has fired.
    pub(crate) fn take_pending_reconnect(&mut self) -> Option<Duration> {
        self.pending_reconnect.take().map(|pending| pending.delay)
    }

    pub(crate) fn cancel_reconnect(&mut self) -> bool {
        match self.pending_reconnect.take() {
            Some(pending) => {
                pending.timer.abort();
                true
            }
            None => false,
        }
    }

    /// Explicit stop: cancel the timer before closing so it cannot reopen
    /// the socket afterwards.
    pub(crate) fn shutdown(&mut self) {
        self.cancel_reconnect();
        if let Some(mut socket) = self.socket.take() {
            socket.close(NORMAL_CLOSURE);
        }
        self.state = ConnectionState::Closed;
    }

    /// Like [`shutdown`](Self::shutdown) but waits for the transport's close
    /// event. Returns false if there was no socket to wait for.
    pub(crate) fn begin_close(&mut self) -> bool {
        self.cancel_reconnect();
        match self.socket.as_mut() {
            Some(socket) => {
                socket.close(NORMAL_CLOSURE);
                self.state = ConnectionState::Closing;
                true
            }
            None => {
                self.state = ConnectionState::Closed;
                false
            }
        }
    }
}

impl Drop for ConnectionRecord {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ConnectionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRecord")
            .field("market", &self.market)
            .field("url", &self.url)
            .field("state", &self.state)
            .field("has_socket", &self.socket.is_some())
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("pending_reconnect", &self.pending_reconnect_delay())
            .field("epoch", &self.epoch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct RecordingSocket {
        closes: Arc<Mutex<Vec<u16>>>,
    }

    impl SocketHandle for RecordingSocket {
        fn close(&mut self, code: u16) {
            self.closes.lock().unwrap().push(code);
        }
    }

    fn socket() -> (Box<dyn SocketHandle>, Arc<Mutex<Vec<u16>>>) {
        let closes = Arc::new(Mutex::new(Vec::new()));
        (
            Box::new(RecordingSocket {
                closes: Arc::clone(&closes),
            }),
            closes,
        )
    }

    fn open_record() -> ConnectionRecord {
        let mut record = ConnectionRecord::new(MarketId::Upbit, "ws://localhost/upbit");
        record.begin_open(1, socket().0);
        record.mark_open();
        record
    }

    #[test]
    fn test_open_transitions() {
        let mut record = ConnectionRecord::new(MarketId::Upbit, "ws://localhost/upbit");
        assert_eq!(record.state(), ConnectionState::Closed);
        assert!(!record.is_connected());

        record.begin_open(4, socket().0);
        assert_eq!(record.state(), ConnectionState::Connecting);
        assert_eq!(record.epoch(), 4);
        assert!(!record.is_connected());

        record.mark_open();
        assert_eq!(record.state(), ConnectionState::Open);
        assert!(record.is_connected());
    }

    #[test]
    fn test_normal_close_never_reconnects() {
        let policy = ReconnectPolicy::default();
        for attempts in 0..8 {
            let mut record = open_record();
            record.reconnect_attempts = attempts;
            let outcome = record.mark_closed(NORMAL_CLOSURE, &policy, true);
            assert_eq!(outcome, CloseOutcome::Finished);
            assert_eq!(record.reconnect_attempts(), attempts);
            assert_eq!(record.state(), ConnectionState::Closed);
        }
    }

    #[test]
    fn test_abnormal_close_schedules_backoff() {
        let policy = ReconnectPolicy::default();
        let mut record = open_record();

        let expected_ms = [1_000, 2_000, 4_000, 8_000, 16_000];
        for (i, &ms) in expected_ms.iter().enumerate() {
            record.begin_open(i as u64 + 2, socket().0);
            let outcome = record.mark_closed(1006, &policy, true);
            assert_eq!(
                outcome,
                CloseOutcome::Reconnect {
                    delay: Duration::from_millis(ms),
                    attempt: i as u32 + 1,
                }
            );
            assert!(!record.has_socket());
        }

        assert_eq!(
            record.mark_closed(1006, &policy, true),
            CloseOutcome::Exhausted { attempts: 5 }
        );
        assert_eq!(record.reconnect_attempts(), 5);
        assert!(!record.is_connected());
    }

    #[test]
    fn test_successful_open_resets_attempts() {
        let policy = ReconnectPolicy::default();
        let mut record = open_record();
        record.mark_closed(1011, &policy, true);
        record.mark_closed(1011, &policy, true);
        assert_eq!(record.reconnect_attempts(), 2);

        record.begin_open(9, socket().0);
        record.mark_open();
        assert_eq!(record.reconnect_attempts(), 0);
    }

    #[test]
    fn test_unsubscribed_close_does_not_reconnect() {
        let mut record = open_record();
        let outcome = record.mark_closed(1006, &ReconnectPolicy::default(), false);
        assert_eq!(outcome, CloseOutcome::Finished);
        assert_eq!(record.reconnect_attempts(), 0);
    }

    #[test]
    fn test_begin_open_closes_previous_socket() {
        let mut record = ConnectionRecord::new(MarketId::Bybit, "ws://localhost/bybit");
        let (first, first_closes) = socket();
        record.begin_open(1, first);
        record.begin_open(2, socket().0);
        assert_eq!(*first_closes.lock().unwrap(), vec![NORMAL_CLOSURE]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_timer_then_closes_normally() {
        let mut record = ConnectionRecord::new(MarketId::Binance, "ws://localhost/binance");
        let (sock, closes) = socket();
        record.begin_open(1, sock);
        let timer = tokio::spawn(std::future::pending::<()>());
        let abort = timer.abort_handle();
        record.arm_reconnect(Duration::from_secs(1), timer);

        record.shutdown();
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        assert!(abort.is_finished());
        assert!(record.pending_reconnect_delay().is_none());
        assert_eq!(*closes.lock().unwrap(), vec![NORMAL_CLOSURE]);
        assert_eq!(record.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_begin_close_waits_for_transport() {
        let mut record = open_record();
        assert!(record.begin_close());
        assert_eq!(record.state(), ConnectionState::Closing);
        assert!(!record.is_connected());

        let mut idle = ConnectionRecord::new(MarketId::Upbit, "ws://localhost/upbit");
        assert!(!idle.begin_close());
        assert_eq!(idle.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_arming_twice_aborts_first_timer() {
        let mut record = ConnectionRecord::new(MarketId::Upbit, "ws://localhost/upbit");
        let first = tokio::spawn(std::future::pending::<()>());
        let first_abort = first.abort_handle();
        record.arm_reconnect(Duration::from_secs(1), first);
        record.arm_reconnect(Duration::from_secs(2), tokio::spawn(async {}));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }

        assert!(first_abort.is_finished());
        assert_eq!(record.pending_reconnect_delay(), Some(Duration::from_secs(2)));
    }
}
