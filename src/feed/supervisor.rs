//! Connection supervisor.
//!
//! The [`Supervisor`] owns every [`ConnectionRecord`] and is the only code
//! that mutates them. Socket tasks and reconnect timers never touch records;
//! they post [`SupervisorEvent`]s which the supervisor applies one at a time.
//! Every event carries the epoch of the socket (or timer) it belongs to, so
//! events from a socket that has since been replaced or stopped are dropped.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::feed::DataCallback;
use crate::feed::backoff::ReconnectPolicy;
use crate::feed::connection::{CloseOutcome, ConnectionRecord, ConnectionState};
use crate::feed::transport::{EventSink, SocketEvent, Transport};
use crate::market::{MarketId, decode};

/// Internal events, posted by socket tasks and reconnect timers.
#[derive(Debug)]
pub enum SupervisorEvent {
    Socket {
        market: MarketId,
        epoch: u64,
        event: SocketEvent,
    },
    ReconnectDue {
        market: MarketId,
        epoch: u64,
    },
}

/// Requests from the [`MarketFeed`](crate::feed::MarketFeed) facade.
pub enum Command {
    Start {
        markets: Vec<MarketId>,
        on_data: DataCallback,
    },
    Stop,
    Unsubscribe(MarketId),
    IsConnected {
        market: MarketId,
        reply: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<Vec<ConnectionStatus>>,
    },
    Shutdown,
}

/// Point-in-time view of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub market: MarketId,
    pub state: ConnectionState,
    pub connected: bool,
    pub reconnect_attempts: u32,
    pub reconnect_pending: bool,
}

pub struct Supervisor<T: Transport> {
    transport: T,
    endpoints: HashMap<MarketId, String>,
    policy: ReconnectPolicy,
    records: HashMap<MarketId, ConnectionRecord>,
    subscribed: HashSet<MarketId>,
    on_data: Option<DataCallback>,
    events: mpsc::UnboundedSender<SupervisorEvent>,
    next_epoch: u64,
}

impl<T: Transport> Supervisor<T> {
    /// Creates a supervisor and the receiver its sockets and timers post to.
    /// Feed every received event back through [`handle_event`](Self::handle_event).
    pub fn new(
        transport: T,
        endpoints: HashMap<MarketId, String>,
        policy: ReconnectPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let supervisor = Self {
            transport,
            endpoints,
            policy,
            records: HashMap::new(),
            subscribed: HashSet::new(),
            on_data: None,
            events,
            next_epoch: 0,
        };
        (supervisor, events_rx)
    }

    pub fn from_config(
        transport: T,
        config: &FeedConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SupervisorEvent>) {
        Self::new(transport, config.resolved_endpoints(), config.reconnect.policy())
    }

    /// Tears everything down, then opens one connection per market that has
    /// an endpoint. Markets without one are skipped with a warning.
    pub fn start(&mut self, markets: impl IntoIterator<Item = MarketId>, on_data: DataCallback) {
        self.stop();
        self.on_data = Some(on_data);

        for market in markets {
            if !self.subscribed.insert(market) {
                continue;
            }
            let Some(url) = self.endpoints.get(&market).cloned() else {
                warn!(market = %market, "no endpoint configured, market not subscribed");
                continue;
            };
            self.records.insert(market, ConnectionRecord::new(market, url));
            self.open(market);
        }

        info!(
            requested = self.subscribed.len(),
            opened = self.records.len(),
            "market feed started"
        );
    }

    /// Cancels every pending reconnect, closes every socket normally and
    /// forgets all records.
    pub fn stop(&mut self) {
        for (market, mut record) in self.records.drain() {
            record.shutdown();
            debug!(market = %market, "connection stopped");
        }
        self.subscribed.clear();
        self.on_data = None;
    }

    /// Drops one market from the subscription. The record lingers in
    /// `Closing` until the transport confirms the close.
    pub fn unsubscribe(&mut self, market: MarketId) {
        self.subscribed.remove(&market);
        let Some(record) = self.records.get_mut(&market) else {
            return;
        };
        if !record.begin_close() {
            self.records.remove(&market);
        }
        info!(market = %market, "market unsubscribed");
    }

    pub fn is_connected(&self, market: MarketId) -> bool {
        self.records
            .get(&market)
            .is_some_and(ConnectionRecord::is_connected)
    }

    pub fn is_subscribed(&self, market: MarketId) -> bool {
        self.subscribed.contains(&market)
    }

    pub fn record(&self, market: MarketId) -> Option<&ConnectionRecord> {
        self.records.get(&market)
    }

    pub fn status(&self) -> Vec<ConnectionStatus> {
        let mut status: Vec<_> = self
            .records
            .values()
            .map(|record| ConnectionStatus {
                market: record.market(),
                state: record.state(),
                connected: record.is_connected(),
                reconnect_attempts: record.reconnect_attempts(),
                reconnect_pending: record.pending_reconnect_delay().is_some(),
            })
            .collect();
        status.sort_by_key(|s| s.market);
        status
    }

    pub fn handle_event(&mut self, event: SupervisorEvent) {
        match event {
            SupervisorEvent::Socket {
                market,
                epoch,
                event,
            } => self.on_socket_event(market, epoch, event),
            SupervisorEvent::ReconnectDue { market, epoch } => self.on_reconnect_due(market, epoch),
        }
    }

    /// Actor loop: applies commands and events strictly one at a time until
    /// shut down or the facade goes away. Stops all connections on exit.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<SupervisorEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = events.recv() => self.handle_event(event),
            }
        }

        self.stop();
        debug!("supervisor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { markets, on_data } => self.start(markets, on_data),
            Command::Stop => self.stop(),
            Command::Unsubscribe(market) => self.unsubscribe(market),
            Command::IsConnected { market, reply } => {
                let _ = reply.send(self.is_connected(market));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Shutdown => self.stop(),
        }
    }

    fn on_socket_event(&mut self, market: MarketId, epoch: u64, event: SocketEvent) {
        let Some(record) = self
            .records
            .get_mut(&market)
            .filter(|record| record.epoch() == epoch)
        else {
            debug!(market = %market, epoch, "ignoring event from stale socket");
            return;
        };

        match event {
            SocketEvent::Opened => {
                record.mark_open();
                info!(market = %market, epoch, url = record.url(), "connection open");
            }
            SocketEvent::Message(payload) => {
                if record.state() != ConnectionState::Open {
                    debug!(market = %market, state = ?record.state(), "ignoring message outside open state");
                    return;
                }
                self.dispatch(market, &payload);
            }
            SocketEvent::Error(error) => {
                warn!(market = %market, epoch, error = %error, "transport error");
            }
            SocketEvent::Closed { code, reason } => self.on_closed(market, code, &reason),
        }
    }

    fn dispatch(&self, market: MarketId, payload: &str) {
        let Some(on_data) = &self.on_data else {
            return;
        };
        match decode(payload, market) {
            Ok(sections) => {
                for (tag, data) in sections {
                    on_data(tag, data);
                }
            }
            Err(e) => warn!(market = %market, error = %e, payload, "dropping undecodable message"),
        }
    }

    fn on_closed(&mut self, market: MarketId, code: u16, reason: &str) {
        let subscribed = self.subscribed.contains(&market);
        let Some(record) = self.records.get_mut(&market) else {
            return;
        };

        match record.mark_closed(code, &self.policy, subscribed) {
            CloseOutcome::Finished => {
                info!(market = %market, code, reason, "connection closed");
                if !subscribed {
                    self.records.remove(&market);
                }
            }
            CloseOutcome::Reconnect { delay, attempt } => {
                warn!(
                    market = %market,
                    code,
                    reason,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "connection lost, scheduling reconnect"
                );
                let timer = spawn_reconnect_timer(self.events.clone(), market, record.epoch(), delay);
                record.arm_reconnect(delay, timer);
            }
            CloseOutcome::Exhausted { attempts } => {
                warn!(
                    market = %market,
                    code,
                    reason,
                    attempts,
                    "reconnect attempts exhausted, market left disconnected"
                );
            }
        }
    }

    fn on_reconnect_due(&mut self, market: MarketId, epoch: u64) {
        if !self.subscribed.contains(&market) {
            debug!(market = %market, epoch, "reconnect timer fired for unsubscribed market");
            return;
        }
        let Some(record) = self
            .records
            .get_mut(&market)
            .filter(|record| record.epoch() == epoch)
        else {
            debug!(market = %market, epoch, "ignoring stale reconnect timer");
            return;
        };
        if record.take_pending_reconnect().is_none() {
            debug!(market = %market, epoch, "reconnect already cancelled");
            return;
        }

        info!(market = %market, attempt = record.reconnect_attempts(), "reconnecting");
        self.open(market);
    }

    fn open(&mut self, market: MarketId) {
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let Some(record) = self.records.get_mut(&market) else {
            return;
        };

        debug!(market = %market, epoch, url = record.url(), "opening connection");
        let sink = EventSink::new(market, epoch, self.events.clone());
        let socket = self.transport.open(record.url(), sink);
        record.begin_open(epoch, socket);
    }
}

fn spawn_reconnect_timer(
    events: mpsc::UnboundedSender<SupervisorEvent>,
    market: MarketId,
    epoch: u64,
    delay: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = events.send(SupervisorEvent::ReconnectDue { market, epoch });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::transport::{NORMAL_CLOSURE, SocketHandle};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        opened: Vec<(MarketId, String)>,
        closed: Vec<(MarketId, u16)>,
        sinks: Vec<EventSink>,
    }

    #[derive(Clone, Default)]
    struct MockTransport {
        calls: Arc<Mutex<Calls>>,
    }

    struct MockSocket {
        market: MarketId,
        calls: Arc<Mutex<Calls>>,
    }

    impl SocketHandle for MockSocket {
        fn close(&mut self, code: u16) {
            self.calls.lock().unwrap().closed.push((self.market, code));
        }
    }

    impl Transport for MockTransport {
        fn open(&self, url: &str, sink: EventSink) -> Box<dyn SocketHandle> {
            let mut calls = self.calls.lock().unwrap();
            calls.opened.push((sink.market(), url.to_string()));
            let market = sink.market();
            calls.sinks.push(sink);
            Box::new(MockSocket {
                market,
                calls: Arc::clone(&self.calls),
            })
        }
    }

    impl MockTransport {
        fn opens(&self, market: MarketId) -> usize {
            self.calls.lock().unwrap().opened.iter().filter(|(m, _)| *m == market).count()
        }

        fn latest_sink(&self, market: MarketId) -> EventSink {
            self.calls
                .lock()
                .unwrap()
                .sinks
                .iter()
                .rev()
                .find(|s| s.market() == market)
                .cloned()
                .unwrap()
        }
    }

    fn endpoints() -> HashMap<MarketId, String> {
        HashMap::from([
            (MarketId::Upbit, "ws://relay/upbit".to_string()),
            (MarketId::Bybit, "ws://relay/bybit".to_string()),
        ])
    }

    fn noop() -> DataCallback {
        Arc::new(|_, _| {})
    }

    fn drain(supervisor: &mut Supervisor<MockTransport>, rx: &mut mpsc::UnboundedReceiver<SupervisorEvent>) {
        while let Ok(event) = rx.try_recv() {
            supervisor.handle_event(event);
        }
    }

    fn setup() -> (
        Supervisor<MockTransport>,
        mpsc::UnboundedReceiver<SupervisorEvent>,
        MockTransport,
    ) {
        let transport = MockTransport::default();
        let (supervisor, rx) = Supervisor::new(transport.clone(), endpoints(), ReconnectPolicy::default());
        (supervisor, rx, transport)
    }

    #[tokio::test]
    async fn test_start_skips_markets_without_endpoint() {
        let (mut supervisor, mut rx, transport) = setup();
        supervisor.start([MarketId::Upbit, MarketId::Binance], noop());

        assert_eq!(transport.opens(MarketId::Upbit), 1);
        assert_eq!(transport.opens(MarketId::Binance), 0);
        assert!(supervisor.record(MarketId::Binance).is_none());

        transport.latest_sink(MarketId::Upbit).emit(SocketEvent::Opened);
        drain(&mut supervisor, &mut rx);

        assert!(supervisor.is_connected(MarketId::Upbit));
        assert!(!supervisor.is_connected(MarketId::Binance));
    }

    #[tokio::test]
    async fn test_start_is_full_reset() {
        let (mut supervisor, mut rx, transport) = setup();
        supervisor.start([MarketId::Upbit], noop());
        transport.latest_sink(MarketId::Upbit).emit(SocketEvent::Opened);
        drain(&mut supervisor, &mut rx);

        supervisor.start([MarketId::Upbit, MarketId::Bybit], noop());
        assert!(supervisor.is_subscribed(MarketId::Bybit));
        assert_eq!(transport.opens(MarketId::Upbit), 2);
        assert_eq!(
            transport.calls.lock().unwrap().closed,
            vec![(MarketId::Upbit, NORMAL_CLOSURE)]
        );
        assert_eq!(supervisor.record(MarketId::Upbit).unwrap().state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_duplicate_markets_open_once() {
        let (mut supervisor, _rx, transport) = setup();
        supervisor.start([MarketId::Bybit, MarketId::Bybit], noop());
        assert_eq!(transport.opens(MarketId::Bybit), 1);
    }

    #[tokio::test]
    async fn test_stale_socket_events_are_ignored() {
        let (mut supervisor, mut rx, transport) = setup();
        supervisor.start([MarketId::Upbit], noop());
        let old_sink = transport.latest_sink(MarketId::Upbit);
        supervisor.start([MarketId::Upbit], noop());

        old_sink.emit(SocketEvent::Opened);
        old_sink.emit(SocketEvent::Closed { code: 1006, reason: String::new() });
        drain(&mut supervisor, &mut rx);

        let record = supervisor.record(MarketId::Upbit).unwrap();
        assert_eq!(record.state(), ConnectionState::Connecting);
        assert!(record.pending_reconnect_delay().is_none());
    }

    #[tokio::test]
    async fn test_transport_error_does_not_change_state() {
        let (mut supervisor, mut rx, transport) = setup();
        supervisor.start([MarketId::Upbit], noop());
        let sink = transport.latest_sink(MarketId::Upbit);
        sink.emit(SocketEvent::Opened);
        sink.emit(SocketEvent::Error("connection reset".to_string()));
        drain(&mut supervisor, &mut rx);

        assert!(supervisor.is_connected(MarketId::Upbit));
        assert!(supervisor.record(MarketId::Upbit).unwrap().pending_reconnect_delay().is_none());
    }

    #[tokio::test]
    async fn test_message_before_open_is_not_dispatched() {
        let (mut supervisor, mut rx, transport) = setup();
        let hits = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&hits);
        supervisor.start(
            [MarketId::Upbit],
            Arc::new(move |_, _| *counter.lock().unwrap() += 1),
        );

        let sink = transport.latest_sink(MarketId::Upbit);
        sink.emit(SocketEvent::Message(r#"{"upbit":[]}"#.to_string()));
        drain(&mut supervisor, &mut rx);
        assert_eq!(*hits.lock().unwrap(), 0);

        sink.emit(SocketEvent::Opened);
        sink.emit(SocketEvent::Message(r#"{"upbit":[]}"#.to_string()));
        drain(&mut supervisor, &mut rx);
        assert_eq!(*hits.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_bad_message_keeps_connection_open() {
        let (mut supervisor, mut rx, transport) = setup();
        supervisor.start([MarketId::Upbit], noop());
        let sink = transport.latest_sink(MarketId::Upbit);
        sink.emit(SocketEvent::Opened);
        sink.emit(SocketEvent::Message("{not json".to_string()));
        drain(&mut supervisor, &mut rx);

        assert!(supervisor.is_connected(MarketId::Upbit));
        assert!(transport.calls.lock().unwrap().closed.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_waits_for_close_then_discards() {
        let (mut supervisor, mut rx, transport) = setup();
        supervisor.start([MarketId::Upbit, MarketId::Bybit], noop());
        let sink = transport.latest_sink(MarketId::Bybit);
        sink.emit(SocketEvent::Opened);
        drain(&mut supervisor, &mut rx);

        assert!(supervisor.is_subscribed(MarketId::Bybit));
        supervisor.unsubscribe(MarketId::Bybit);
        assert!(!supervisor.is_subscribed(MarketId::Bybit));
        assert!(supervisor.is_subscribed(MarketId::Upbit));
        assert_eq!(supervisor.record(MarketId::Bybit).unwrap().state(), ConnectionState::Closing);
        assert!(!supervisor.is_connected(MarketId::Bybit));

        sink.emit(SocketEvent::Closed { code: NORMAL_CLOSURE, reason: String::new() });
        drain(&mut supervisor, &mut rx);
        assert!(supervisor.record(MarketId::Bybit).is_none());
        assert!(supervisor.record(MarketId::Upbit).is_some());
    }

    #[tokio::test]
    async fn test_status_reports_each_record() {
        let (mut supervisor, mut rx, transport) = setup();
        supervisor.start([MarketId::Bybit, MarketId::Upbit], noop());
        transport.latest_sink(MarketId::Upbit).emit(SocketEvent::Opened);
        drain(&mut supervisor, &mut rx);

        let status = supervisor.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].market, MarketId::Upbit);
        assert!(status[0].connected);
        assert_eq!(status[1].market, MarketId::Bybit);
        assert_eq!(status[1].state, ConnectionState::Connecting);
    }
}
