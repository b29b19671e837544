//! Public entry point: [`MarketFeed`].

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::config::FeedConfig;
use crate::feed::DataCallback;
use crate::feed::supervisor::{Command, ConnectionStatus, Supervisor};
use crate::feed::transport::{Transport, WsTransport};
use crate::market::{MarketDataMap, MarketId};

/// Handle to a running supervisor.
///
/// Changing the market set or the enabled flag restarts every connection.
/// Dropping the feed stops all sockets and pending reconnects.
///
/// Must be created inside a tokio runtime.
pub struct MarketFeed {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
    markets: Vec<MarketId>,
    on_data: Option<DataCallback>,
    enabled: bool,
}

impl MarketFeed {
    pub fn new(config: &FeedConfig) -> Self {
        Self::with_transport(WsTransport, config)
    }

    pub fn with_transport<T: Transport>(transport: T, config: &FeedConfig) -> Self {
        let (supervisor, events) = Supervisor::from_config(transport, config);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(supervisor.run(command_rx, events));

        Self {
            commands,
            task: Some(task),
            markets: Vec::new(),
            on_data: None,
            enabled: true,
        }
    }

    /// Subscribes to `markets`, replacing any previous subscription.
    /// `on_data` is called once per exchange tag in every decoded message.
    pub fn connect<F>(&mut self, markets: impl IntoIterator<Item = MarketId>, on_data: F)
    where
        F: Fn(MarketId, MarketDataMap) + Send + Sync + 'static,
    {
        self.markets = markets.into_iter().collect();
        self.on_data = Some(Arc::new(on_data));
        self.apply();
    }

    /// Replaces the market set, keeping the current callback. Order and
    /// duplicates are irrelevant: the same set does not restart anything.
    pub fn set_markets(&mut self, markets: impl IntoIterator<Item = MarketId>) {
        let markets: Vec<_> = markets.into_iter().collect();
        if same_set(&markets, &self.markets) {
            return;
        }
        self.markets = markets;
        self.apply();
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled == enabled {
            return;
        }
        self.enabled = enabled;
        self.apply();
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn markets(&self) -> &[MarketId] {
        &self.markets
    }

    pub fn disconnect(&mut self) {
        self.markets.clear();
        self.on_data = None;
        self.send(Command::Stop);
    }

    /// Drops one market without restarting the others.
    pub fn unsubscribe(&mut self, market: MarketId) {
        self.markets.retain(|m| *m != market);
        self.send(Command::Unsubscribe(market));
    }

    pub async fn is_connected(&self, market: MarketId) -> bool {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::IsConnected { market, reply }) {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    pub async fn status(&self) -> Vec<ConnectionStatus> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Status { reply }) {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stops everything and waits for the supervisor task to finish.
    pub async fn shutdown(mut self) {
        self.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "supervisor task failed");
            }
        }
    }

    fn apply(&self) {
        match (&self.on_data, self.enabled) {
            (Some(on_data), true) => {
                self.send(Command::Start {
                    markets: self.markets.clone(),
                    on_data: Arc::clone(on_data),
                });
            }
            _ => {
                self.send(Command::Stop);
            }
        }
    }

    fn send(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }
}

impl Drop for MarketFeed {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.send(Command::Shutdown);
        }
    }
}

fn same_set(a: &[MarketId], b: &[MarketId]) -> bool {
    a.iter().collect::<HashSet<_>>() == b.iter().collect::<HashSet<_>>()
}

/// Adapts a bounded channel into a data callback, for consumers that would
/// rather receive updates than be called. Updates are dropped with a warning
/// while the channel is full.
pub fn data_channel(
    capacity: usize,
) -> (
    impl Fn(MarketId, MarketDataMap) + Send + Sync + 'static,
    mpsc::Receiver<(MarketId, MarketDataMap)>,
) {
    let (tx, rx) = mpsc::channel(capacity);
    let callback = move |market: MarketId, data: MarketDataMap| {
        if let Err(e) = tx.try_send((market, data)) {
            warn!(market = %market, error = %e, "consumer lagging, dropping update");
        }
    };
    (callback, rx)
}
