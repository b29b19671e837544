//! Connection lifecycle: transport, per-market state, supervision.
//!
//! [`MarketFeed`] is the facade; [`Supervisor`] owns the per-market
//! [`ConnectionRecord`]s and drives reconnection with a [`ReconnectPolicy`].

pub mod backoff;
pub mod connection;
pub mod facade;
pub mod supervisor;
pub mod transport;

use std::sync::Arc;

use crate::market::{MarketDataMap, MarketId};

/// Receives one normalized map per exchange tag per decoded message.
pub type DataCallback = Arc<dyn Fn(MarketId, MarketDataMap) + Send + Sync>;

pub use backoff::{BackoffPolicy, ReconnectPolicy};
pub use connection::{ConnectionRecord, ConnectionState};
pub use facade::{MarketFeed, data_channel};
pub use supervisor::{ConnectionStatus, Supervisor, SupervisorEvent};
pub use transport::{
    ABNORMAL_CLOSURE, EventSink, NORMAL_CLOSURE, SocketEvent, SocketHandle, Transport, WsTransport,
};
