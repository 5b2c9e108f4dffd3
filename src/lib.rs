/// Instance settings: defaults, config file and `SENSORLINK_` environment.
pub mod config;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Reference line-based TCP transport.
pub mod network;
/// Pub/Sub: broker trait, in-process bus, message.
pub mod pubsub;
/// Connection registry, topic subscriptions and inbound routing.
pub mod routing;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// config
pub use config::{RetrySettings, Settings};
/// Logging setup.
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle};
/// Network server and protocol.
pub use network::{ChannelHandle, ConnectionConfig, ConnectionManager, RelayServer};
/// Pub/Sub API.
pub use pubsub::{Broker, BusClient, InMemoryBus, Message, MessageHandler};
/// Routing core.
pub use routing::{
    ConnectionClass, ConnectionContext, ConnectionHandle, ConnectionId, ConnectionKey,
    ConnectionRegistry, EventBus, Generation, InboundMessageRouter, LifecycleEvent,
    LifecycleListener, NodeConfig, Publisher, RelayNode, RetryPolicy, RouteOutcome, SharedHandle,
    TopicSubscriptionManager,
};
/// Error types.
pub use sensorlink_error::{
    BrokerError, ErrorExt, HandshakeError, RelayResult, RoutingError, SendError, StackError,
    StatusCode,
};
