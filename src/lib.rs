//! RPC semantics over a message broker with correlation-id tracking,
//! timeouts and cooperative cancellation.
//!
//! This library lets named asynchronous functions be called across an
//! already-connected broker as if they were local calls. It handles
//! correlation-id lifecycle, exactly-once resolution of each call's
//! future, content-type-negotiated result encoding, and best-effort
//! remote cancellation of timed-out calls. The broker itself (connection
//! lifecycle, durability policy, reconnection, authentication) is an
//! external collaborator behind the [`Broker`] trait; an in-memory broker
//! ships with the crate as the reference implementation and test double.

// Import all sub modules once...
mod broker;
mod client;
mod domain;
mod server;

mod rpc_config;

mod error;
mod macros;
mod protocol;
mod serializer;

// Re-export main types
pub use client::{CallOptions, RpcClient};
pub use server::{route_handler, HandlerFuture, RouteHandler, RpcServer};

pub use rpc_config::RpcConfig;

pub use error::{Error, Result};

pub use broker::create_memory_broker;

// --- public re-exports
pub use domain::{
    //
    Broker,
    BrokerPtr,
    ConsumerHandle,
    DeliveryMode,
    Envelope,
    QueueOptions,
    RoutingKey,
};

pub use protocol::{
    //
    CallBody,
    CorrelationId,
    ReplyBody,
    CANCEL_ROUTING_KEY,
    CONTENT_TYPE_JSON,
    CONTENT_TYPE_RAW,
};

pub use serializer::{JsonSerializer, RawSerializer, Serializer, SerializerRegistry};
