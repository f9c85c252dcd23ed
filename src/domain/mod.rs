//! Domain-level abstractions shared by the invoker and the dispatcher.
//!
//! These types intentionally avoid any reference to concrete brokers or
//! client libraries; concrete implementations live under `src/broker/`.

mod broker;

pub use broker::{
    //
    Broker,
    BrokerPtr,
    ConsumerHandle,
    DeliveryMode,
    Envelope,
    QueueOptions,
    RoutingKey,
};
