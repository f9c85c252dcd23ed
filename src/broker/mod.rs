//! Broker implementations.
//!
//! Concrete implementations of the domain-level [`Broker`](crate::Broker)
//! trait. The in-memory broker is always available and defines the
//! reference delivery semantics; brokers backed by real middleware are
//! expected to approximate it as closely as their systems allow.

mod memory;

pub use memory::create_memory_broker;
