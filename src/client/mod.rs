//! RPC client (invoker) implementation.
//!
//! This module contains the core [`RpcClient`] type which publishes calls
//! to named routes and resolves replies delivered to its private reply
//! queue.

mod invoker;
mod pending;

pub use invoker::{CallOptions, RpcClient};
