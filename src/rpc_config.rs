//! Public, broker-agnostic RPC configuration.
//!
//! This type intentionally contains no broker-specific concepts; broker
//! implementations interpret none of it. It only shapes how the invoker
//! and dispatcher name their queues and encode their results.

use std::time::Duration;

use crate::protocol::{CANCEL_ROUTING_KEY, CONTENT_TYPE_JSON, REPLY_QUEUE_PREFIX, ROUTE_QUEUE_PREFIX};

/// Configuration shared by [`RpcClient`](crate::RpcClient) and
/// [`RpcServer`](crate::RpcServer).
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Content-type tag stamped on calls that don't override it.
    ///
    /// Default: `application/json`.
    pub default_content_type: String,

    /// Deadline applied to calls that don't set their own timeout.
    ///
    /// `None` means such calls wait indefinitely.
    pub default_timeout: Option<Duration>,

    /// Prefix for the client's private reply queue name.
    pub reply_queue_prefix: String,

    /// Prefix for per-route queue names when `add_route` is not given an
    /// explicit queue name.
    pub route_queue_prefix: String,

    /// Routing key (and queue name) of the well-known cancellation route.
    ///
    /// Every dispatcher sharing a broker must agree on this value.
    pub cancel_routing_key: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            default_content_type: CONTENT_TYPE_JSON.to_owned(),
            default_timeout: None,
            reply_queue_prefix: REPLY_QUEUE_PREFIX.to_owned(),
            route_queue_prefix: ROUTE_QUEUE_PREFIX.to_owned(),
            cancel_routing_key: CANCEL_ROUTING_KEY.to_owned(),
        }
    }
}

impl RpcConfig {
    /// Set the content type used for calls that don't override it.
    pub fn with_default_content_type(mut self, tag: impl Into<String>) -> Self {
        self.default_content_type = tag.into();
        self
    }

    /// Set a deadline for calls that don't carry their own timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// Override the private reply queue name prefix.
    pub fn with_reply_queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.reply_queue_prefix = prefix.into();
        self
    }

    /// Override the per-route queue name prefix.
    pub fn with_route_queue_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.route_queue_prefix = prefix.into();
        self
    }

    /// Override the well-known cancellation routing key.
    pub fn with_cancel_routing_key(mut self, key: impl Into<String>) -> Self {
        self.cancel_routing_key = key.into();
        self
    }
}
