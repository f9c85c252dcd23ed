//! Wire-level protocol pieces shared by the invoker and the dispatcher:
//! correlation ids, call/reply body structures, and well-known constants.

mod correlation;
mod message;

pub use correlation::CorrelationId;
pub use message::{CallBody, ReplyBody};

/// Routing key of the well-known cancellation route.
///
/// Every dispatcher binds a shared durable queue under this key and listens
/// for correlation ids of calls to cancel.
pub const CANCEL_ROUTING_KEY: &str = "rpc.cancel";

/// Content-type tag handled by the built-in JSON serializer. This is the
/// crate default for calls.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content-type tag handled by the built-in raw passthrough serializer,
/// which also accepts envelopes carrying no tag at all.
pub const CONTENT_TYPE_RAW: &str = "application/octet-stream";

/// Prefix for the per-client private reply queue name.
pub(crate) const REPLY_QUEUE_PREFIX: &str = "rpc.reply";

/// Prefix for per-route queue names when the caller does not supply one.
pub(crate) const ROUTE_QUEUE_PREFIX: &str = "rpc.route";
