use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::Result;
use crate::protocol::CallBody;

/// Future returned by a route handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value>> + Send>>;

/// Type-erased async route handler.
///
/// Handlers take the decoded `{args, kwargs}` body and return a result
/// value; the dispatcher owns serialization and reply publishing. Wrapped
/// in `Arc` for cheap cloning into each spawned invocation task.
pub type RouteHandler = Arc<dyn Fn(CallBody) -> HandlerFuture + Send + Sync>;

/// Wrap an async closure into a [`RouteHandler`].
///
/// Handlers are async by construction here: the route signature demands a
/// future, so there is nothing to reject at registration time.
pub fn route_handler<F, Fut>(handler: F) -> RouteHandler
where
    F: Fn(CallBody) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    // ---
    Arc::new(move |body: CallBody| {
        // ---
        Box::pin(handler(body)) as HandlerFuture
    })
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn wrapped_handler_receives_the_body() {
        // ---
        let handler = route_handler(|body: CallBody| async move {
            Ok(body.args.first().cloned().unwrap_or(Value::Null))
        });

        let result = handler(CallBody::positional(vec![json!("first")])).await;
        assert_eq!(result.unwrap(), json!("first"));
    }
}
