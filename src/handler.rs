use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt as _;
use futures::StreamExt as _;
use futures::channel::mpsc;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::Instrument as _;

/// Receives inbound messages for an endpoint it is registered under.
///
/// Notification is fire-and-forget: the bridge never waits for `notify` to
/// finish before returning from dispatch, and its outcome is discarded.
/// Messages for one registration are delivered one at a time, in dispatch
/// order, so a slow handler only delays its own endpoint.
pub trait EndpointHandler: Send + Sync + 'static {
    fn notify<'a>(&'a self, endpoint_id: &'a str, message: Value) -> BoxFuture<'a, ()>;
}

/// An [`EndpointHandler`] built from an async closure. See [`handler_fn`].
pub struct FnHandler<F> {
    op: F,
}

/// Wrap an async closure taking `(endpoint_id, message)` as a handler.
pub fn handler_fn<F, Fut>(op: F) -> Arc<FnHandler<F>>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler { op })
}

impl<F, Fut> EndpointHandler for FnHandler<F>
where
    F: Fn(String, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn notify<'a>(&'a self, endpoint_id: &'a str, message: Value) -> BoxFuture<'a, ()> {
        Box::pin((self.op)(endpoint_id.to_string(), message))
    }
}

/// Start the task that feeds one registration's handler on `runtime` and
/// return the sender that feeds it.
///
/// The task ends once every sender is dropped and the mailbox is drained.
pub(crate) fn spawn_mailbox(
    runtime: &Handle,
    endpoint_id: String,
    handler: Arc<dyn EndpointHandler>,
) -> mpsc::UnboundedSender<Value> {
    let (inbound_tx, inbound_rx) = mpsc::unbounded();
    let span = tracing::debug_span!("inbound_mailbox", endpoint_id = %endpoint_id);
    runtime.spawn(mailbox_actor(endpoint_id, handler, inbound_rx).instrument(span));
    inbound_tx
}

async fn mailbox_actor(
    endpoint_id: String,
    handler: Arc<dyn EndpointHandler>,
    mut inbound_rx: mpsc::UnboundedReceiver<Value>,
) {
    while let Some(message) = inbound_rx.next().await {
        tracing::trace!(?message, "delivering inbound message");

        // A panicking handler must not take the mailbox down with it.
        let delivery = AssertUnwindSafe(async { handler.notify(&endpoint_id, message).await });
        if let Err(payload) = delivery.catch_unwind().await {
            tracing::error!(
                panic = %panic_message(payload.as_ref()),
                "handler panicked while processing inbound message"
            );
        }
    }
    tracing::debug!("inbound mailbox closed");
}

/// Render a panic payload the way `std` prints it.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}
