use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt as _;
use futures::StreamExt as _;
use futures::channel::{mpsc, oneshot};
use serde_json::Value;
use tokio::runtime::Handle;
use tracing::Instrument as _;

use crate::BridgeError;
use crate::channel::{DownstreamChannel, reply_error};
use crate::handler::panic_message;

/// An outbound call waiting for its turn on the downstream channel.
struct PendingCall {
    destination_id: String,
    payload: Value,

    /// Where the reply goes once the channel answers.
    reply_tx: oneshot::Sender<Result<Value, BridgeError>>,
}

/// Serializes outbound calls onto a downstream channel.
///
/// Calls run strictly in the order [`enqueue`](Self::enqueue) was invoked,
/// across all clones and threads, with at most one call in flight. Each
/// caller only ever observes its own reply.
#[derive(Clone)]
pub struct OutboundSerializer {
    queue_tx: mpsc::UnboundedSender<PendingCall>,
}

impl OutboundSerializer {
    /// Start the outbound actor for `channel` on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; use
    /// [`spawn_on`](Self::spawn_on) to pick the runtime explicitly.
    pub fn spawn(channel: Arc<dyn DownstreamChannel>) -> Self {
        Self::spawn_on(&Handle::current(), channel)
    }

    /// Start the outbound actor for `channel` on `runtime`.
    ///
    /// The actor stops once every clone of the serializer is dropped and the
    /// queue has drained, or when `runtime` shuts down. Calls still queued at
    /// that point resolve to [`BridgeError::OutboundClosed`].
    pub fn spawn_on(runtime: &Handle, channel: Arc<dyn DownstreamChannel>) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded();
        let span = tracing::debug_span!("outbound_actor");
        runtime.spawn(outbound_actor(channel, queue_rx).instrument(span));
        Self { queue_tx }
    }

    /// Append a call to the queue and return a handle to its reply.
    ///
    /// The call is queued before this returns; awaiting the handle is not
    /// required for it to run, and dropping the handle does not cancel it.
    pub fn enqueue(&self, destination_id: impl Into<String>, payload: Value) -> OutboundReply {
        let destination_id = destination_id.into();
        let (reply_tx, reply_rx) = oneshot::channel();
        tracing::debug!(%destination_id, "enqueue outbound call");

        let call = PendingCall {
            destination_id: destination_id.clone(),
            payload,
            reply_tx,
        };
        if let Err(err) = self.queue_tx.unbounded_send(call) {
            let PendingCall {
                destination_id,
                reply_tx,
                ..
            } = err.into_inner();
            tracing::warn!(%destination_id, "outbound queue is closed");
            let _: Result<_, _> =
                reply_tx.send(Err(BridgeError::OutboundClosed { destination_id }));
        }

        OutboundReply {
            destination_id,
            reply_rx,
        }
    }
}

/// The pending reply to one outbound call.
#[must_use = "the call runs regardless, but its reply is lost unless awaited"]
pub struct OutboundReply {
    destination_id: String,
    reply_rx: oneshot::Receiver<Result<Value, BridgeError>>,
}

impl OutboundReply {
    /// The destination this call was addressed to.
    pub fn destination_id(&self) -> &str {
        &self.destination_id
    }
}

impl Future for OutboundReply {
    type Output = Result<Value, BridgeError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.reply_rx.poll_unpin(cx).map(|received| match received {
            Ok(result) => result,
            // The actor went away without answering.
            Err(oneshot::Canceled) => Err(BridgeError::OutboundClosed {
                destination_id: self.destination_id.clone(),
            }),
        })
    }
}

/// Drains the queue one call at a time.
///
/// Each call finishes (successfully or not) before the next one starts; a
/// failure never stops the loop.
async fn outbound_actor(
    channel: Arc<dyn DownstreamChannel>,
    mut queue_rx: mpsc::UnboundedReceiver<PendingCall>,
) {
    while let Some(call) = queue_rx.next().await {
        let PendingCall {
            destination_id,
            payload,
            reply_tx,
        } = call;

        let span = tracing::debug_span!("outbound_call", %destination_id);
        let result = execute(channel.clone(), destination_id, payload)
            .instrument(span)
            .await;

        // If the caller is no longer interested in the reply, that's ok with us.
        let _: Result<_, _> = reply_tx.send(result);
    }
    tracing::debug!("outbound queue closed");
}

/// Run one call against the channel on the blocking pool and translate failures.
async fn execute(
    channel: Arc<dyn DownstreamChannel>,
    destination_id: String,
    payload: Value,
) -> Result<Value, BridgeError> {
    let target = destination_id.clone();
    let outcome = tokio::task::spawn_blocking(move || channel.call(&target, payload)).await;

    let message = match outcome {
        Ok(Ok(reply)) => match reply_error(&reply) {
            None => {
                tracing::debug!("outbound call answered");
                return Ok(reply);
            }
            Some(message) => message,
        },
        Ok(Err(err)) => format!("{err:#}"),
        Err(join_err) => match join_err.try_into_panic() {
            Ok(payload) => format!("panic: {}", panic_message(payload.as_ref())),
            Err(join_err) => join_err.to_string(),
        },
    };

    tracing::warn!(%message, "outbound call failed");
    Err(BridgeError::Downstream {
        destination_id,
        message,
    })
}
