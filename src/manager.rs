use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use futures::channel::mpsc;
use serde_json::Value;
use tokio::runtime::Handle;

use crate::BridgeError;
use crate::channel::DownstreamChannel;
use crate::config::{BridgeConfig, UnknownEndpointPolicy};
use crate::handler::{EndpointHandler, spawn_mailbox};
use crate::serializer::{OutboundReply, OutboundSerializer};

/// A handler bound to an endpoint, together with its inbound mailbox.
struct Registration {
    handler: Arc<dyn EndpointHandler>,
    inbound_tx: mpsc::UnboundedSender<Value>,
}

struct Inner {
    config: BridgeConfig,

    /// Set once, by [`BridgeManager::connect`].
    outbound: OnceLock<OutboundSerializer>,

    registry: Mutex<HashMap<String, Registration>>,
}

/// Routes inbound messages to per-endpoint handlers and serializes outbound
/// messages onto the downstream channel.
///
/// Clones share the same registry and outbound queue.
#[derive(Clone)]
pub struct BridgeManager {
    inner: Arc<Inner>,
}

impl BridgeManager {
    /// Create a manager with no downstream channel wired yet.
    ///
    /// Inbound dispatch and registration work right away; outbound sends fail
    /// with [`BridgeError::ChannelNotConnected`] until [`connect`](Self::connect).
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                outbound: OnceLock::new(),
                registry: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Wire the downstream channel and start the outbound actor on the
    /// current tokio runtime.
    ///
    /// Outside a runtime this fails with [`BridgeError::NoRuntime`] and the
    /// manager stays unconnected.
    pub fn connect(&self, channel: Arc<dyn DownstreamChannel>) -> Result<(), BridgeError> {
        if self.is_connected() {
            return Err(BridgeError::ChannelAlreadyConnected);
        }
        let runtime = current_runtime()?;

        let mut connected = false;
        self.inner.outbound.get_or_init(|| {
            connected = true;
            OutboundSerializer::spawn_on(&runtime, channel)
        });
        if !connected {
            return Err(BridgeError::ChannelAlreadyConnected);
        }
        tracing::debug!("downstream channel connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.outbound.get().is_some()
    }

    /// Bind `handler` to `endpoint_id`.
    ///
    /// An id holds at most one handler: registering over an existing one
    /// fails and leaves the original in place. The handler's mailbox task runs
    /// on the current tokio runtime; outside one this fails with
    /// [`BridgeError::NoRuntime`] and nothing is registered.
    pub fn register_handler(
        &self,
        endpoint_id: impl Into<String>,
        handler: Arc<dyn EndpointHandler>,
    ) -> Result<(), BridgeError> {
        let endpoint_id = endpoint_id.into();
        let runtime = current_runtime()?;
        match self.registry().entry(endpoint_id) {
            Entry::Occupied(entry) => Err(BridgeError::DuplicateRegistration {
                endpoint_id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                tracing::debug!(endpoint_id = %entry.key(), "register handler");
                let inbound_tx = spawn_mailbox(&runtime, entry.key().clone(), handler.clone());
                entry.insert(Registration {
                    handler,
                    inbound_tx,
                });
                Ok(())
            }
        }
    }

    /// Unbind `handler` from `endpoint_id`.
    ///
    /// Succeeds only if `handler` is the very allocation that was registered;
    /// an equal but distinct handler, or no registration at all, is a
    /// [`BridgeError::HandlerMismatch`]. Messages already dispatched are still
    /// delivered.
    pub fn unregister_handler<H>(
        &self,
        endpoint_id: &str,
        handler: &Arc<H>,
    ) -> Result<(), BridgeError>
    where
        H: EndpointHandler + ?Sized,
    {
        let mut registry = self.registry();
        let same = registry.get(endpoint_id).is_some_and(|registration| {
            std::ptr::addr_eq(Arc::as_ptr(&registration.handler), Arc::as_ptr(handler))
        });
        if !same {
            tracing::warn!(%endpoint_id, "unregister with a handler that is not registered");
            return Err(BridgeError::HandlerMismatch {
                endpoint_id: endpoint_id.to_string(),
            });
        }

        registry.remove(endpoint_id);
        tracing::debug!(%endpoint_id, "unregister handler");
        Ok(())
    }

    /// Hand `message` to the handler registered for `endpoint_id`.
    ///
    /// Returns as soon as the message is queued for the handler; the handler's
    /// own processing is never awaited.
    pub fn dispatch_inbound(&self, endpoint_id: &str, message: Value) -> Result<(), BridgeError> {
        let inbound_tx = self
            .registry()
            .get(endpoint_id)
            .map(|registration| registration.inbound_tx.clone());

        let Some(inbound_tx) = inbound_tx else {
            return match self.inner.config.unknown_endpoint {
                UnknownEndpointPolicy::Reject => Err(BridgeError::UnknownEndpoint {
                    endpoint_id: endpoint_id.to_string(),
                }),
                UnknownEndpointPolicy::Drop => {
                    tracing::warn!(%endpoint_id, "dropping inbound message for unknown endpoint");
                    Ok(())
                }
            };
        };

        tracing::debug!(%endpoint_id, "dispatch inbound message");
        inbound_tx
            .unbounded_send(message)
            .map_err(|_| BridgeError::InboundClosed {
                endpoint_id: endpoint_id.to_string(),
            })
    }

    /// Queue `payload` for `destination_id` on the downstream channel.
    ///
    /// Fails right away if no channel is connected. Otherwise the returned
    /// reply resolves once this call has had its turn.
    pub fn send_outbound(
        &self,
        destination_id: impl Into<String>,
        payload: Value,
    ) -> Result<OutboundReply, BridgeError> {
        let outbound = self
            .inner
            .outbound
            .get()
            .ok_or(BridgeError::ChannelNotConnected)?;
        Ok(outbound.enqueue(destination_id, payload))
    }

    pub fn is_registered(&self, endpoint_id: &str) -> bool {
        self.registry().contains_key(endpoint_id)
    }

    /// The endpoint ids that currently have a handler, sorted.
    pub fn endpoints(&self) -> Vec<String> {
        let mut endpoints: Vec<String> = self.registry().keys().cloned().collect();
        endpoints.sort();
        endpoints
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Registration>> {
        // The lock is never held across user code, so a poisoned map is still consistent.
        self.inner
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn current_runtime() -> Result<Handle, BridgeError> {
    Handle::try_current().map_err(|_| BridgeError::NoRuntime)
}

impl Default for BridgeManager {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}
