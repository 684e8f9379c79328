/// Errors surfaced by the bridge.
///
/// Every error is local to the operation that produced it; none of them
/// leave the registry or the outbound queue in a broken state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// An outbound send was attempted before a downstream channel was wired.
    #[error("bridge channel not yet connected")]
    ChannelNotConnected,

    /// The downstream channel can only be wired once.
    #[error("bridge channel already connected")]
    ChannelAlreadyConnected,

    /// Connecting and registering start tasks, which needs a tokio runtime.
    #[error("no tokio runtime to run bridge tasks on")]
    NoRuntime,

    #[error("endpoint `{endpoint_id}` already has a registered handler")]
    DuplicateRegistration { endpoint_id: String },

    /// The handler given to unregister is not the one registered (or there is none).
    #[error("handler was not registered for `{endpoint_id}`")]
    HandlerMismatch { endpoint_id: String },

    #[error("no handler registered for endpoint `{endpoint_id}`")]
    UnknownEndpoint { endpoint_id: String },

    /// The task delivering inbound messages for this endpoint is gone.
    #[error("inbound delivery to `{endpoint_id}` is closed")]
    InboundClosed { endpoint_id: String },

    /// The downstream channel failed, panicked, or answered with an error reply.
    #[error("downstream call to `{destination_id}` failed: {message}")]
    Downstream {
        destination_id: String,
        message: String,
    },

    /// The outbound queue shut down before this call was answered.
    #[error("outbound queue closed before `{destination_id}` was answered")]
    OutboundClosed { destination_id: String },
}
