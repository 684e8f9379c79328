//! Message bridge manager.
//!
//! A [`BridgeManager`] sits between one synchronous downstream channel and
//! many logical endpoints. Inbound messages are routed to the handler
//! registered for their endpoint id; outbound messages from any number of
//! callers are executed against the downstream channel one at a time, in the
//! order they were submitted.

mod channel;
mod config;
mod error;
mod handler;
mod manager;
mod serializer;

pub use channel::{DownstreamChannel, reply_error};
pub use config::{BridgeConfig, UnknownEndpointPolicy};
pub use error::BridgeError;
pub use handler::{EndpointHandler, FnHandler, handler_fn};
pub use manager::BridgeManager;
pub use serializer::{OutboundReply, OutboundSerializer};
