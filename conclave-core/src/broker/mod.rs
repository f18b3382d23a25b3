//! Thread registry, message broker and broker transports
//!
//! Messages are appended to threads and routed to the mailboxes of the
//! agents they mention. Delivery is at-most-once per (message, agent) and in
//! sequence order per thread.

mod hub;
mod mailbox;
mod message;
mod registry;
mod transport;

pub use hub::MessageBroker;
pub use mailbox::Mailbox;
pub use message::{Message, MessageId, Payload, Structured, ThreadId};
pub use registry::{Thread, ThreadRegistry};
pub use transport::{BrokerClient, BrokerTransport, LocalTransport};

#[cfg(test)]
pub(crate) use transport::tests::FlakyTransport;
