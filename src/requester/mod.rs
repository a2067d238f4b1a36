//! Request/reply correlation on top of a [`Transport`](crate::transport::Transport).
//!
//! A `Requester` keeps a table of outstanding calls keyed by correlation id.
//! Calls leave the table when their reply arrives, when their origin
//! unsubscribes, or all at once on shutdown.

pub mod correlation;

pub use correlation::{CorrelationId, Requester};

#[cfg(test)]
mod tests;
