//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`transport`] — Mock [`StreamTransport`](crate::stream::StreamTransport)
//!   implementations: `ScriptedTransport`, `ChannelTransport`.
//! - [`call`] — Scripted async collaborators: `FlakyOp`,
//!   `ScriptedNonceSource`.

pub mod call;
pub mod transport;
