//! Direct-messaging backend for a campus task-collaboration platform.
//!
//! Students open a DM thread by sending a first message; the recipient
//! accepts or ignores the request; accepted threads allow free messaging
//! both ways. This crate owns the conversation lifecycle, the permission
//! matrix for sends, and per-party unread accounting. Identity resolution
//! and page rendering live elsewhere and are consumed through traits.

#![deny(unsafe_code)]
#![deny(unused_must_use)]
#![deny(non_snake_case)]
#![deny(nonstandard_style)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

/// Conversation engine, storage, identity and rate-limit seams.
pub mod dm;
/// HTTP server and API routes.
pub mod server;
/// Startup helpers for the bundled server binary.
pub mod startup;
