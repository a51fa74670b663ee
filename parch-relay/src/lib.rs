//! # parch-relay
//!
//! Federated real-time chat relay for Parch.
//!
//! Self-hosted backends ("hosts") own users and messages and connect to the
//! relay as their host's **author**. End-user clients connect only to the
//! relay, which:
//! - authenticates users and host authors by Ed25519 challenge-response
//! - authorizes space and channel actions with host-signed capability tokens
//! - refuses joins to hosts whose author does not answer a liveness check
//! - forwards requests to the author and fans replies out to channels and
//!   spaces
//! - only ever transports opaque encrypted envelopes
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                         ┌── Host backend (author)
//!            │        WebSocket        │
//!            ├────────────────────────►│
//!            │                         │
//!        ┌───┴─────────────────────────┴───┐
//!        │           parch-relay           │
//!        │  ┌───────────┐  ┌────────────┐  │
//!        │  │ host hubs │  │  SQLite    │  │
//!        │  │ (memory)  │  │ (hosts)    │  │
//!        │  └───────────┘  └────────────┘  │
//!        └─────────────────────────────────┘
//! ```
//!
//! ## Request relay
//!
//! A client action travels client → relay → author → relay:
//! - `chat` → `new_message_request` → `new_message_response` → `new_message`
//!   to every session in the channel
//! - `join_channel`, `join_space` and their `leave_*` twins stay inside the
//!   relay

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capability;
pub mod cleanup;
pub mod config;
pub mod correlator;
mod dispatch;
pub mod error;
mod handlers;
pub mod host;
pub mod http;
pub mod identity;
pub mod limits;
pub mod mailbox;
pub mod server;
pub mod session;
pub mod storage;

pub use server::Relay;
