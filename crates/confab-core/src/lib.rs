//! # Confab Core Library
//!
//! Conversation core of a desktop chat client: everything that backs one
//! conversation with one peer except the encrypted transport and the
//! widgets.
//!
//! ## What lives here
//!
//! - Out-of-band verification of the peer's key by comparing a shared
//!   secret (a PIN read aloud or sent over another channel).
//! - Store-and-forward of messages sent before the peer can receive them,
//!   replayed into history once delivery is confirmed.
//! - A transcript that marks time as it grows and compacts content older
//!   than a retention window while keeping its offsets consistent.
//! - A trust store of fingerprints per peer, shared across conversations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        conversation (coordinator)       │
//! ├─────────────────────────────────────────┤
//! │  verify  │  pending  │  transcript      │
//! ├─────────────────────────────────────────┤
//! │  trust   │  transport (contract)        │
//! ├─────────────────────────────────────────┤
//! │  identity │ message │ notify │ clock    │
//! └─────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod clock;
pub mod config;
pub mod conversation;
pub mod error;
pub mod identity;
pub mod logging;
pub mod message;
pub mod notify;
pub mod pending;
pub mod transcript;
pub mod transport;
pub mod trust;
pub mod verify;

pub use conversation::{Conversation, ConversationBuilder, FingerprintStatus, SendOutcome};
pub use error::{Error, Result};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
