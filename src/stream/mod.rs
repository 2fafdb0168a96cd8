//! Outbound link to the peer.
//!
//! ```text
//! stream/
//! ├── protocol.rs - Wire records, encoder and decoder
//! └── client.rs   - Connection state machine with fixed-interval retry
//! ```
//!
//! The link is one-way: the peer never answers, and nothing is buffered
//! while it is away.

pub mod client;
pub mod protocol;
