//! IPC bridge between the host and the parser worker.
//!
//! # Architecture
//!
//! - **protocol**: Message types (Command/Request outbound, Event inbound)
//! - **wire**: Byte-exact JSON layout for outbound lines
//! - **codec**: Line framing, sentinel filtering and decoding

pub mod codec;
pub mod protocol;
pub mod wire;
