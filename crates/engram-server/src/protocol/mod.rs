//! Tool-surface transports
//!
//! Two functionally equivalent carriers for the same message envelope:
//! line-delimited JSON over stdio, and HTTP with optional SSE framing.

pub mod http;
pub mod stdio;
pub mod types;

pub use stdio::StdioTransport;
pub use types::{ToolRequest, ToolResponse};
