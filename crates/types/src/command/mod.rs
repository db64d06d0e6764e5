//! The command protocol layered over consensus topics.
//!
//! A [`CommandEnvelope`] is the three-field JSON object that actually travels
//! on a topic; in memory a command is the typed [`Command`] value and is only
//! marshalled (JSON-RPC body, base64, envelope JSON) at the boundary.

mod envelope;
mod jsonrpc;
mod methods;

pub use envelope::{Command, CommandEnvelope, PROTOCOL_VERSION};
pub use jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, RequestId, JSONRPC_VERSION};
pub use methods::{find, find_by_code, MethodDescriptor, ServiceId, METHODS};
