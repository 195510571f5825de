//! skillindex-rpc — the JSON-RPC implementation of
//! [`skillindex_core::ChainClient`] with retrying HTTP transport.

pub mod client;
pub mod request;

pub use client::{HttpChainClient, HttpClientConfig};
pub use request::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
