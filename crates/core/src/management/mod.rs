//! Management node client
//!
//! Request/response operations against an entity's `$management` node:
//! settlement by lock token, lock renewal, peek, deferred receive,
//! scheduling and session state.

mod client;
mod rpc;

pub use client::ManagementClient;
pub use rpc::{RpcLink, RpcResponse};
