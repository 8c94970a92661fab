//! RPC plumbing towards the forwarding engine's native control API.
//!
//! The engine is reached through an opaque request/reply channel. This crate
//! keeps the wire format out of the translation layer:
//!
//! - [`RpcChannel`]: the transport seam, one request in, one reply out
//! - [`RpcClient`]: typed calls with a per-call timeout and status mapping
//! - [`Connector`] / [`ConnectionGuard`]: scoped connection lifecycle
//! - [`sim::SimulatedEngine`]: in-memory engine used for simulation and tests
//!
//! # Example
//!
//! ```ignore
//! use fwd_rpc::{ApiRequest, RpcClient};
//!
//! #[derive(serde::Serialize)]
//! struct InterfaceDump;
//!
//! impl ApiRequest for InterfaceDump {
//!     const MESSAGE: &'static str = "interface_dump";
//!     type Reply = Vec<InterfaceDetails>;
//! }
//!
//! let details = client.dump(&InterfaceDump).await?;
//! ```

pub mod channel;
pub mod connection;
pub mod error;
pub mod sim;

pub use channel::{ApiRequest, EngineReply, EngineRequest, RpcChannel, RpcClient};
pub use connection::{ConnectionGuard, Connector};
pub use error::{EngineStatus, RpcError, RpcResult};
