//! fwdagent: data-tree translation agent for the forwarding engine.
//!
//! The agent wires the per-technology [`plugins`] into one translator,
//! holds the engine connection for its lifetime and audits every
//! configuration transaction:
//!
//! - [`config`]: YAML configuration and startup data
//! - [`daemon`]: connection lifecycle, startup and transaction entry points
//! - [`audit`]: structured audit records and logger initialization
//! - [`plugins`]: interfaces, sub-interfaces and IPv4 addresses

pub mod audit;
pub mod config;
pub mod daemon;
pub mod plugins;

pub use config::{AgentConfig, ConfigError};
pub use daemon::{AgentDaemon, DaemonError};
