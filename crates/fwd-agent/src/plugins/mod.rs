//! Per-technology plugins.
//!
//! Each plugin registers its writers, readers and naming domains into the
//! shared [`PluginRegistry`]. [`register_all`] wires them in a fixed order;
//! later plugins refer to the interface naming domain of earlier ones.

pub mod interfaces;
pub mod ipv4;
pub mod subinterfaces;

use fwd_rpc::RpcClient;
use fwd_translate::{CustomizerError, CustomizerResult, PluginRegistry, RegistryError};
use fwd_types::SchemaPath;
use serde::Deserialize;

/// Interface name <-> engine interface index
pub const INTERFACE_CONTEXT: &str = "interface-context";

/// (interface name, sub-interface id) <-> engine sub-interface index
pub const SUBINTERFACE_CONTEXT: &str = "subinterface-context";

/// Reply of every `*_add` message.
#[derive(Debug, Clone, Copy, Deserialize)]
pub(crate) struct AddReply {
    pub index: u32,
}

/// `/interfaces/interface[*]`
pub fn interface_list() -> SchemaPath {
    SchemaPath::root().child("interfaces").list("interface")
}

/// Returns the interface name a path below `/interfaces/interface` refers to.
pub(crate) fn interface_name(path: &SchemaPath) -> CustomizerResult<&str> {
    path.segments()
        .get(1)
        .filter(|segment| segment.name() == "interface")
        .and_then(|segment| segment.exact_key())
        .ok_or_else(|| CustomizerError::invalid(path, "no interface name in path"))
}

/// Parses node data into a typed configuration.
pub(crate) fn parse<T: serde::de::DeserializeOwned>(path: &SchemaPath, data: &serde_json::Value) -> CustomizerResult<T> {
    serde_json::from_value(data.clone()).map_err(|e| CustomizerError::invalid(path, e.to_string()))
}

/// Registers every plugin.
pub fn register_all(plugins: &mut PluginRegistry, client: &RpcClient) -> Result<(), RegistryError> {
    interfaces::register(plugins, client)?;
    subinterfaces::register(plugins, client)?;
    ipv4::register(plugins, client)?;
    log::info!(
        "registered {} writers and {} readers",
        plugins.writers().len(),
        plugins.readers().len()
    );
    Ok(())
}
