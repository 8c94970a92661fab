//! Interfaces: `/interfaces/interface[*]`
//!
//! An interface is created with `sw_interface_add`, which allocates its
//! engine index. The index is recorded in [`INTERFACE_CONTEXT`] under the
//! interface name so that every other plugin can address the interface.

use super::{interface_list, interface_name, parse, AddReply, INTERFACE_CONTEXT};
use async_trait::async_trait;
use fwd_rpc::{ApiRequest, RpcClient};
use fwd_translate::{
    CustomizerError, CustomizerResult, DumpError, DumpExecutor, DumpManager, ListReaderCustomizer, NamingContext,
    PluginRegistry, ReadContext, Reader, ReaderCustomizer, RegistryError, WriteContext, WriterCustomizer,
};
use fwd_types::SchemaPath;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub const DEFAULT_MTU: u32 = 1500;
pub const MIN_MTU: u32 = 64;
pub const MAX_MTU: u32 = 9216;

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

/// Configuration of one interface node.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct InterfaceConfig {
    #[serde(default = "default_mtu")]
    mtu: u32,
    #[serde(default)]
    enabled: bool,
}

impl InterfaceConfig {
    fn from_data(path: &SchemaPath, data: &Value) -> CustomizerResult<Self> {
        let config: InterfaceConfig = parse(path, data)?;
        if !(MIN_MTU..=MAX_MTU).contains(&config.mtu) {
            return Err(CustomizerError::invalid(
                path,
                format!("mtu {} is outside {}..={}", config.mtu, MIN_MTU, MAX_MTU),
            ));
        }
        Ok(config)
    }
}

#[derive(Debug, Serialize)]
struct SwInterfaceAdd {
    name: String,
    mtu: u32,
    enabled: bool,
}

impl ApiRequest for SwInterfaceAdd {
    const MESSAGE: &'static str = "sw_interface_add";
    type Reply = AddReply;
}

#[derive(Debug, Serialize)]
struct SwInterfaceSet {
    index: u32,
    mtu: u32,
    enabled: bool,
}

impl ApiRequest for SwInterfaceSet {
    const MESSAGE: &'static str = "sw_interface_set";
    type Reply = ();
}

#[derive(Debug, Serialize)]
struct SwInterfaceDel {
    index: u32,
}

impl ApiRequest for SwInterfaceDel {
    const MESSAGE: &'static str = "sw_interface_del";
    type Reply = ();
}

/// Lists every interface.
#[derive(Debug, Serialize)]
struct SwInterfaceDump;

impl ApiRequest for SwInterfaceDump {
    const MESSAGE: &'static str = "sw_interface_dump";
    type Reply = Vec<InterfaceDetails>;
}

/// One interface as reported by the engine.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InterfaceDetails {
    pub index: u32,
    pub name: String,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    #[serde(default)]
    pub enabled: bool,
}

/// Creates, updates and deletes interfaces.
pub struct InterfaceWriter {
    client: RpcClient,
}

impl InterfaceWriter {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WriterCustomizer for InterfaceWriter {
    async fn validate(
        &self,
        path: &SchemaPath,
        _before: Option<&Value>,
        after: Option<&Value>,
        _ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        interface_name(path)?;
        if let Some(after) = after {
            InterfaceConfig::from_data(path, after)?;
        }
        Ok(())
    }

    async fn create(&self, path: &SchemaPath, data: &Value, ctx: &WriteContext) -> CustomizerResult<()> {
        let name = interface_name(path)?;
        let config = InterfaceConfig::from_data(path, data)?;
        if ctx.with_naming(INTERFACE_CONTEXT, |n| Ok(n.contains_name(name)))? {
            return Err(CustomizerError::invalid(path, format!("interface {} already exists", name)));
        }

        let reply = self
            .client
            .invoke(&SwInterfaceAdd {
                name: name.to_string(),
                mtu: config.mtu,
                enabled: config.enabled,
            })
            .await?;
        ctx.with_naming(INTERFACE_CONTEXT, |n| n.add(name, reply.index))?;
        log::debug!("created interface {} (index {})", name, reply.index);
        Ok(())
    }

    async fn update(
        &self,
        path: &SchemaPath,
        _before: &Value,
        after: &Value,
        ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        let name = interface_name(path)?;
        let config = InterfaceConfig::from_data(path, after)?;
        let index = ctx.with_naming(INTERFACE_CONTEXT, |n| n.index_of(name))?;
        self.client
            .invoke(&SwInterfaceSet {
                index,
                mtu: config.mtu,
                enabled: config.enabled,
            })
            .await?;
        log::debug!("updated interface {} (index {})", name, index);
        Ok(())
    }

    async fn delete(&self, path: &SchemaPath, _data: &Value, ctx: &WriteContext) -> CustomizerResult<()> {
        let name = interface_name(path)?;
        let index = match ctx.with_naming(INTERFACE_CONTEXT, |n| n.index_of(name)) {
            Ok(index) => index,
            Err(e) if e.is_not_found() => {
                log::warn!("interface {} has no engine index, nothing to delete", name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        match self.client.invoke(&SwInterfaceDel { index }).await {
            Ok(_) => log::debug!("deleted interface {} (index {})", name, index),
            Err(e) if e.is_not_found() => log::warn!("interface {} (index {}) was already gone", name, index),
            Err(e) => return Err(e.into()),
        }
        ctx.with_naming(INTERFACE_CONTEXT, |n| Ok(n.remove(name)))?;
        Ok(())
    }
}

struct InterfaceDumpExecutor {
    client: RpcClient,
}

#[async_trait]
impl DumpExecutor<Vec<InterfaceDetails>, ()> for InterfaceDumpExecutor {
    async fn execute(&self, _path: &SchemaPath, _params: &()) -> Result<Vec<InterfaceDetails>, DumpError> {
        self.client
            .dump(&SwInterfaceDump)
            .await
            .map_err(|e| DumpError::from_rpc(SwInterfaceDump::MESSAGE, e))
    }
}

/// Reads interfaces from one shared `sw_interface_dump` per read
/// transaction, learning the name mapping of every interface it sees.
pub struct InterfaceReader {
    dumps: DumpManager<Vec<InterfaceDetails>, ()>,
}

impl InterfaceReader {
    pub fn new(client: RpcClient) -> Self {
        let executor: Arc<dyn DumpExecutor<Vec<InterfaceDetails>, ()>> = Arc::new(InterfaceDumpExecutor { client });
        Self {
            dumps: DumpManager::builder("sw-interface", executor).build(),
        }
    }

    async fn interfaces(&self, path: &SchemaPath, ctx: &ReadContext) -> CustomizerResult<Arc<Vec<InterfaceDetails>>> {
        let details = self.dumps.get_dump(path, ctx.dump_cache(), &()).await?;
        for interface in details.iter() {
            ctx.learn(INTERFACE_CONTEXT, &interface.name, interface.index)?;
        }
        Ok(details)
    }
}

#[async_trait]
impl ReaderCustomizer for InterfaceReader {
    async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        builder: &mut Value,
        ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        let name = interface_name(path)?;
        let interfaces = self.interfaces(path, ctx).await?;
        if let Some(interface) = interfaces.iter().find(|i| i.name == name) {
            *builder = json!({
                "name": interface.name,
                "mtu": interface.mtu,
                "enabled": interface.enabled,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ListReaderCustomizer for InterfaceReader {
    async fn all_ids(&self, path: &SchemaPath, ctx: &ReadContext) -> CustomizerResult<Vec<String>> {
        Ok(self
            .interfaces(path, ctx)
            .await?
            .iter()
            .map(|i| i.name.clone())
            .collect())
    }
}

/// Registers the interface naming domain, writer and reader.
pub fn register(plugins: &mut PluginRegistry, client: &RpcClient) -> Result<(), RegistryError> {
    plugins
        .add_domain(NamingContext::new(INTERFACE_CONTEXT, "local"))
        .add_writer(interface_list(), InterfaceWriter::new(client.clone()), Vec::new())?
        .add_reader(
            interface_list(),
            Reader::list(InterfaceReader::new(client.clone())),
            Vec::new(),
        )?;
    Ok(())
}
