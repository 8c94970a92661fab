//! Sub-interfaces: `/interfaces/interface[*]/subinterfaces/subinterface[*]`
//!
//! Sub-interface ids are only unique per parent interface, so their engine
//! indexes live in the multi-naming domain [`SUBINTERFACE_CONTEXT`], keyed
//! by parent interface name.

use super::{interface_list, interface_name, parse, AddReply, INTERFACE_CONTEXT, SUBINTERFACE_CONTEXT};
use async_trait::async_trait;
use fwd_rpc::{ApiRequest, RpcClient};
use fwd_translate::{
    CustomizerError, CustomizerResult, DumpError, DumpExecutor, DumpManager, ListReaderCustomizer,
    MultiNamingContext, PluginRegistry, ReadContext, Reader, ReaderCustomizer, RegistryError, WriteContext,
    WriterCustomizer,
};
use fwd_types::SchemaPath;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

pub const MIN_VLAN: u16 = 1;
pub const MAX_VLAN: u16 = 4094;

/// `/interfaces/interface[*]/subinterfaces/subinterface[*]`
pub fn subinterface_list() -> SchemaPath {
    interface_list().child("subinterfaces").list("subinterface")
}

/// Parent interface name and sub-interface id of a sub-interface path.
fn keys(path: &SchemaPath) -> CustomizerResult<(&str, &str, u32)> {
    let parent = interface_name(path)?;
    let key = path
        .segments()
        .get(3)
        .and_then(|segment| segment.exact_key())
        .ok_or_else(|| CustomizerError::invalid(path, "no sub-interface id in path"))?;
    let id = key
        .parse()
        .map_err(|_| CustomizerError::invalid(path, format!("sub-interface id {:?} is not a number", key)))?;
    Ok((parent, key, id))
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SubInterfaceConfig {
    /// Outer VLAN tag, the sub-interface id when absent
    vlan_id: Option<u16>,
}

impl SubInterfaceConfig {
    fn vlan(path: &SchemaPath, id: u32, data: &Value) -> CustomizerResult<u16> {
        let config: SubInterfaceConfig = parse(path, data)?;
        let vlan = match config.vlan_id {
            Some(vlan) => vlan,
            None => u16::try_from(id)
                .map_err(|_| CustomizerError::invalid(path, format!("no vlan-id and {} is not a vlan", id)))?,
        };
        if !(MIN_VLAN..=MAX_VLAN).contains(&vlan) {
            return Err(CustomizerError::invalid(
                path,
                format!("vlan {} is outside {}..={}", vlan, MIN_VLAN, MAX_VLAN),
            ));
        }
        Ok(vlan)
    }
}

#[derive(Debug, Serialize)]
struct SubInterfaceAdd {
    parent_index: u32,
    sub_id: u32,
    vlan_id: u16,
}

impl ApiRequest for SubInterfaceAdd {
    const MESSAGE: &'static str = "sub_interface_add";
    type Reply = AddReply;
}

#[derive(Debug, Serialize)]
struct SubInterfaceSet {
    index: u32,
    vlan_id: u16,
}

impl ApiRequest for SubInterfaceSet {
    const MESSAGE: &'static str = "sub_interface_set";
    type Reply = ();
}

#[derive(Debug, Serialize)]
struct SubInterfaceDel {
    index: u32,
}

impl ApiRequest for SubInterfaceDel {
    const MESSAGE: &'static str = "sub_interface_del";
    type Reply = ();
}

/// Lists the sub-interfaces of one parent.
#[derive(Debug, Serialize)]
struct SubInterfaceDump {
    parent_index: u32,
}

impl ApiRequest for SubInterfaceDump {
    const MESSAGE: &'static str = "sub_interface_dump";
    type Reply = Vec<SubInterfaceDetails>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubInterfaceDetails {
    pub index: u32,
    pub parent_index: u32,
    pub sub_id: u32,
    pub vlan_id: u16,
}

pub struct SubInterfaceWriter {
    client: RpcClient,
}

impl SubInterfaceWriter {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl WriterCustomizer for SubInterfaceWriter {
    async fn validate(
        &self,
        path: &SchemaPath,
        _before: Option<&Value>,
        after: Option<&Value>,
        _ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        let (_, _, id) = keys(path)?;
        if let Some(after) = after {
            SubInterfaceConfig::vlan(path, id, after)?;
        }
        Ok(())
    }

    async fn create(&self, path: &SchemaPath, data: &Value, ctx: &WriteContext) -> CustomizerResult<()> {
        let (parent, key, id) = keys(path)?;
        let vlan_id = SubInterfaceConfig::vlan(path, id, data)?;
        let parent_index = ctx.with_naming(INTERFACE_CONTEXT, |n| n.index_of(parent))?;

        let reply = self
            .client
            .invoke(&SubInterfaceAdd {
                parent_index,
                sub_id: id,
                vlan_id,
            })
            .await?;
        ctx.with_multi_naming(SUBINTERFACE_CONTEXT, |m| m.add_child(parent, reply.index, key))?;
        log::debug!("created sub-interface {}.{} (index {})", parent, key, reply.index);
        Ok(())
    }

    async fn update(
        &self,
        path: &SchemaPath,
        _before: &Value,
        after: &Value,
        ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        let (parent, key, id) = keys(path)?;
        let vlan_id = SubInterfaceConfig::vlan(path, id, after)?;
        let index = ctx.with_multi_naming(SUBINTERFACE_CONTEXT, |m| m.child_index(parent, key))?;
        self.client.invoke(&SubInterfaceSet { index, vlan_id }).await?;
        Ok(())
    }

    async fn delete(&self, path: &SchemaPath, _data: &Value, ctx: &WriteContext) -> CustomizerResult<()> {
        let (parent, key, _) = keys(path)?;
        let index = match ctx.with_multi_naming(SUBINTERFACE_CONTEXT, |m| m.child_index(parent, key)) {
            Ok(index) => index,
            Err(e) if e.is_not_found() => {
                log::warn!("sub-interface {}.{} has no engine index, nothing to delete", parent, key);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        match self.client.invoke(&SubInterfaceDel { index }).await {
            Ok(_) => log::debug!("deleted sub-interface {}.{} (index {})", parent, key, index),
            Err(e) if e.is_not_found() => {
                log::warn!("sub-interface {}.{} (index {}) was already gone", parent, key, index)
            }
            Err(e) => return Err(e.into()),
        }
        ctx.with_multi_naming(SUBINTERFACE_CONTEXT, |m| Ok(m.remove_child(parent, key)))?;
        Ok(())
    }
}

struct SubInterfaceDumpExecutor {
    client: RpcClient,
}

#[async_trait]
impl DumpExecutor<Vec<SubInterfaceDetails>, u32> for SubInterfaceDumpExecutor {
    async fn execute(&self, _path: &SchemaPath, parent_index: &u32) -> Result<Vec<SubInterfaceDetails>, DumpError> {
        let request = SubInterfaceDump {
            parent_index: *parent_index,
        };
        self.client
            .dump(&request)
            .await
            .map_err(|e| DumpError::from_rpc(format!("{}({})", SubInterfaceDump::MESSAGE, parent_index), e))
    }
}

/// Reads sub-interfaces from one dump per parent interface.
pub struct SubInterfaceReader {
    dumps: DumpManager<Vec<SubInterfaceDetails>, u32>,
}

impl SubInterfaceReader {
    pub fn new(client: RpcClient) -> Self {
        let executor: Arc<dyn DumpExecutor<Vec<SubInterfaceDetails>, u32>> =
            Arc::new(SubInterfaceDumpExecutor { client });
        Self {
            dumps: DumpManager::builder("sub-interface", executor).build(),
        }
    }

    async fn sub_interfaces(
        &self,
        path: &SchemaPath,
        ctx: &ReadContext,
    ) -> CustomizerResult<Arc<Vec<SubInterfaceDetails>>> {
        let parent = interface_name(path)?;
        let parent_index = ctx.with_naming(INTERFACE_CONTEXT, |n| n.index_of(parent))??;
        Ok(self.dumps.get_dump(path, ctx.dump_cache(), &parent_index).await?)
    }
}

#[async_trait]
impl ReaderCustomizer for SubInterfaceReader {
    async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        builder: &mut Value,
        ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        let (_, _, id) = keys(path)?;
        if let Some(sub) = self.sub_interfaces(path, ctx).await?.iter().find(|s| s.sub_id == id) {
            *builder = json!({"id": sub.sub_id, "vlan-id": sub.vlan_id});
        }
        Ok(())
    }
}

#[async_trait]
impl ListReaderCustomizer for SubInterfaceReader {
    async fn all_ids(&self, path: &SchemaPath, ctx: &ReadContext) -> CustomizerResult<Vec<String>> {
        Ok(self
            .sub_interfaces(path, ctx)
            .await?
            .iter()
            .map(|s| s.sub_id.to_string())
            .collect())
    }
}

pub fn register(plugins: &mut PluginRegistry, client: &RpcClient) -> Result<(), RegistryError> {
    plugins
        .add_domain(MultiNamingContext::new(SUBINTERFACE_CONTEXT, 1))
        .add_writer(subinterface_list(), SubInterfaceWriter::new(client.clone()), Vec::new())?
        .add_reader(
            subinterface_list(),
            Reader::list(SubInterfaceReader::new(client.clone())),
            Vec::new(),
        )?;
    Ok(())
}
