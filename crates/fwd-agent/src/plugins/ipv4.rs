//! IPv4 addresses: `/interfaces/interface[*]/ipv4`
//!
//! The writer handles the whole `ipv4` subtree: a change of any
//! `address[*]` below it is delivered as a change of the `ipv4` node, whose
//! value carries the complete address list. Addresses are added with
//! `ip_address_add`; deleting one looks up its engine index with a filtered
//! `ip_address_dump` first.

use super::{interface_list, interface_name, parse, AddReply, INTERFACE_CONTEXT};
use async_trait::async_trait;
use fwd_rpc::{ApiRequest, RpcClient};
use fwd_translate::{
    CustomizerError, CustomizerResult, DumpError, DumpExecutor, DumpManager, ListReaderCustomizer, PluginRegistry,
    ReadContext, Reader, ReaderCustomizer, RegistryError, WriteContext, WriterCustomizer,
};
use fwd_types::SchemaPath;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// `/interfaces/interface[*]/ipv4`
pub fn ipv4_root() -> SchemaPath {
    interface_list().child("ipv4")
}

/// `/interfaces/interface[*]/ipv4/address[*]`
pub fn address_list() -> SchemaPath {
    ipv4_root().list("address")
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Deserialize)]
struct Address {
    ip: String,
    #[serde(rename = "prefix-length")]
    prefix_length: u8,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Ipv4Config {
    #[serde(default)]
    address: Vec<Address>,
}

impl Ipv4Config {
    fn from_data(path: &SchemaPath, data: &Value) -> CustomizerResult<BTreeSet<Address>> {
        let config: Ipv4Config = parse(path, data)?;
        let mut addresses = BTreeSet::new();
        let mut ips = BTreeSet::new();
        for address in config.address {
            if address.ip.parse::<Ipv4Addr>().is_err() {
                return Err(CustomizerError::invalid(path, format!("{} is not an IPv4 address", address.ip)));
            }
            if address.prefix_length > 32 {
                return Err(CustomizerError::invalid(
                    path,
                    format!("prefix length {} of {} exceeds 32", address.prefix_length, address.ip),
                ));
            }
            if !ips.insert(address.ip.clone()) {
                return Err(CustomizerError::invalid(path, format!("{} is configured twice", address.ip)));
            }
            addresses.insert(address);
        }
        Ok(addresses)
    }
}

#[derive(Debug, Serialize)]
struct IpAddressAdd<'a> {
    sw_if_index: u32,
    ip: &'a str,
    prefix_length: u8,
}

impl ApiRequest for IpAddressAdd<'_> {
    const MESSAGE: &'static str = "ip_address_add";
    type Reply = AddReply;
}

#[derive(Debug, Serialize)]
struct IpAddressDel {
    index: u32,
}

impl ApiRequest for IpAddressDel {
    const MESSAGE: &'static str = "ip_address_del";
    type Reply = ();
}

/// Lists the addresses of one interface, optionally only `ip`.
#[derive(Debug, Serialize)]
struct IpAddressDump {
    sw_if_index: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    ip: Option<String>,
}

impl ApiRequest for IpAddressDump {
    const MESSAGE: &'static str = "ip_address_dump";
    type Reply = Vec<AddressDetails>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddressDetails {
    pub index: u32,
    pub sw_if_index: u32,
    pub ip: String,
    pub prefix_length: u8,
}

/// Writes the address list of one interface.
pub struct Ipv4Writer {
    client: RpcClient,
}

impl Ipv4Writer {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    async fn add(&self, sw_if_index: u32, address: &Address) -> CustomizerResult<()> {
        let reply = self
            .client
            .invoke(&IpAddressAdd {
                sw_if_index,
                ip: &address.ip,
                prefix_length: address.prefix_length,
            })
            .await?;
        log::debug!(
            "added {}/{} to interface {} (index {})",
            address.ip,
            address.prefix_length,
            sw_if_index,
            reply.index
        );
        Ok(())
    }

    async fn remove(&self, sw_if_index: u32, address: &Address) -> CustomizerResult<()> {
        let request = IpAddressDump {
            sw_if_index,
            ip: Some(address.ip.clone()),
        };
        let details = match self.client.dump(&request).await {
            Ok(details) => details,
            Err(e) if e.is_empty_reply() => {
                log::warn!("{} is not configured on interface {}", address.ip, sw_if_index);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        for detail in details.iter().filter(|d| d.prefix_length == address.prefix_length) {
            match self.client.invoke(&IpAddressDel { index: detail.index }).await {
                Ok(_) => log::debug!("removed {}/{} from interface {}", address.ip, address.prefix_length, sw_if_index),
                Err(e) if e.is_not_found() => log::warn!("{} was already removed from interface {}", address.ip, sw_if_index),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn sw_if_index(path: &SchemaPath, ctx: &WriteContext) -> CustomizerResult<u32> {
        let name = interface_name(path)?;
        Ok(ctx.with_naming(INTERFACE_CONTEXT, |n| n.index_of(name))?)
    }
}

#[async_trait]
impl WriterCustomizer for Ipv4Writer {
    async fn validate(
        &self,
        path: &SchemaPath,
        _before: Option<&Value>,
        after: Option<&Value>,
        _ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        if let Some(after) = after {
            Ipv4Config::from_data(path, after)?;
        }
        Ok(())
    }

    async fn create(&self, path: &SchemaPath, data: &Value, ctx: &WriteContext) -> CustomizerResult<()> {
        let sw_if_index = Self::sw_if_index(path, ctx)?;
        for address in &Ipv4Config::from_data(path, data)? {
            self.add(sw_if_index, address).await?;
        }
        Ok(())
    }

    async fn update(
        &self,
        path: &SchemaPath,
        before: &Value,
        after: &Value,
        ctx: &WriteContext,
    ) -> CustomizerResult<()> {
        let sw_if_index = Self::sw_if_index(path, ctx)?;
        let old = Ipv4Config::from_data(path, before)?;
        let new = Ipv4Config::from_data(path, after)?;
        for address in old.difference(&new) {
            self.remove(sw_if_index, address).await?;
        }
        for address in new.difference(&old) {
            self.add(sw_if_index, address).await?;
        }
        Ok(())
    }

    async fn delete(&self, path: &SchemaPath, data: &Value, ctx: &WriteContext) -> CustomizerResult<()> {
        let name = interface_name(path)?;
        let sw_if_index = match ctx.with_naming(INTERFACE_CONTEXT, |n| n.index_of(name)) {
            Ok(index) => index,
            Err(e) if e.is_not_found() => {
                log::warn!("interface {} has no engine index, no addresses to remove", name);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        for address in &Ipv4Config::from_data(path, data)? {
            self.remove(sw_if_index, address).await?;
        }
        Ok(())
    }
}

struct AddressDumpExecutor {
    client: RpcClient,
}

#[async_trait]
impl DumpExecutor<Vec<AddressDetails>, u32> for AddressDumpExecutor {
    async fn execute(&self, _path: &SchemaPath, sw_if_index: &u32) -> Result<Vec<AddressDetails>, DumpError> {
        let request = IpAddressDump {
            sw_if_index: *sw_if_index,
            ip: None,
        };
        self.client
            .dump(&request)
            .await
            .map_err(|e| DumpError::from_rpc(format!("{}({})", IpAddressDump::MESSAGE, sw_if_index), e))
    }
}

/// Reads addresses from one dump per interface.
pub struct AddressReader {
    dumps: DumpManager<Vec<AddressDetails>, u32>,
}

impl AddressReader {
    pub fn new(client: RpcClient) -> Self {
        let executor: Arc<dyn DumpExecutor<Vec<AddressDetails>, u32>> = Arc::new(AddressDumpExecutor { client });
        Self {
            dumps: DumpManager::builder("ip-address", executor).build(),
        }
    }

    async fn addresses(&self, path: &SchemaPath, ctx: &ReadContext) -> CustomizerResult<Arc<Vec<AddressDetails>>> {
        let name = interface_name(path)?;
        let sw_if_index = ctx.with_naming(INTERFACE_CONTEXT, |n| n.index_of(name))??;
        Ok(self.dumps.get_dump(path, ctx.dump_cache(), &sw_if_index).await?)
    }
}

#[async_trait]
impl ReaderCustomizer for AddressReader {
    async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        builder: &mut Value,
        ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        let ip = path.last().and_then(|s| s.exact_key()).unwrap_or_default();
        if let Some(address) = self.addresses(path, ctx).await?.iter().find(|a| a.ip == ip) {
            *builder = json!({"ip": address.ip, "prefix-length": address.prefix_length});
        }
        Ok(())
    }
}

#[async_trait]
impl ListReaderCustomizer for AddressReader {
    async fn all_ids(&self, path: &SchemaPath, ctx: &ReadContext) -> CustomizerResult<Vec<String>> {
        Ok(self
            .addresses(path, ctx)
            .await?
            .iter()
            .map(|a| a.ip.clone())
            .collect())
    }
}

pub fn register(plugins: &mut PluginRegistry, client: &RpcClient) -> Result<(), RegistryError> {
    plugins.writers().register_subtree(
        ipv4_root(),
        [SchemaPath::root().list("address")],
        Arc::new(Ipv4Writer::new(client.clone())),
        Vec::new(),
    )?;
    plugins.add_reader(
        address_list(),
        Reader::list(AddressReader::new(client.clone())),
        Vec::new(),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::interfaces;
    use fwd_rpc::sim::SimulatedEngine;
    use fwd_rpc::EngineStatus;
    use fwd_translate::{DataTreeDiff, Translator, WriteError};
    use pretty_assertions::assert_eq;

    fn p(s: &str) -> SchemaPath {
        s.parse().unwrap()
    }

    fn translator(engine: &Arc<SimulatedEngine>) -> Translator {
        let client = RpcClient::new(engine.clone());
        let mut plugins = PluginRegistry::new();
        interfaces::register(&mut plugins, &client).unwrap();
        register(&mut plugins, &client).unwrap();
        plugins.build().unwrap()
    }

    fn ips(engine: &SimulatedEngine) -> Vec<String> {
        engine
            .entries("ip_address")
            .into_iter()
            .filter_map(|(_, e)| e["ip"].as_str().map(str::to_string))
            .collect()
    }

    async fn with_addresses(translator: &Translator, addresses: Value) {
        let diff = DataTreeDiff::default()
            .create(p("/interfaces/interface[eth0]"), json!({}))
            .create(p("/interfaces/interface[eth0]/ipv4"), json!({ "address": addresses }));
        translator.write().commit(diff).await.unwrap();
    }

    #[tokio::test]
    async fn test_create_adds_every_address() {
        let engine = Arc::new(SimulatedEngine::new());
        let translator = translator(&engine);
        with_addresses(
            &translator,
            json!([
                {"ip": "10.0.0.1", "prefix-length": 24},
                {"ip": "10.0.1.1", "prefix-length": 24},
            ]),
        )
        .await;

        assert_eq!(ips(&engine), vec!["10.0.0.1", "10.0.1.1"]);
        assert_eq!(engine.call_count("ip_address_add"), 2);
    }

    #[tokio::test]
    async fn test_address_change_is_lifted_to_ipv4_node() {
        let engine = Arc::new(SimulatedEngine::new());
        let translator = translator(&engine);
        with_addresses(&translator, json!([{"ip": "10.0.0.1", "prefix-length": 24}])).await;

        let ipv4 = p("/interfaces/interface[eth0]/ipv4");
        let before = json!({"address": [{"ip": "10.0.0.1", "prefix-length": 24}]});
        let after = json!({"address": [{"ip": "10.0.0.2", "prefix-length": 24}]});
        let diff = DataTreeDiff::default()
            .update(ipv4, before, after)
            .delete(
                p("/interfaces/interface[eth0]/ipv4/address[10.0.0.1]"),
                json!({"ip": "10.0.0.1", "prefix-length": 24}),
            )
            .create(
                p("/interfaces/interface[eth0]/ipv4/address[10.0.0.2]"),
                json!({"ip": "10.0.0.2", "prefix-length": 24}),
            );
        let report = translator.write().commit(diff).await.unwrap();

        assert_eq!(report.applied.len(), 1);
        assert_eq!(ips(&engine), vec!["10.0.0.2"]);
        assert_eq!(engine.call_count("ip_address_del"), 1);
    }

    #[tokio::test]
    async fn test_invalid_address_is_rejected() {
        let engine = Arc::new(SimulatedEngine::new());
        let translator = translator(&engine);

        let diff = DataTreeDiff::default()
            .create(p("/interfaces/interface[eth0]"), json!({}))
            .create(
                p("/interfaces/interface[eth0]/ipv4"),
                json!({"address": [{"ip": "10.0.0.300", "prefix-length": 24}]}),
            );
        let err = translator.write().commit(diff).await.unwrap_err();
        assert!(matches!(err, WriteError::ValidationFailed { .. }));

        let diff = DataTreeDiff::default()
            .create(p("/interfaces/interface[eth0]"), json!({}))
            .create(
                p("/interfaces/interface[eth0]/ipv4"),
                json!({"address": [{"ip": "10.0.0.1", "prefix-length": 33}]}),
            );
        let err = translator.write().commit(diff).await.unwrap_err();
        assert!(matches!(err, WriteError::ValidationFailed { .. }));
        assert_eq!(engine.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_address_failure_rolls_back_interface() {
        let engine = Arc::new(SimulatedEngine::new());
        engine.fail_next("ip_address_add", EngineStatus::TableFull);
        let translator = translator(&engine);

        let diff = DataTreeDiff::default()
            .create(p("/interfaces/interface[eth0]"), json!({}))
            .create(
                p("/interfaces/interface[eth0]/ipv4"),
                json!({"address": [{"ip": "10.0.0.1", "prefix-length": 24}]}),
            );
        let err = translator.write().commit(diff).await.unwrap_err();

        assert_eq!(err.path(), Some(&p("/interfaces/interface[eth0]/ipv4")));
        assert!(engine.entries("sw_interface").is_empty());
        assert_eq!(engine.call_count("sw_interface_del"), 1);
    }

    #[tokio::test]
    async fn test_wildcard_read_dumps_once_per_interface() {
        let engine = Arc::new(SimulatedEngine::new());
        let translator = translator(&engine);
        with_addresses(
            &translator,
            json!([
                {"ip": "10.0.0.1", "prefix-length": 24},
                {"ip": "10.0.1.1", "prefix-length": 24},
            ]),
        )
        .await;
        let diff = DataTreeDiff::default()
            .create(p("/interfaces/interface[eth1]"), json!({}))
            .create(
                p("/interfaces/interface[eth1]/ipv4"),
                json!({"address": [{"ip": "192.168.1.1", "prefix-length": 16}]}),
            );
        translator.write().commit(diff).await.unwrap();

        let output = translator
            .read()
            .read(&p("/interfaces/interface[*]/ipv4/address[*]"))
            .await
            .unwrap();
        let read: Vec<String> = output.nodes.iter().map(|n| n.path.to_string()).collect();
        assert_eq!(
            read,
            vec![
                "/interfaces/interface[eth0]/ipv4/address[10.0.0.1]",
                "/interfaces/interface[eth0]/ipv4/address[10.0.1.1]",
                "/interfaces/interface[eth1]/ipv4/address[192.168.1.1]",
            ]
        );
        assert_eq!(engine.call_count("ip_address_dump"), 2);
    }
}
