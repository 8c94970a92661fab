//! Reads sharing bulk dumps within one read transaction.

use async_trait::async_trait;
use fwd_rpc::sim::SimulatedEngine;
use fwd_rpc::{ApiRequest, EngineStatus, RpcClient};
use fwd_translate::{
    CacheKey, CustomizerError, CustomizerResult, DumpError, DumpExecutor, DumpManager, ListReaderCustomizer,
    PluginRegistry, ReadContext, ReadError, Reader, ReaderCustomizer, RegistryError, Translator,
};
use fwd_translate_test::{path, CountingDumpExecutor, FailingReader, FixedListReader, FixedReader};
use fwd_types::SchemaPath;
use pretty_assertions::assert_eq;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

type AddressDump = DumpManager<Vec<Value>, ()>;

/// Addresses of one interface, listed from a per-interface dump.
struct AddressReader {
    dumps: Arc<AddressDump>,
}

impl AddressReader {
    async fn addresses(&self, path: &SchemaPath, ctx: &ReadContext) -> CustomizerResult<Arc<Vec<Value>>> {
        Ok(self.dumps.get_dump(path, ctx.dump_cache(), &()).await?)
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
        if let Some(entry) = self.addresses(path, ctx).await?.iter().find(|a| a["ip"] == ip) {
            *builder = entry.clone();
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
            .filter_map(|a| a["ip"].as_str().map(str::to_string))
            .collect())
    }
}

fn translator(executor: Arc<CountingDumpExecutor<Vec<Value>>>) -> Translator {
    let executor: Arc<dyn DumpExecutor<Vec<Value>, ()>> = executor;
    let dumps = AddressDump::builder("ipv4-address", executor)
        .key_factory(|namespace, path: &SchemaPath, _: &()| {
            let interface = path.segments()[0].exact_key().unwrap_or_default();
            CacheKey::new(namespace).with_param("interface", interface)
        })
        .build();

    let interfaces = FixedListReader::new()
        .with(path("/if[eth0]"), json!({"name": "eth0"}))
        .with(path("/if[eth1]"), json!({"name": "eth1"}));

    let mut plugins = PluginRegistry::new();
    plugins
        .add_reader(path("/if[*]"), Reader::list(interfaces), Vec::new())
        .unwrap()
        .add_reader(
            path("/if[*]/ipv4/address[*]"),
            Reader::list(AddressReader { dumps: Arc::new(dumps) }),
            Vec::new(),
        )
        .unwrap();
    plugins.build().unwrap()
}

fn executor() -> Arc<CountingDumpExecutor<Vec<Value>>> {
    Arc::new(
        CountingDumpExecutor::new()
            .with(
                "eth0",
                vec![
                    json!({"ip": "10.0.0.1", "prefix-length": 24}),
                    json!({"ip": "10.0.1.1", "prefix-length": 24}),
                ],
            )
            .with("eth1", vec![json!({"ip": "192.168.1.1", "prefix-length": 16})]),
    )
}

#[tokio::test]
async fn test_wildcard_address_read_uses_per_interface_dump() {
    let executor = executor();
    let translator = translator(executor.clone());

    let output = translator
        .read()
        .read(&path("/if[*]/ipv4/address[*]"))
        .await
        .unwrap();

    let read: Vec<(String, Value)> = output
        .nodes
        .iter()
        .map(|n| (n.path.to_string(), n.value["prefix-length"].clone()))
        .collect();
    assert_eq!(
        read,
        vec![
            ("/if[eth0]/ipv4/address[10.0.0.1]".to_string(), json!(24)),
            ("/if[eth0]/ipv4/address[10.0.1.1]".to_string(), json!(24)),
            ("/if[eth1]/ipv4/address[192.168.1.1]".to_string(), json!(16)),
        ]
    );
    assert!(output.failures.is_empty());
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn test_dump_cache_is_scoped_to_transaction() {
    let executor = executor();
    let translator = translator(executor.clone());

    let tx = translator.read().begin();
    tx.read(&path("/if[eth0]/ipv4/address[*]")).await.unwrap();
    tx.read(&path("/if[eth0]/ipv4/address[10.0.0.1]")).await.unwrap();
    assert_eq!(executor.calls(), 1);
    assert_eq!(tx.context().dump_cache().hits(), 3);
    drop(tx);

    translator
        .read()
        .read(&path("/if[eth0]/ipv4/address[*]"))
        .await
        .unwrap();
    assert_eq!(executor.calls(), 2);
}

#[tokio::test]
async fn test_interface_read_merges_structural_children() {
    let translator = translator(executor());

    let output = translator.read().read(&path("/if[eth1]")).await.unwrap();
    assert_eq!(
        output.single(),
        Some(&json!({
            "name": "eth1",
            "ipv4": {"address": [{"ip": "192.168.1.1", "prefix-length": 16}]},
        }))
    );
}

#[tokio::test]
async fn test_missing_interface_dump_is_empty() {
    let translator = translator(Arc::new(CountingDumpExecutor::new()));
    let output = translator
        .read()
        .read(&path("/if[*]/ipv4/address[*]"))
        .await
        .unwrap();
    assert!(output.is_empty());
    assert!(output.failures.is_empty());
}

#[tokio::test]
async fn test_failing_subtree_is_isolated() {
    let mut plugins = PluginRegistry::new();
    plugins
        .add_reader(
            path("/system"),
            Reader::scalar(FixedReader::new().with(path("/system"), json!({"hostname": "r1"}))),
            Vec::new(),
        )
        .unwrap()
        .add_reader(path("/system/clock"), Reader::scalar(FailingReader::new("no clock")), Vec::new())
        .unwrap();
    let translator = plugins.build().unwrap();

    let output = translator.read().read(&path("/system")).await.unwrap();
    assert_eq!(output.single(), Some(&json!({"hostname": "r1"})));
    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].path(), &path("/system/clock"));

    let err = translator.read().read(&path("/system/clock")).await.unwrap_err();
    assert!(matches!(err, ReadError::ReadFailed { .. }));

    let err = translator.read().read(&path("/vlan[1]")).await.unwrap_err();
    assert_eq!(err, ReadError::NoReader { path: path("/vlan[1]") });
}

#[test]
fn test_reader_under_unregistered_list_fails_at_startup() {
    let mut plugins = PluginRegistry::new();
    plugins
        .add_reader(path("/if[*]/state"), Reader::scalar(FixedReader::new()), Vec::new())
        .unwrap();
    assert!(matches!(
        plugins.build(),
        Err(RegistryError::UnresolvedDependency { .. })
    ));
}

#[derive(Serialize)]
struct VlanDump;

impl ApiRequest for VlanDump {
    const MESSAGE: &'static str = "vlan_dump";
    type Reply = Vec<Value>;
}

struct VlanDumpExecutor {
    client: RpcClient,
}

#[async_trait]
impl DumpExecutor<Vec<Value>, ()> for VlanDumpExecutor {
    async fn execute(&self, _path: &SchemaPath, _params: &()) -> Result<Vec<Value>, DumpError> {
        self.client
            .dump(&VlanDump)
            .await
            .map_err(|e| DumpError::from_rpc(VlanDump::MESSAGE, e))
    }
}

/// VLANs listed from one `vlan_dump` per read transaction.
struct VlanReader {
    dumps: DumpManager<Vec<Value>, ()>,
}

#[async_trait]
impl ReaderCustomizer for VlanReader {
    async fn read_current_attributes(
        &self,
        path: &SchemaPath,
        builder: &mut Value,
        ctx: &ReadContext,
    ) -> CustomizerResult<()> {
        let id = path.last().and_then(|s| s.exact_key()).unwrap_or_default();
        let vlans = self.dumps.get_dump(path, ctx.dump_cache(), &()).await?;
        if let Some(vlan) = vlans.iter().find(|v| v["index"].to_string() == id) {
            *builder = vlan.clone();
        }
        Ok(())
    }
}

#[async_trait]
impl ListReaderCustomizer for VlanReader {
    async fn all_ids(&self, path: &SchemaPath, ctx: &ReadContext) -> CustomizerResult<Vec<String>> {
        let vlans = self.dumps.get_dump(path, ctx.dump_cache(), &()).await?;
        Ok(vlans.iter().map(|v| v["index"].to_string()).collect())
    }
}

fn vlans(engine: &Arc<SimulatedEngine>) -> Translator {
    let client = RpcClient::new(engine.clone()).with_timeout(Duration::from_millis(50));
    let executor: Arc<dyn DumpExecutor<Vec<Value>, ()>> = Arc::new(VlanDumpExecutor { client });
    let reader = VlanReader {
        dumps: DumpManager::builder("vlan", executor).build(),
    };
    let mut plugins = PluginRegistry::new();
    plugins
        .add_reader(path("/vlan[*]"), Reader::list(reader), Vec::new())
        .unwrap();
    plugins.build().unwrap()
}

#[tokio::test]
async fn test_dump_timeout_is_a_failure_and_not_cached() {
    let engine = Arc::new(SimulatedEngine::new());
    engine.seed("vlan", 10, json!({"name": "ten"}));
    let translator = vlans(&engine);
    engine.stall_next("vlan_dump");

    let tx = translator.read().begin();
    let output = tx.read(&path("/vlan[*]")).await.unwrap();
    assert!(output.is_empty());
    assert_eq!(output.failures.len(), 1);
    match &output.failures[0] {
        ReadError::ReadFailed { path: failed, source } => {
            assert_eq!(failed, &path("/vlan[*]"));
            assert!(matches!(source, CustomizerError::Dump(DumpError::Timeout { timeout_ms: 50, .. })));
        }
        other => panic!("unexpected failure: {other}"),
    }

    // the same transaction dumps again instead of reusing the timeout
    let output = tx.read(&path("/vlan[*]")).await.unwrap();
    assert_eq!(
        output.get(&path("/vlan[10]")),
        Some(&json!({"index": 10, "name": "ten"}))
    );
    assert!(output.failures.is_empty());
    assert_eq!(engine.call_count("vlan_dump"), 2);
}

#[tokio::test]
async fn test_dump_call_failure_fails_concrete_read() {
    let engine = Arc::new(SimulatedEngine::new());
    engine.seed("vlan", 10, json!({"name": "ten"}));
    let translator = vlans(&engine);
    engine.fail_next("vlan_dump", EngineStatus::Unspecified);

    let tx = translator.read().begin();
    let err = tx.read(&path("/vlan[10]")).await.unwrap_err();
    assert!(matches!(
        err,
        ReadError::ReadFailed {
            source: CustomizerError::Dump(DumpError::CallFailed { .. }),
            ..
        }
    ));
    assert!(tx.context().dump_cache().is_empty());

    let output = tx.read(&path("/vlan[10]")).await.unwrap();
    assert_eq!(output.single(), Some(&json!({"index": 10, "name": "ten"})));
}
