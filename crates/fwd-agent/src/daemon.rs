//! Agent daemon.
//!
//! Owns the engine connection and the translator built from every plugin.
//! Startup order: connect, register plugins, load persisted naming
//! contexts, build the registries. Any startup error drops the connection
//! guard, which disconnects from the engine.

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::audit_log;
use crate::config::{AgentConfig, ConfigError};
use crate::plugins;
use fwd_rpc::{ConnectionGuard, Connector, RpcClient, RpcError};
use fwd_translate::{
    CommitReport, ContextError, DataImage, DataTreeDiff, PluginRegistry, ReadOutput, ReadResult, RegistryError,
    Translator, WriteError,
};
use fwd_types::SchemaPath;
use log::info;
use std::sync::Arc;
use thiserror::Error;

/// Errors of the agent daemon.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("engine connection failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("plugin registration failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("naming contexts unavailable: {0}")]
    Context(#[from] ContextError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

/// The running agent.
pub struct AgentDaemon {
    config: AgentConfig,
    translator: Translator,
    connection: ConnectionGuard,
}

impl AgentDaemon {
    /// Connects through `connector` and builds the translator.
    pub async fn start(config: AgentConfig, connector: Arc<dyn Connector>) -> Result<Self, DaemonError> {
        config.validate()?;
        let endpoint = connector.endpoint().to_string();

        let connection = match ConnectionGuard::acquire(connector).await {
            Ok(connection) => connection,
            Err(e) => {
                audit_log!(AuditRecord::new(AuditCategory::EngineConnection, "AgentDaemon", "connect")
                    .with_object_id(endpoint.as_str())
                    .with_error(e.to_string()));
                return Err(e.into());
            }
        };
        audit_log!(AuditRecord::new(AuditCategory::EngineConnection, "AgentDaemon", "connect")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(endpoint.as_str()));

        let client = RpcClient::new(connection.channel()).with_timeout(config.rpc_timeout());
        let mut registry = PluginRegistry::new();
        plugins::register_all(&mut registry, &client)?;

        if let Some(dir) = &config.context_dir {
            let loaded = registry.mappings().load_dir(dir)?;
            audit_log!(AuditRecord::new(AuditCategory::MappingPersistence, "AgentDaemon", "load_mappings")
                .with_outcome(AuditOutcome::Success)
                .with_object_id(dir.display().to_string())
                .with_details(serde_json::json!({ "domains": loaded })));
        }
        if let Some(dir) = config.persist_dir() {
            registry.persist_to(dir);
        }
        let translator = registry.build()?;

        info!(
            "agent started: engine {}, rpc timeout {} ms",
            endpoint, config.rpc_timeout_ms
        );
        audit_log!(AuditRecord::new(AuditCategory::SystemLifecycle, "AgentDaemon", "start")
            .with_outcome(AuditOutcome::Success)
            .with_object_id(endpoint.as_str()));

        Ok(Self {
            config,
            translator,
            connection,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn translator(&self) -> &Translator {
        &self.translator
    }

    /// Commits one write transaction and audits its outcome.
    pub async fn apply(&self, diff: DataTreeDiff) -> Result<CommitReport, WriteError> {
        match self.translator.write().commit(diff).await {
            Ok(report) => {
                info!(
                    "transaction {} committed ({} steps)",
                    report.transaction_id,
                    report.applied.len()
                );
                audit_log!(AuditRecord::commit(&report));
                Ok(report)
            }
            Err(e) => {
                log::error!("{}", e.cause_chain());
                audit_log!(AuditRecord::failed_commit(&e));
                Err(e)
            }
        }
    }

    /// Commits startup data as a transaction from the empty tree.
    pub async fn apply_startup(&self, image: DataImage) -> Result<CommitReport, WriteError> {
        info!("applying {} startup nodes", image.len());
        self.apply(DataTreeDiff::between(DataImage::new(), image)).await
    }

    /// Reads the operational data at `path`.
    pub async fn read(&self, path: &SchemaPath) -> ReadResult<ReadOutput> {
        self.translator.read().read(path).await
    }

    /// Disconnects from the engine.
    pub fn shutdown(self) -> Result<(), DaemonError> {
        let result = self.connection.close();
        let record = AuditRecord::new(AuditCategory::SystemLifecycle, "AgentDaemon", "stop");
        match &result {
            Ok(()) => {
                audit_log!(record.with_outcome(AuditOutcome::Success));
            }
            Err(e) => {
                audit_log!(record.with_error(e.to_string()));
            }
        }
        info!("agent stopped");
        Ok(result?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::INTERFACE_CONTEXT;
    use fwd_rpc::sim::SimulatedEngine;
    use fwd_rpc::EngineStatus;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn p(s: &str) -> SchemaPath {
        s.parse().unwrap()
    }

    async fn start(engine: &Arc<SimulatedEngine>, config: AgentConfig) -> AgentDaemon {
        AgentDaemon::start(config, Arc::new(engine.connector())).await.unwrap()
    }

    #[tokio::test]
    async fn test_start_and_shutdown_disconnect_once() {
        let engine = Arc::new(SimulatedEngine::new());
        let daemon = start(&engine, AgentConfig::default()).await;
        assert_eq!(engine.connect_count(), 1);

        daemon.shutdown().unwrap();
        assert_eq!(engine.disconnect_count(), 1);
        assert!(!engine.is_connected());
    }

    #[tokio::test]
    async fn test_startup_failure_disconnects() {
        let engine = Arc::new(SimulatedEngine::new());
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("{}.json", INTERFACE_CONTEXT)), "not json").unwrap();
        let config = AgentConfig {
            context_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let result = AgentDaemon::start(config, Arc::new(engine.connector())).await;
        assert!(matches!(result, Err(DaemonError::Context(_))));
        assert_eq!(engine.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_never_connects() {
        let engine = Arc::new(SimulatedEngine::new());
        let config = AgentConfig {
            rpc_timeout_ms: 0,
            ..Default::default()
        };
        let result = AgentDaemon::start(config, Arc::new(engine.connector())).await;
        assert!(matches!(result, Err(DaemonError::Config(_))));
        assert_eq!(engine.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_startup_data() {
        let engine = Arc::new(SimulatedEngine::new());
        let daemon = start(&engine, AgentConfig::default()).await;

        let image = DataImage::from([
            (p("/interfaces/interface[eth0]"), json!({"mtu": 9000})),
            (
                p("/interfaces/interface[eth0]/subinterfaces/subinterface[10]"),
                json!({}),
            ),
        ]);
        let report = daemon.apply_startup(image).await.unwrap();
        assert_eq!(report.applied.len(), 2);

        let output = daemon.read(&p("/interfaces/interface[eth0]")).await.unwrap();
        assert_eq!(
            output.single(),
            Some(&json!({
                "name": "eth0",
                "mtu": 9000,
                "enabled": false,
                "subinterfaces": {"subinterface": [{"id": 10, "vlan-id": 10}]},
            }))
        );
    }

    #[tokio::test]
    async fn test_failed_apply_is_reported() {
        let engine = Arc::new(SimulatedEngine::new());
        engine.fail_next("sw_interface_add", EngineStatus::TableFull);
        let daemon = start(&engine, AgentConfig::default()).await;

        let diff = DataTreeDiff::default().create(p("/interfaces/interface[eth0]"), json!({}));
        let err = daemon.apply(diff).await.unwrap_err();
        assert!(matches!(err, WriteError::WriteFailed { .. }));
    }

    #[tokio::test]
    async fn test_mappings_survive_restart() {
        let engine = Arc::new(SimulatedEngine::new());
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig {
            context_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let daemon = start(&engine, config.clone()).await;
        let diff = DataTreeDiff::default().create(p("/interfaces/interface[eth0]"), json!({}));
        daemon.apply(diff).await.unwrap();
        let index = daemon
            .translator()
            .mappings()
            .naming(INTERFACE_CONTEXT)
            .unwrap()
            .index_of("eth0")
            .unwrap();
        daemon.shutdown().unwrap();

        let daemon = start(&engine, config).await;
        assert_eq!(
            daemon
                .translator()
                .mappings()
                .naming(INTERFACE_CONTEXT)
                .unwrap()
                .index_of("eth0"),
            Ok(index)
        );
        daemon.shutdown().unwrap();
    }
}
