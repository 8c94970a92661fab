//! In-memory forwarding engine.
//!
//! The simulated engine keeps one table per object type and answers the
//! generic message family
//!
//! - `<table>_add`: store the payload object, allocating an index unless the
//!   payload carries one; replies `{"index": n}`
//! - `<table>_set`: merge the payload fields into entry `index`
//! - `<table>_del`: remove entry `index`
//! - `<table>_dump`: every entry whose fields match the payload filter, or a
//!   null reply when nothing matches
//!
//! Faults can be injected per message name and every call is counted, which
//! makes the engine usable both for the agent's simulation mode and for
//! exercising rollback paths in tests.

use crate::channel::{EngineReply, EngineRequest, RpcChannel};
use crate::connection::Connector;
use crate::error::{EngineStatus, RpcError, RpcResult};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// First index handed out per table.
pub const FIRST_INDEX: u32 = 1;

/// A fault injected into a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reply with the given status instead of executing.
    Status(EngineStatus),
    /// Never reply; the caller's timeout fires.
    Stall,
}

#[derive(Default)]
struct SimState {
    tables: BTreeMap<String, BTreeMap<u32, Value>>,
    next_index: BTreeMap<String, u32>,
    one_shot: HashMap<String, VecDeque<Fault>>,
    persistent: HashMap<String, Fault>,
    calls: BTreeMap<String, usize>,
    connected: bool,
    connects: usize,
    disconnects: usize,
}

impl SimState {
    fn take_fault(&mut self, message: &str) -> Option<Fault> {
        if let Some(queue) = self.one_shot.get_mut(message) {
            if let Some(fault) = queue.pop_front() {
                return Some(fault);
            }
        }
        self.persistent.get(message).copied()
    }

    fn allocate(&mut self, table: &str) -> u32 {
        let next = self.next_index.entry(table.to_string()).or_insert(FIRST_INDEX);
        let index = *next;
        *next += 1;
        index
    }
}

/// In-memory engine implementing [`RpcChannel`].
pub struct SimulatedEngine {
    state: Mutex<SimState>,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    /// Creates an empty, connected engine.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                connected: true,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns a connector that (re)connects this engine.
    pub fn connector(self: &Arc<Self>) -> SimConnector {
        SimConnector {
            engine: Arc::clone(self),
        }
    }

    /// Stores an entry directly, bypassing message handling.
    pub fn seed(&self, table: &str, index: u32, mut value: Value) {
        let mut state = self.lock();
        if let Value::Object(fields) = &mut value {
            fields.insert("index".to_string(), json!(index));
        }
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(index, value);
        let next = state.next_index.entry(table.to_string()).or_insert(FIRST_INDEX);
        *next = (*next).max(index + 1);
    }

    /// Fails the next call of `message` with `status`.
    pub fn fail_next(&self, message: &str, status: EngineStatus) {
        self.push_fault(message, Fault::Status(status));
    }

    /// Makes the next call of `message` hang.
    pub fn stall_next(&self, message: &str) {
        self.push_fault(message, Fault::Stall);
    }

    /// Fails every call of `message` with `status` until cleared.
    pub fn fail_always(&self, message: &str, status: EngineStatus) {
        self.lock()
            .persistent
            .insert(message.to_string(), Fault::Status(status));
    }

    /// Removes all injected faults.
    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.one_shot.clear();
        state.persistent.clear();
    }

    fn push_fault(&self, message: &str, fault: Fault) {
        self.lock()
            .one_shot
            .entry(message.to_string())
            .or_default()
            .push_back(fault);
    }

    /// Number of calls received for `message` (including failed ones).
    pub fn call_count(&self, message: &str) -> usize {
        self.lock().calls.get(message).copied().unwrap_or(0)
    }

    /// Number of calls received in total.
    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Returns the entries of `table` ordered by index.
    pub fn entries(&self, table: &str) -> Vec<(u32, Value)> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.iter().map(|(i, v)| (*i, v.clone())).collect())
            .unwrap_or_default()
    }

    /// Returns one entry.
    pub fn entry(&self, table: &str, index: u32) -> Option<Value> {
        self.lock()
            .tables
            .get(table)
            .and_then(|t| t.get(&index))
            .cloned()
    }

    /// Returns the indexes present in `table`.
    pub fn indexes(&self, table: &str) -> Vec<u32> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.lock().connected
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    fn handle(&self, request: &EngineRequest) -> Result<RpcResult<EngineReply>, Fault> {
        let mut state = self.lock();
        *state.calls.entry(request.message.clone()).or_insert(0) += 1;

        if !state.connected {
            return Ok(Err(RpcError::Disconnected));
        }
        if let Some(fault) = state.take_fault(&request.message) {
            return match fault {
                Fault::Status(status) => Ok(Ok(EngineReply::error(status))),
                Fault::Stall => Err(Fault::Stall),
            };
        }

        let Some((table, op)) = request.message.rsplit_once('_') else {
            return Ok(Ok(EngineReply::error(EngineStatus::Unimplemented)));
        };
        let reply = match op {
            "add" => add(&mut state, table, &request.payload),
            "set" => set(&mut state, table, &request.payload),
            "del" => del(&mut state, table, &request.payload),
            "dump" => dump(&state, table, &request.payload),
            _ => EngineReply::error(EngineStatus::Unimplemented),
        };
        Ok(Ok(reply))
    }
}

fn payload_index(payload: &Value) -> Option<u32> {
    payload
        .get("index")
        .and_then(Value::as_u64)
        .and_then(|i| u32::try_from(i).ok())
}

fn add(state: &mut SimState, table: &str, payload: &Value) -> EngineReply {
    let Value::Object(fields) = payload else {
        return EngineReply::error(EngineStatus::InvalidValue);
    };
    let index = match payload_index(payload) {
        Some(index) => {
            let exists = state
                .tables
                .get(table)
                .is_some_and(|t| t.contains_key(&index));
            if exists {
                return EngineReply::error(EngineStatus::EntryAlreadyExists);
            }
            let next = state.next_index.entry(table.to_string()).or_insert(FIRST_INDEX);
            *next = (*next).max(index + 1);
            index
        }
        None => state.allocate(table),
    };

    let mut entry = fields.clone();
    entry.insert("index".to_string(), json!(index));
    state
        .tables
        .entry(table.to_string())
        .or_default()
        .insert(index, Value::Object(entry));
    log::debug!("sim: {}_add -> index {}", table, index);
    EngineReply::ok(json!({ "index": index }))
}

fn set(state: &mut SimState, table: &str, payload: &Value) -> EngineReply {
    let (Some(index), Value::Object(fields)) = (payload_index(payload), payload) else {
        return EngineReply::error(EngineStatus::InvalidValue);
    };
    let Some(Value::Object(entry)) = state.tables.get_mut(table).and_then(|t| t.get_mut(&index))
    else {
        return EngineReply::error(EngineStatus::NoSuchEntry);
    };
    for (name, value) in fields {
        entry.insert(name.clone(), value.clone());
    }
    EngineReply::null()
}

fn del(state: &mut SimState, table: &str, payload: &Value) -> EngineReply {
    let Some(index) = payload_index(payload) else {
        return EngineReply::error(EngineStatus::InvalidValue);
    };
    match state.tables.get_mut(table).and_then(|t| t.remove(&index)) {
        Some(_) => {
            log::debug!("sim: {}_del index {}", table, index);
            EngineReply::null()
        }
        None => EngineReply::error(EngineStatus::NoSuchEntry),
    }
}

fn dump(state: &SimState, table: &str, payload: &Value) -> EngineReply {
    let empty = Map::new();
    let filter = match payload {
        Value::Object(filter) => filter,
        Value::Null => &empty,
        _ => return EngineReply::error(EngineStatus::InvalidValue),
    };
    let matches: Vec<Value> = state
        .tables
        .get(table)
        .into_iter()
        .flat_map(|t| t.values())
        .filter(|entry| filter.iter().all(|(k, v)| entry.get(k) == Some(v)))
        .cloned()
        .collect();
    if matches.is_empty() {
        EngineReply::null()
    } else {
        EngineReply::ok(Value::Array(matches))
    }
}

#[async_trait]
impl RpcChannel for SimulatedEngine {
    async fn call(&self, request: EngineRequest) -> RpcResult<EngineReply> {
        match self.handle(&request) {
            Ok(reply) => reply,
            Err(_) => {
                log::debug!("sim: stalling {}", request.message);
                std::future::pending::<RpcResult<EngineReply>>().await
            }
        }
    }
}

/// [`Connector`] for a shared [`SimulatedEngine`].
pub struct SimConnector {
    engine: Arc<SimulatedEngine>,
}

#[async_trait]
impl Connector for SimConnector {
    fn endpoint(&self) -> &str {
        "simulated"
    }

    async fn connect(&self) -> RpcResult<Arc<dyn RpcChannel>> {
        {
            let mut state = self.engine.lock();
            state.connected = true;
            state.connects += 1;
        }
        Ok(Arc::clone(&self.engine) as Arc<dyn RpcChannel>)
    }

    fn disconnect(&self) -> RpcResult<()> {
        let mut state = self.engine.lock();
        state.connected = false;
        state.disconnects += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RpcClient;
    use crate::connection::ConnectionGuard;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn request(message: &str, payload: Value) -> EngineRequest {
        EngineRequest::new(message, payload)
    }

    #[tokio::test]
    async fn test_add_allocates_indexes() {
        let engine = SimulatedEngine::new();
        let first = engine
            .call(request("interface_add", json!({"name": "eth0"})))
            .await
            .unwrap();
        let second = engine
            .call(request("interface_add", json!({"name": "eth1"})))
            .await
            .unwrap();
        assert_eq!(first.payload, Some(json!({"index": 1})));
        assert_eq!(second.payload, Some(json!({"index": 2})));
        assert_eq!(
            engine.entry("interface", 2),
            Some(json!({"name": "eth1", "index": 2}))
        );
    }

    #[tokio::test]
    async fn test_add_with_explicit_index() {
        let engine = SimulatedEngine::new();
        let reply = engine
            .call(request("interface_add", json!({"index": 7})))
            .await
            .unwrap();
        assert!(reply.status().is_success());
        let dup = engine
            .call(request("interface_add", json!({"index": 7})))
            .await
            .unwrap();
        assert_eq!(dup.status(), EngineStatus::EntryAlreadyExists);
        let next = engine
            .call(request("interface_add", json!({})))
            .await
            .unwrap();
        assert_eq!(next.payload, Some(json!({"index": 8})));
    }

    #[tokio::test]
    async fn test_set_and_del() {
        let engine = SimulatedEngine::new();
        engine.seed("interface", 3, json!({"name": "eth0", "enabled": false}));

        let reply = engine
            .call(request("interface_set", json!({"index": 3, "enabled": true})))
            .await
            .unwrap();
        assert!(reply.status().is_success());
        assert_eq!(
            engine.entry("interface", 3),
            Some(json!({"name": "eth0", "enabled": true, "index": 3}))
        );

        let reply = engine
            .call(request("interface_del", json!({"index": 3})))
            .await
            .unwrap();
        assert!(reply.status().is_success());
        let again = engine
            .call(request("interface_del", json!({"index": 3})))
            .await
            .unwrap();
        assert_eq!(again.status(), EngineStatus::NoSuchEntry);
    }

    #[tokio::test]
    async fn test_dump_filters_and_null_reply() {
        let engine = SimulatedEngine::new();
        engine.seed("address", 1, json!({"sw_if_index": 1, "prefix": "10.0.0.1/24"}));
        engine.seed("address", 2, json!({"sw_if_index": 2, "prefix": "10.0.1.1/24"}));

        let reply = engine
            .call(request("address_dump", json!({"sw_if_index": 2})))
            .await
            .unwrap();
        assert_eq!(
            reply.payload,
            Some(json!([{"sw_if_index": 2, "prefix": "10.0.1.1/24", "index": 2}]))
        );

        let reply = engine
            .call(request("address_dump", json!({"sw_if_index": 9})))
            .await
            .unwrap();
        assert_eq!(reply.payload, None);

        let reply = engine.call(request("route_dump", Value::Null)).await.unwrap();
        assert_eq!(reply.payload, None);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let engine = SimulatedEngine::new();
        engine.fail_next("interface_add", EngineStatus::TableFull);

        let reply = engine
            .call(request("interface_add", json!({})))
            .await
            .unwrap();
        assert_eq!(reply.status(), EngineStatus::TableFull);
        let reply = engine
            .call(request("interface_add", json!({})))
            .await
            .unwrap();
        assert!(reply.status().is_success());

        engine.fail_always("interface_del", EngineStatus::Unspecified);
        for _ in 0..2 {
            let reply = engine
                .call(request("interface_del", json!({"index": 1})))
                .await
                .unwrap();
            assert_eq!(reply.status(), EngineStatus::Unspecified);
        }
        engine.clear_faults();
        assert_eq!(engine.call_count("interface_add"), 2);
        assert_eq!(engine.call_count("interface_del"), 2);
        assert_eq!(engine.total_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_times_out() {
        let engine = Arc::new(SimulatedEngine::new());
        engine.stall_next("interface_dump");
        let client = RpcClient::new(engine.clone()).with_timeout(Duration::from_millis(100));
        let err = client
            .call_raw(request("interface_dump", Value::Null))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_connector_lifecycle() {
        let engine = Arc::new(SimulatedEngine::new());
        let guard = ConnectionGuard::acquire(Arc::new(engine.connector()))
            .await
            .unwrap();
        let channel = guard.channel();
        drop(guard);

        assert!(!engine.is_connected());
        assert_eq!(engine.connect_count(), 1);
        assert_eq!(engine.disconnect_count(), 1);
        let err = channel
            .call(request("interface_dump", Value::Null))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::Disconnected);
    }
}
