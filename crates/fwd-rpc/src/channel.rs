//! Request/reply channel and the typed client on top of it.

use crate::error::{EngineStatus, RpcError, RpcResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One request to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    /// Message name, e.g. `interface_add`.
    pub message: String,
    /// Request body.
    pub payload: Value,
}

impl EngineRequest {
    pub fn new(message: impl Into<String>, payload: Value) -> Self {
        Self {
            message: message.into(),
            payload,
        }
    }
}

/// One reply from the engine.
///
/// `payload == None` is the null reply: the engine answered but had nothing
/// to return (for dumps, no instances exist).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineReply {
    pub retval: i32,
    pub payload: Option<Value>,
}

impl EngineReply {
    /// Successful reply with a payload.
    pub fn ok(payload: Value) -> Self {
        Self {
            retval: 0,
            payload: Some(payload),
        }
    }

    /// Successful reply without a payload.
    pub fn null() -> Self {
        Self {
            retval: 0,
            payload: None,
        }
    }

    /// Failed reply.
    pub fn error(status: EngineStatus) -> Self {
        Self {
            retval: status.as_raw(),
            payload: None,
        }
    }

    /// Returns the decoded status.
    pub fn status(&self) -> EngineStatus {
        EngineStatus::from_raw(self.retval)
    }
}

/// Transport to the forwarding engine.
///
/// Implementations must be safe to share between tasks; ordering between
/// concurrent calls is not guaranteed.
#[async_trait]
pub trait RpcChannel: Send + Sync {
    /// Sends one request and waits for its reply.
    async fn call(&self, request: EngineRequest) -> RpcResult<EngineReply>;
}

/// A typed engine request.
pub trait ApiRequest: Serialize + Send + Sync {
    /// Message name on the wire.
    const MESSAGE: &'static str;
    /// Reply body type.
    type Reply: DeserializeOwned + Send;
}

/// Typed client with per-call timeout and status mapping.
#[derive(Clone)]
pub struct RpcClient {
    channel: Arc<dyn RpcChannel>,
    timeout: Duration,
}

impl RpcClient {
    /// Default per-call timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Creates a client with the default timeout.
    pub fn new(channel: Arc<dyn RpcChannel>) -> Self {
        Self {
            channel,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the per-call timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sends a raw request bounded by the timeout. The status is not checked.
    pub async fn call_raw(&self, request: EngineRequest) -> RpcResult<EngineReply> {
        let message = request.message.clone();
        log::trace!("engine call {}", message);
        match tokio::time::timeout(self.timeout, self.channel.call(request)).await {
            Ok(reply) => reply,
            Err(_) => {
                let timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX);
                log::warn!("engine call {} timed out after {} ms", message, timeout_ms);
                Err(RpcError::timeout(message, timeout_ms))
            }
        }
    }

    /// Invokes a request and decodes its reply.
    ///
    /// A null reply decodes as JSON `null`, so requests whose reply type is
    /// `()` or `Option<_>` accept it.
    pub async fn invoke<R: ApiRequest>(&self, request: &R) -> RpcResult<R::Reply> {
        let reply = self.checked(request).await?;
        decode::<R>(reply.payload.unwrap_or(Value::Null))
    }

    /// Invokes a dump request. A null reply is reported as
    /// [`RpcError::EmptyReply`].
    pub async fn dump<R: ApiRequest>(&self, request: &R) -> RpcResult<R::Reply> {
        let reply = self.checked(request).await?;
        match reply.payload {
            Some(payload) => decode::<R>(payload),
            None => Err(RpcError::empty_reply(R::MESSAGE)),
        }
    }

    async fn checked<R: ApiRequest>(&self, request: &R) -> RpcResult<EngineReply> {
        let payload = serde_json::to_value(request).map_err(|e| RpcError::codec(R::MESSAGE, e))?;
        let reply = self.call_raw(EngineRequest::new(R::MESSAGE, payload)).await?;
        let status = reply.status();
        if !status.is_success() {
            return Err(RpcError::status(R::MESSAGE, status));
        }
        Ok(reply)
    }
}

fn decode<R: ApiRequest>(payload: Value) -> RpcResult<R::Reply> {
    serde_json::from_value(payload).map_err(|e| RpcError::codec(R::MESSAGE, e))
}
