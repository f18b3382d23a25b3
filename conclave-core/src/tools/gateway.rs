//! Uniform tool invocation with capability checks and an audit log

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::{Tool, ToolError, ToolErrorKind, ToolOutcome};
use crate::agent::{AgentId, AgentInfo};
use crate::config::GatewayConfig;
use crate::{Error, Result};

/// Status of an audited call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallStatus {
    /// Size of the JSON result in bytes
    Success { result_bytes: usize },
    Failed(ToolError),
}

/// Audit record of one tool call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub agent: AgentId,
    pub tool: String,
    pub params: Value,
    pub status: CallStatus,
    pub latency: Duration,
    pub started_at: DateTime<Utc>,
}

/// Dispatches tool calls for all agents of a process
///
/// The gateway never retries; a single call either succeeds or yields a
/// typed [`ToolError`] and the calling workflow decides what to do.
pub struct ToolGateway {
    tools: HashMap<String, Arc<dyn Tool>>,
    capabilities: RwLock<HashMap<AgentId, BTreeSet<String>>>,
    audit: Mutex<VecDeque<ToolCall>>,
    audit_capacity: usize,
}

impl ToolGateway {
    pub fn new() -> Self {
        Self::with_config(&GatewayConfig::default())
    }

    pub fn with_config(config: &GatewayConfig) -> Self {
        Self {
            tools: HashMap::new(),
            capabilities: RwLock::new(HashMap::new()),
            audit: Mutex::new(VecDeque::new()),
            audit_capacity: config.audit_capacity,
        }
    }

    /// Register a tool under its own name
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn with_tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        for tool in tools {
            self.tools.insert(tool.name().to_string(), tool);
        }
        self
    }

    /// Names of all registered tools, sorted
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Record an agent's declared capability set
    pub async fn register_agent(&self, agent: &AgentInfo) {
        self.capabilities
            .write()
            .await
            .insert(agent.id.clone(), agent.capabilities.clone());
    }

    /// Invoke a tool on behalf of an agent
    ///
    /// Fails only for caller mistakes (unknown agent, capability denied);
    /// every tool-level problem comes back as [`ToolOutcome::Failed`].
    pub async fn invoke(&self, agent: &AgentId, tool: &str, params: Value) -> Result<ToolOutcome> {
        let allowed = {
            let capabilities = self.capabilities.read().await;
            let caps = capabilities
                .get(agent)
                .ok_or_else(|| Error::UnknownAgent(agent.to_string()))?;
            caps.contains(tool)
        };
        if !allowed {
            warn!(agent = %agent, tool, "Capability denied");
            return Err(Error::CapabilityDenied {
                agent: agent.to_string(),
                tool: tool.to_string(),
            });
        }

        let started_at = Utc::now();
        let start = Instant::now();
        let outcome: ToolOutcome = match self.tools.get(tool) {
            Some(handler) => handler.invoke(params.clone()).await.into(),
            None => ToolOutcome::Failed(ToolError::new(
                ToolErrorKind::NotFound,
                format!("no tool named '{}' is registered", tool),
            )),
        };
        let latency = start.elapsed();

        let status = match &outcome {
            ToolOutcome::Success(value) => {
                info!(agent = %agent, tool, latency_ms = latency.as_millis() as u64, "Tool call succeeded");
                CallStatus::Success {
                    result_bytes: value.to_string().len(),
                }
            }
            ToolOutcome::Failed(err) => {
                warn!(agent = %agent, tool, kind = ?err.kind, error = %err.message, "Tool call failed");
                CallStatus::Failed(err.clone())
            }
        };

        self.record(ToolCall {
            agent: agent.clone(),
            tool: tool.to_string(),
            params,
            status,
            latency,
            started_at,
        });
        Ok(outcome)
    }

    fn record(&self, call: ToolCall) {
        if self.audit_capacity == 0 {
            return;
        }
        let mut audit = self.audit.lock().unwrap_or_else(|e| e.into_inner());
        while audit.len() >= self.audit_capacity {
            audit.pop_front();
        }
        audit.push_back(call);
    }

    /// Recorded calls, oldest first
    pub fn audit_log(&self) -> Vec<ToolCall> {
        self.audit
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

impl Default for ToolGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolGateway")
            .field("tools", &self.tool_names())
            .field("audit_capacity", &self.audit_capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentRole;
    use crate::tools::{names, ToolResult};
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            names::READ_FILE
        }

        async fn invoke(&self, params: Value) -> ToolResult<Value> {
            match params.get("path") {
                Some(path) => Ok(json!({ "content": path })),
                None => Err(ToolError::invalid_params("missing path")),
            }
        }
    }

    async fn gateway(capacity: usize) -> (ToolGateway, AgentId) {
        let gateway = ToolGateway::with_config(&GatewayConfig {
            audit_capacity: capacity,
        })
        .with_tool(Arc::new(Echo));
        let agent = AgentInfo::for_role(AgentRole::RepoSummarizer);
        gateway.register_agent(&agent).await;
        (gateway, agent.id)
    }

    #[tokio::test]
    async fn test_success_is_audited() {
        let (gateway, agent) = gateway(8).await;
        let outcome = gateway
            .invoke(&agent, names::READ_FILE, json!({ "path": "README.md" }))
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::Success(json!({ "content": "README.md" })));

        let log = gateway.audit_log();
        assert_eq!(log.len(), 1);
        assert!(matches!(log[0].status, CallStatus::Success { .. }));
    }

    #[tokio::test]
    async fn test_tool_error_is_wrapped() {
        let (gateway, agent) = gateway(8).await;
        let outcome = gateway
            .invoke(&agent, names::READ_FILE, json!({}))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ToolOutcome::Failed(ToolError { kind: ToolErrorKind::InvalidParams, .. })
        ));
    }

    #[tokio::test]
    async fn test_capability_denied() {
        let (gateway, agent) = gateway(8).await;
        let err = gateway
            .invoke(&agent, names::RUN_TESTS, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityDenied { .. }));
        assert!(gateway.audit_log().is_empty());
    }

    #[tokio::test]
    async fn test_allowed_but_unregistered_tool() {
        let (gateway, agent) = gateway(8).await;
        let outcome = gateway
            .invoke(&agent, names::LIST_FILES, json!({}))
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            ToolOutcome::Failed(ToolError { kind: ToolErrorKind::NotFound, .. })
        ));
        assert!(gateway.has_tool(names::READ_FILE));
        assert!(!gateway.has_tool(names::LIST_FILES));
    }

    #[tokio::test]
    async fn test_unknown_agent() {
        let (gateway, _) = gateway(8).await;
        let err = gateway
            .invoke(&"stranger".into(), names::READ_FILE, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownAgent(_)));
    }

    #[tokio::test]
    async fn test_audit_log_is_bounded() {
        let (gateway, agent) = gateway(2).await;
        for i in 0..5 {
            gateway
                .invoke(&agent, names::READ_FILE, json!({ "path": i }))
                .await
                .unwrap();
        }
        let log = gateway.audit_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].params, json!({ "path": 4 }));
    }
}
