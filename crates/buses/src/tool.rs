//! Tool Bus — tool catalogue and execution.
//!
//! Providers advertise their tools; `execute_tool` routes to the first
//! eligible provider advertising the requested name and returns a typed
//! [`ToolExecutionResult`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use ciris_domain::correlation::CorrelationKind;
use ciris_domain::{Error, Result};

use crate::{capability, BusContext, BusCore};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire types + provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecutionResult {
    pub tool: String,
    pub success: bool,
    #[serde(default)]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[async_trait]
pub trait ToolProvider: Send + Sync {
    fn tools(&self) -> Vec<ToolDescriptor>;

    async fn execute(&self, name: &str, arguments: &Value) -> Result<ToolExecutionResult>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ToolBus {
    core: Arc<BusCore>,
}

impl ToolBus {
    pub fn new(core: Arc<BusCore>) -> Self {
        Self { core }
    }

    /// The merged tool catalogue across eligible providers.
    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        let mut tools: Vec<ToolDescriptor> = Vec::new();
        for provider in self
            .core
            .registry()
            .eligible_providers::<dyn ToolProvider>(capability::TOOL)
        {
            for tool in provider.instance.tools() {
                if !tools.iter().any(|t| t.name == tool.name) {
                    tools.push(tool);
                }
            }
        }
        tools
    }

    /// Execute one tool by name.
    pub async fn execute_tool(
        &self,
        ctx: &BusContext,
        name: &str,
        arguments: &Value,
    ) -> Result<ToolExecutionResult> {
        let providers = self
            .core
            .registry()
            .eligible_providers::<dyn ToolProvider>(capability::TOOL);
        let selected = providers
            .into_iter()
            .find(|p| p.instance.tools().iter().any(|t| t.name == name))
            .ok_or_else(|| Error::Validation(format!("unknown tool: {name}")))?;

        self.core
            .timed(
                capability::TOOL,
                &selected.name,
                CorrelationKind::ToolExecution,
                ctx,
                selected.instance.execute(name, arguments),
            )
            .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
