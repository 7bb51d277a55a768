use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

pub type ToolOutput = serde_json::Value;

/// Predicate deciding whether a tool is exposed to the agent for this turn.
#[async_trait]
pub trait ToolGate: Send + Sync {
    async fn should_register(&self) -> Result<bool, ToolError>;
}

/// Execution callback of a tool.
#[async_trait]
pub trait ToolAction: Send + Sync {
    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

pub type SharedGate = Arc<dyn ToolGate>;
pub type SharedAction = Arc<dyn ToolAction>;

/// A tool as handed to the host registry. The host owns the definition;
/// budgeting only swaps the gate and action for decorated versions.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub display_name: Option<String>,
    pub description: String,
    pub should_register: Option<SharedGate>,
    pub action: SharedAction,
    budget_wrapped: bool,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        action: impl ToolAction + 'static,
    ) -> Self {
        Self::with_shared_action(name, description, Arc::new(action))
    }

    pub fn with_shared_action(
        name: impl Into<String>,
        description: impl Into<String>,
        action: SharedAction,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: description.into(),
            should_register: None,
            action,
            budget_wrapped: false,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_gate(mut self, gate: impl ToolGate + 'static) -> Self {
        self.should_register = Some(Arc::new(gate));
        self
    }

    /// Whether the budget decorators are already installed.
    pub fn is_budget_wrapped(&self) -> bool {
        self.budget_wrapped
    }

    pub(crate) fn mark_budget_wrapped(&mut self) {
        self.budget_wrapped = true;
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("display_name", &self.display_name)
            .field("description", &self.description)
            .field("has_gate", &self.should_register.is_some())
            .field("budget_wrapped", &self.budget_wrapped)
            .finish()
    }
}

/// One completed tool call as reported by the host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: serde_json::Value::Null,
        }
    }
}
