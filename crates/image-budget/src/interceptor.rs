//! Decorators that route image tool gating and execution through the
//! [`BudgetOracle`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{HostError, ToolError};
use crate::host::{ToolDispatch, ToolRegistryPort};
use crate::oracle::BudgetOracle;
use crate::tool::{SharedAction, SharedGate, ToolAction, ToolDefinition, ToolGate, ToolOutput};

/// Returned instead of running an image tool once the turn's budget is spent.
pub const REFUSAL_MESSAGE: &str = "Image generation limit reached for this turn. \
Wait for the next user message before generating another image.";

fn refusal() -> ToolOutput {
    serde_json::Value::String(REFUSAL_MESSAGE.to_string())
}

/// Evaluate a tool's own gate. Errors count as a pass so the budget stays the
/// deciding factor.
async fn original_gate_passes(gate: Option<&SharedGate>, tool_name: &str) -> bool {
    let Some(gate) = gate else {
        return true;
    };
    match gate.should_register().await {
        Ok(should) => should,
        Err(e) => {
            log::warn!("should_register for '{}' failed, ignoring: {}", tool_name, e);
            true
        }
    }
}

/// Original gate AND remaining budget.
pub struct BudgetedGate {
    tool_name: String,
    inner: Option<SharedGate>,
    oracle: Arc<BudgetOracle>,
}

impl BudgetedGate {
    pub fn new(
        tool_name: impl Into<String>,
        inner: Option<SharedGate>,
        oracle: Arc<BudgetOracle>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            inner,
            oracle,
        }
    }
}

#[async_trait]
impl ToolGate for BudgetedGate {
    async fn should_register(&self) -> Result<bool, ToolError> {
        if !original_gate_passes(self.inner.as_ref(), &self.tool_name).await {
            return Ok(false);
        }
        Ok(self.oracle.remaining_allowed())
    }
}

/// Charges the turn before delegating; refuses once the budget is spent.
pub struct BudgetedAction {
    tool_name: String,
    inner: SharedAction,
    oracle: Arc<BudgetOracle>,
}

impl BudgetedAction {
    pub fn new(
        tool_name: impl Into<String>,
        inner: SharedAction,
        oracle: Arc<BudgetOracle>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            inner,
            oracle,
        }
    }
}

#[async_trait]
impl ToolAction for BudgetedAction {
    async fn invoke(&self, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        if !self.oracle.remaining_allowed() {
            log::info!("refusing '{}': image tool budget exhausted", self.tool_name);
            return Ok(refusal());
        }

        // Charged at commit, so a failing tool still consumes the turn.
        self.oracle.mark_used().await;
        self.inner.invoke(args).await
    }
}

/// Applies the same gating to tools invoked by name.
pub struct BudgetedDispatch {
    inner: Arc<dyn ToolDispatch>,
    oracle: Arc<BudgetOracle>,
}

impl BudgetedDispatch {
    pub fn new(inner: Arc<dyn ToolDispatch>, oracle: Arc<BudgetOracle>) -> Self {
        Self { inner, oracle }
    }
}

#[async_trait]
impl ToolDispatch for BudgetedDispatch {
    async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        if !self.oracle.classifier().is_image_tool(name) {
            return self.inner.invoke(name, args).await;
        }

        if !self.oracle.remaining_allowed() {
            log::info!("refusing dispatch of '{}': image tool budget exhausted", name);
            return Ok(refusal());
        }

        self.oracle.mark_used().await;
        self.inner.invoke(name, args).await
    }
}

pub struct ToolInterceptor {
    oracle: Arc<BudgetOracle>,
    registry: Option<Arc<dyn ToolRegistryPort>>,
}

impl ToolInterceptor {
    pub fn new(oracle: Arc<BudgetOracle>, registry: Option<Arc<dyn ToolRegistryPort>>) -> Self {
        Self { oracle, registry }
    }

    /// Install the budget decorators on an image tool. Other tools, and tools
    /// already wrapped, are returned unchanged.
    pub fn wrap_definition(&self, mut def: ToolDefinition) -> ToolDefinition {
        if def.is_budget_wrapped() {
            return def;
        }
        let classifier = self.oracle.classifier();
        if !classifier.is_image_tool_definition(&def) {
            return def;
        }

        classifier.remember(&def.name);
        log::info!(
            "detected image tool: name={} display_name={:?} description={:?}",
            def.name,
            def.display_name,
            def.description
        );

        let gate = BudgetedGate::new(def.name.clone(), def.should_register.take(), self.oracle.clone());
        let action = BudgetedAction::new(def.name.clone(), def.action.clone(), self.oracle.clone());
        def.should_register = Some(Arc::new(gate));
        def.action = Arc::new(action);
        def.mark_budget_wrapped();
        def
    }

    /// Wrap then hand the definition to the host registry.
    pub fn register(&self, def: ToolDefinition) -> Result<(), HostError> {
        let registry = self
            .registry
            .as_ref()
            .ok_or_else(|| HostError::Unavailable("tool registry not provided".to_string()))?;
        registry.register(self.wrap_definition(def))
    }

    /// Wrap image tools the host registered on its own. Returns how many were
    /// patched, or `None` while the host registry is not populated.
    pub fn patch_registered_tools(&self) -> Option<usize> {
        let registry = self.registry.as_ref()?;
        let definitions = registry.definitions()?;

        let mut patched = 0;
        for def in definitions {
            if def.is_budget_wrapped() {
                continue;
            }
            let wrapped = self.wrap_definition(def);
            if !wrapped.is_budget_wrapped() {
                continue;
            }
            let name = wrapped.name.clone();
            match registry.replace(wrapped) {
                Ok(()) => patched += 1,
                Err(e) => log::warn!("patching registered tool '{}' failed: {}", name, e),
            }
        }

        if patched > 0 {
            log::debug!("patched {} registered image tool(s)", patched);
        }
        Some(patched)
    }

    /// Whether the host should expose this definition for the current turn.
    pub async fn should_expose(&self, def: &ToolDefinition) -> bool {
        original_gate_passes(def.should_register.as_ref(), &def.name).await
    }

    /// Budgeted wrapper around a host's direct dispatch function.
    pub fn dispatch(&self, inner: Arc<dyn ToolDispatch>) -> BudgetedDispatch {
        BudgetedDispatch::new(inner, self.oracle.clone())
    }

    pub fn oracle(&self) -> &Arc<BudgetOracle> {
        &self.oracle
    }
}
