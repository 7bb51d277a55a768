//! The explicit context object shared by every budget component.

use std::sync::Arc;

use crate::classifier::ImageToolClassifier;
use crate::config::{BudgetConfig, BudgetSettings, RetryPolicy};
use crate::host::{
    InMemorySettingsStore, MetadataStore, SettingsStore, ToolRegistryPort, TranscriptSource,
};
use crate::interceptor::ToolInterceptor;
use crate::oracle::BudgetOracle;
use crate::state::BudgetStore;

/// Host collaborators. Every port is optional; a missing port is treated as
/// a host that is not ready.
#[derive(Clone, Default)]
pub struct HostPorts {
    pub tools: Option<Arc<dyn ToolRegistryPort>>,
    pub transcript: Option<Arc<dyn TranscriptSource>>,
    pub metadata: Option<Arc<dyn MetadataStore>>,
    pub settings: Option<Arc<dyn SettingsStore>>,
}

impl HostPorts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(mut self, tools: Arc<dyn ToolRegistryPort>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_transcript(mut self, transcript: Arc<dyn TranscriptSource>) -> Self {
        self.transcript = Some(transcript);
        self
    }

    pub fn with_metadata(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub resync: RetryPolicy,
    pub tool_discovery: RetryPolicy,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            resync: RetryPolicy::resync(),
            tool_discovery: RetryPolicy::tool_discovery(),
        }
    }
}

/// Constructed once per process and handed to whoever needs budgeting.
pub struct BudgetSession {
    classifier: Arc<ImageToolClassifier>,
    store: Arc<BudgetStore>,
    settings: Arc<BudgetSettings>,
    oracle: Arc<BudgetOracle>,
    interceptor: ToolInterceptor,
    options: SessionOptions,
}

impl BudgetSession {
    pub fn new(ports: HostPorts, options: SessionOptions) -> Arc<Self> {
        let settings_store = ports
            .settings
            .unwrap_or_else(|| Arc::new(InMemorySettingsStore::new()) as Arc<dyn SettingsStore>);

        let classifier = Arc::new(ImageToolClassifier::new());
        let store = Arc::new(BudgetStore::new(ports.metadata));
        let settings = Arc::new(BudgetSettings::new(settings_store));
        let oracle = Arc::new(BudgetOracle::new(
            classifier.clone(),
            store.clone(),
            ports.transcript,
            settings.clone(),
        ));
        let interceptor = ToolInterceptor::new(oracle.clone(), ports.tools);

        Arc::new(Self {
            classifier,
            store,
            settings,
            oracle,
            interceptor,
            options,
        })
    }

    /// Load settings, patch tools the host already registered and reconcile
    /// state with the transcript.
    pub async fn initialize(&self) -> BudgetConfig {
        let config = self.settings.load().await;
        self.interceptor.patch_registered_tools();
        self.oracle.sync_state_with_history().await;
        log::info!(
            "image tool budget active: limit_per_turn={} show_diagnostics={}",
            config.effective_limit(),
            config.show_diagnostics
        );
        config
    }

    pub fn classifier(&self) -> &Arc<ImageToolClassifier> {
        &self.classifier
    }

    pub fn store(&self) -> &Arc<BudgetStore> {
        &self.store
    }

    pub fn settings(&self) -> &Arc<BudgetSettings> {
        &self.settings
    }

    pub fn oracle(&self) -> &Arc<BudgetOracle> {
        &self.oracle
    }

    pub fn interceptor(&self) -> &ToolInterceptor {
        &self.interceptor
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }
}
