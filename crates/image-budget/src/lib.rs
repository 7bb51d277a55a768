//! Per-turn usage budget for image generation tools.
//!
//! The host registers tools and invokes them as the conversation progresses.
//! This crate decorates that surface so image tools run at most
//! `limit_per_turn` times between two user messages, with the transcript as
//! the source of truth for what already ran.
//!
//! # Key Components
//!
//! - [`classifier`]: heuristic image tool detection and the known-tool registry
//! - [`transcript`]: message inspection and the per-turn invocation scanner
//! - [`state`]: per-conversation usage persisted in host metadata
//! - [`oracle`]: reconciliation and the allow/deny decision
//! - [`interceptor`]: gate, action and dispatch decorators
//! - [`events`]: turn boundaries, tool completion and resync handling
//! - [`session`]: the context object tying the above to the host ports

pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod host;
pub mod interceptor;
pub mod oracle;
pub mod session;
pub mod state;
pub mod tool;
pub mod transcript;

pub use classifier::{looks_like_image_tool, ImageToolClassifier, ImageToolRegistry};
pub use config::{BudgetConfig, BudgetSettings, RetryPolicy, SETTINGS_KEY};
pub use error::{BudgetError, HostError, ToolError};
pub use events::{EventBindings, HostEvent};
pub use host::{
    InMemoryMetadataStore, InMemorySettingsStore, InMemoryToolRegistry, InMemoryTranscript,
    JsonFileSettingsStore, Metadata, MetadataStore, SettingsStore, ToolDispatch,
    ToolRegistryPort, TranscriptSource,
};
pub use interceptor::{
    BudgetedAction, BudgetedDispatch, BudgetedGate, ToolInterceptor, REFUSAL_MESSAGE,
};
pub use oracle::{BudgetOracle, BudgetSnapshot};
pub use session::{BudgetSession, HostPorts, SessionOptions};
pub use state::{BudgetState, BudgetStore};
pub use tool::{ToolAction, ToolDefinition, ToolGate, ToolInvocation, ToolOutput};
pub use transcript::{count_image_invocations_since_last_user_turn, ConversationMessage};
