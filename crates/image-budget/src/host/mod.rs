//! Host collaborator ports.
//!
//! The budget core never talks to a concrete chat application. Everything it
//! needs from the host is expressed by the traits below and injected through
//! [`HostPorts`](crate::session::HostPorts).

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::error::{HostError, ToolError};
use crate::tool::{ToolDefinition, ToolOutput};
use crate::transcript::ConversationMessage;

pub use file::JsonFileSettingsStore;
pub use memory::{
    InMemoryMetadataStore, InMemorySettingsStore, InMemoryToolRegistry, InMemoryTranscript,
};

/// Free-form key/value mapping used by both metadata and settings stores.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// The host's tool registration surface.
pub trait ToolRegistryPort: Send + Sync {
    fn register(&self, def: ToolDefinition) -> Result<(), HostError>;

    /// Tools currently registered. `None` while the host has not populated
    /// its registry yet.
    fn definitions(&self) -> Option<Vec<ToolDefinition>>;

    /// Swap the registered definition carrying the same name.
    fn replace(&self, def: ToolDefinition) -> Result<(), HostError>;
}

/// Direct invocation of a tool by name, bypassing registration gating.
#[async_trait]
pub trait ToolDispatch: Send + Sync {
    async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput, ToolError>;
}

/// Live conversation history.
pub trait TranscriptSource: Send + Sync {
    /// `Ok(None)` while the host has no chat loaded.
    fn messages(&self) -> Result<Option<Vec<ConversationMessage>>, HostError>;
}

/// Metadata scoped to the active conversation.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// `Ok(None)` when no conversation is active.
    fn get(&self) -> Result<Option<Metadata>, HostError>;

    async fn save(&self, metadata: Metadata) -> Result<(), HostError>;
}

/// Installation-wide extension settings.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    fn get(&self) -> Result<Metadata, HostError>;

    async fn save(&self, settings: Metadata) -> Result<(), HostError>;
}
