//! In-process host implementations, used by embedders without a richer host
//! and throughout the tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};

use super::{Metadata, MetadataStore, SettingsStore, ToolDispatch, ToolRegistryPort, TranscriptSource};
use crate::error::{HostError, ToolError};
use crate::tool::{ToolDefinition, ToolOutput};
use crate::transcript::ConversationMessage;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct InMemoryToolRegistry {
    tools: DashMap<String, ToolDefinition>,
    ready: AtomicBool,
}

impl Default for InMemoryToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
            ready: AtomicBool::new(true),
        }
    }

    /// A registry that reports itself as not yet populated until
    /// [`mark_ready`](Self::mark_ready) is called.
    pub fn pending() -> Self {
        Self {
            tools: DashMap::new(),
            ready: AtomicBool::new(false),
        }
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Insert a definition directly, as a host does for tools registered
    /// before budgeting was installed.
    pub fn insert_unchecked(&self, def: ToolDefinition) {
        self.tools.insert(def.name.clone(), def);
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl ToolRegistryPort for InMemoryToolRegistry {
    fn register(&self, def: ToolDefinition) -> Result<(), HostError> {
        let name = def.name.trim().to_string();
        if name.is_empty() {
            return Err(HostError::Rejected("tool name cannot be empty".to_string()));
        }

        match self.tools.entry(name) {
            Entry::Occupied(entry) => Err(HostError::Rejected(format!(
                "tool with name '{}' already registered",
                entry.key()
            ))),
            Entry::Vacant(entry) => {
                entry.insert(def);
                Ok(())
            }
        }
    }

    fn definitions(&self) -> Option<Vec<ToolDefinition>> {
        if !self.ready.load(Ordering::SeqCst) {
            return None;
        }
        let mut defs: Vec<ToolDefinition> =
            self.tools.iter().map(|entry| entry.value().clone()).collect();
        defs.sort_by(|left, right| left.name.cmp(&right.name));
        Some(defs)
    }

    fn replace(&self, def: ToolDefinition) -> Result<(), HostError> {
        match self.tools.get_mut(&def.name) {
            Some(mut entry) => {
                *entry = def;
                Ok(())
            }
            None => Err(HostError::Rejected(format!(
                "tool '{}' is not registered",
                def.name
            ))),
        }
    }
}

#[async_trait]
impl ToolDispatch for InMemoryToolRegistry {
    async fn invoke(&self, name: &str, args: serde_json::Value) -> Result<ToolOutput, ToolError> {
        let action = self
            .tools
            .get(name)
            .map(|entry| entry.value().action.clone())
            .ok_or_else(|| ToolError::NotFound(format!("Tool '{}' not found", name)))?;
        action.invoke(args).await
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTranscript {
    messages: Mutex<Option<Vec<ConversationMessage>>>,
}

impl InMemoryTranscript {
    /// A transcript with a loaded, empty chat.
    pub fn new() -> Self {
        Self::from_messages(Vec::new())
    }

    /// A transcript whose chat is not loaded yet.
    pub fn unloaded() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<ConversationMessage>) -> Self {
        Self {
            messages: Mutex::new(Some(messages)),
        }
    }

    pub fn push(&self, message: ConversationMessage) {
        lock(&self.messages).get_or_insert_with(Vec::new).push(message);
    }

    pub fn replace(&self, messages: Vec<ConversationMessage>) {
        *lock(&self.messages) = Some(messages);
    }

    pub fn unload(&self) {
        *lock(&self.messages) = None;
    }
}

impl TranscriptSource for InMemoryTranscript {
    fn messages(&self) -> Result<Option<Vec<ConversationMessage>>, HostError> {
        Ok(lock(&self.messages).clone())
    }
}

#[derive(Debug)]
pub struct InMemoryMetadataStore {
    metadata: Mutex<Option<Metadata>>,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
}

impl Default for InMemoryMetadataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMetadataStore {
    /// A store for an active, empty conversation.
    pub fn new() -> Self {
        Self {
            metadata: Mutex::new(Some(Metadata::new())),
            fail_saves: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
        }
    }

    /// A store with no active conversation.
    pub fn inactive() -> Self {
        Self {
            metadata: Mutex::new(None),
            ..Self::new()
        }
    }

    pub fn snapshot(&self) -> Option<Metadata> {
        lock(&self.metadata).clone()
    }

    /// Switch to another conversation's metadata.
    pub fn load(&self, metadata: Option<Metadata>) {
        *lock(&self.metadata) = metadata;
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    fn get(&self) -> Result<Option<Metadata>, HostError> {
        Ok(lock(&self.metadata).clone())
    }

    async fn save(&self, metadata: Metadata) -> Result<(), HostError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(HostError::Rejected("metadata save failed".to_string()));
        }
        let mut guard = lock(&self.metadata);
        if guard.is_none() {
            return Err(HostError::Unavailable("no active conversation".to_string()));
        }
        *guard = Some(metadata);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    settings: Mutex<Metadata>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Metadata) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    pub fn snapshot(&self) -> Metadata {
        lock(&self.settings).clone()
    }
}

#[async_trait]
impl SettingsStore for InMemorySettingsStore {
    fn get(&self) -> Result<Metadata, HostError> {
        Ok(lock(&self.settings).clone())
    }

    async fn save(&self, settings: Metadata) -> Result<(), HostError> {
        *lock(&self.settings) = settings;
        Ok(())
    }
}
