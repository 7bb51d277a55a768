//! Per-conversation budget state.
//!
//! State lives in the host's conversation metadata under
//! [`SETTINGS_KEY`](crate::config::SETTINGS_KEY). Without an active
//! conversation (or without a metadata store at all) it is held in process
//! memory and lost on restart.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::config::SETTINGS_KEY;
use crate::host::{Metadata, MetadataStore};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BudgetState {
    #[serde(default)]
    pub used: u32,
}

pub struct BudgetStore {
    metadata: Option<Arc<dyn MetadataStore>>,
    in_memory: Mutex<BudgetState>,
    /// Last value written to metadata that is not confirmed saved yet. It
    /// shadows the stored metadata while the save is in flight and after a
    /// rejected save.
    pending: Mutex<Option<BudgetState>>,
}

impl BudgetStore {
    pub fn new(metadata: Option<Arc<dyn MetadataStore>>) -> Self {
        Self {
            metadata,
            in_memory: Mutex::new(BudgetState::default()),
            pending: Mutex::new(None),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Metadata of the active conversation, if any can be read.
    fn active_metadata(&self) -> Option<Metadata> {
        let store = self.metadata.as_ref()?;
        match store.get() {
            Ok(metadata) => metadata,
            Err(e) => {
                log::warn!("reading conversation metadata failed: {}", e);
                None
            }
        }
    }

    pub fn state(&self) -> BudgetState {
        if let Some(pending) = *Self::lock(&self.pending) {
            return pending;
        }

        match self.active_metadata() {
            Some(metadata) => read_state(&metadata),
            None => *Self::lock(&self.in_memory),
        }
    }

    pub fn used(&self) -> u32 {
        self.state().used
    }

    /// Whether state is backed by conversation metadata right now.
    pub fn is_persistent(&self) -> bool {
        self.active_metadata().is_some()
    }

    /// Store a new value and persist it. Returns the previous value.
    ///
    /// The new value is visible to readers before the save is awaited, so
    /// concurrent callers never see the old value while the host is saving.
    pub async fn set_used(&self, used: u32) -> u32 {
        let previous = self.used();
        let state = BudgetState { used };
        *Self::lock(&self.in_memory) = state;

        let (Some(store), Some(mut metadata)) = (self.metadata.as_ref(), self.active_metadata())
        else {
            *Self::lock(&self.pending) = None;
            return previous;
        };

        *Self::lock(&self.pending) = Some(state);

        match serde_json::to_value(state) {
            Ok(value) => {
                metadata.insert(SETTINGS_KEY.to_string(), value);
            }
            Err(e) => {
                log::warn!("serializing budget state failed: {}", e);
                return previous;
            }
        }

        match store.save(metadata).await {
            Ok(()) => {
                let mut pending = Self::lock(&self.pending);
                // A later write may have replaced it while we were saving.
                if *pending == Some(state) {
                    *pending = None;
                }
            }
            Err(e) => {
                log::warn!("saving budget state failed: {}", e);
            }
        }

        previous
    }

    /// Drop any unconfirmed value, e.g. when the active conversation
    /// changes underneath us.
    pub fn forget_pending(&self) {
        *Self::lock(&self.pending) = None;
    }
}

fn read_state(metadata: &Metadata) -> BudgetState {
    match metadata.get(SETTINGS_KEY) {
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|e| {
            log::warn!("invalid budget state in metadata, treating as unused: {}", e);
            BudgetState::default()
        }),
        None => BudgetState::default(),
    }
}
