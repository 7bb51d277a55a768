//! Budget configuration and its persistence through the host settings store.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::host::{Metadata, SettingsStore};

/// Key under which budget settings and per-conversation state are stored.
pub const SETTINGS_KEY: &str = "image_tool_budget";

/// Default number of image tool calls per turn.
pub const DEFAULT_LIMIT_PER_TURN: i64 = 1;

/// Operator-editable budget configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BudgetConfig {
    /// Raw configured limit. Only 0 and 1 are meaningful, see
    /// [`effective_limit`](Self::effective_limit).
    #[serde(default = "default_limit_per_turn")]
    pub limit_per_turn: i64,
    #[serde(default)]
    pub show_diagnostics: bool,
}

fn default_limit_per_turn() -> i64 {
    DEFAULT_LIMIT_PER_TURN
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit_per_turn: DEFAULT_LIMIT_PER_TURN,
            show_diagnostics: false,
        }
    }
}

impl BudgetConfig {
    /// Non-positive limits disable image tools, any positive limit allows a
    /// single call per turn.
    pub fn effective_limit(&self) -> u32 {
        if self.limit_per_turn <= 0 {
            0
        } else {
            1
        }
    }
}

/// Bounded retry with a fixed interval. The first attempt runs immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
        }
    }

    /// Resync after conversation or readiness events: now, then twice more.
    pub const fn resync() -> Self {
        Self::new(3, Duration::from_millis(500))
    }

    /// Polling for tools the host registers asynchronously.
    pub const fn tool_discovery() -> Self {
        Self::new(20, Duration::from_millis(500))
    }

    /// Delay to wait before the given zero-based attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.interval
        }
    }
}

/// Reads and writes [`BudgetConfig`] through the host settings store,
/// keeping the last known value in memory.
pub struct BudgetSettings {
    store: Arc<dyn SettingsStore>,
    current: Mutex<BudgetConfig>,
}

impl BudgetSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            current: Mutex::new(BudgetConfig::default()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, BudgetConfig> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Last loaded or written configuration.
    pub fn current(&self) -> BudgetConfig {
        *self.guard()
    }

    /// Load configuration from the settings store, filling in defaults and
    /// writing them back when fields were missing.
    pub async fn load(&self) -> BudgetConfig {
        let settings = match self.store.get() {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("reading settings failed: {}", e);
                return self.current();
            }
        };

        let raw = settings.get(SETTINGS_KEY).cloned();
        let config = match parse_entry(raw.clone()) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{}, using defaults", e);
                *self.guard() = BudgetConfig::default();
                return BudgetConfig::default();
            }
        };

        *self.guard() = config;

        let normalized = serde_json::to_value(config).ok();
        if raw != normalized {
            log::debug!("applying default settings: {:?}", config);
            self.persist(settings, config).await;
        }

        config
    }

    /// Use `config` for this session without persisting it.
    pub fn apply(&self, config: BudgetConfig) {
        *self.guard() = config;
    }

    /// Stored configuration without applying defaults or writing anything
    /// back. `None` when no entry exists yet.
    pub fn read(&self) -> Result<Option<BudgetConfig>> {
        let settings = self.store.get()?;
        match settings.get(SETTINGS_KEY) {
            Some(raw) => parse_entry(Some(raw.clone())).map(Some),
            None => Ok(None),
        }
    }

    pub async fn set_limit_per_turn(&self, limit: i64) -> BudgetConfig {
        self.update(|config| config.limit_per_turn = limit).await
    }

    pub async fn set_show_diagnostics(&self, show: bool) -> BudgetConfig {
        self.update(|config| config.show_diagnostics = show).await
    }

    async fn update(&self, apply: impl FnOnce(&mut BudgetConfig)) -> BudgetConfig {
        let config = {
            let mut guard = self.guard();
            apply(&mut *guard);
            *guard
        };

        let settings = self.store.get().unwrap_or_else(|e| {
            log::warn!("reading settings failed: {}", e);
            Metadata::new()
        });
        self.persist(settings, config).await;
        config
    }

    async fn persist(&self, mut settings: Metadata, config: BudgetConfig) {
        let value = match serde_json::to_value(config) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("serializing settings failed: {}", e);
                return;
            }
        };
        settings.insert(SETTINGS_KEY.to_string(), value);

        if let Err(e) = self.store.save(settings).await {
            log::warn!("saving settings failed: {}", e);
        }
    }
}

fn parse_entry(raw: Option<serde_json::Value>) -> Result<BudgetConfig> {
    match raw {
        Some(raw) => Ok(serde_json::from_value(raw)?),
        None => Ok(BudgetConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemorySettingsStore;
    use serde_json::json;

    #[test]
    fn effective_limit_clamps_to_zero_or_one() {
        let limit = |limit_per_turn| {
            BudgetConfig {
                limit_per_turn,
                show_diagnostics: false,
            }
            .effective_limit()
        };
        assert_eq!(limit(-3), 0);
        assert_eq!(limit(0), 0);
        assert_eq!(limit(1), 1);
        assert_eq!(limit(5), 1);
    }

    #[test]
    fn retry_policy_runs_first_attempt_immediately() {
        let policy = RetryPolicy::resync();
        assert_eq!(policy.delay_before(0), Duration::ZERO);
        assert_eq!(policy.delay_before(1), Duration::from_millis(500));
        assert_eq!(policy.max_attempts, 3);
    }

    #[tokio::test]
    async fn first_load_writes_defaults() {
        let store = Arc::new(InMemorySettingsStore::new());
        let settings = BudgetSettings::new(store.clone());

        let config = settings.load().await;

        assert_eq!(config, BudgetConfig::default());
        assert_eq!(
            store.snapshot().get(SETTINGS_KEY),
            Some(&json!({ "limit_per_turn": 1, "show_diagnostics": false }))
        );
    }

    #[tokio::test]
    async fn partial_entry_is_completed_and_other_keys_kept() {
        let mut initial = Metadata::new();
        initial.insert(SETTINGS_KEY.to_string(), json!({ "limit_per_turn": 0 }));
        initial.insert("other_extension".to_string(), json!(true));
        let store = Arc::new(InMemorySettingsStore::with_settings(initial));
        let settings = BudgetSettings::new(store.clone());

        let config = settings.load().await;

        assert_eq!(config.limit_per_turn, 0);
        assert!(!config.show_diagnostics);
        let saved = store.snapshot();
        assert_eq!(saved.get("other_extension"), Some(&json!(true)));
        assert_eq!(
            saved.get(SETTINGS_KEY),
            Some(&json!({ "limit_per_turn": 0, "show_diagnostics": false }))
        );
    }

    #[tokio::test]
    async fn invalid_entry_falls_back_to_defaults() {
        let mut initial = Metadata::new();
        initial.insert(SETTINGS_KEY.to_string(), json!({ "limit_per_turn": "lots" }));
        let store = Arc::new(InMemorySettingsStore::with_settings(initial));
        let settings = BudgetSettings::new(store);

        assert!(matches!(
            settings.read(),
            Err(crate::error::BudgetError::InvalidSettings(_))
        ));
        assert_eq!(settings.load().await, BudgetConfig::default());
    }

    #[test]
    fn read_reports_missing_entry_as_none() {
        let settings = BudgetSettings::new(Arc::new(InMemorySettingsStore::new()));
        assert!(matches!(settings.read(), Ok(None)));
    }

    #[tokio::test]
    async fn setters_update_cache_and_store() {
        let store = Arc::new(InMemorySettingsStore::new());
        let settings = BudgetSettings::new(store.clone());

        settings.set_limit_per_turn(0).await;
        settings.set_show_diagnostics(true).await;

        assert_eq!(
            settings.current(),
            BudgetConfig {
                limit_per_turn: 0,
                show_diagnostics: true
            }
        );
        assert_eq!(
            store.snapshot().get(SETTINGS_KEY),
            Some(&json!({ "limit_per_turn": 0, "show_diagnostics": true }))
        );
    }

    #[test]
    fn apply_changes_session_config_only() {
        let store = Arc::new(InMemorySettingsStore::new());
        let settings = BudgetSettings::new(store.clone());
        let config = BudgetConfig {
            limit_per_turn: 0,
            show_diagnostics: true,
        };

        settings.apply(config);

        assert_eq!(settings.current(), config);
        assert!(store.snapshot().is_empty());
    }
}
