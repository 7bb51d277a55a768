//! Reconciles stored budget state with the transcript and answers whether
//! another image tool call fits in the current turn.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::ImageToolClassifier;
use crate::config::BudgetSettings;
use crate::host::TranscriptSource;
use crate::state::BudgetStore;
use crate::transcript::count_image_invocations_since_last_user_turn;

/// Point-in-time view of the budget, for diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BudgetSnapshot {
    pub stored_used: u32,
    pub history_used: Option<u32>,
    pub effective_used: u32,
    pub limit_per_turn: u32,
    pub allowed: bool,
    pub persistent: bool,
    pub known_tools: Vec<String>,
    pub taken_at: DateTime<Utc>,
}

pub struct BudgetOracle {
    classifier: Arc<ImageToolClassifier>,
    store: Arc<BudgetStore>,
    transcript: Option<Arc<dyn TranscriptSource>>,
    settings: Arc<BudgetSettings>,
}

impl BudgetOracle {
    pub fn new(
        classifier: Arc<ImageToolClassifier>,
        store: Arc<BudgetStore>,
        transcript: Option<Arc<dyn TranscriptSource>>,
        settings: Arc<BudgetSettings>,
    ) -> Self {
        Self {
            classifier,
            store,
            transcript,
            settings,
        }
    }

    pub fn classifier(&self) -> &ImageToolClassifier {
        &self.classifier
    }

    pub fn store(&self) -> &BudgetStore {
        &self.store
    }

    /// Image tool calls since the last user message, or `None` when the
    /// transcript cannot be read.
    pub fn used_by_history(&self) -> Option<u32> {
        let source = self.transcript.as_ref()?;
        let messages = match source.messages() {
            Ok(messages) => messages,
            Err(e) => {
                log::warn!("reading transcript failed: {}", e);
                return None;
            }
        };
        count_image_invocations_since_last_user_turn(messages.as_deref(), &self.classifier)
    }

    /// The transcript wins whenever it is readable; stored state is a cache
    /// that can lag behind or be wiped.
    pub fn effective_used(&self) -> u32 {
        self.used_by_history()
            .unwrap_or_else(|| self.store.used())
    }

    pub fn limit_per_turn(&self) -> u32 {
        self.settings.current().effective_limit()
    }

    pub fn remaining_allowed(&self) -> bool {
        let used = self.effective_used();
        let limit = self.limit_per_turn();
        let allowed = used < limit;
        log::debug!(
            "image tool budget check: used={} limit={} allowed={}",
            used,
            limit,
            allowed
        );
        allowed
    }

    /// Charge the current turn. Saturates at one instead of counting.
    pub async fn mark_used(&self) {
        let previous = self.store.set_used(1).await;
        if previous != 1 {
            log::debug!("image tool budget consumed for this turn");
        }
    }

    pub async fn reset_budget(&self) {
        self.store.set_used(0).await;
        log::debug!("image tool budget reset");
    }

    /// Overwrite stored usage with the transcript count when they disagree.
    /// Returns the history count, or `None` if the transcript was unavailable.
    pub async fn sync_state_with_history(&self) -> Option<u32> {
        let history = self.used_by_history()?;
        let stored = self.store.used();
        if stored != history {
            log::debug!(
                "resyncing image tool budget from transcript: {} -> {}",
                stored,
                history
            );
            self.store.set_used(history).await;
        }
        Some(history)
    }

    pub fn snapshot(&self) -> BudgetSnapshot {
        let stored_used = self.store.used();
        let history_used = self.used_by_history();
        let effective_used = history_used.unwrap_or(stored_used);
        let limit_per_turn = self.limit_per_turn();

        let snapshot = BudgetSnapshot {
            stored_used,
            history_used,
            effective_used,
            limit_per_turn,
            allowed: effective_used < limit_per_turn,
            persistent: self.store.is_persistent(),
            known_tools: self.classifier.known_tools(),
            taken_at: Utc::now(),
        };

        if self.settings.current().show_diagnostics {
            log::info!("image tool budget: {:?}", snapshot);
        }

        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{InMemoryMetadataStore, InMemorySettingsStore, InMemoryTranscript};
    use crate::transcript::ConversationMessage;

    struct Fixture {
        oracle: BudgetOracle,
        transcript: Arc<InMemoryTranscript>,
        settings: Arc<BudgetSettings>,
    }

    fn fixture(transcript: InMemoryTranscript) -> Fixture {
        let transcript = Arc::new(transcript);
        let settings = Arc::new(BudgetSettings::new(Arc::new(InMemorySettingsStore::new())));
        let store = Arc::new(BudgetStore::new(Some(Arc::new(InMemoryMetadataStore::new()))));
        let oracle = BudgetOracle::new(
            Arc::new(ImageToolClassifier::new()),
            store,
            Some(transcript.clone()),
            settings.clone(),
        );
        Fixture {
            oracle,
            transcript,
            settings,
        }
    }

    #[tokio::test]
    async fn two_image_calls_exhaust_a_limit_of_one() {
        let f = fixture(InMemoryTranscript::from_messages(vec![
            ConversationMessage::user("draw"),
            ConversationMessage::tool_call("GenerateImage"),
            ConversationMessage::tool_call("GenerateImage"),
        ]));

        assert_eq!(f.oracle.effective_used(), 2);
        assert!(!f.oracle.remaining_allowed());
    }

    #[tokio::test]
    async fn stored_state_is_used_when_transcript_is_unavailable() {
        let f = fixture(InMemoryTranscript::unloaded());
        assert_eq!(f.oracle.used_by_history(), None);
        assert!(f.oracle.remaining_allowed());

        f.oracle.mark_used().await;
        assert_eq!(f.oracle.effective_used(), 1);
        assert!(!f.oracle.remaining_allowed());
    }

    #[tokio::test]
    async fn mark_used_saturates() {
        let f = fixture(InMemoryTranscript::unloaded());
        f.oracle.mark_used().await;
        f.oracle.mark_used().await;
        assert_eq!(f.oracle.store().used(), 1);
    }

    #[tokio::test]
    async fn reset_mark_reset_leaves_zero() {
        let f = fixture(InMemoryTranscript::new());
        f.oracle.reset_budget().await;
        f.oracle.mark_used().await;
        f.oracle.reset_budget().await;
        assert_eq!(f.oracle.store().used(), 0);
    }

    #[tokio::test]
    async fn zero_limit_never_allows() {
        let f = fixture(InMemoryTranscript::new());
        f.settings.set_limit_per_turn(0).await;
        assert_eq!(f.oracle.effective_used(), 0);
        assert!(!f.oracle.remaining_allowed());
    }

    #[tokio::test]
    async fn effective_used_does_not_decrease_within_a_turn() {
        let f = fixture(InMemoryTranscript::from_messages(vec![ConversationMessage::user(
            "draw",
        )]));
        let mut last = f.oracle.effective_used();
        for message in [
            ConversationMessage::assistant("working on it"),
            ConversationMessage::tool_call("generate_image"),
            ConversationMessage::assistant("done"),
            ConversationMessage::tool_call("generate_image"),
        ] {
            f.transcript.push(message);
            let now = f.oracle.effective_used();
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 2);
    }

    #[tokio::test]
    async fn sync_overwrites_stale_state_and_skips_unknown_history() {
        let f = fixture(InMemoryTranscript::unloaded());
        f.oracle.mark_used().await;

        assert_eq!(f.oracle.sync_state_with_history().await, None);
        assert_eq!(f.oracle.store().used(), 1);

        f.transcript.replace(vec![ConversationMessage::user("new turn")]);
        assert_eq!(f.oracle.sync_state_with_history().await, Some(0));
        assert_eq!(f.oracle.store().used(), 0);
    }

    #[tokio::test]
    async fn sync_persists_only_on_change() {
        let metadata = Arc::new(InMemoryMetadataStore::new());
        let oracle = BudgetOracle::new(
            Arc::new(ImageToolClassifier::new()),
            Arc::new(BudgetStore::new(Some(metadata.clone()))),
            Some(Arc::new(InMemoryTranscript::from_messages(vec![
                ConversationMessage::user("draw"),
                ConversationMessage::tool_call("generate_image"),
            ]))),
            Arc::new(BudgetSettings::new(Arc::new(InMemorySettingsStore::new()))),
        );

        oracle.sync_state_with_history().await;
        oracle.sync_state_with_history().await;

        assert_eq!(oracle.store().used(), 1);
        assert_eq!(metadata.save_count(), 1);
    }

    #[tokio::test]
    async fn snapshot_reports_both_sources() {
        let f = fixture(InMemoryTranscript::from_messages(vec![
            ConversationMessage::user("draw"),
            ConversationMessage::tool_call("generate_image"),
        ]));

        let snapshot = f.oracle.snapshot();

        assert_eq!(snapshot.stored_used, 0);
        assert_eq!(snapshot.history_used, Some(1));
        assert_eq!(snapshot.effective_used, 1);
        assert_eq!(snapshot.limit_per_turn, 1);
        assert!(!snapshot.allowed);
        assert!(snapshot.persistent);
    }

    struct FailingTranscript;

    impl TranscriptSource for FailingTranscript {
        fn messages(&self) -> Result<Option<Vec<ConversationMessage>>, crate::error::HostError> {
            Err(crate::error::HostError::Unavailable("chat not loaded".to_string()))
        }
    }

    #[tokio::test]
    async fn transcript_errors_fall_back_to_stored_state() {
        let store = Arc::new(BudgetStore::new(Some(Arc::new(InMemoryMetadataStore::new()))));
        let oracle = BudgetOracle::new(
            Arc::new(ImageToolClassifier::new()),
            store,
            Some(Arc::new(FailingTranscript)),
            Arc::new(BudgetSettings::new(Arc::new(InMemorySettingsStore::new()))),
        );

        assert_eq!(oracle.used_by_history(), None);
        assert_eq!(oracle.sync_state_with_history().await, None);
        assert!(oracle.remaining_allowed());

        oracle.mark_used().await;
        assert_eq!(oracle.effective_used(), 1);
        assert!(!oracle.remaining_allowed());
        assert_eq!(oracle.snapshot().history_used, None);
    }
}
