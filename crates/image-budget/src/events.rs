//! Host lifecycle events driving the per-turn state machine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::session::BudgetSession;
use crate::tool::ToolInvocation;
use crate::transcript::ConversationMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum HostEvent {
    /// A message was sent. Hosts that do not say who sent it pass `None`.
    UserMessageSent(Option<ConversationMessage>),
    ToolCallsPerformed(Vec<ToolInvocation>),
    ConversationChanged,
    ConversationCreated,
    AppReady,
    SettingsLoaded,
}

pub struct EventBindings {
    session: Arc<BudgetSession>,
}

impl EventBindings {
    pub fn new(session: Arc<BudgetSession>) -> Self {
        Self { session }
    }

    /// Apply one event. Resync events return the handle of the background
    /// retry loop they started.
    pub async fn handle(&self, event: HostEvent) -> Option<JoinHandle<()>> {
        let oracle = self.session.oracle();
        match event {
            HostEvent::UserMessageSent(message) => {
                if message.as_ref().map_or(true, ConversationMessage::is_user_authored) {
                    oracle.reset_budget().await;
                }
                None
            }
            HostEvent::ToolCallsPerformed(invocations) => {
                for invocation in invocations {
                    if oracle.classifier().is_image_tool(&invocation.name) {
                        log::debug!("image tool '{}' executed", invocation.name);
                        oracle.mark_used().await;
                    }
                }
                None
            }
            HostEvent::ConversationChanged | HostEvent::ConversationCreated => {
                self.session.store().forget_pending();
                Some(self.spawn_resync())
            }
            HostEvent::AppReady | HostEvent::SettingsLoaded => {
                self.session.settings().load().await;
                Some(self.spawn_resync())
            }
        }
    }

    /// Reconcile with the transcript now and again on the resync policy,
    /// since the host may not be ready when the event fires.
    pub fn spawn_resync(&self) -> JoinHandle<()> {
        let oracle = self.session.oracle().clone();
        let policy = self.session.options().resync;

        tokio::spawn(async move {
            for attempt in 0..policy.max_attempts {
                let delay = policy.delay_before(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                oracle.sync_state_with_history().await;
            }
        })
    }

    /// Keep patching tools the host registers late, up to the discovery
    /// policy's attempt count.
    pub fn spawn_tool_discovery(&self) -> JoinHandle<()> {
        let session = self.session.clone();
        let policy = session.options().tool_discovery;

        tokio::spawn(async move {
            let mut patched = 0;
            for attempt in 0..policy.max_attempts {
                let delay = policy.delay_before(attempt);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if let Some(count) = session.interceptor().patch_registered_tools() {
                    patched += count;
                }
            }
            log::debug!("tool discovery finished, {} tool(s) patched", patched);
        })
    }

    /// Consume host events until the channel closes.
    pub fn spawn(self, mut receiver: broadcast::Receiver<HostEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            log::info!("image tool budget event bindings started");
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        self.handle(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("missed {} host events, resyncing", skipped);
                        self.spawn_resync();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            log::info!("image tool budget event bindings stopped");
        })
    }
}
