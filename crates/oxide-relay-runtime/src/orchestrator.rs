//! Per-message response pipeline.
//!
//! Every inbound event walks the same states:
//! `Received → Registered → ContextFetched → TriggerChecked → (MediaSent)? →
//! Responded → DelayComputed → Delivered → SessionUpdated → Completed`.
//! Collaborator failures are logged and degrade to a fallback; they never
//! abort the pipeline and nothing is retried here.

use crate::task_registry::{TaskKey, TaskRegistry};
use crate::transport::{ChatTransport, TransportError, TypingState};
use oxide_relay_core::{
    AdminError, ContextTurn, DelayScheduler, DeliveryCategory, InboundEvent, LlmError,
    MediaDescriptor, RelaySettings, Responder, Role, SessionStore, TriggerMatcher, WebhookPayload,
    FALLBACK_REPLY,
};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pipeline states, used for structured logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Event parsed
    Received,
    /// Task registered
    Registered,
    /// User turn recorded and prior context fetched
    ContextFetched,
    /// Trigger table consulted
    TriggerChecked,
    /// Triggered media handed to the transport
    MediaSent,
    /// Reply text obtained (possibly the fallback)
    Responded,
    /// Release delay computed
    DelayComputed,
    /// Reply handed to the transport
    Delivered,
    /// Assistant turn recorded
    SessionUpdated,
    /// Done
    Completed,
}

/// Tuning of the pipeline itself.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Prior turns handed to the responder
    pub context_turns: usize,
    /// Whether platform delivery waits out the typing delay
    pub simulate_wait: bool,
    /// Timeout applied to every collaborator call
    pub collaborator_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            context_turns: 10,
            simulate_wait: true,
            collaborator_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&RelaySettings> for OrchestratorConfig {
    fn from(settings: &RelaySettings) -> Self {
        Self {
            context_turns: settings.context_turns,
            simulate_wait: settings.simulate_wait,
            collaborator_timeout: settings.collaborator_timeout(),
        }
    }
}

/// How a single run delivers its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Send media and text through the transport
    pub deliver: bool,
    /// Actually wait the typing delay before sending
    pub simulate_wait: bool,
}

impl RunOptions {
    /// Platform delivery.
    #[must_use]
    pub const fn platform(simulate_wait: bool) -> Self {
        Self {
            deliver: true,
            simulate_wait,
        }
    }

    /// Standalone preview: same pipeline, no transport calls, no wait.
    #[must_use]
    pub const fn preview() -> Self {
        Self {
            deliver: false,
            simulate_wait: false,
        }
    }
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    /// Task key of the run
    pub task_key: String,
    /// Reply text (the fallback if the responder failed)
    pub reply: String,
    /// Whether `reply` is the fallback
    pub used_fallback: bool,
    /// Computed release delay in seconds
    pub delay_secs: f64,
    /// Triggered media, if any
    pub media: Option<MediaDescriptor>,
    /// Whether triggered media was delivered; `None` when not attempted
    pub media_delivered: Option<bool>,
    /// Whether the reply text was delivered
    pub delivered: bool,
}

/// Counters exposed by the stats endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStats {
    /// Live sessions after an expiry sweep
    pub active_sessions: usize,
    /// Registered, not yet reclaimed tasks
    pub active_tasks: usize,
    /// Distinct users seen since startup
    pub total_conversations: usize,
}

/// Shared state owned by the relay.
pub struct RelayState {
    /// Conversation sessions
    pub sessions: Arc<SessionStore>,
    /// Trigger table
    pub triggers: Arc<TriggerMatcher>,
    /// Typing delay scheduler
    pub delays: Arc<DelayScheduler>,
    /// In-flight tasks
    pub tasks: Arc<TaskRegistry>,
}

impl RelayState {
    /// Build all stores from settings.
    ///
    /// # Errors
    ///
    /// Returns `AdminError` if configured triggers or delay tuning are invalid.
    pub fn from_settings(settings: &RelaySettings) -> Result<Self, AdminError> {
        Ok(Self {
            sessions: Arc::new(SessionStore::new(
                settings.session_max_messages,
                settings.session_timeout(),
            )),
            triggers: Arc::new(TriggerMatcher::new(settings.media_triggers.clone())?),
            delays: Arc::new(DelayScheduler::new(settings.delay_config())?),
            tasks: Arc::new(TaskRegistry::new(
                settings.max_concurrent_tasks,
                settings.max_pending_tasks,
            )),
        })
    }
}

/// Composes stores and collaborators into the end-to-end pipeline.
pub struct Orchestrator {
    state: RelayState,
    responder: Arc<dyn Responder>,
    transport: Arc<dyn ChatTransport>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(
        state: RelayState,
        responder: Arc<dyn Responder>,
        transport: Arc<dyn ChatTransport>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state,
            responder,
            transport,
            config,
        }
    }

    /// Session store.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.state.sessions
    }

    /// Trigger matcher, also used by admin operations.
    #[must_use]
    pub fn triggers(&self) -> &Arc<TriggerMatcher> {
        &self.state.triggers
    }

    /// Delay scheduler, also used by admin operations.
    #[must_use]
    pub fn delays(&self) -> &Arc<DelayScheduler> {
        &self.state.delays
    }

    /// Task registry.
    #[must_use]
    pub fn tasks(&self) -> &Arc<TaskRegistry> {
        &self.state.tasks
    }

    /// Current counters.
    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            active_sessions: self.state.sessions.active_count().await,
            active_tasks: self.state.tasks.active_count(),
            total_conversations: self.state.sessions.total_ever().await,
        }
    }

    /// Extract events from a webhook body and spawn one task per event.
    /// Returns the number of tasks spawned.
    pub fn dispatch(self: &Arc<Self>, payload: WebhookPayload) -> usize {
        payload
            .into_events()
            .into_iter()
            .filter_map(|event| self.submit_event(event))
            .count()
    }

    /// Spawn the platform pipeline for one event.
    /// Returns `None` if the registry is full and the event was dropped.
    pub fn submit_event(self: &Arc<Self>, event: InboundEvent) -> Option<TaskKey> {
        let key = TaskKey::for_sender(&event.sender_id);
        debug!(task_key = %key, user_id = %event.sender_id, state = ?PipelineState::Received, "Pipeline state");

        let this = Arc::clone(self);
        let task_key = key.clone();
        let options = RunOptions::platform(self.config.simulate_wait);
        let user_id = event.sender_id.clone();
        let submitted = self.state.tasks.submit(key.clone(), async move {
            this.run(&task_key, event, options).await;
        });
        if let Err(e) = submitted {
            warn!(task_key = %key, user_id = %user_id, error = %e, "Dropping event");
            return None;
        }
        debug!(task_key = %key, state = ?PipelineState::Registered, "Pipeline state");
        Some(key)
    }

    /// Run the pipeline inline without platform delivery.
    pub async fn preview(&self, user_id: &str, text: &str) -> PipelineOutcome {
        let event = InboundEvent {
            sender_id: user_id.to_string(),
            recipient_id: None,
            text: text.to_string(),
        };
        let key = TaskKey::for_sender(user_id);
        self.run(&key, event, RunOptions::preview()).await
    }

    /// Send `text` with a typing delay, outside any session.
    /// Returns the delay used and whether the text was delivered.
    pub async fn send_with_delay(&self, user_id: &str, text: &str) -> (f64, bool) {
        let delay = self.state.delays.compute(text, DeliveryCategory::Text);
        let delivered = self
            .deliver_text(user_id, text, delay, self.config.simulate_wait)
            .await;
        (delay, delivered)
    }

    /// Run every state for one event.
    pub async fn run(&self, key: &TaskKey, event: InboundEvent, options: RunOptions) -> PipelineOutcome {
        let user_id = event.sender_id.as_str();
        info!(task_key = %key, user_id = %user_id, "Processing message");

        let history = self
            .state
            .sessions
            .record_turn_with_context(user_id, Role::User, event.text.as_str(), self.config.context_turns)
            .await;
        enter(key, PipelineState::ContextFetched);

        let media = self.state.triggers.match_text(&event.text);
        enter(key, PipelineState::TriggerChecked);

        let (media_delivered, (reply, used_fallback)) = match media.as_ref() {
            Some(descriptor) if options.deliver => {
                let (sent, reply) = tokio::join!(
                    self.send_media(key, user_id, descriptor),
                    self.respond(key, &event.text, &history)
                );
                (Some(sent), reply)
            }
            _ => (None, self.respond(key, &event.text, &history).await),
        };

        let delay_secs = self.state.delays.compute(&reply, DeliveryCategory::Text);
        enter(key, PipelineState::DelayComputed);

        let delivered = if options.deliver {
            let delivered = self
                .deliver_text(user_id, &reply, delay_secs, options.simulate_wait)
                .await;
            enter(key, PipelineState::Delivered);
            delivered
        } else {
            false
        };

        self.state
            .sessions
            .record_turn(user_id, Role::Assistant, reply.as_str())
            .await;
        enter(key, PipelineState::SessionUpdated);

        enter(key, PipelineState::Completed);
        PipelineOutcome {
            task_key: key.to_string(),
            reply,
            used_fallback,
            delay_secs,
            media,
            media_delivered,
            delivered,
        }
    }

    async fn respond(&self, key: &TaskKey, text: &str, history: &[ContextTurn]) -> (String, bool) {
        let timeout = self.config.collaborator_timeout;
        let result = tokio::time::timeout(timeout, self.responder.generate(text, history))
            .await
            .unwrap_or(Err(LlmError::Timeout(timeout.as_secs())));
        enter(key, PipelineState::Responded);

        match result {
            Ok(reply) => (reply, false),
            Err(e) => {
                warn!(task_key = %key, error = %e, "Responder failed, using fallback");
                (FALLBACK_REPLY.to_string(), true)
            }
        }
    }

    async fn send_media(&self, key: &TaskKey, user_id: &str, media: &MediaDescriptor) -> bool {
        let result = self
            .call_transport(
                self.transport
                    .send_media(user_id, media.kind, &media.reference),
            )
            .await;
        enter(key, PipelineState::MediaSent);

        match result {
            Ok(()) => {
                info!(task_key = %key, user_id = %user_id, kind = %media.kind, trigger = %media.name, "Sent media");
                true
            }
            Err(e) => {
                warn!(task_key = %key, user_id = %user_id, kind = %media.kind, error = %e, "Media delivery failed");
                false
            }
        }
    }

    /// Thinking pause, typing on, wait, send, typing off. Typing off is
    /// attempted whenever typing on was, even if sending fails or shutdown
    /// interrupts the wait.
    async fn deliver_text(&self, user_id: &str, text: &str, delay_secs: f64, wait: bool) -> bool {
        if wait && !self.sleep_unless_shutdown(self.state.delays.pause_delay()).await {
            info!(user_id = %user_id, "Thinking pause interrupted by shutdown");
            return false;
        }

        if let Err(e) = self
            .call_transport(self.transport.set_typing(user_id, TypingState::On))
            .await
        {
            debug!(user_id = %user_id, error = %e, "Typing indicator on failed");
        }

        let delivered = if wait && !self.sleep_unless_shutdown(delay_secs).await {
            info!(user_id = %user_id, "Typing wait interrupted by shutdown");
            false
        } else {
            match self.call_transport(self.transport.send_text(user_id, text)).await {
                Ok(()) => {
                    info!(user_id = %user_id, delay = delay_secs, "Sent message");
                    true
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Text delivery failed");
                    false
                }
            }
        };

        if let Err(e) = self
            .call_transport(self.transport.set_typing(user_id, TypingState::Off))
            .await
        {
            debug!(user_id = %user_id, error = %e, "Typing indicator off failed");
        }

        delivered
    }

    /// Sleep for `secs`; returns false if shutdown fires first.
    async fn sleep_unless_shutdown(&self, secs: f64) -> bool {
        let shutdown = self.state.tasks.shutdown_token();
        tokio::select! {
            biased;
            () = shutdown.cancelled() => false,
            () = tokio::time::sleep(Duration::from_secs_f64(secs)) => true,
        }
    }

    async fn call_transport<F>(&self, call: F) -> Result<(), TransportError>
    where
        F: Future<Output = Result<(), TransportError>>,
    {
        let timeout = self.config.collaborator_timeout;
        tokio::time::timeout(timeout, call)
            .await
            .unwrap_or(Err(TransportError::Timeout(timeout.as_secs())))
    }
}

fn enter(key: &TaskKey, state: PipelineState) {
    debug!(task_key = %key, state = ?state, "Pipeline state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockChatTransport;
    use oxide_relay_core::llm::MockResponder;
    use oxide_relay_core::{DelayConfig, MediaKind, Trigger};

    fn state_with(triggers: Vec<Trigger>) -> RelayState {
        let settings = RelaySettings {
            media_triggers: triggers,
            ..RelaySettings::default()
        };
        RelayState::from_settings(&settings).expect("valid settings")
    }

    fn photo_trigger() -> Trigger {
        Trigger {
            name: "photo".to_string(),
            keywords: vec!["photo".to_string()],
            kind: MediaKind::Image,
            reference: "https://cdn.example/photo.jpg".to_string(),
        }
    }

    fn event(text: &str) -> InboundEvent {
        InboundEvent {
            sender_id: "U1".to_string(),
            recipient_id: Some("PAGE".to_string()),
            text: text.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_call_order_and_context() {
        let mut responder = MockResponder::new();
        responder
            .expect_generate()
            .withf(|msg, history| msg == "hi" && history.is_empty())
            .times(1)
            .returning(|_, _| Ok("hello there".to_string()));

        let mut transport = MockChatTransport::new();
        let mut seq = mockall::Sequence::new();
        transport
            .expect_set_typing()
            .withf(|_, state| *state == TypingState::On)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        transport
            .expect_send_text()
            .withf(|user, text| user == "U1" && text == "hello there")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        transport
            .expect_set_typing()
            .withf(|_, state| *state == TypingState::Off)
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        transport.expect_send_media().never();

        let orchestrator = Orchestrator::new(
            state_with(Vec::new()),
            Arc::new(responder),
            Arc::new(transport),
            OrchestratorConfig::default(),
        );

        let outcome = orchestrator
            .run(&TaskKey::for_sender("U1"), event("hi"), RunOptions::platform(true))
            .await;

        assert!(outcome.delivered);
        assert!(!outcome.used_fallback);
        assert!(outcome.media_delivered.is_none());
        let max = orchestrator.delays().config().max_seconds;
        assert!(outcome.delay_secs >= 0.5 && outcome.delay_secs <= max);
        assert_eq!(orchestrator.sessions().history_len("U1").await, 2);
    }

    #[tokio::test]
    async fn test_responder_error_becomes_fallback_and_is_recorded() {
        let mut responder = MockResponder::new();
        responder
            .expect_generate()
            .returning(|_, _| Err(LlmError::ApiError("boom".to_string())));

        let orchestrator = Orchestrator::new(
            state_with(Vec::new()),
            Arc::new(responder),
            Arc::new(MockChatTransport::new()),
            OrchestratorConfig::default(),
        );

        let outcome = orchestrator.preview("U1", "hello").await;
        assert!(outcome.used_fallback);
        assert_eq!(outcome.reply, FALLBACK_REPLY);
        assert!(!outcome.delivered);

        let context = orchestrator.sessions().get_context("U1", 10).await;
        assert_eq!(
            context,
            vec![
                ContextTurn::new(Role::User, "hello"),
                ContextTurn::new(Role::Assistant, FALLBACK_REPLY),
            ]
        );
    }

    #[tokio::test]
    async fn test_media_failure_does_not_block_text() {
        let mut responder = MockResponder::new();
        responder
            .expect_generate()
            .returning(|_, _| Ok("here you go".to_string()));

        let mut transport = MockChatTransport::new();
        transport
            .expect_send_media()
            .withf(|_, kind, reference| {
                *kind == MediaKind::Image && reference == "https://cdn.example/photo.jpg"
            })
            .times(1)
            .returning(|_, _, _| {
                Err(TransportError::Api {
                    status: 400,
                    body: "bad attachment".to_string(),
                })
            });
        transport.expect_set_typing().returning(|_, _| Ok(()));
        transport.expect_send_text().times(1).returning(|_, _| Ok(()));

        let orchestrator = Orchestrator::new(
            state_with(vec![photo_trigger()]),
            Arc::new(responder),
            Arc::new(transport),
            OrchestratorConfig {
                simulate_wait: false,
                ..OrchestratorConfig::default()
            },
        );

        let outcome = orchestrator
            .run(
                &TaskKey::for_sender("U1"),
                event("send a PHOTO"),
                RunOptions::platform(false),
            )
            .await;

        assert_eq!(outcome.media_delivered, Some(false));
        assert!(outcome.delivered);
        assert_eq!(outcome.media.map(|m| m.name), Some("photo".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_responder_times_out_to_fallback() {
        struct Stalled;

        #[async_trait::async_trait]
        impl Responder for Stalled {
            async fn generate(&self, _: &str, _: &[ContextTurn]) -> Result<String, LlmError> {
                std::future::pending().await
            }
        }

        let orchestrator = Orchestrator::new(
            state_with(Vec::new()),
            Arc::new(Stalled),
            Arc::new(MockChatTransport::new()),
            OrchestratorConfig {
                collaborator_timeout: Duration::from_secs(2),
                ..OrchestratorConfig::default()
            },
        );

        let outcome = orchestrator.preview("U1", "anyone there?").await;
        assert!(outcome.used_fallback);
    }

    fn long_reply_state() -> RelayState {
        let state = state_with(Vec::new());
        state
            .delays
            .update_config(DelayConfig {
                jitter: 0.0,
                ..DelayConfig::default()
            })
            .expect("valid config");
        state
    }

    fn long_reply_responder() -> MockResponder {
        let mut responder = MockResponder::new();
        responder
            .expect_generate()
            .returning(|_, _| Ok("a reply long enough to wait for a while".to_string()));
        responder
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_typing_wait() {
        let state = long_reply_state();
        let shutdown = state.tasks.shutdown_token();

        let mut transport = MockChatTransport::new();
        transport
            .expect_set_typing()
            .withf(|_, state| *state == TypingState::On)
            .times(1)
            .returning(move |_, _| {
                shutdown.cancel();
                Ok(())
            });
        transport
            .expect_set_typing()
            .withf(|_, state| *state == TypingState::Off)
            .times(1)
            .returning(|_, _| Ok(()));
        transport.expect_send_text().never();

        let orchestrator = Orchestrator::new(
            state,
            Arc::new(long_reply_responder()),
            Arc::new(transport),
            OrchestratorConfig::default(),
        );

        let outcome = orchestrator
            .run(&TaskKey::for_sender("U1"), event("hi"), RunOptions::platform(true))
            .await;
        assert!(!outcome.delivered);
        assert_eq!(orchestrator.sessions().history_len("U1").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_delivery_skips_typing() {
        let state = long_reply_state();
        state.tasks.shutdown();

        let mut transport = MockChatTransport::new();
        transport.expect_set_typing().never();
        transport.expect_send_text().never();

        let orchestrator = Orchestrator::new(
            state,
            Arc::new(long_reply_responder()),
            Arc::new(transport),
            OrchestratorConfig::default(),
        );

        let outcome = orchestrator
            .run(&TaskKey::for_sender("U1"), event("hi"), RunOptions::platform(true))
            .await;
        assert!(!outcome.delivered);
        assert_eq!(orchestrator.sessions().history_len("U1").await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_thinking_pause_precedes_typing() {
        let state = long_reply_state();
        let delay = state
            .delays
            .compute("a reply long enough to wait for a while", DeliveryCategory::Text);
        let started = tokio::time::Instant::now();
        let typing_at = Arc::new(std::sync::Mutex::new(None));

        let mut transport = MockChatTransport::new();
        let recorded = Arc::clone(&typing_at);
        transport
            .expect_set_typing()
            .withf(|_, state| *state == TypingState::On)
            .times(1)
            .returning(move |_, _| {
                *recorded.lock().expect("poisoned") = Some(tokio::time::Instant::now());
                Ok(())
            });
        transport
            .expect_set_typing()
            .withf(|_, state| *state == TypingState::Off)
            .times(1)
            .returning(|_, _| Ok(()));
        transport.expect_send_text().times(1).returning(|_, _| Ok(()));

        let orchestrator = Orchestrator::new(
            state,
            Arc::new(long_reply_responder()),
            Arc::new(transport),
            OrchestratorConfig::default(),
        );

        let outcome = orchestrator
            .run(&TaskKey::for_sender("U1"), event("hi"), RunOptions::platform(true))
            .await;
        assert!(outcome.delivered);

        let typing_on = typing_at
            .lock()
            .expect("poisoned")
            .expect("typing indicator set");
        let pause = typing_on.duration_since(started).as_secs_f64();
        assert!((0.5..1.6).contains(&pause), "pause was {pause}");
        let total = started.elapsed().as_secs_f64();
        assert!(total >= pause + delay - 1e-6);
    }
}
