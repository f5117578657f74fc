//! Agent - ties the sequencer to the session store

use crate::caller::ModelCaller;
use crate::sequencer::{Advance, Sequencer};
use crate::store::SessionStore;
use espcraft_core::config::DEFAULT_TIMEOUT_SECS;
use espcraft_core::{ConversationState, Result};
use std::time::Duration;

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Upper bound on a single model call
    pub call_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

/// Session-aware front end to the [`Sequencer`]
pub struct Agent<C> {
    sequencer: Sequencer<C>,
    store: SessionStore,
}

impl<C: ModelCaller> Agent<C> {
    pub fn new(caller: C) -> Self {
        Self::with_config(caller, AgentConfig::default())
    }

    pub fn with_config(caller: C, config: AgentConfig) -> Self {
        Self::with_store(caller, config, SessionStore::new())
    }

    /// Use an existing store, e.g. one shared with another front end
    pub fn with_store(caller: C, config: AgentConfig, store: SessionStore) -> Self {
        Self {
            sequencer: Sequencer::new(caller, config.call_timeout),
            store,
        }
    }

    pub fn caller(&self) -> &C {
        self.sequencer.caller()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Current state of `session_id`, fresh if the session is new
    pub async fn state(&self, session_id: &str) -> ConversationState {
        self.store.get_or_create(session_id).await
    }

    /// Add the user's message (if any) and run the session's current step.
    ///
    /// The session stays locked until the model has answered, so concurrent
    /// calls for one session run one after another. The stored state is only
    /// replaced when the step succeeds; on error the user's message is not
    /// kept either.
    pub async fn respond(&self, session_id: &str, user_text: Option<&str>) -> Result<Advance> {
        let slot = self.store.slot(session_id);
        let mut current = slot.lock().await;

        let state = match user_text.map(str::trim).filter(|t| !t.is_empty()) {
            Some(text) => current.with_user_turn(text),
            None => current.clone(),
        };

        let advance = match self.sequencer.advance(&state).await {
            Ok(advance) => advance,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "advance failed, session unchanged");
                return Err(e);
            }
        };

        *current = advance.state.clone();
        tracing::debug!(
            session_id,
            step = %advance.next_step(),
            turns = current.turns().len(),
            "session updated"
        );
        Ok(advance)
    }

    /// Throw away a session so the next message starts over at collection
    pub async fn reset(&self, session_id: &str) {
        self.store.put(session_id, ConversationState::new()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::StepOutput;
    use crate::testing::ScriptedCaller;
    use espcraft_core::{Error, ErrorKind, Speaker, Step};

    fn agent(caller: ScriptedCaller) -> Agent<ScriptedCaller> {
        Agent::with_config(
            caller,
            AgentConfig { call_timeout: Duration::from_millis(500) },
        )
    }

    #[tokio::test]
    async fn test_full_session() {
        let agent = agent(ScriptedCaller::new(["ack", "no", "All good.\n{\"validated_components\": []}"]));

        let first = agent
            .respond("bench", Some("#### bme280, ssd1306 #### #### i2c ####"))
            .await
            .unwrap();
        assert_eq!(first.next_step(), Step::AskReview);

        let second = agent.respond("bench", Some("no thanks")).await.unwrap();
        assert_eq!(second.output, StepOutput::ReviewDecision { manual_review: false });

        let third = agent.respond("bench", None).await.unwrap();
        assert_eq!(third.next_step(), Step::Done);

        let state = agent.state("bench").await;
        let roles: Vec<Speaker> = state.turns().iter().map(|t| t.role()).collect();
        assert_eq!(
            roles,
            vec![Speaker::User, Speaker::Assistant, Speaker::User, Speaker::Assistant, Speaker::Assistant]
        );

        let err = agent.respond("bench", Some("again")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversationFinished);
        assert_eq!(agent.state("bench").await, state);
    }

    #[tokio::test]
    async fn test_failure_keeps_session() {
        let caller = ScriptedCaller::new(["ack"])
            .then_fail(Error::provider_failed("503 from upstream").temporary());
        let agent = agent(caller);

        agent.respond("s", Some("#### a, b #### #### spi ####")).await.unwrap();
        let before = agent.state("s").await;

        let err = agent.respond("s", Some("yes")).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(agent.state("s").await, before);

        // retry succeeds once the model answers again
        agent.caller().push_reply("yes");
        let retry = agent.respond("s", Some("yes")).await.unwrap();
        assert!(retry.state.manual_review_requested());
        assert_eq!(retry.state.turns().len(), before.turns().len() + 2);
    }

    #[tokio::test]
    async fn test_blank_user_text_is_skipped() {
        let agent = agent(ScriptedCaller::new(["ack"]));
        let advance = agent.respond("s", Some("   ")).await.unwrap();
        assert_eq!(advance.state.turns().len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_do_not_mix() {
        let agent = agent(ScriptedCaller::new(["ack-1", "ack-2"]));

        let (a, b) = tokio::join!(
            agent.respond("a", Some("#### x, y #### #### i2c ####")),
            agent.respond("b", Some("#### p, q #### #### spi ####")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(a.state.turns().len(), 2);
        assert_eq!(b.state.turns().len(), 2);
        assert!(a.state.turns()[0].text().contains("i2c"));
        assert!(b.state.turns()[0].text().contains("spi"));
        assert_eq!(agent.store().ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_reset() {
        let agent = agent(ScriptedCaller::new(["ack"]));
        agent.respond("s", Some("hi")).await.unwrap();
        agent.reset("s").await;
        assert_eq!(agent.state("s").await, ConversationState::new());
    }
}
