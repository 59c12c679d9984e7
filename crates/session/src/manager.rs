//! Session manager: one `converse` call is one full exchange.
//!
//! read snapshot -> call the generation backend -> append user + model turns.
//!
//! History is only touched after the backend call has succeeded, so a failed,
//! timed-out or cancelled call leaves it exactly as it was.

use parley_config::AppConfig;
use parley_core::error::{Error, GenerationError, PersonaError, Result};
use parley_core::generation::{GenerationClient, GenerationRequest};
use parley_core::message::{ChatReply, SessionId, Turn};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::history::{ConversationHistory, SessionStore};
use crate::persona::{PersonaCell, PersonaContext, PersonaLoader};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Orchestrates persona priming, history and the generation backend.
///
/// Constructed once at startup and shared behind an `Arc`.
pub struct SessionManager {
    generator: Arc<dyn GenerationClient>,
    persona: PersonaCell,
    sessions: SessionStore,
    timeout: Duration,
}

impl SessionManager {
    pub fn new(
        generator: Arc<dyn GenerationClient>,
        persona: PersonaCell,
        sessions: SessionStore,
    ) -> Self {
        Self {
            generator,
            persona,
            sessions,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Filesystem persona, history bounds and timeout taken from config.
    pub fn from_config(config: &AppConfig, generator: Arc<dyn GenerationClient>) -> Self {
        Self::new(
            generator,
            PersonaCell::new(PersonaLoader::from_config(&config.persona)),
            SessionStore::from_config(&config.history),
        )
        .with_timeout(Duration::from_secs(config.generation.timeout_secs))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Load the persona documents if that has not happened yet.
    pub async fn ensure_persona(&self) -> std::result::Result<Arc<PersonaContext>, PersonaError> {
        self.persona.get().await
    }

    /// Send `utterance` in session `id` and return the model's reply.
    pub async fn converse(&self, id: &SessionId, utterance: &str) -> Result<ChatReply> {
        if utterance.trim().is_empty() {
            return Err(Error::validation("message must not be empty"));
        }

        let persona = self.ensure_persona().await?;
        let history = self.session(id, &persona).await?;

        let snapshot = history.snapshot();
        let prior_turns = snapshot.len();
        let user_turn = Turn::user(utterance);
        let request = GenerationRequest {
            history: snapshot,
            utterance: user_turn.clone(),
        };

        debug!(session = %id, prior_turns, backend = self.generator.name(), "Calling generation backend");

        let response = match tokio::time::timeout(self.timeout, self.generator.generate(request)).await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!(session = %id, error = %e, "Generation failed");
                return Err(e.into());
            }
            Err(_) => {
                warn!(session = %id, timeout_secs = self.timeout.as_secs(), "Generation timed out");
                return Err(GenerationError::Timeout(self.timeout.as_secs()).into());
            }
        };

        let reply = response
            .last_part()
            .cloned()
            .ok_or(GenerationError::NoResult)?;

        let turns = history.append_exchange(user_turn, Turn::model(reply.clone()));

        info!(
            session = %id,
            turns,
            candidates = response.candidates.len(),
            reply_chars = reply.as_text().map_or(0, |t| t.chars().count()),
            "Turn complete"
        );

        Ok(ChatReply { content: reply })
    }

    /// Snapshot of a session's history, or `None` if it was never created.
    /// Read-only: does not count as use for eviction.
    pub async fn history(&self, id: &SessionId) -> Option<Vec<Arc<Turn>>> {
        self.sessions.peek(id).await.map(|h| h.snapshot())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }

    async fn session(
        &self,
        id: &SessionId,
        persona: &PersonaContext,
    ) -> Result<Arc<ConversationHistory>> {
        self.sessions
            .get_or_create(id, || persona.turn())
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryPolicy;
    use crate::persona::tests::{MemorySource, test_loader};
    use async_trait::async_trait;
    use parley_core::error::ErrorClass;
    use parley_core::generation::{Candidate, GenerationResponse};
    use parley_core::message::{Part, Role};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays queued outcomes and records every request it sees.
    #[derive(Default)]
    struct ScriptedGenerator {
        outcomes: Mutex<VecDeque<std::result::Result<GenerationResponse, GenerationError>>>,
        seen: Mutex<Vec<GenerationRequest>>,
        delay: Option<Duration>,
    }

    impl ScriptedGenerator {
        fn replying(texts: &[&str]) -> Self {
            let generator = Self::default();
            for text in texts {
                generator.push(Ok(reply(text)));
            }
            generator
        }

        fn push(&self, outcome: std::result::Result<GenerationResponse, GenerationError>) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }

        fn seen(&self) -> Vec<GenerationRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptedGenerator {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> std::result::Result<GenerationResponse, GenerationError> {
            self.seen.lock().unwrap().push(request);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(GenerationError::NoResult))
        }
    }

    fn reply(text: &str) -> GenerationResponse {
        GenerationResponse {
            candidates: vec![Candidate::with_parts(vec![Part::text(text)])],
        }
    }

    fn manager(generator: Arc<ScriptedGenerator>) -> SessionManager {
        SessionManager::new(
            generator,
            PersonaCell::new(test_loader(Arc::new(MemorySource::persona()))),
            SessionStore::new(HistoryPolicy::unbounded(), 100),
        )
    }

    fn roles_and_text(turns: &[Arc<Turn>]) -> Vec<(Role, String)> {
        turns.iter().map(|t| (t.role, t.text())).collect()
    }

    #[tokio::test]
    async fn history_grows_in_exchange_order() {
        let generator = Arc::new(ScriptedGenerator::replying(&["m1", "m2", "m3"]));
        let manager = manager(generator.clone());
        let id = SessionId::shared();

        for (i, expected) in ["m1", "m2", "m3"].iter().enumerate() {
            let reply = manager.converse(&id, &format!("u{}", i + 1)).await.unwrap();
            assert_eq!(reply.text(), Some(*expected));
        }

        let history = manager.history(&id).await.unwrap();
        assert_eq!(history.len(), 7);
        assert_eq!(history[0].role, Role::Persona);
        assert_eq!(
            roles_and_text(&history[1..]),
            vec![
                (Role::User, "u1".into()),
                (Role::Model, "m1".into()),
                (Role::User, "u2".into()),
                (Role::Model, "m2".into()),
                (Role::User, "u3".into()),
                (Role::Model, "m3".into()),
            ]
        );
    }

    #[tokio::test]
    async fn request_carries_prior_history_and_new_utterance() {
        let generator = Arc::new(ScriptedGenerator::replying(&["m1", "m2"]));
        let manager = manager(generator.clone());
        let id = SessionId::shared();

        manager.converse(&id, "u1").await.unwrap();
        manager.converse(&id, "u2").await.unwrap();

        let seen = generator.seen();
        assert_eq!(seen[0].history.len(), 1);
        assert_eq!(seen[0].history[0].role, Role::Persona);
        assert_eq!(seen[0].utterance.text(), "u1");
        assert_eq!(seen[1].history.len(), 3);
        assert_eq!(seen[1].utterance.parts, vec![Part::text("u2")]);
    }

    #[tokio::test]
    async fn inspecting_history_does_not_keep_a_session_alive() {
        let generator = Arc::new(ScriptedGenerator::replying(&["m1", "m2", "m3"]));
        let manager = SessionManager::new(
            generator,
            PersonaCell::new(test_loader(Arc::new(MemorySource::persona()))),
            SessionStore::new(HistoryPolicy::unbounded(), 2),
        );
        let a = SessionId::parse("a").unwrap();
        let b = SessionId::parse("b").unwrap();
        let c = SessionId::parse("c").unwrap();

        manager.converse(&a, "u1").await.unwrap();
        manager.converse(&b, "u2").await.unwrap();
        assert!(manager.history(&a).await.is_some());
        manager.converse(&c, "u3").await.unwrap();

        assert!(manager.history(&a).await.is_none());
        assert!(manager.history(&b).await.is_some());
        assert_eq!(manager.session_count().await, 2);
    }

    #[tokio::test]
    async fn last_part_of_last_candidate_wins() {
        let generator = Arc::new(ScriptedGenerator::default());
        generator.push(Ok(GenerationResponse {
            candidates: vec![
                Candidate::with_parts(vec![Part::text("A")]),
                Candidate::with_parts(vec![Part::text("B")]),
            ],
        }));
        let manager = manager(generator);

        let reply = manager.converse(&SessionId::shared(), "누구야?").await.unwrap();
        assert_eq!(reply.content, Part::text("B"));

        let history = manager.history(&SessionId::shared()).await.unwrap();
        assert_eq!(history.last().unwrap().parts, vec![Part::text("B")]);
    }

    #[tokio::test]
    async fn failed_call_leaves_history_untouched() {
        let generator = Arc::new(ScriptedGenerator::default());
        generator.push(Ok(reply("m1")));
        generator.push(Err(GenerationError::ApiError {
            status_code: 500,
            message: "boom".into(),
        }));
        generator.push(Ok(reply("m3")));
        let manager = manager(generator);
        let id = SessionId::shared();

        manager.converse(&id, "u1").await.unwrap();
        let before = manager.history(&id).await.unwrap().len();

        let err = manager.converse(&id, "u2").await.unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::ApiError { .. })));
        assert_eq!(err.class(), ErrorClass::Server);
        assert_eq!(manager.history(&id).await.unwrap().len(), before);

        manager.converse(&id, "u3").await.unwrap();
        let history = manager.history(&id).await.unwrap();
        assert_eq!(history.len(), before + 2);
        assert_eq!(history[before].text(), "u3");
    }

    #[tokio::test]
    async fn no_usable_candidate_is_no_result() {
        let generator = Arc::new(ScriptedGenerator::default());
        generator.push(Ok(GenerationResponse {
            candidates: vec![Candidate {
                content: None,
                finish_reason: Some("SAFETY".into()),
            }],
        }));
        let manager = manager(generator);

        let err = manager.converse(&SessionId::shared(), "hi").await.unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::NoResult)));
        assert_eq!(manager.history(&SessionId::shared()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_utterance_is_rejected_without_side_effects() {
        let generator = Arc::new(ScriptedGenerator::replying(&["unused"]));
        let manager = manager(generator.clone());

        for utterance in ["", "   \n"] {
            let err = manager.converse(&SessionId::shared(), utterance).await.unwrap_err();
            assert_eq!(err.class(), ErrorClass::Client);
        }
        assert!(generator.seen().is_empty());
        assert!(manager.history(&SessionId::shared()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_backend_times_out_without_mutation() {
        let generator = Arc::new(ScriptedGenerator {
            delay: Some(Duration::from_secs(600)),
            ..ScriptedGenerator::default()
        });
        generator.push(Ok(reply("too late")));
        let manager = manager(generator).with_timeout(Duration::from_secs(5));

        let err = manager.converse(&SessionId::shared(), "hi").await.unwrap_err();
        assert!(matches!(err, Error::Generation(GenerationError::Timeout(5))));
        assert_eq!(manager.history(&SessionId::shared()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sessions_do_not_interleave() {
        let generator = Arc::new(ScriptedGenerator::replying(&["a1", "b1", "a2"]));
        let manager = manager(generator);
        let alice = SessionId::parse("alice").unwrap();
        let bob = SessionId::parse("bob").unwrap();

        manager.converse(&alice, "hi from alice").await.unwrap();
        manager.converse(&bob, "hi from bob").await.unwrap();
        manager.converse(&alice, "again").await.unwrap();

        let alice_history = manager.history(&alice).await.unwrap();
        let bob_history = manager.history(&bob).await.unwrap();
        assert_eq!(alice_history.len(), 5);
        assert_eq!(bob_history.len(), 3);
        assert!(alice_history.iter().all(|t| t.text() != "hi from bob"));
        assert_eq!(manager.session_count().await, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_requests_seed_once() {
        let source = Arc::new(
            MemorySource::persona().with_delay(Duration::from_millis(20)),
        );
        let generator = Arc::new(ScriptedGenerator::default());
        for i in 0..8 {
            generator.push(Ok(reply(&format!("m{i}"))));
        }
        let manager = Arc::new(SessionManager::new(
            generator,
            PersonaCell::new(test_loader(source.clone())),
            SessionStore::new(HistoryPolicy::unbounded(), 100),
        ));

        let calls = (0..8).map(|i| {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .converse(&SessionId::shared(), &format!("u{i}"))
                    .await
            })
        });
        for result in futures::future::join_all(calls).await {
            result.unwrap().unwrap();
        }

        assert_eq!(source.reads.load(std::sync::atomic::Ordering::SeqCst), 2);
        let history = manager.history(&SessionId::shared()).await.unwrap();
        assert_eq!(history.len(), 1 + 8 * 2);
        assert_eq!(
            history.iter().filter(|t| t.role == Role::Persona).count(),
            1
        );
        assert_eq!(history[0].role, Role::Persona);
        // Every user turn is immediately followed by its model turn.
        for pair in history[1..].chunks(2) {
            assert_eq!(pair[0].role, Role::User);
            assert_eq!(pair[1].role, Role::Model);
        }
    }

    #[tokio::test]
    async fn persona_failure_fails_every_request() {
        let generator = Arc::new(ScriptedGenerator::replying(&["m1"]));
        let manager = SessionManager::new(
            generator.clone(),
            PersonaCell::new(PersonaLoader::from_config(&parley_config::PersonaConfig {
                script_path: "/nonexistent/script.txt".into(),
                ..Default::default()
            })),
            SessionStore::new(HistoryPolicy::unbounded(), 100),
        );

        assert!(manager.ensure_persona().await.is_err());
        let err = manager.converse(&SessionId::shared(), "hi").await.unwrap_err();
        assert!(matches!(err, Error::Persona(PersonaError::Unreadable { .. })));
        assert!(generator.seen().is_empty());
    }
}
