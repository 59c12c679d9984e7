//! Conversation history and the per-session registry.
//!
//! A [`ConversationHistory`] is an append-only log that starts with the
//! persona turn. The only removal is the sliding window in [`HistoryPolicy`],
//! which drops the oldest user/model pairs and never the persona turn.
//!
//! Locks here are `std::sync::Mutex` and are never held across an `.await`.

use parley_config::HistoryConfig;
use parley_core::message::{Role, SessionId, Turn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("History is already seeded with a persona turn")]
    AlreadySeeded,

    #[error("Seed turn must have the persona role, got {0:?}")]
    NotPersona(Role),
}

/// Bound on retained turns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryPolicy {
    /// Non-persona turns kept. `None` = unbounded.
    pub max_turns: Option<usize>,
}

impl HistoryPolicy {
    pub fn unbounded() -> Self {
        Self { max_turns: None }
    }

    /// Keep at most `max_turns` turns after the persona turn. Turns are dropped
    /// in user/model pairs, so `max_turns` should be even; config validation
    /// rejects odd values.
    pub fn window(max_turns: usize) -> Self {
        Self {
            max_turns: Some(max_turns),
        }
    }
}

impl From<&HistoryConfig> for HistoryPolicy {
    fn from(config: &HistoryConfig) -> Self {
        Self {
            max_turns: config.turn_limit(),
        }
    }
}

#[derive(Debug, Default)]
struct Log {
    turns: Vec<Arc<Turn>>,
    seeded: bool,
}

/// Ordered turns of one conversation.
#[derive(Debug, Default)]
pub struct ConversationHistory {
    log: Mutex<Log>,
    policy: HistoryPolicy,
}

impl ConversationHistory {
    pub fn new(policy: HistoryPolicy) -> Self {
        Self {
            log: Mutex::new(Log::default()),
            policy,
        }
    }

    /// A history whose first element is `persona`.
    pub fn seeded(persona: Turn, policy: HistoryPolicy) -> Result<Self, HistoryError> {
        let history = Self::new(policy);
        history.seed(persona)?;
        Ok(history)
    }

    /// Install the persona turn as element 0. Seeding twice is an error.
    pub fn seed(&self, persona: Turn) -> Result<(), HistoryError> {
        if persona.role != Role::Persona {
            return Err(HistoryError::NotPersona(persona.role));
        }
        let mut log = self.lock();
        if log.seeded {
            return Err(HistoryError::AlreadySeeded);
        }
        log.turns.insert(0, Arc::new(persona));
        log.seeded = true;
        Ok(())
    }

    /// Add one turn at the end.
    pub fn append(&self, turn: Turn) {
        let mut log = self.lock();
        log.turns.push(Arc::new(turn));
        self.enforce(&mut log);
    }

    /// Add a user turn and its reply under one lock, so no snapshot sees half an exchange.
    pub fn append_exchange(&self, user: Turn, model: Turn) -> usize {
        let mut log = self.lock();
        log.turns.push(Arc::new(user));
        log.turns.push(Arc::new(model));
        self.enforce(&mut log);
        log.turns.len()
    }

    /// Every turn currently held, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Turn>> {
        self.lock().turns.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().turns.is_empty()
    }

    pub fn is_seeded(&self) -> bool {
        self.lock().seeded
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop the oldest pairs after the persona turn until within bound.
    fn enforce(&self, log: &mut Log) {
        let Some(max) = self.policy.max_turns else {
            return;
        };
        let head = usize::from(log.seeded);
        let mut evicted = 0;
        while log.turns.len() - head > max {
            let drop = 2.min(log.turns.len() - head);
            log.turns.drain(head..head + drop);
            evicted += drop;
        }
        if evicted > 0 {
            debug!(evicted, remaining = log.turns.len(), "History window trimmed");
        }
    }
}

struct Entry {
    history: Arc<ConversationHistory>,
    last_used: AtomicU64,
}

/// Conversations keyed by session id, with least-recently-used eviction.
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Entry>>,
    policy: HistoryPolicy,
    max_sessions: usize,
    clock: AtomicU64,
}

impl SessionStore {
    pub fn new(policy: HistoryPolicy, max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
            max_sessions: max_sessions.max(1),
            clock: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::new(HistoryPolicy::from(config), config.max_sessions)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Existing history for `id`, if any.
    pub async fn get(&self, id: &SessionId) -> Option<Arc<ConversationHistory>> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|entry| {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            entry.history.clone()
        })
    }

    /// Existing history for `id` without refreshing its recency.
    pub async fn peek(&self, id: &SessionId) -> Option<Arc<ConversationHistory>> {
        self.sessions
            .read()
            .await
            .get(id)
            .map(|entry| entry.history.clone())
    }

    /// History for `id`, created and seeded with `persona` on first use.
    pub async fn get_or_create(
        &self,
        id: &SessionId,
        persona: impl FnOnce() -> Turn,
    ) -> Result<Arc<ConversationHistory>, HistoryError> {
        if let Some(history) = self.get(id).await {
            return Ok(history);
        }

        let mut sessions = self.sessions.write().await;

        // Another task may have created it while we waited for the write lock.
        if let Some(entry) = sessions.get(id) {
            entry.last_used.store(self.tick(), Ordering::Relaxed);
            return Ok(entry.history.clone());
        }

        if sessions.len() >= self.max_sessions {
            if let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.last_used.load(Ordering::Relaxed))
                .map(|(key, _)| key.clone())
            {
                sessions.remove(&oldest);
                info!(session = %oldest, "Evicted least recently used session");
            }
        }

        let history = Arc::new(ConversationHistory::seeded(persona(), self.policy)?);
        sessions.insert(
            id.clone(),
            Entry {
                history: history.clone(),
                last_used: AtomicU64::new(self.tick()),
            },
        );
        info!(session = %id, live_sessions = sessions.len(), "Session created");
        Ok(history)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    pub async fn contains(&self, id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::message::Part;

    fn persona() -> Turn {
        Turn::new(Role::Persona, vec![Part::text("persona")])
    }

    fn texts(history: &ConversationHistory) -> Vec<String> {
        history.snapshot().iter().map(|t| t.text()).collect()
    }

    #[test]
    fn persona_stays_first() {
        let history = ConversationHistory::seeded(persona(), HistoryPolicy::unbounded()).unwrap();
        history.append_exchange(Turn::user("u1"), Turn::model(Part::text("m1")));
        history.append(Turn::user("u2"));

        assert_eq!(texts(&history), vec!["persona", "u1", "m1", "u2"]);
        assert_eq!(history.snapshot()[0].role, Role::Persona);
    }

    #[test]
    fn seeding_twice_is_an_error() {
        let history = ConversationHistory::new(HistoryPolicy::unbounded());
        assert!(!history.is_seeded());
        history.seed(persona()).unwrap();
        assert_eq!(history.seed(persona()), Err(HistoryError::AlreadySeeded));
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn seed_requires_persona_role() {
        let history = ConversationHistory::new(HistoryPolicy::unbounded());
        assert_eq!(
            history.seed(Turn::user("hi")),
            Err(HistoryError::NotPersona(Role::User))
        );
        assert!(history.is_empty());
    }

    #[test]
    fn snapshot_is_detached_from_later_appends() {
        let history = ConversationHistory::seeded(persona(), HistoryPolicy::unbounded()).unwrap();
        let before = history.snapshot();
        history.append_exchange(Turn::user("u1"), Turn::model(Part::text("m1")));
        assert_eq!(before.len(), 1);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn window_drops_oldest_pairs_but_keeps_persona() {
        let history = ConversationHistory::seeded(persona(), HistoryPolicy::window(4)).unwrap();
        for i in 1..=4 {
            history.append_exchange(
                Turn::user(format!("u{i}")),
                Turn::model(Part::text(format!("m{i}"))),
            );
        }
        assert_eq!(texts(&history), vec!["persona", "u3", "m3", "u4", "m4"]);
    }

    #[test]
    fn smallest_window_keeps_latest_exchange() {
        let history = ConversationHistory::seeded(persona(), HistoryPolicy::window(2)).unwrap();
        for i in 1..=3 {
            history.append_exchange(
                Turn::user(format!("u{i}")),
                Turn::model(Part::text(format!("m{i}"))),
            );
        }
        assert_eq!(texts(&history), vec!["persona", "u3", "m3"]);
    }

    #[test]
    fn policy_from_config() {
        let mut config = HistoryConfig::default();
        assert_eq!(HistoryPolicy::from(&config), HistoryPolicy::window(200));
        config.max_turns = 0;
        assert_eq!(HistoryPolicy::from(&config), HistoryPolicy::unbounded());
    }

    #[tokio::test]
    async fn store_creates_once_per_session() {
        let store = SessionStore::new(HistoryPolicy::unbounded(), 10);
        let id = SessionId::shared();

        let a = store.get_or_create(&id, persona).await.unwrap();
        let b = store
            .get_or_create(&id, || panic!("must not seed an existing session"))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len().await, 1);
        assert!(store.get(&SessionId::new()).await.is_none());
    }

    #[tokio::test]
    async fn store_evicts_least_recently_used() {
        let store = SessionStore::new(HistoryPolicy::unbounded(), 2);
        let a = SessionId::parse("a").unwrap();
        let b = SessionId::parse("b").unwrap();
        let c = SessionId::parse("c").unwrap();

        store.get_or_create(&a, persona).await.unwrap();
        store.get_or_create(&b, persona).await.unwrap();
        // Touch `a` so `b` becomes the oldest.
        store.get(&a).await.unwrap();
        store.get_or_create(&c, persona).await.unwrap();

        assert!(store.contains(&a).await);
        assert!(!store.contains(&b).await);
        assert!(store.contains(&c).await);
    }

    #[tokio::test]
    async fn peek_leaves_recency_alone() {
        let store = SessionStore::new(HistoryPolicy::unbounded(), 2);
        let a = SessionId::parse("a").unwrap();
        let b = SessionId::parse("b").unwrap();
        let c = SessionId::parse("c").unwrap();

        store.get_or_create(&a, persona).await.unwrap();
        store.get_or_create(&b, persona).await.unwrap();
        // Inspecting `a` must not save it from eviction.
        assert!(store.peek(&a).await.is_some());
        store.get_or_create(&c, persona).await.unwrap();

        assert!(!store.contains(&a).await);
        assert!(store.contains(&b).await);
        assert!(store.peek(&a).await.is_none());
    }
}
