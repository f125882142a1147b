//! Session lifecycle: history load, auto-creation and turn persistence.
//!
//! State machine:
//! - Unbound -> Creating (first exchange complete, no creation in flight)
//! - Creating -> Bound (session created; both turns persisted in order)
//! - Creating -> Unbound (creation failed; re-evaluated on the next trigger)
//!
//! All persistence work runs on one writer task fed by an ordered queue, so
//! appends land in submission order while callers never wait on storage.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, oneshot};

use confab_core::events::{ChatEvent, NoticeLevel};
use confab_core::persistence::PersistenceService;
use confab_core::types::{title_from_seed, NewTurn, Session, SessionId, Turn};

use crate::error::ChatError;

/// Callback that receives lifecycle events.
pub type EventSink = Arc<dyn Fn(ChatEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unbound,
    Creating,
    Bound(SessionId),
}

#[derive(Debug)]
enum PersistJob {
    /// Adopt an existing session id for later appends.
    Bind(SessionId),
    Create { title: String, turns: [Turn; 2] },
    Append(Turn),
    Flush(oneshot::Sender<()>),
}

pub struct SessionLifecycle {
    persistence: Arc<dyn PersistenceService>,
    status: Arc<Mutex<SessionStatus>>,
    sink: EventSink,
    jobs: mpsc::UnboundedSender<PersistJob>,
}

impl SessionLifecycle {
    /// Create the manager and start its writer task.
    pub fn spawn(persistence: Arc<dyn PersistenceService>, sink: EventSink) -> Self {
        let status = Arc::new(Mutex::new(SessionStatus::Unbound));
        let (jobs, queue) = mpsc::unbounded_channel();

        tokio::spawn(run_writer(
            persistence.clone(),
            status.clone(),
            sink.clone(),
            queue,
        ));

        Self {
            persistence,
            status,
            sink,
            jobs,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionStatus> {
        lock_status(&self.status)
    }

    pub fn status(&self) -> SessionStatus {
        *self.lock()
    }

    fn submit(&self, job: PersistJob) {
        if self.jobs.send(job).is_err() {
            tracing::error!("Persistence writer has stopped; job dropped");
        }
    }

    /// Load the persisted turns of `session_id`, oldest first.
    ///
    /// `None` means a fresh conversation: no storage call is made. A given
    /// id is bound even when the fetch fails, so later turns still land in
    /// that session.
    pub async fn load(&self, session_id: Option<SessionId>) -> Result<Vec<Turn>, ChatError> {
        let Some(id) = session_id else {
            return Ok(Vec::new());
        };

        *self.lock() = SessionStatus::Bound(id);
        self.submit(PersistJob::Bind(id));

        let stored = self
            .persistence
            .list_turns(id)
            .await
            .map_err(|e| ChatError::Fetch(e.to_string()))?;

        tracing::info!(session_id = %id, turns = stored.len(), "Loaded history");
        Ok(stored.into_iter().map(Turn::from).collect())
    }

    /// Start session creation for the first exchange.
    ///
    /// Returns true only for the call that moved the session from Unbound
    /// to Creating; every other call is a no-op.
    pub fn ensure_created(&self, first: &Turn, second: &Turn) -> bool {
        {
            let mut status = self.lock();
            if *status != SessionStatus::Unbound {
                return false;
            }
            *status = SessionStatus::Creating;
        }

        let title = title_from_seed(&first.content);
        tracing::info!(title = %title, "Creating session");
        (self.sink)(ChatEvent::SessionCreating);
        self.submit(PersistJob::Create {
            title,
            turns: [first.clone(), second.clone()],
        });
        true
    }

    /// Queue `turn` for persistence. Turns of an unbound session are left to
    /// the creation path; returns whether the turn was queued.
    pub fn persist_turn(&self, turn: &Turn) -> bool {
        match self.status() {
            SessionStatus::Unbound => false,
            SessionStatus::Creating | SessionStatus::Bound(_) => {
                self.submit(PersistJob::Append(turn.clone()));
                true
            }
        }
    }

    /// Wait for every job queued so far.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.submit(PersistJob::Flush(tx));
        let _ = rx.await;
    }
}

fn lock_status(status: &Mutex<SessionStatus>) -> MutexGuard<'_, SessionStatus> {
    status.lock().unwrap_or_else(|p| p.into_inner())
}

async fn run_writer(
    persistence: Arc<dyn PersistenceService>,
    status: Arc<Mutex<SessionStatus>>,
    sink: EventSink,
    mut queue: mpsc::UnboundedReceiver<PersistJob>,
) {
    let mut bound: Option<SessionId> = None;

    while let Some(job) = queue.recv().await {
        match job {
            PersistJob::Bind(id) => bound = Some(id),
            PersistJob::Create { title, turns } => match persistence.create_session(&title).await {
                Ok(record) => {
                    let id = record.id;
                    bound = Some(id);
                    *lock_status(&status) = SessionStatus::Bound(id);
                    tracing::info!(session_id = %id, "Session created");
                    sink(ChatEvent::SessionBound {
                        session: Session::from(record),
                    });
                    for turn in &turns {
                        append(&*persistence, &sink, id, turn).await;
                    }
                }
                Err(e) => {
                    *lock_status(&status) = SessionStatus::Unbound;
                    tracing::warn!(error = %e, "Session creation failed");
                    sink(ChatEvent::SessionCreationFailed {
                        reason: e.to_string(),
                    });
                    sink(ChatEvent::Notice {
                        level: NoticeLevel::Error,
                        message: format!("Could not save this conversation: {}", e),
                    });
                }
            },
            PersistJob::Append(turn) => match bound {
                Some(id) => append(&*persistence, &sink, id, &turn).await,
                None => {
                    tracing::warn!(turn_id = %turn.id, "No session bound; turn not persisted");
                }
            },
            PersistJob::Flush(done) => {
                let _ = done.send(());
            }
        }
    }

    tracing::debug!("Persistence writer stopped");
}

async fn append(
    persistence: &dyn PersistenceService,
    sink: &EventSink,
    session_id: SessionId,
    turn: &Turn,
) {
    match persistence
        .append_turn(session_id, NewTurn::from(turn), turn.attachments.clone())
        .await
    {
        Ok(stored) => {
            tracing::debug!(session_id = %session_id, turn_id = %stored.id, "Turn persisted");
        }
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to persist turn");
            sink(ChatEvent::Notice {
                level: NoticeLevel::Warning,
                message: format!("Failed to save message: {}", e),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use confab_core::error::{ConfabError, Result};
    use confab_core::types::{Attachment, Role, SessionRecord, StoredTurn, TurnId};

    #[derive(Default)]
    struct FakeStore {
        creates: AtomicUsize,
        fail_create: AtomicBool,
        fail_append: AtomicBool,
        fail_list: bool,
        appended: Mutex<Vec<(SessionId, NewTurn)>>,
        history: Vec<StoredTurn>,
    }

    #[async_trait]
    impl PersistenceService for FakeStore {
        async fn list_turns(&self, _session_id: SessionId) -> Result<Vec<StoredTurn>> {
            if self.fail_list {
                return Err(ConfabError::Http("unreachable".into()));
            }
            Ok(self.history.clone())
        }

        async fn create_session(&self, title: &str) -> Result<SessionRecord> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create.load(Ordering::SeqCst) {
                return Err(ConfabError::Storage("down".into()));
            }
            Ok(SessionRecord {
                id: SessionId::new(),
                title: title.to_string(),
                user_id: "u".into(),
                created_at: Utc::now(),
            })
        }

        async fn append_turn(
            &self,
            session_id: SessionId,
            turn: NewTurn,
            _attachments: Vec<Attachment>,
        ) -> Result<StoredTurn> {
            if self.fail_append.load(Ordering::SeqCst) {
                return Err(ConfabError::Storage("disk full".into()));
            }
            self.appended.lock().unwrap().push((session_id, turn.clone()));
            Ok(StoredTurn {
                id: TurnId::new(),
                session_id,
                role: turn.role,
                content: turn.content,
                attachments: None,
                metadata: None,
                created_at: Utc::now(),
            })
        }
    }

    fn collecting_sink() -> (EventSink, Arc<Mutex<Vec<ChatEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let captured = events.clone();
        let sink: EventSink = Arc::new(move |event| captured.lock().unwrap().push(event));
        (sink, events)
    }

    fn exchange() -> (Turn, Turn) {
        let user = Turn::user("hello", vec![]);
        let mut assistant = Turn::assistant();
        assistant.content = "hi there".into();
        (user, assistant)
    }

    // =========================================================================
    // load
    // =========================================================================

    #[tokio::test]
    async fn test_load_none_is_empty_without_fetch() {
        let store = Arc::new(FakeStore {
            fail_list: true,
            ..FakeStore::default()
        });
        let (sink, _) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store, sink);

        let turns = lifecycle.load(None).await.unwrap();
        assert!(turns.is_empty());
        assert_eq!(lifecycle.status(), SessionStatus::Unbound);
    }

    #[tokio::test]
    async fn test_load_maps_stored_turns() {
        let id = SessionId::new();
        let store = Arc::new(FakeStore {
            history: vec![StoredTurn {
                id: TurnId::new(),
                session_id: id,
                role: Role::User,
                content: "old".into(),
                attachments: None,
                metadata: None,
                created_at: Utc::now(),
            }],
            ..FakeStore::default()
        });
        let (sink, _) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store, sink);

        let turns = lifecycle.load(Some(id)).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "old");
        assert!(turns[0].attachments.is_empty());
        assert_eq!(lifecycle.status(), SessionStatus::Bound(id));
    }

    #[tokio::test]
    async fn test_load_failure_is_fetch_error() {
        let store = Arc::new(FakeStore {
            fail_list: true,
            ..FakeStore::default()
        });
        let (sink, _) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store, sink);

        let result = lifecycle.load(Some(SessionId::new())).await;
        assert!(matches!(result, Err(ChatError::Fetch(_))));
    }

    // =========================================================================
    // Creation
    // =========================================================================

    #[tokio::test]
    async fn test_create_persists_both_turns_in_order() {
        let store = Arc::new(FakeStore::default());
        let (sink, events) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store.clone(), sink);

        let (user, assistant) = exchange();
        assert!(lifecycle.ensure_created(&user, &assistant));
        lifecycle.flush().await;

        assert!(matches!(lifecycle.status(), SessionStatus::Bound(_)));
        let appended = store.appended.lock().unwrap();
        let contents: Vec<&str> = appended.iter().map(|(_, t)| t.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hi there"]);

        let events = events.lock().unwrap();
        assert_eq!(events[0], ChatEvent::SessionCreating);
        match &events[1] {
            ChatEvent::SessionBound { session } => assert_eq!(session.title, "hello"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ensure_created_runs_once() {
        let store = Arc::new(FakeStore::default());
        let (sink, _) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store.clone(), sink);

        let (user, assistant) = exchange();
        assert!(lifecycle.ensure_created(&user, &assistant));
        assert!(!lifecycle.ensure_created(&user, &assistant));
        lifecycle.flush().await;
        assert!(!lifecycle.ensure_created(&user, &assistant));

        assert_eq!(store.creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_returns_to_unbound_and_can_retry() {
        let store = Arc::new(FakeStore::default());
        store.fail_create.store(true, Ordering::SeqCst);
        let (sink, events) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store.clone(), sink);

        let (user, assistant) = exchange();
        lifecycle.ensure_created(&user, &assistant);
        lifecycle.flush().await;
        assert_eq!(lifecycle.status(), SessionStatus::Unbound);
        assert!(events
            .lock()
            .unwrap()
            .iter()
            .any(|e| matches!(e, ChatEvent::SessionCreationFailed { .. })));
        assert!(store.appended.lock().unwrap().is_empty());

        store.fail_create.store(false, Ordering::SeqCst);
        assert!(lifecycle.ensure_created(&user, &assistant));
        lifecycle.flush().await;
        assert!(matches!(lifecycle.status(), SessionStatus::Bound(_)));
        assert_eq!(store.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_title_truncated_to_100_chars() {
        let store = Arc::new(FakeStore::default());
        let (sink, events) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store, sink);

        let user = Turn::user("x".repeat(250), vec![]);
        lifecycle.ensure_created(&user, &Turn::assistant());
        lifecycle.flush().await;

        let events = events.lock().unwrap();
        let title = events.iter().find_map(|e| match e {
            ChatEvent::SessionBound { session } => Some(session.title.clone()),
            _ => None,
        });
        assert_eq!(title.unwrap().len(), 100);
    }

    // =========================================================================
    // Appends
    // =========================================================================

    #[tokio::test]
    async fn test_persist_turn_skipped_while_unbound() {
        let store = Arc::new(FakeStore::default());
        let (sink, _) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store.clone(), sink);

        assert!(!lifecycle.persist_turn(&Turn::user("hi", vec![])));
        lifecycle.flush().await;
        assert!(store.appended.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_append_warns_and_later_appends_continue() {
        let store = Arc::new(FakeStore::default());
        let (sink, events) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store.clone(), sink);

        let (user, assistant) = exchange();
        lifecycle.ensure_created(&user, &assistant);
        lifecycle.flush().await;
        let bound = lifecycle.status();

        store.fail_append.store(true, Ordering::SeqCst);
        assert!(lifecycle.persist_turn(&Turn::user("lost", vec![])));
        lifecycle.flush().await;

        assert_eq!(lifecycle.status(), bound);
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            ChatEvent::Notice {
                level: NoticeLevel::Warning,
                ..
            }
        )));

        store.fail_append.store(false, Ordering::SeqCst);
        assert!(lifecycle.persist_turn(&Turn::user("next", vec![])));
        assert!(lifecycle.persist_turn(&Turn::user("after", vec![])));
        lifecycle.flush().await;

        let appended = store.appended.lock().unwrap();
        let contents: Vec<&str> = appended.iter().map(|(_, t)| t.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hi there", "next", "after"]);
    }

    #[tokio::test]
    async fn test_appends_after_creation_follow_queue_order() {
        let store = Arc::new(FakeStore::default());
        let (sink, _) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store.clone(), sink);

        let (user, assistant) = exchange();
        lifecycle.ensure_created(&user, &assistant);
        // Queued while creation is still in flight.
        assert!(lifecycle.persist_turn(&Turn::user("third", vec![])));
        lifecycle.flush().await;

        let appended = store.appended.lock().unwrap();
        let contents: Vec<&str> = appended.iter().map(|(_, t)| t.content.as_str()).collect();
        assert_eq!(contents, vec!["hello", "hi there", "third"]);
        assert!(appended.iter().all(|(id, _)| *id == appended[0].0));
    }

    #[tokio::test]
    async fn test_persist_turn_on_loaded_session() {
        let id = SessionId::new();
        let store = Arc::new(FakeStore::default());
        let (sink, _) = collecting_sink();
        let lifecycle = SessionLifecycle::spawn(store.clone(), sink);

        lifecycle.load(Some(id)).await.unwrap();
        assert!(lifecycle.persist_turn(&Turn::user("next", vec![])));
        lifecycle.flush().await;

        let appended = store.appended.lock().unwrap();
        assert_eq!(appended.len(), 1);
        assert_eq!(appended[0].0, id);
    }
}
