//! SessionManager - the single active session and its archive.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;

use super::archive::{build_conversation, prepend_capped};
use crate::event_bus::CompanionEvent;
use crate::ids::EntityId;
use crate::managers::EntityStore;
use crate::persistence::{Conversation, Message, MessageDraft, Session};

/// Owns the active-session lifecycle on top of an [`EntityStore`].
///
/// There is always exactly one active session. Replacing it (clear or load)
/// archives it first when it has messages, unless the caller opts out.
/// Lifecycle operations run under one lock so a clear can't interleave
/// with a load.
pub struct SessionManager {
    store: Arc<EntityStore>,
    lifecycle: Mutex<()>,
}

impl SessionManager {
    pub fn new(store: Arc<EntityStore>) -> Self {
        Self {
            store,
            lifecycle: Mutex::new(()),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, ()> {
        self.lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_session(&self) -> Session {
        self.store.session_collection().get()
    }

    /// Archived conversations, newest first.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.store.conversations_collection().get()
    }

    pub fn conversation(&self, id: EntityId) -> Option<Conversation> {
        self.store
            .conversations_collection()
            .read(|items| items.iter().find(|c| c.id == id).cloned())
    }

    /// Append to the active session. The archive is not touched.
    pub fn append_message(&self, draft: MessageDraft) -> Message {
        let _guard = self.lifecycle();
        let message = draft.with_id(self.store.ids().next());
        let appended = message.clone();
        self.store.session_collection().update(move |session| {
            session.messages.push(message);
            Some(())
        });
        appended
    }

    /// Archive `messages` as a new conversation at the front of the archive.
    ///
    /// Does nothing for an empty list. The archive keeps the 50 newest
    /// entries; older ones are dropped.
    pub fn save_conversation(&self, messages: Vec<Message>) -> Option<Conversation> {
        let _guard = self.lifecycle();
        self.archive(messages)
    }

    fn archive(&self, messages: Vec<Message>) -> Option<Conversation> {
        if messages.is_empty() {
            return None;
        }

        let conversation = build_conversation(self.store.ids().next(), Utc::now(), messages);
        let archived = conversation.clone();
        self.store.conversations_collection().update(move |items| {
            let evicted = prepend_capped(items, conversation);
            if evicted > 0 {
                log::debug!("Archive full, dropped {evicted} oldest conversation(s)");
            }
            Some(())
        });

        log::info!(
            "Archived conversation {} ({} messages)",
            archived.id,
            archived.message_count
        );
        Some(archived)
    }

    /// Replace the active session with a fresh empty one.
    ///
    /// With `save_first`, a non-empty session is archived before it is
    /// replaced.
    pub fn clear_session(&self, save_first: bool) -> Session {
        let _guard = self.lifecycle();

        let archived_as = if save_first {
            let outgoing = self.store.session_collection().read(|s| s.messages.clone());
            self.archive(outgoing).map(|c| c.id)
        } else {
            None
        };

        let fresh = Session::fresh(self.store.ids().next(), Utc::now());
        self.replace_session(fresh.clone(), archived_as);
        fresh
    }

    /// Resume an archived conversation as the active session.
    ///
    /// Unknown ids are a no-op returning `None`. A non-empty active session
    /// is archived first. The archive entry itself is left as it was.
    pub fn load_conversation(&self, id: EntityId) -> Option<Session> {
        let _guard = self.lifecycle();

        // Look up before archiving: archiving may evict the target.
        let source = self
            .store
            .conversations_collection()
            .read(|items| items.iter().find(|c| c.id == id).cloned());
        let Some(source) = source else {
            log::debug!("No archived conversation {id}, nothing to load");
            return None;
        };

        let outgoing = self.store.session_collection().read(|s| s.messages.clone());
        let archived_as = self.archive(outgoing).map(|c| c.id);

        let resumed = Session {
            id: self.store.ids().next(),
            messages: source.messages,
            started_at: source.created_at,
            loaded_from: Some(id),
        };
        self.replace_session(resumed.clone(), archived_as);
        Some(resumed)
    }

    fn replace_session(&self, session: Session, archived_as: Option<EntityId>) {
        let event = CompanionEvent::SessionReplaced {
            session_id: session.id,
            archived_as,
            loaded_from: session.loaded_from,
        };
        self.store.session_collection().replace(session);
        self.store.events().emit(event);
    }
}

// ============================================================================
// TESTS
// ============================================================================
