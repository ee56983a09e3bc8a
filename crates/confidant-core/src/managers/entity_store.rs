//! The six persisted collections.
//!
//! Identity and settings are whole-object values. Memories and voice samples
//! are id-keyed lists with add/update/delete. The current session and the
//! conversation archive live here too, but their lifecycle is driven by
//! [`SessionManager`](crate::session::SessionManager).

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;

use super::collection::{Collection, Persister};
use crate::event_bus::EventBus;
use crate::ids::{EntityId, IdGenerator};
use crate::persistence::{
    Conversation, Fallback, Identity, Memory, MemoryDraft, MemoryPatch, PersistencePort, Session,
    Settings, StoreKey, VoiceSample, VoiceSampleDraft,
};

/// Where each collection's initial value came from.
pub type LoadReport = BTreeMap<StoreKey, Option<Fallback>>;

/// In-memory state for every collection, mirrored to a persistence port.
pub struct EntityStore {
    ids: Arc<IdGenerator>,
    persister: Arc<Persister>,
    identity: Collection<Identity>,
    memories: Collection<Vec<Memory>>,
    voice_samples: Collection<Vec<VoiceSample>>,
    conversations: Collection<Vec<Conversation>>,
    current_session: Collection<Session>,
    settings: Collection<Settings>,
    load_report: LoadReport,
}

impl EntityStore {
    /// Load every collection from `port`.
    ///
    /// Never fails: a missing or corrupt snapshot starts that collection
    /// from its default and is recorded in [`EntityStore::load_report`].
    pub fn open(port: Arc<dyn PersistencePort>, events: Arc<EventBus>) -> Self {
        let persister = Arc::new(Persister::new(port, events));
        let ids = Arc::new(IdGenerator::new());
        let mut load_report = LoadReport::new();

        let (identity, fallback) =
            Collection::open(StoreKey::Identity, persister.clone(), Identity::default);
        load_report.insert(StoreKey::Identity, fallback);

        let (memories, fallback) =
            Collection::open(StoreKey::Memories, persister.clone(), Vec::new);
        load_report.insert(StoreKey::Memories, fallback);

        let (voice_samples, fallback) =
            Collection::open(StoreKey::VoiceSamples, persister.clone(), Vec::new);
        load_report.insert(StoreKey::VoiceSamples, fallback);

        let (conversations, fallback) =
            Collection::open(StoreKey::Conversations, persister.clone(), Vec::new);
        load_report.insert(StoreKey::Conversations, fallback);

        let (settings, fallback) =
            Collection::open(StoreKey::Settings, persister.clone(), Settings::default);
        load_report.insert(StoreKey::Settings, fallback);

        // Stored ids must never be handed out again.
        memories.read(|items: &Vec<Memory>| items.iter().for_each(|m| ids.observe(m.id)));
        voice_samples.read(|items: &Vec<VoiceSample>| items.iter().for_each(|v| ids.observe(v.id)));
        conversations.read(|items: &Vec<Conversation>| {
            for conversation in items {
                ids.observe(conversation.id);
                conversation.messages.iter().for_each(|m| ids.observe(m.id));
            }
        });

        let session_ids = ids.clone();
        let (current_session, fallback) =
            Collection::open(StoreKey::CurrentSession, persister.clone(), move || {
                Session::fresh(session_ids.next(), Utc::now())
            });
        current_session.read(|session: &Session| {
            ids.observe(session.id);
            session.messages.iter().for_each(|m| ids.observe(m.id));
        });
        load_report.insert(StoreKey::CurrentSession, fallback);

        let defaulted: Vec<_> = load_report
            .iter()
            .filter(|(_, fallback)| fallback.is_some())
            .map(|(key, _)| key.as_str())
            .collect();
        log::info!(
            "Entity store opened ({} of 6 collections from defaults: {:?})",
            defaulted.len(),
            defaulted
        );

        Self {
            ids,
            persister,
            identity,
            memories,
            voice_samples,
            conversations,
            current_session,
            settings,
            load_report,
        }
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.load_report
    }

    /// Number of snapshot writes that failed since the store was opened.
    pub fn write_failures(&self) -> u64 {
        self.persister.write_failures()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        self.persister.events()
    }

    pub(crate) fn ids(&self) -> &IdGenerator {
        &self.ids
    }

    pub(crate) fn conversations_collection(&self) -> &Collection<Vec<Conversation>> {
        &self.conversations
    }

    pub(crate) fn session_collection(&self) -> &Collection<Session> {
        &self.current_session
    }

    // ------------------------------------------------------------------
    // Identity & Settings
    // ------------------------------------------------------------------

    pub fn identity(&self) -> Identity {
        self.identity.get()
    }

    /// Trait weights are clamped into `[0, 1]`.
    pub fn set_identity(&self, identity: Identity) {
        self.identity.replace(identity.clamped());
    }

    pub fn settings(&self) -> Settings {
        self.settings.get()
    }

    pub fn set_settings(&self, settings: Settings) {
        self.settings.replace(settings);
    }

    // ------------------------------------------------------------------
    // Memories
    // ------------------------------------------------------------------

    pub fn memories(&self) -> Vec<Memory> {
        self.memories.get()
    }

    pub fn memory(&self, id: EntityId) -> Option<Memory> {
        self.memories
            .read(|items| items.iter().find(|m| m.id == id).cloned())
    }

    pub fn add_memory(&self, draft: MemoryDraft) -> Memory {
        let memory = Memory::from_draft(self.ids.next(), Utc::now(), draft);
        let added = memory.clone();
        self.memories.update(move |items| {
            items.push(memory);
            Some(())
        });
        log::debug!("Added memory {}", added.id);
        added
    }

    /// Returns the updated memory, or `None` if `id` is unknown.
    pub fn update_memory(&self, id: EntityId, patch: MemoryPatch) -> Option<Memory> {
        self.memories.update(|items| {
            let memory = items.iter_mut().find(|m| m.id == id)?;
            memory.apply(patch, Utc::now());
            Some(memory.clone())
        })
    }

    /// Returns whether a memory was removed.
    pub fn delete_memory(&self, id: EntityId) -> bool {
        self.memories
            .update(|items| {
                let before = items.len();
                items.retain(|m| m.id != id);
                (items.len() != before).then_some(())
            })
            .is_some()
    }

    // ------------------------------------------------------------------
    // Voice samples
    // ------------------------------------------------------------------

    pub fn voice_samples(&self) -> Vec<VoiceSample> {
        self.voice_samples.get()
    }

    pub fn add_voice_sample(&self, draft: VoiceSampleDraft) -> VoiceSample {
        let sample = VoiceSample::from_draft(self.ids.next(), Utc::now(), draft);
        let added = sample.clone();
        self.voice_samples.update(move |items| {
            items.push(sample);
            Some(())
        });
        log::debug!("Added voice sample {}", added.id);
        added
    }

    pub fn delete_voice_sample(&self, id: EntityId) -> bool {
        self.voice_samples
            .update(|items| {
                let before = items.len();
                items.retain(|v| v.id != id);
                (items.len() != before).then_some(())
            })
            .is_some()
    }
}

// ============================================================================
// TESTS
// ============================================================================
