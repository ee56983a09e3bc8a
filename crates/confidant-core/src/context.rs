//! CompanionContext - the one entry point consumers talk to.
//!
//! Aggregates the connection, the entity store and the session lifecycle.
//! It adds no behaviour of its own: every method forwards to the component
//! that owns the state.
//!
//! ```text
//!                  ┌──────────────────────────┐
//!                  │     CompanionContext     │
//!                  ├──────────────────────────┤
//!                  │  - EventBus              │
//!                  │  - ConnectionManager     │
//!                  │  - EntityStore           │
//!                  │  - SessionManager        │
//!                  └────────────┬─────────────┘
//!                               │
//!             ┌─────────────────┴─────────────────┐
//!             ▼                                   ▼
//!      ┌──────────────┐                   ┌──────────────┐
//!      │ desktop shell│                   │    daemon    │
//!      └──────────────┘                   └──────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use tokio::sync::{broadcast, watch};

use crate::config::ConnectionConfig;
use crate::connection::{
    ChannelHandle, ConnectionManager, ConnectionState, ConnectionStatus, Transport,
    WebSocketTransport,
};
use crate::event_bus::{CompanionEvent, EventBus};
use crate::ids::EntityId;
use crate::managers::EntityStore;
use crate::paths;
use crate::persistence::{
    Conversation, Identity, JsonFileStore, Memory, MemoryDraft, MemoryPatch, Message,
    MessageDraft, PersistenceError, PersistencePort, Session, Settings, VoiceSample,
    VoiceSampleDraft,
};
use crate::session::SessionManager;

/// Configuration for building a [`CompanionContext`].
#[derive(Default)]
pub struct CompanionContextBuilder {
    data_dir: Option<PathBuf>,
    persistence: Option<Arc<dyn PersistencePort>>,
    event_bus: Option<Arc<EventBus>>,
    connection: Option<ConnectionConfig>,
    transport: Option<Arc<dyn Transport>>,
}

impl CompanionContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store collections as JSON files in `dir`.
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Use a specific persistence port. Takes precedence over `data_dir`.
    pub fn persistence(mut self, port: Arc<dyn PersistencePort>) -> Self {
        self.persistence = Some(port);
        self
    }

    /// Use an existing EventBus (for testing or custom configurations).
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.connection = Some(config);
        self
    }

    /// Use a specific transport instead of WebSockets.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the context, loading every collection.
    ///
    /// Without a port or data directory, `$HOME/.config/confidant` is used;
    /// failing to resolve it is the only error.
    pub fn build(self) -> Result<CompanionContext, PersistenceError> {
        let event_bus = self.event_bus.unwrap_or_else(|| Arc::new(EventBus::new()));

        let persistence: Arc<dyn PersistencePort> = match (self.persistence, self.data_dir) {
            (Some(port), _) => port,
            (None, Some(dir)) => Arc::new(JsonFileStore::new(dir)),
            (None, None) => {
                let dir = paths::default_data_dir().map_err(PersistenceError::Unavailable)?;
                info!("Using default data directory {}", dir.display());
                Arc::new(JsonFileStore::new(dir))
            }
        };

        let store = Arc::new(EntityStore::open(persistence, event_bus.clone()));
        let sessions = Arc::new(SessionManager::new(store.clone()));

        let config = self.connection.unwrap_or_default();
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport));
        let connection = Arc::new(ConnectionManager::new(&config, transport).with_events(event_bus.clone()));

        Ok(CompanionContext {
            event_bus,
            store,
            sessions,
            connection,
        })
    }
}

/// Central shared state for a companion client.
///
/// All fields use `Arc`, so cloning the context only clones pointers.
#[derive(Clone)]
pub struct CompanionContext {
    pub event_bus: Arc<EventBus>,
    pub store: Arc<EntityStore>,
    pub sessions: Arc<SessionManager>,
    pub connection: Arc<ConnectionManager>,
}

impl CompanionContext {
    pub fn builder() -> CompanionContextBuilder {
        CompanionContextBuilder::new()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CompanionEvent> {
        self.event_bus.subscribe()
    }

    // -- connection --

    /// Start connecting. Must be called from within a tokio runtime.
    pub fn connect(&self) {
        self.connection.connect();
    }

    pub fn teardown(&self) {
        self.connection.teardown();
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    pub fn connection_handle(&self) -> Option<ChannelHandle> {
        self.connection.handle()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_status()
    }

    // -- identity & settings --

    pub fn identity(&self) -> Identity {
        self.store.identity()
    }

    pub fn set_identity(&self, identity: Identity) {
        self.store.set_identity(identity);
    }

    pub fn settings(&self) -> Settings {
        self.store.settings()
    }

    pub fn set_settings(&self, settings: Settings) {
        self.store.set_settings(settings);
    }

    // -- memories & voice samples --

    pub fn memories(&self) -> Vec<Memory> {
        self.store.memories()
    }

    pub fn add_memory(&self, draft: MemoryDraft) -> Memory {
        self.store.add_memory(draft)
    }

    pub fn update_memory(&self, id: EntityId, patch: MemoryPatch) -> Option<Memory> {
        self.store.update_memory(id, patch)
    }

    pub fn delete_memory(&self, id: EntityId) -> bool {
        self.store.delete_memory(id)
    }

    pub fn voice_samples(&self) -> Vec<VoiceSample> {
        self.store.voice_samples()
    }

    pub fn add_voice_sample(&self, draft: VoiceSampleDraft) -> VoiceSample {
        self.store.add_voice_sample(draft)
    }

    pub fn delete_voice_sample(&self, id: EntityId) -> bool {
        self.store.delete_voice_sample(id)
    }

    // -- session & archive --

    pub fn current_session(&self) -> Session {
        self.sessions.current_session()
    }

    pub fn append_message(&self, draft: MessageDraft) -> Message {
        self.sessions.append_message(draft)
    }

    pub fn clear_session(&self, save_first: bool) -> Session {
        self.sessions.clear_session(save_first)
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.sessions.conversations()
    }

    pub fn save_conversation(&self, messages: Vec<Message>) -> Option<Conversation> {
        self.sessions.save_conversation(messages)
    }

    pub fn load_conversation(&self, id: EntityId) -> Option<Session> {
        self.sessions.load_conversation(id)
    }
}
