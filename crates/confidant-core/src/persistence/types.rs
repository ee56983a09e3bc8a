//! Persisted data types.
//!
//! # Data Model Overview
//!
//! Each collection is stored as one whole JSON snapshot:
//!
//! ```text
//! ~/.config/confidant/
//! ├── identity.json          # Identity
//! ├── memories.json          # Vec<Memory>
//! ├── voice-samples.json     # Vec<VoiceSample>
//! ├── conversations.json     # Vec<Conversation>, newest first
//! ├── current-session.json   # Session
//! └── settings.json          # Settings
//! ```
//!
//! # Design Principles
//!
//! - **Whole snapshots**: every save rewrites the full collection
//! - **Forward compatibility**: unknown fields on memories, voice samples and
//!   messages survive a load/save cycle via a flattened `extra` map
//! - **camelCase on disk**: matches what the web frontend wrote historically

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::EntityId;

/// Open extension map for fields this crate doesn't know about.
pub type Extra = Map<String, Value>;

/// Fallback preview for conversations whose first message has no text.
pub const DEFAULT_PREVIEW: &str = "New conversation";

/// Maximum number of characters kept in a conversation preview.
pub const PREVIEW_CHARS: usize = 50;

// ============================================================================
// Identity
// ============================================================================

/// The companion's identity profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub name: String,

    pub system_prompt: String,

    /// Named weights, each in `[0, 1]`.
    #[serde(default)]
    pub traits: BTreeMap<String, f64>,
}

impl Identity {
    /// Clamp every trait weight into `[0, 1]`; NaN becomes 0.
    pub fn clamped(mut self) -> Self {
        for weight in self.traits.values_mut() {
            *weight = if weight.is_nan() {
                0.0
            } else {
                weight.clamp(0.0, 1.0)
            };
        }
        self
    }
}

impl Default for Identity {
    fn default() -> Self {
        let traits = [("warmth", 0.7), ("curiosity", 0.6), ("playfulness", 0.4)]
            .into_iter()
            .map(|(name, weight)| (name.to_string(), weight))
            .collect();

        Self {
            name: "Companion".to_string(),
            system_prompt: "You are a friendly, attentive companion.".to_string(),
            traits,
        }
    }
}

// ============================================================================
// Memories & Voice Samples
// ============================================================================

/// A long-term memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: EntityId,

    pub created_at: DateTime<Utc>,

    /// Set by every update; absent until the first one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Fields supplied when creating a memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryDraft {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl MemoryDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }
}

/// A partial update merged into an existing memory.
///
/// `None` leaves a field untouched. Keys in `extra` overwrite keys of the
/// same name; a `null` value removes the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPatch {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub importance: Option<f64>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl Memory {
    pub fn from_draft(id: EntityId, created_at: DateTime<Utc>, draft: MemoryDraft) -> Self {
        Self {
            id,
            created_at,
            updated_at: None,
            content: draft.content,
            category: draft.category,
            importance: draft.importance,
            extra: draft.extra,
        }
    }

    /// Merge `patch` and stamp `updated_at`.
    pub fn apply(&mut self, patch: MemoryPatch, now: DateTime<Utc>) {
        if let Some(content) = patch.content {
            self.content = Some(content);
        }
        if let Some(category) = patch.category {
            self.category = Some(category);
        }
        if let Some(importance) = patch.importance {
            self.importance = Some(importance);
        }
        for (key, value) in patch.extra {
            if value.is_null() {
                self.extra.remove(&key);
            } else {
                self.extra.insert(key, value);
            }
        }
        self.updated_at = Some(now);
    }
}

/// A recorded or uploaded voice sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSample {
    pub id: EntityId,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Where the audio lives (data URL, file path or remote URL).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,

    #[serde(flatten)]
    pub extra: Extra,
}

/// Fields supplied when adding a voice sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSampleDraft {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub duration_secs: Option<f64>,
    #[serde(flatten)]
    pub extra: Extra,
}

impl VoiceSample {
    pub fn from_draft(id: EntityId, created_at: DateTime<Utc>, draft: VoiceSampleDraft) -> Self {
        Self {
            id,
            created_at,
            name: draft.name,
            source: draft.source,
            duration_secs: draft.duration_secs,
            extra: draft.extra,
        }
    }
}

// ============================================================================
// Messages, Sessions & Conversations
// ============================================================================

/// A single message. Role and content are opaque to this crate: any JSON
/// value is kept as-is, only text content feeds the archive preview.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: EntityId,

    #[serde(default)]
    pub role: Value,

    #[serde(default)]
    pub content: Value,

    #[serde(flatten)]
    pub extra: Extra,
}

impl Message {
    /// The content, when it is plain text.
    pub fn text(&self) -> Option<&str> {
        self.content.as_str()
    }
}

/// A message before it has been given an id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDraft {
    #[serde(default)]
    pub role: Value,
    #[serde(default)]
    pub content: Value,
    #[serde(flatten)]
    pub extra: Extra,
}

impl MessageDraft {
    pub fn new(role: impl Into<Value>, content: impl Into<Value>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            extra: Extra::new(),
        }
    }

    pub fn with_id(self, id: EntityId) -> Message {
        Message {
            id,
            role: self.role,
            content: self.content,
            extra: self.extra,
        }
    }
}

/// The active conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: EntityId,

    #[serde(default)]
    pub messages: Vec<Message>,

    pub started_at: DateTime<Utc>,

    /// Archive entry this session was resumed from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loaded_from: Option<EntityId>,
}

impl Session {
    pub fn fresh(id: EntityId, started_at: DateTime<Utc>) -> Self {
        Self {
            id,
            messages: Vec::new(),
            started_at,
            loaded_from: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// An archived session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: EntityId,

    pub created_at: DateTime<Utc>,

    pub preview: String,

    pub message_count: usize,

    #[serde(default)]
    pub messages: Vec<Message>,
}

/// First [`PREVIEW_CHARS`] characters of the first message, or
/// [`DEFAULT_PREVIEW`] when it is empty or not plain text.
pub fn conversation_preview(messages: &[Message]) -> String {
    let preview: String = messages
        .first()
        .and_then(Message::text)
        .map(|text| text.chars().take(PREVIEW_CHARS).collect())
        .unwrap_or_default();

    if preview.is_empty() {
        DEFAULT_PREVIEW.to_string()
    } else {
        preview
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Provider/model selection, credential and feature flags.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub provider: String,

    #[serde(default)]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default)]
    pub features: BTreeMap<String, bool>,
}

impl Settings {
    /// Unknown flags read as disabled.
    pub fn is_enabled(&self, feature: &str) -> bool {
        self.features.get(feature).copied().unwrap_or(false)
    }
}

impl std::fmt::Debug for Settings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Settings")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("features", &self.features)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
