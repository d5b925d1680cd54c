//! Active-state store: owns every character's state record and persists the
//! whole mapping to settings storage.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::database::SettingsStorage;

/// Sentinel state name for the free-text custom state.
pub const CUSTOM_STATE: &str = "CustomState";

/// Default key the persisted blob lives under.
pub const DEFAULT_SETTINGS_KEY: &str = "state_coordinator";

/// Active states and custom text for one character.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacterStateRecord {
    pub active_states: BTreeSet<String>,
    /// Only meaningful while [`CUSTOM_STATE`] is active.
    pub custom_state_text: String,
}

impl CharacterStateRecord {
    pub fn is_empty(&self) -> bool {
        self.active_states.is_empty()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.active_states.contains(name)
    }

    pub fn has_custom_state(&self) -> bool {
        self.is_active(CUSTOM_STATE)
    }

    /// Remove a state, clearing the custom text along with the sentinel.
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.active_states.remove(name);
        if removed && name == CUSTOM_STATE {
            self.custom_state_text.clear();
        }
        removed
    }

    pub fn set_custom_state(&mut self, text: impl Into<String>) {
        self.custom_state_text = text.into();
        self.active_states.insert(CUSTOM_STATE.to_string());
    }
}

/// Settings-blob shape of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedMemory {
    #[serde(default)]
    pub active_states: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub custom_states: BTreeMap<String, String>,
}

impl PersistedMemory {
    pub fn from_records(records: &BTreeMap<String, CharacterStateRecord>) -> Self {
        let mut memory = Self::default();
        for (character_id, record) in records {
            if record.is_empty() {
                continue;
            }
            memory.active_states.insert(
                character_id.clone(),
                record.active_states.iter().cloned().collect(),
            );
            if record.has_custom_state() && !record.custom_state_text.is_empty() {
                memory
                    .custom_states
                    .insert(character_id.clone(), record.custom_state_text.clone());
            }
        }
        memory
    }

    /// Rebuild records. Custom text without an active list for the same
    /// character has nothing to attach to and is dropped.
    pub fn into_records(self) -> BTreeMap<String, CharacterStateRecord> {
        let mut custom_states = self.custom_states;
        let mut records = BTreeMap::new();
        for (character_id, states) in self.active_states {
            let mut record = CharacterStateRecord {
                active_states: states.into_iter().collect(),
                custom_state_text: String::new(),
            };
            if record.is_empty() {
                continue;
            }
            if let Some(text) = custom_states.remove(&character_id) {
                if record.has_custom_state() {
                    record.custom_state_text = text;
                }
            }
            records.insert(character_id, record);
        }
        records
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize persisted states")
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse persisted states")
    }
}

/// Exclusive owner of all character state records.
pub struct StateStore {
    records: BTreeMap<String, CharacterStateRecord>,
    storage: Box<dyn SettingsStorage>,
    settings_key: String,
}

impl StateStore {
    pub fn new(storage: Box<dyn SettingsStorage>, settings_key: impl Into<String>) -> Self {
        Self {
            records: BTreeMap::new(),
            storage,
            settings_key: settings_key.into(),
        }
    }

    /// The record for a character, or an empty one if none exists.
    pub fn get(&self, character_id: &str) -> CharacterStateRecord {
        self.records.get(character_id).cloned().unwrap_or_default()
    }

    /// Replace a character's record. Empty records are evicted.
    pub fn set(&mut self, character_id: &str, record: CharacterStateRecord) {
        if record.is_empty() {
            self.records.remove(character_id);
        } else {
            self.records.insert(character_id.to_string(), record);
        }
    }

    pub fn characters(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn snapshot(&self) -> PersistedMemory {
        PersistedMemory::from_records(&self.records)
    }

    /// Write the full mapping to storage.
    pub fn try_persist(&self) -> Result<()> {
        let json = self.snapshot().to_json()?;
        self.storage
            .save(&self.settings_key, &json)
            .with_context(|| format!("Failed to write settings '{}'", self.settings_key))
    }

    /// Write the full mapping to storage, logging failures.
    ///
    /// The in-memory mapping stays authoritative when the write fails.
    pub fn persist(&self) {
        match self.try_persist() {
            Ok(()) => tracing::debug!("Persisted states for {} characters", self.records.len()),
            Err(e) => tracing::warn!("State persistence failed: {:#}", e),
        }
    }

    /// Replace the in-memory mapping with what storage holds.
    ///
    /// Missing or corrupt storage yields an empty mapping.
    pub fn restore(&mut self) {
        let loaded = self
            .storage
            .load(&self.settings_key)
            .with_context(|| format!("Failed to read settings '{}'", self.settings_key))
            .and_then(|value| value.map(|json| PersistedMemory::from_json(&json)).transpose());

        self.records = match loaded {
            Ok(Some(memory)) => memory.into_records(),
            Ok(None) => {
                tracing::info!("No persisted states under '{}'", self.settings_key);
                BTreeMap::new()
            }
            Err(e) => {
                tracing::warn!("Discarding unreadable persisted states: {:#}", e);
                BTreeMap::new()
            }
        };
        tracing::info!("Restored states for {} characters", self.records.len());
    }
}
