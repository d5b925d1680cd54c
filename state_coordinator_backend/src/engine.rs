//! Engine facade: owns the catalog, the store and the character binding, and
//! exposes the handlers a host adapter wires to its event bus.

use anyhow::Result;
use flume::Sender;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::binding::CharacterBinding;
use crate::catalog::{CatalogSource, FsCatalogSource, StateCatalog};
use crate::config::CoordinatorConfig;
use crate::database::{MemorySettings, SettingsDatabase, SettingsStorage};
use crate::prompt::{self, PromptInjection, PromptSettings};
use crate::resolver::{TransitionOutcome, TransitionResolver};
use crate::store::{CharacterStateRecord, StateStore, CUSTOM_STATE};

/// One entry of the host's chat history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub is_user: bool,
    #[serde(default)]
    pub is_system: bool,
    pub mes: String,
}

impl ChatMessage {
    pub fn user(name: impl Into<String>, mes: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_user: true,
            is_system: false,
            mes: mes.into(),
        }
    }

    pub fn character(name: impl Into<String>, mes: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_user: false,
            is_system: false,
            mes: mes.into(),
        }
    }
}

/// Outbound notifications for the host adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// "Set extension prompt": replace the injected system prompt.
    PromptUpdated(PromptInjection),
    StatesChanged {
        character_id: String,
        added: BTreeSet<String>,
        removed: BTreeSet<String>,
    },
}

pub struct Engine {
    catalog: StateCatalog,
    store: StateStore,
    binding: CharacterBinding,
    resolver: TransitionResolver,
    prompt: PromptSettings,
    event_tx: Sender<EngineEvent>,
    /// The last published prompt led with exit messages.
    exit_notes_shown: bool,
}

impl Engine {
    /// Build an engine from config: states from `states_dir`, settings in SQLite.
    ///
    /// The catalog is fully loaded before this returns, so no message can be
    /// resolved against a partial catalog.
    pub async fn init(config: &CoordinatorConfig, event_tx: Sender<EngineEvent>) -> Result<Self> {
        let source = FsCatalogSource::new(&config.states_dir);
        let storage: Box<dyn SettingsStorage> = match SettingsDatabase::new(&config.database_path)
        {
            Ok(db) => Box::new(db),
            Err(e) => {
                tracing::warn!(
                    "Settings database unavailable, states won't survive a restart: {:#}",
                    e
                );
                Box::new(MemorySettings::new())
            }
        };

        let mut engine = Self::with_parts(
            &source,
            storage,
            &config.settings_key,
            PromptSettings::from(config),
            event_tx,
        )
        .await?;

        if let Some(character_id) = &config.default_character {
            engine.on_character_changed(character_id);
        }
        Ok(engine)
    }

    pub async fn with_parts(
        source: &dyn CatalogSource,
        storage: Box<dyn SettingsStorage>,
        settings_key: &str,
        prompt: PromptSettings,
        event_tx: Sender<EngineEvent>,
    ) -> Result<Self> {
        let catalog = match StateCatalog::load(source).await {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!("Starting with an empty state catalog: {:#}", e);
                StateCatalog::default()
            }
        };

        let mut store = StateStore::new(storage, settings_key);
        store.restore();

        Ok(Self {
            catalog,
            store,
            binding: CharacterBinding::new(),
            resolver: TransitionResolver::new()?,
            prompt,
            event_tx,
            exit_notes_shown: false,
        })
    }

    pub fn catalog(&self) -> &StateCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn current_character(&self) -> Option<&str> {
        self.binding.current()
    }

    /// Scan the latest user message, update states and rewrite it in place.
    ///
    /// Does nothing without a bound character or a user message. When there
    /// is a message, the outcome always carries its (possibly unchanged) text.
    pub fn on_message_intercept(&mut self, chat: &mut [ChatMessage]) -> TransitionOutcome {
        let Some(message) = chat.iter_mut().rev().find(|m| m.is_user && !m.is_system) else {
            tracing::debug!("No user message in chat; skipping state scan");
            return TransitionOutcome::default();
        };
        let Some(character_id) = self.binding.current().map(str::to_string) else {
            tracing::warn!("No character bound; skipping state scan");
            return TransitionOutcome::unchanged(&message.mes);
        };

        let mut record = self.store.get(&character_id);
        let outcome = self.resolver.resolve(&self.catalog, &message.mes, &mut record);
        if outcome.rewrote(&message.mes) {
            message.mes = outcome.rewritten_message.clone();
        }

        if outcome.changed {
            tracing::info!(
                "States for '{}': +{:?} -{:?}",
                character_id,
                outcome.states_added,
                outcome.states_removed
            );
            self.commit(&character_id, record, &outcome);
        } else if self.exit_notes_shown {
            self.publish(&character_id, &[]);
        }
        outcome
    }

    /// Switch to another character and re-render its persisted states.
    pub fn on_character_changed(&mut self, character_id: &str) {
        self.binding.bind(character_id);
        match self.binding.current().map(str::to_string) {
            Some(current) => self.publish(&current, &[]),
            None => {
                self.exit_notes_shown = false;
                let _ = self
                    .event_tx
                    .send(EngineEvent::PromptUpdated(self.prompt.inject(String::new())));
            }
        }
    }

    /// The prompt for the bound character, without exit messages.
    pub fn render(&self) -> String {
        self.binding
            .current()
            .map(|id| prompt::render(&self.catalog, &self.store.get(id)))
            .unwrap_or_default()
    }

    pub fn active_states(&self) -> BTreeSet<String> {
        self.binding
            .current()
            .map(|id| self.store.get(id).active_states)
            .unwrap_or_default()
    }

    pub fn custom_state_text(&self) -> Option<String> {
        let record = self.store.get(self.binding.current()?);
        record
            .has_custom_state()
            .then_some(record.custom_state_text)
    }

    /// Activate a catalog state for the bound character.
    pub fn activate_state(&mut self, name: &str) -> bool {
        let Some(character_id) = self.bound_character() else {
            return false;
        };
        if self.catalog.lookup(name).is_none() {
            tracing::warn!("Refusing to activate unknown state '{}'", name);
            return false;
        }

        let mut record = self.store.get(&character_id);
        if !record.active_states.insert(name.to_string()) {
            return false;
        }

        let mut outcome = TransitionOutcome {
            changed: true,
            ..TransitionOutcome::default()
        };
        outcome.states_added.insert(name.to_string());
        self.commit(&character_id, record, &outcome);
        true
    }

    /// Deactivate a state (catalog or custom) for the bound character.
    pub fn deactivate_state(&mut self, name: &str) -> bool {
        let Some(character_id) = self.bound_character() else {
            return false;
        };
        let mut record = self.store.get(&character_id);
        if !record.remove(name) {
            return false;
        }

        let mut outcome = TransitionOutcome {
            changed: true,
            ..TransitionOutcome::default()
        };
        outcome.states_removed.insert(name.to_string());
        outcome.exit_messages = self.exit_messages_for(&outcome.states_removed);
        self.commit(&character_id, record, &outcome);
        true
    }

    /// Deactivate every state for the bound character.
    pub fn clear_states(&mut self) -> bool {
        let Some(character_id) = self.bound_character() else {
            return false;
        };
        let record = self.store.get(&character_id);
        if record.is_empty() {
            return false;
        }

        let mut outcome = TransitionOutcome {
            changed: true,
            states_removed: record.active_states,
            ..TransitionOutcome::default()
        };
        outcome.exit_messages = self.exit_messages_for(&outcome.states_removed);
        self.commit(&character_id, CharacterStateRecord::default(), &outcome);
        true
    }

    /// Set (or replace) the custom state text for the bound character.
    pub fn set_custom_state(&mut self, text: &str) -> bool {
        let Some(character_id) = self.bound_character() else {
            return false;
        };
        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        let mut record = self.store.get(&character_id);
        if record.has_custom_state() && record.custom_state_text == text {
            return false;
        }

        let mut outcome = TransitionOutcome {
            changed: true,
            ..TransitionOutcome::default()
        };
        if !record.has_custom_state() {
            outcome.states_added.insert(CUSTOM_STATE.to_string());
        }
        record.set_custom_state(text);
        self.commit(&character_id, record, &outcome);
        true
    }

    pub fn clear_custom_state(&mut self) -> bool {
        self.deactivate_state(CUSTOM_STATE)
    }

    /// Final flush; call on teardown.
    pub fn shutdown(&self) {
        tracing::info!("Flushing states before shutdown");
        self.store.persist();
    }

    fn bound_character(&self) -> Option<String> {
        let current = self.binding.current().map(str::to_string);
        if current.is_none() {
            tracing::warn!("No character bound; ignoring state change");
        }
        current
    }

    fn exit_messages_for(&self, removed: &BTreeSet<String>) -> Vec<String> {
        self.catalog
            .iter()
            .filter(|definition| removed.contains(&definition.name))
            .map(|definition| definition.exit_message.clone())
            .filter(|message| !message.is_empty())
            .collect()
    }

    fn commit(
        &mut self,
        character_id: &str,
        record: CharacterStateRecord,
        outcome: &TransitionOutcome,
    ) {
        self.store.set(character_id, record);
        self.store.persist();
        let _ = self.event_tx.send(EngineEvent::StatesChanged {
            character_id: character_id.to_string(),
            added: outcome.states_added.clone(),
            removed: outcome.states_removed.clone(),
        });
        self.publish(character_id, &outcome.exit_messages);
    }

    fn publish(&mut self, character_id: &str, exit_messages: &[String]) {
        let record = self.store.get(character_id);
        let text = prompt::render_with_exits(&self.catalog, &record, exit_messages);
        self.exit_notes_shown = !exit_messages.is_empty();
        let _ = self
            .event_tx
            .send(EngineEvent::PromptUpdated(self.prompt.inject(text)));
    }
}
