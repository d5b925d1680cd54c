//! Keyword-driven behavioral states for chat characters.
//!
//! User messages are scanned for activation/deactivation keywords, the
//! per-character active set is updated and persisted, and the entry messages
//! of all active states are composed into one system prompt for the host.

pub mod binding;
pub mod catalog;
pub mod config;
pub mod database;
pub mod engine;
pub mod prompt;
pub mod resolver;
pub mod store;

pub use catalog::{CatalogSource, FsCatalogSource, StateCatalog, StateDefinition};
pub use config::CoordinatorConfig;
pub use engine::{ChatMessage, Engine, EngineEvent};
pub use prompt::{PromptInjection, PromptPlacement, PromptRole, PromptSettings};
pub use resolver::{TransitionOutcome, TransitionResolver};
pub use store::{CharacterStateRecord, PersistedMemory, StateStore, CUSTOM_STATE};
