//! State catalog: the immutable set of state definitions loaded once at startup.
//!
//! A catalog source provides an index of state names and one definition per
//! name. A state whose definition fails to load is left out of the catalog;
//! the rest of the load carries on.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::store::CUSTOM_STATE;

/// Name of the index file listing every state in catalog order.
pub const STATE_INDEX_FILE: &str = "states.json";

/// One behavioral state as described by its definition file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateDefinition {
    /// Not part of the file; filled in from the index entry.
    #[serde(skip)]
    pub name: String,
    #[serde(default, rename = "keywords_in")]
    pub activation_keywords: Vec<String>,
    #[serde(default, rename = "keywords_out")]
    pub deactivation_keywords: Vec<String>,
    #[serde(default, rename = "message_in")]
    pub entry_message: String,
    #[serde(default, rename = "message_out")]
    pub exit_message: String,
}

impl StateDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_activation<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.activation_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_deactivation<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.deactivation_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_messages(mut self, entry: impl Into<String>, exit: impl Into<String>) -> Self {
        self.entry_message = entry.into();
        self.exit_message = exit.into();
        self
    }

    /// Drop duplicate and blank keywords, keeping first-seen order.
    ///
    /// A blank keyword is a substring of every message and would fire on
    /// every turn.
    fn normalized(mut self) -> Self {
        let name = self.name.clone();
        for keywords in [
            &mut self.activation_keywords,
            &mut self.deactivation_keywords,
        ] {
            let mut seen = Vec::with_capacity(keywords.len());
            for keyword in keywords.drain(..) {
                if keyword.trim().is_empty() {
                    tracing::warn!("Ignoring blank keyword in state '{}'", name);
                    continue;
                }
                if !seen.contains(&keyword) {
                    seen.push(keyword);
                }
            }
            *keywords = seen;
        }
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StateIndex {
    #[serde(default)]
    states: Vec<String>,
}

/// Where state definitions come from.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// State names in catalog order.
    async fn state_names(&self) -> Result<Vec<String>>;

    /// The definition for one named state.
    async fn definition(&self, name: &str) -> Result<StateDefinition>;
}

/// Reads `states.json` and `<name>.json` files from a directory.
pub struct FsCatalogSource {
    dir: PathBuf,
}

impl FsCatalogSource {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl CatalogSource for FsCatalogSource {
    async fn state_names(&self) -> Result<Vec<String>> {
        let path = self.dir.join(STATE_INDEX_FILE);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read state index {:?}", path))?;
        let index: StateIndex = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state index {:?}", path))?;
        Ok(index.states)
    }

    async fn definition(&self, name: &str) -> Result<StateDefinition> {
        if name.contains(['/', '\\']) || name.contains("..") {
            anyhow::bail!("State name '{}' is not a plain file name", name);
        }

        let path = self.dir.join(format!("{}.json", name));
        let contents = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read state file {:?}", path))?;
        let mut definition: StateDefinition = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse state file {:?}", path))?;
        definition.name = name.to_string();
        Ok(definition)
    }
}

/// Loaded-once mapping from state name to definition.
///
/// Iteration follows the index order; prompt composition relies on it.
#[derive(Debug, Clone, Default)]
pub struct StateCatalog {
    order: Vec<String>,
    definitions: HashMap<String, StateDefinition>,
}

impl StateCatalog {
    /// Load every state named by the source's index.
    ///
    /// Fails only when the index itself can't be read. Individual states that
    /// fail to load are logged and omitted.
    pub async fn load(source: &dyn CatalogSource) -> Result<Self> {
        let names = source
            .state_names()
            .await
            .context("Failed to load state index")?;
        tracing::info!("Loading {} state definitions", names.len());

        let mut catalog = Self::default();
        for name in names {
            match source.definition(&name).await {
                Ok(definition) => catalog.insert(definition),
                Err(e) => tracing::warn!("Skipping state '{}': {:#}", name, e),
            }
        }

        tracing::info!("State catalog ready: {:?}", catalog.order);
        Ok(catalog)
    }

    pub fn from_definitions<I>(definitions: I) -> Self
    where
        I: IntoIterator<Item = StateDefinition>,
    {
        let mut catalog = Self::default();
        for definition in definitions {
            catalog.insert(definition);
        }
        catalog
    }

    fn insert(&mut self, definition: StateDefinition) {
        if definition.name.trim().is_empty() {
            tracing::warn!("Skipping state with an empty name");
            return;
        }
        if definition.name == CUSTOM_STATE {
            tracing::warn!("'{}' is reserved for the custom state", CUSTOM_STATE);
            return;
        }
        if self.definitions.contains_key(&definition.name) {
            tracing::warn!("Duplicate state '{}' ignored", definition.name);
            return;
        }

        let definition = definition.normalized();
        self.order.push(definition.name.clone());
        self.definitions.insert(definition.name.clone(), definition);
    }

    pub fn lookup(&self, name: &str) -> Option<&StateDefinition> {
        self.definitions.get(name)
    }

    /// Definitions in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &StateDefinition> {
        self.order
            .iter()
            .filter_map(move |name| self.definitions.get(name))
    }

    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
