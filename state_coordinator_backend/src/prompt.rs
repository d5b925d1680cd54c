//! Prompt compositor: one system prompt from a character's active states.
//!
//! Catalog states are emitted in catalog order, then the custom state text.
//! Active names with no catalog definition contribute nothing.

use serde::{Deserialize, Serialize};

use crate::catalog::StateCatalog;
use crate::config::CoordinatorConfig;
use crate::store::{CharacterStateRecord, CUSTOM_STATE};

/// Where the host places an extension prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptPlacement {
    InPrompt,
    InChat,
    #[default]
    BeforePrompt,
}

impl PromptPlacement {
    /// Numeric value the host's extension prompt API expects.
    pub fn host_code(self) -> i32 {
        match self {
            PromptPlacement::InPrompt => 0,
            PromptPlacement::InChat => 1,
            PromptPlacement::BeforePrompt => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PromptRole {
    #[default]
    System,
    User,
    Assistant,
}

impl PromptRole {
    pub fn host_code(self) -> i32 {
        match self {
            PromptRole::System => 0,
            PromptRole::User => 1,
            PromptRole::Assistant => 2,
        }
    }
}

/// Positional metadata attached to every injection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSettings {
    pub marker: String,
    pub placement: PromptPlacement,
    pub depth: u32,
    pub scan: bool,
    pub role: PromptRole,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self::from(&CoordinatorConfig::default())
    }
}

impl From<&CoordinatorConfig> for PromptSettings {
    fn from(config: &CoordinatorConfig) -> Self {
        Self {
            marker: config.prompt_marker.clone(),
            placement: config.prompt_placement,
            depth: config.prompt_depth,
            scan: config.prompt_scan,
            role: config.prompt_role,
        }
    }
}

/// A "set extension prompt" call for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptInjection {
    pub marker_id: String,
    pub text: String,
    pub placement: PromptPlacement,
    pub depth: u32,
    pub scan: bool,
    pub role: PromptRole,
}

impl PromptSettings {
    pub fn inject(&self, text: String) -> PromptInjection {
        PromptInjection {
            marker_id: self.marker.clone(),
            text,
            placement: self.placement,
            depth: self.depth,
            scan: self.scan,
            role: self.role,
        }
    }
}

/// Compose the prompt for a record's active states.
pub fn render(catalog: &StateCatalog, record: &CharacterStateRecord) -> String {
    render_with_exits(catalog, record, &[])
}

/// Compose the prompt, leading with exit messages from the latest transition.
pub fn render_with_exits(
    catalog: &StateCatalog,
    record: &CharacterStateRecord,
    exit_messages: &[String],
) -> String {
    let mut lines: Vec<&str> = exit_messages.iter().map(String::as_str).collect();

    lines.extend(
        catalog
            .iter()
            .filter(|definition| record.is_active(&definition.name))
            .map(|definition| definition.entry_message.as_str()),
    );

    if record.has_custom_state() {
        lines.push(record.custom_state_text.as_str());
    }

    lines
        .into_iter()
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
        .trim_end()
        .to_string()
}
