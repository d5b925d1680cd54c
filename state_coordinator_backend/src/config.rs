use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::prompt::{PromptPlacement, PromptRole};
use crate::store::DEFAULT_SETTINGS_KEY;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    // State definitions (states.json + one <name>.json per state)
    #[serde(default = "default_states_dir")]
    pub states_dir: String,

    // Settings storage
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_settings_key")]
    pub settings_key: String,

    // Extension prompt
    #[serde(default = "default_prompt_marker")]
    pub prompt_marker: String,
    #[serde(default)]
    pub prompt_placement: PromptPlacement,
    #[serde(default)]
    pub prompt_role: PromptRole,
    #[serde(default = "default_prompt_depth")]
    pub prompt_depth: u32,
    #[serde(default)]
    pub prompt_scan: bool,

    // Character bound at startup, if the host doesn't announce one
    #[serde(default)]
    pub default_character: Option<String>,
}

fn default_states_dir() -> String {
    "states".to_string()
}

fn default_database_path() -> String {
    "state_coordinator.db".to_string()
}

fn default_settings_key() -> String {
    DEFAULT_SETTINGS_KEY.to_string()
}

fn default_prompt_marker() -> String {
    "state_coordinator".to_string()
}

fn default_prompt_depth() -> u32 {
    1
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            states_dir: default_states_dir(),
            database_path: default_database_path(),
            settings_key: default_settings_key(),
            prompt_marker: default_prompt_marker(),
            prompt_placement: PromptPlacement::default(),
            prompt_role: PromptRole::default(),
            prompt_depth: default_prompt_depth(),
            prompt_scan: false,
            default_character: None,
        }
    }
}

impl CoordinatorConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("state_coordinator.toml")
    }

    /// Load config from state_coordinator.toml (next to executable), falling back to defaults + env vars
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match Self::from_toml(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.with_env_overrides();
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {:?}: {:#}", path, e);
                }
            }
        }

        tracing::warn!("No usable config file, using defaults + env vars");
        Self::from_env()
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Invalid state coordinator config")
    }

    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(dir) = env::var("STATE_COORDINATOR_STATES_DIR") {
            if !dir.trim().is_empty() {
                self.states_dir = dir;
            }
        }

        if let Ok(path) = env::var("STATE_COORDINATOR_DATABASE") {
            if !path.trim().is_empty() {
                self.database_path = path;
            }
        }

        if let Ok(character) = env::var("STATE_COORDINATOR_CHARACTER") {
            if !character.trim().is_empty() {
                self.default_character = Some(character);
            }
        }

        if let Ok(depth) = env::var("STATE_COORDINATOR_PROMPT_DEPTH") {
            if let Ok(depth) = depth.parse() {
                self.prompt_depth = depth;
            }
        }

        self
    }
}
