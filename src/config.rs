//! Chalice stage configuration: reading the bot token and the document model
//! written by `botkit new`.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;

/// Stage configuration path, relative to the project root.
pub const CONFIG_PATH: &str = ".chalice/config.json";
/// Environment variable holding the bot token in each stage.
pub const TOKEN_KEY: &str = "TELEGRAM_BOT_ID";
/// Stage whose token the launcher registers.
pub const LOCAL_STAGE: &str = "local";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Chalice configuration file '{path}' not found.")]
    NotFound { path: String },

    #[error("Error decoding JSON from {path}: {source}")]
    InvalidJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Key 'stages' not found in Chalice configuration.")]
    MissingStages,

    #[error("Stage '{stage}' not found in Chalice configuration.")]
    MissingStage { stage: String },

    #[error("Key 'environment_variables' not found for stage '{stage}' in Chalice configuration.")]
    MissingEnvironment { stage: String },

    #[error("TELEGRAM_BOT_ID not found for stage '{stage}' in Chalice configuration.")]
    MissingToken { stage: String },

    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Read the bot token for `stage` from the configuration at `path`.
///
/// Only key presence is checked; the token's format is not validated.
pub fn read_bot_token(path: &Path, stage: &str) -> Result<String, ConfigError> {
    let display = path.display().to_string();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::NotFound {
                path: display.clone(),
            }
        } else {
            ConfigError::Io {
                path: display.clone(),
                source: e,
            }
        }
    })?;
    let doc: Value = serde_json::from_str(&contents).map_err(|source| ConfigError::InvalidJson {
        path: display,
        source,
    })?;
    token_from_document(&doc, stage)
}

fn token_from_document(doc: &Value, stage: &str) -> Result<String, ConfigError> {
    let stages = doc.get("stages").ok_or(ConfigError::MissingStages)?;
    let stage_doc = stages.get(stage).ok_or_else(|| ConfigError::MissingStage {
        stage: stage.to_string(),
    })?;
    let env = stage_doc
        .get("environment_variables")
        .ok_or_else(|| ConfigError::MissingEnvironment {
            stage: stage.to_string(),
        })?;
    env.get(TOKEN_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ConfigError::MissingToken {
            stage: stage.to_string(),
        })
}

/// `.chalice/config.json` as generated for a new project.
#[derive(Debug, Clone, Serialize)]
pub struct ChaliceConfig {
    pub version: String,
    pub app_name: String,
    pub stages: BTreeMap<String, StageConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageConfig {
    pub iam_policy_file: String,
    pub api_gateway_stage: String,
    pub autogen_policy: bool,
    pub environment_variables: BTreeMap<String, String>,
}

impl StageConfig {
    /// A stage using the shared dev policy and the given bot token.
    pub fn with_token(token: &str) -> Self {
        Self {
            iam_policy_file: "dev-policy.json".to_string(),
            api_gateway_stage: "api".to_string(),
            autogen_policy: false,
            environment_variables: BTreeMap::from([(TOKEN_KEY.to_string(), token.to_string())]),
        }
    }
}
