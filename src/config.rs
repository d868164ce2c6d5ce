//! Engine configuration: completion service settings and matching thresholds.
//!
//! Loaded from JSON. Every field has a default, so a partial file (or no file
//! at all) is valid.

use crate::error::{CoderError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

// ============================================================================
// Constants
// ============================================================================

/// Directory name under the platform config/cache dirs
const APP_DIR: &str = "survey-coder";

/// Config file name inside the config dir
const CONFIG_FILE: &str = "config.json";

/// Default chat-completions endpoint base
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model
const DEFAULT_MODEL: &str = "gpt-4o";

/// Environment variable holding the API key
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

// ============================================================================
// Thresholds
// ============================================================================

/// Similarity thresholds used by the merger and the response classifier.
///
/// These values decide when two phrasings count as the same category, so
/// changing them changes which code an answer receives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Thresholds {
    /// Token-set similarity (0-100) at or above which two group titles merge.
    /// High enough that only reorderings and added filler words merge.
    pub merge_token_set: f64,

    /// Containment score (shorter/longer, 0-1) at or above which an answer
    /// that contains a known phrase, or is contained by one, takes its code.
    pub partial_containment: f64,

    /// Character-level ratio (0-1) at or above which a misspelled answer takes
    /// the code of the closest known phrase. Last tier before `Unmatched`.
    /// The ratio is normalized Levenshtein (see [`crate::similarity::ratio`]),
    /// so at 0.85 a single edit is accepted only once the longer string has
    /// seven characters; shorter words need an exact or containment match.
    pub fuzzy_ratio: f64,

    /// Lowest code that may be issued for a new category
    pub new_code_floor: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            merge_token_set: 85.0,
            partial_containment: 0.8,
            fuzzy_ratio: 0.85,
            new_code_floor: 10,
        }
    }
}

// ============================================================================
// Engine Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model name sent with every completion request
    pub model: String,

    /// Base URL of an OpenAI-compatible API
    pub base_url: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,

    /// HTTP timeout for one completion request
    pub timeout_secs: u64,

    /// Sampling temperature; 0 keeps repeated runs as stable as the service allows
    pub temperature: f32,

    /// Where the on-disk response cache lives; `None` disables it
    pub cache_dir: Option<PathBuf>,

    pub thresholds: Thresholds,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_secs: 120,
            temperature: 0.0,
            cache_dir: dirs::cache_dir().map(|d| d.join(APP_DIR)),
            thresholds: Thresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Read the API key from the configured environment variable
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            _ => Err(CoderError::MissingCredentials(self.api_key_env.clone())),
        }
    }
}

/// Default config location: `<config dir>/survey-coder/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
}

/// Load config from an explicit path; the file must exist
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = fs::read_to_string(path).map_err(|e| CoderError::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    serde_json::from_str(&content).map_err(|e| CoderError::ConfigParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Load config from `explicit` if given, else from the default location,
/// else fall back to defaults.
pub fn resolve_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        return load_config(path);
    }

    match default_config_path() {
        Some(path) if path.exists() => {
            debug!("Loading config from: {:?}", path);
            load_config(&path)
        }
        Some(path) => {
            debug!("No config at {:?}, using defaults", path);
            Ok(EngineConfig::default())
        }
        None => {
            warn!("Config directory not found, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"model": "gpt-4o-mini", "thresholds": {{"fuzzy_ratio": 0.9}}}}"#).unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.thresholds.fuzzy_ratio, 0.9);
        assert_eq!(config.thresholds.partial_containment, 0.8);
        assert_eq!(config.thresholds.new_code_floor, 10);
    }

    #[test]
    fn test_bad_config_is_configuration_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, CoderError::ConfigParse { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_api_key() {
        let config = EngineConfig {
            api_key_env: "SURVEY_CODER_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..EngineConfig::default()
        };
        let err = config.api_key().unwrap_err();
        assert!(matches!(err, CoderError::MissingCredentials(_)));
    }
}
