//! Configuration loading, validation, and management for Parley.
//!
//! Loads configuration from a TOML file (`--config`, `$PARLEY_CONFIG`, or
//! `./parley.toml`) with `.env` and environment variable overrides.
//! Credentials are checked separately by [`AppConfig::require_generation`] and
//! [`AppConfig::require_speech`] so that tooling like `doctor` can still load a
//! half-configured file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV: &str = "PARLEY_CONFIG";
/// Config file looked up in the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "parley.toml";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Language model backend
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Speech recognition backend
    #[serde(default)]
    pub speech: SpeechConfig,

    /// Persona documents
    #[serde(default)]
    pub persona: PersonaConfig,

    /// Conversation history bounds
    #[serde(default)]
    pub history: HistoryConfig,

    /// Transcript correction table
    #[serde(default)]
    pub corrections: CorrectionsConfig,

    /// HTTP server
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

fn default_true() -> bool {
    true
}

// --- [generation] ---

#[derive(Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Persona system instruction. Usually supplied via `GEMINI_INSTRUCTIONS`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,

    #[serde(default = "default_generation_url")]
    pub base_url: String,

    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,

    /// Block threshold applied to every harm category. The persona needs
    /// `BLOCK_NONE`; stricter values suppress in-character replies.
    #[serde(default = "default_safety_threshold")]
    pub safety_threshold: String,
}

fn default_model() -> String {
    "gemini-2.0-flash".into()
}
fn default_generation_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_backend_timeout() -> u64 {
    60
}
fn default_safety_threshold() -> String {
    "BLOCK_NONE".into()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            system_instruction: None,
            base_url: default_generation_url(),
            timeout_secs: default_backend_timeout(),
            safety_threshold: default_safety_threshold(),
        }
    }
}

impl std::fmt::Debug for GenerationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationConfig")
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field(
                "system_instruction",
                &self.system_instruction.as_ref().map(|s| s.chars().count()),
            )
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("safety_threshold", &self.safety_threshold)
            .finish()
    }
}

// --- [speech] ---

#[derive(Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_speech_url")]
    pub base_url: String,

    #[serde(default = "default_encoding")]
    pub encoding: String,

    #[serde(default = "default_sample_rate")]
    pub sample_rate_hertz: u32,

    #[serde(default = "default_language")]
    pub language_code: String,

    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

fn default_speech_url() -> String {
    "https://speech.googleapis.com/v1".into()
}
fn default_encoding() -> String {
    "WEBM_OPUS".into()
}
fn default_sample_rate() -> u32 {
    48_000
}
fn default_language() -> String {
    "ko-KR".into()
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            base_url: default_speech_url(),
            encoding: default_encoding(),
            sample_rate_hertz: default_sample_rate(),
            language_code: default_language(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl std::fmt::Debug for SpeechConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpeechConfig")
            .field("enabled", &self.enabled)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("encoding", &self.encoding)
            .field("sample_rate_hertz", &self.sample_rate_hertz)
            .field("language_code", &self.language_code)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

// --- [persona] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Dialogue corpus that defines how the character talks
    #[serde(default = "default_script_path")]
    pub script_path: PathBuf,

    /// Biography document
    #[serde(default = "default_biography_path")]
    pub biography_path: PathBuf,

    /// Annotation attached after the script blob
    #[serde(default = "default_style_note")]
    pub style_note: String,

    /// Annotation attached after the biography blob
    #[serde(default = "default_biography_note")]
    pub biography_note: String,
}

fn default_script_path() -> PathBuf {
    PathBuf::from("script.txt")
}
fn default_biography_path() -> PathBuf {
    PathBuf::from("nino_wiki.pdf")
}
fn default_style_note() -> String {
    "니노의 말투입니다.".into()
}
fn default_biography_note() -> String {
    "니노의 정보입니다.".into()
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            script_path: default_script_path(),
            biography_path: default_biography_path(),
            style_note: default_style_note(),
            biography_note: default_biography_note(),
        }
    }
}

// --- [history] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Turns kept after the persona turn. 0 = unbounded; otherwise even.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,

    /// Live sessions before the least recently used one is dropped.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_max_turns() -> usize {
    200
}
fn default_max_sessions() -> usize {
    1_000
}

impl HistoryConfig {
    /// `max_turns` as an optional bound.
    pub fn turn_limit(&self) -> Option<usize> {
        (self.max_turns > 0).then_some(self.max_turns)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            max_sessions: default_max_sessions(),
        }
    }
}

// --- [corrections] ---

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// Replace every occurrence, including inside longer words
    #[default]
    Substring,
    /// Replace only where the wrong-form starts a token
    TokenStart,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrectionsConfig {
    #[serde(default)]
    pub match_mode: CorrectionMode,

    /// Extra `wrong = "right"` pairs merged over the built-in table.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

// --- [gateway] ---

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS origins. `"*"` allows any origin.
    #[serde(default = "default_origins")]
    pub allowed_origins: Vec<String>,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Upper bound on a whole chat request, transcription included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_origins() -> Vec<String> {
    vec!["*".into()]
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_request_timeout() -> u64 {
    90
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_origins(),
            max_body_bytes: default_max_body_bytes(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration for the running process.
    ///
    /// Resolution order: `.env` → TOML file → process environment.
    /// The file is `path` if given, else `$PARLEY_CONFIG`, else `./parley.toml`.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable .env file"),
        }

        let path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE)),
        };

        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Empty values are treated as unset.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("GEMINI_API_KEY") {
            self.generation.api_key = Some(key);
        }
        if let Some(instructions) = get("GEMINI_INSTRUCTIONS") {
            self.generation.system_instruction = Some(instructions);
        }
        if let Some(model) = get("GEMINI_MODEL") {
            self.generation.model = model;
        }
        if let Some(key) = get("GOOGLE_SPEECH_API_KEY").or_else(|| get("GOOGLE_API_KEY")) {
            self.speech.api_key = Some(key);
        }
        if let Some(host) = get("PARLEY_HOST") {
            self.gateway.host = host;
        }
        if let Some(port) = get("PORT") {
            match port.parse() {
                Ok(p) => self.gateway.port = p,
                Err(_) => tracing::warn!(value = %port, "Ignoring non-numeric PORT"),
            }
        }
    }

    /// Validate value ranges. Credentials are checked by the `require_*` methods.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.timeout_secs == 0 || self.speech.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.gateway.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.request_timeout_secs must be greater than 0".into(),
            ));
        }

        // History is trimmed in user/model pairs, so an odd bound would keep one turn fewer.
        if self.history.max_turns % 2 == 1 {
            return Err(ConfigError::ValidationError(format!(
                "history.max_turns must be 0 (unbounded) or an even number, got {}",
                self.history.max_turns
            )));
        }

        if self.speech.sample_rate_hertz == 0 {
            return Err(ConfigError::ValidationError(
                "speech.sample_rate_hertz must be greater than 0".into(),
            ));
        }

        if self.gateway.max_body_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "gateway.max_body_bytes must be greater than 0".into(),
            ));
        }

        if self.corrections.extra.keys().any(|k| k.is_empty()) {
            return Err(ConfigError::ValidationError(
                "corrections.extra must not contain an empty wrong-form".into(),
            ));
        }

        Ok(())
    }

    /// The generation backend cannot run without a key and a persona instruction.
    pub fn require_generation(&self) -> Result<(), ConfigError> {
        if self.generation.api_key.is_none() {
            return Err(ConfigError::MissingCredential("GEMINI_API_KEY".into()));
        }
        if self.generation.system_instruction.is_none() {
            return Err(ConfigError::MissingInstruction);
        }
        Ok(())
    }

    /// Speech needs a key only when it is enabled.
    pub fn require_speech(&self) -> Result<(), ConfigError> {
        if self.speech.enabled && self.speech.api_key.is_none() {
            return Err(ConfigError::MissingCredential("GOOGLE_SPEECH_API_KEY".into()));
        }
        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error("Missing credential: set {0}")]
    MissingCredential(String),

    #[error("Missing persona system instruction: set GEMINI_INSTRUCTIONS")]
    MissingInstruction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.speech.sample_rate_hertz, 48_000);
        assert_eq!(config.speech.language_code, "ko-KR");
        assert_eq!(config.speech.encoding, "WEBM_OPUS");
        assert_eq!(config.generation.safety_threshold, "BLOCK_NONE");
        assert_eq!(config.corrections.match_mode, CorrectionMode::Substring);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.generation.model, config.generation.model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.persona.script_path, config.persona.script_path);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/parley.toml")).unwrap();
        assert_eq!(config.generation.model, "gemini-2.0-flash");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(
            &path,
            r#"
[generation]
model = "gemini-2.5-flash"

[persona]
script_path = "/srv/persona/script.txt"

[history]
max_turns = 0

[corrections]
match_mode = "token_start"
extra = { "니나" = "니노" }
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.generation.model, "gemini-2.5-flash");
        assert_eq!(config.persona.script_path, PathBuf::from("/srv/persona/script.txt"));
        assert_eq!(config.persona.biography_path, PathBuf::from("nino_wiki.pdf"));
        assert_eq!(config.history.turn_limit(), None);
        assert_eq!(config.corrections.match_mode, CorrectionMode::TokenStart);
        assert_eq!(config.corrections.extra.get("니나").map(String::as_str), Some("니노"));
    }

    #[test]
    fn unparsable_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "[gateway\nport = 1").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn env_overrides_take_priority() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("GEMINI_API_KEY", "g-key"),
            ("GEMINI_INSTRUCTIONS", "You are Nino."),
            ("GOOGLE_API_KEY", "s-key"),
            ("PORT", "9000"),
        ]));
        assert_eq!(config.generation.api_key.as_deref(), Some("g-key"));
        assert_eq!(config.generation.system_instruction.as_deref(), Some("You are Nino."));
        assert_eq!(config.speech.api_key.as_deref(), Some("s-key"));
        assert_eq!(config.gateway.port, 9000);
    }

    #[test]
    fn dedicated_speech_key_beats_generic_key() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[
            ("GOOGLE_SPEECH_API_KEY", "speech"),
            ("GOOGLE_API_KEY", "generic"),
        ]));
        assert_eq!(config.speech.api_key.as_deref(), Some("speech"));
    }

    #[test]
    fn bad_port_and_empty_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[("PORT", "eighty"), ("GEMINI_API_KEY", "  ")]));
        assert_eq!(config.gateway.port, 8080);
        assert!(config.generation.api_key.is_none());
    }

    #[test]
    fn generation_requires_key_and_instruction() {
        let mut config = AppConfig::default();
        assert!(matches!(
            config.require_generation(),
            Err(ConfigError::MissingCredential(_))
        ));

        config.generation.api_key = Some("k".into());
        assert!(matches!(
            config.require_generation(),
            Err(ConfigError::MissingInstruction)
        ));

        config.generation.system_instruction = Some("persona".into());
        assert!(config.require_generation().is_ok());
    }

    #[test]
    fn disabled_speech_needs_no_key() {
        let mut config = AppConfig::default();
        assert!(config.require_speech().is_err());
        config.speech.enabled = false;
        assert!(config.require_speech().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = AppConfig::default();
        config.generation.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_request_timeout_rejected() {
        let mut config = AppConfig::default();
        config.gateway.request_timeout_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("request_timeout_secs")
        ));
    }

    #[test]
    fn history_window_must_hold_whole_exchanges() {
        let mut config = AppConfig::default();
        for odd in [1, 3, 199] {
            config.history.max_turns = odd;
            assert!(
                matches!(config.validate(), Err(ConfigError::ValidationError(_))),
                "max_turns = {odd}"
            );
        }
        for ok in [0, 2, 200] {
            config.history.max_turns = ok;
            assert!(config.validate().is_ok(), "max_turns = {ok}");
        }
    }

    #[test]
    fn odd_history_window_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parley.toml");
        std::fs::write(&path, "[history]\nmax_turns = 1\n").unwrap();
        assert!(matches!(
            AppConfig::load_from(&path),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn debug_output_redacts_keys() {
        let mut config = AppConfig::default();
        config.generation.api_key = Some("super-secret".into());
        config.speech.api_key = Some("also-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("also-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gemini-2.0-flash"));
        assert!(toml_str.contains("8080"));
    }
}
