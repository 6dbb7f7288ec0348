use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::MessageFormat;
use crate::{BridgeError, Result};

pub const DEFAULT_NAMESPACE: &str = "default";
pub const DEFAULT_MESSAGE_TIMEOUT_MS: u64 = 5_000;
/// Environment variable naming the TOML overlay file
pub const CONFIG_PATH_ENV: &str = "CROSSWIN_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "crosswin.toml";

/// Options recognized by a [`Bridge`](crate::Bridge).
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```
/// use crosswin_core::{BridgeConfig, MessageFormat};
///
/// let cfg = BridgeConfig::from_toml_str(r#"
///     namespace = "checkout"
///     message_timeout_ms = 1500
///     message_format = "page_event"
/// "#).unwrap();
/// assert_eq!(cfg.namespace, "checkout");
/// assert!(cfg.verify_origin);
/// assert_eq!(cfg.message_format, MessageFormat::PageEvent);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Origin outbound posts are addressed to and inbound origins are checked
    /// against. `None` means the local channel's own origin.
    pub target_origin: Option<String>,
    pub verify_origin: bool,
    pub namespace: String,
    /// Gates diagnostic logging only
    pub debug: bool,
    pub message_timeout_ms: u64,
    pub message_format: MessageFormat,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            target_origin: None,
            verify_origin: true,
            namespace: DEFAULT_NAMESPACE.to_string(),
            debug: false,
            message_timeout_ms: DEFAULT_MESSAGE_TIMEOUT_MS,
            message_format: MessageFormat::Plain,
        }
    }
}

impl BridgeConfig {
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_target_origin(mut self, origin: impl Into<String>) -> Self {
        self.target_origin = Some(origin.into());
        self
    }

    pub fn with_verify_origin(mut self, verify: bool) -> Self {
        self.verify_origin = verify;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_message_timeout(mut self, timeout: Duration) -> Self {
        self.message_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_message_format(mut self, format: MessageFormat) -> Self {
        self.message_format = format;
        self
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_millis(self.message_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.message_timeout_ms == 0 {
            return Err(BridgeError::Config(
                "message_timeout_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Parses a TOML document. Malformed values are an error; unknown keys
    /// are ignored.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults, then `CROSSWIN_*` environment variables, then the TOML file
    /// named by `CROSSWIN_CONFIG` (or `./crosswin.toml`) if it exists.
    pub fn load() -> Self {
        let base = Self::from_env();
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "crosswin::config", path = %path, "No TOML config found; using defaults/env");
            return base;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<BridgeToml>(&s) {
                Ok(t) => t.overlay(base),
                Err(e) => {
                    tracing::warn!(target: "crosswin::config", error = %e, "Failed to parse TOML; using defaults");
                    base
                }
            },
            Err(e) => {
                tracing::warn!(target: "crosswin::config", error = %e, "Failed to read TOML; using defaults");
                base
            }
        }
    }

    /// Defaults overridden by `CROSSWIN_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_string("CROSSWIN_TARGET_ORIGIN") {
            cfg.target_origin = Some(v);
        }
        if let Some(v) = env_string("CROSSWIN_VERIFY_ORIGIN").and_then(|v| parse_bool(&v)) {
            cfg.verify_origin = v;
        }
        if let Some(v) = env_string("CROSSWIN_NAMESPACE") {
            cfg.namespace = v;
        }
        if let Some(v) = env_string("CROSSWIN_DEBUG").and_then(|v| parse_bool(&v)) {
            cfg.debug = v;
        }
        if let Some(v) = env_string("CROSSWIN_MESSAGE_TIMEOUT_MS")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v > 0)
        {
            cfg.message_timeout_ms = v;
        }
        if let Some(v) = env_string("CROSSWIN_MESSAGE_FORMAT") {
            match v.as_str() {
                "plain" => cfg.message_format = MessageFormat::Plain,
                "page_event" => cfg.message_format = MessageFormat::PageEvent,
                other => {
                    tracing::warn!(target: "crosswin::config", value = %other, "Unknown CROSSWIN_MESSAGE_FORMAT; keeping default")
                }
            }
        }
        cfg
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// =========================
// TOML overlay definitions
// =========================

#[derive(Debug, Clone, Default, Deserialize)]
struct BridgeToml {
    target_origin: Option<String>,
    verify_origin: Option<bool>,
    namespace: Option<String>,
    debug: Option<bool>,
    message_timeout_ms: Option<u64>,
    message_format: Option<MessageFormat>,
}

impl BridgeToml {
    fn overlay(self, mut base: BridgeConfig) -> BridgeConfig {
        if let Some(v) = self.target_origin {
            base.target_origin = Some(v);
        }
        if let Some(v) = self.verify_origin {
            base.verify_origin = v;
        }
        if let Some(v) = self.namespace {
            base.namespace = v;
        }
        if let Some(v) = self.debug {
            base.debug = v;
        }
        if let Some(v) = self.message_timeout_ms.filter(|v| *v > 0) {
            base.message_timeout_ms = v;
        }
        if let Some(v) = self.message_format {
            base.message_format = v;
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = BridgeConfig::default();
        assert_eq!(cfg.namespace, "default");
        assert!(cfg.verify_origin);
        assert!(!cfg.debug);
        assert_eq!(cfg.message_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.target_origin, None);
        assert_eq!(cfg.message_format, MessageFormat::Plain);
    }

    #[test]
    fn overlay_only_touches_present_keys() {
        let overlay: BridgeToml = toml::from_str("debug = true\nmessage_timeout_ms = 0").unwrap();
        let cfg = overlay.overlay(BridgeConfig::default().with_namespace("keep"));
        assert!(cfg.debug);
        assert_eq!(cfg.namespace, "keep");
        assert_eq!(cfg.message_timeout_ms, DEFAULT_MESSAGE_TIMEOUT_MS);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = BridgeConfig::from_toml_str("message_timeout_ms = 0").unwrap_err();
        assert!(matches!(err, BridgeError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_an_error() {
        let err = BridgeConfig::from_toml_str("verify_origin = \"maybe\"").unwrap_err();
        assert!(matches!(err, BridgeError::Toml(_)));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("off"), Some(false));
        assert_eq!(parse_bool("sometimes"), None);
    }
}
