//! User settings for worksite.
//!
//! Loaded with the following priority (highest to lowest):
//! 1. CLI flags (applied by the caller via [`Settings::with_cli_overrides`])
//! 2. Environment variables (`WORKSITE_*`)
//! 3. `~/.worksite/settings.yaml`
//! 4. Default values

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::{ConfigError, RegistryError};
use crate::paths;
use crate::types::ExtraFields;

pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_REF: &str = "HEAD";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// How long a transaction waits for the registry lock before `RegistryBusy`.
    pub lock_timeout_ms: u64,

    /// Timeout applied to infra and agent commands. `None` waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_timeout_secs: Option<u64>,

    /// Shell used to interpret command strings. Defaults to `sh` (`cmd` on Windows).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shell: Option<String>,

    /// Reference new worktree branches are created from.
    pub default_ref: String,

    #[serde(flatten)]
    pub extra: ExtraFields,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            command_timeout_secs: None,
            shell: None,
            default_ref: DEFAULT_REF.to_string(),
            extra: ExtraFields::new(),
        }
    }
}

impl Settings {
    /// Load `<home>/.worksite/settings.yaml` (defaults if absent) with env overrides.
    pub fn load_at(home: &Path) -> Result<Self, RegistryError> {
        let path = paths::settings_path(home);
        let settings = if path.exists() {
            let bytes = std::fs::read(&path).map_err(|source| ConfigError::Io {
                path: path.clone(),
                source,
            })?;
            let settings = codec::decode_settings(&bytes).map_err(|e| e.at(&path))?;
            codec::warn_unknown_fields(settings.extra.keys().cloned(), &path);
            settings
        } else {
            Self::default()
        };
        Ok(settings.with_env_overrides())
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, RegistryError> {
        Self::load_at(&paths::home()?)
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - WORKSITE_LOCK_TIMEOUT_MS
    /// - WORKSITE_COMMAND_TIMEOUT_SECS
    /// - WORKSITE_SHELL
    /// - WORKSITE_DEFAULT_REF
    ///
    /// Unparseable numbers are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(ms) = env_number("WORKSITE_LOCK_TIMEOUT_MS") {
            self.lock_timeout_ms = ms;
        }
        if let Some(secs) = env_number("WORKSITE_COMMAND_TIMEOUT_SECS") {
            self.command_timeout_secs = Some(secs);
        }
        if let Ok(shell) = std::env::var("WORKSITE_SHELL") {
            if !shell.trim().is_empty() {
                self.shell = Some(shell);
            }
        }
        if let Ok(reference) = std::env::var("WORKSITE_DEFAULT_REF") {
            if !reference.trim().is_empty() {
                self.default_ref = reference;
            }
        }
        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(
        mut self,
        lock_timeout_ms: Option<u64>,
        command_timeout_secs: Option<u64>,
    ) -> Self {
        if let Some(ms) = lock_timeout_ms {
            self.lock_timeout_ms = ms;
        }
        if let Some(secs) = command_timeout_secs {
            self.command_timeout_secs = Some(secs);
        }
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }
}

fn env_number(var: &str) -> Option<u64> {
    let raw = std::env::var(var).ok()?;
    match raw.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!("ignoring {var}={raw:?}: not a non-negative integer");
            None
        }
    }
}
