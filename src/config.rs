//! Runtime configuration, read from an optional JSON file.
//!
//! Every field has a default, so a file only needs the keys it changes:
//!
//! ```json
//! { "transmit_timeout_ms": 5000, "clone": { "length": 512 } }
//! ```

use crate::barcode::codec::RenderOptions;
use crate::core::clone::CloneOptions;
use crate::core::reader::ShareMode;
use crate::core::session::SessionOptions;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TRANSMIT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub share_mode: ShareMode,
    /// 0 disables the deadline
    pub transmit_timeout_ms: u64,
    pub clone: CloneOptions,
    pub render: RenderOptions,
    pub log_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            share_mode: ShareMode::Shared,
            transmit_timeout_ms: DEFAULT_TRANSMIT_TIMEOUT_MS,
            clone: CloneOptions::default(),
            render: RenderOptions::default(),
            log_file: None,
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        config.clone.validate().context("Invalid clone settings")?;
        Ok(config)
    }

    /// Load `path` if given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            share_mode: self.share_mode,
            transmit_timeout: (self.transmit_timeout_ms > 0)
                .then(|| Duration::from_millis(self.transmit_timeout_ms)),
        }
    }
}
