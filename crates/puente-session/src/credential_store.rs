use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use puente_core::write_text_atomic;
use serde_json::Value;

pub const DEFAULT_SESSION_DIR: &str = "sesion_wa";
const CREDENTIALS_FILE_NAME: &str = "creds.json";

#[derive(Debug, Clone)]
/// Public struct `CredentialStore` persisting session credentials between runs.
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.dir.join(CREDENTIALS_FILE_NAME)
    }

    /// Returns the stored credentials, or `None` before the first pairing.
    pub fn load(&self) -> Result<Option<Value>> {
        let path = self.credentials_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let credentials = serde_json::from_str::<Value>(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(credentials))
    }

    pub fn save(&self, credentials: &Value) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create {}", self.dir.display()))?;
        let mut encoded =
            serde_json::to_string_pretty(credentials).context("failed to encode credentials")?;
        encoded.push('\n');
        write_text_atomic(&self.credentials_path(), &encoded)
    }
}
