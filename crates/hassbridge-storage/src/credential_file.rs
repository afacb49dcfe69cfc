//! OAuth credential file
//!
//! The file is shared with the CLI that owns the login and possibly with other
//! daemon instances. Only the record under [`branding::CREDENTIALS_KEY`] is
//! ours; every other top-level key is written back as it was read.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use hassbridge_core::{branding, CredentialRecord, CredentialRepository, RepoResult};

use crate::fs_util::write_atomic;

pub struct JsonCredentialStore {
    path: PathBuf,
    key: String,
}

impl JsonCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            key: branding::CREDENTIALS_KEY.to_string(),
        }
    }

    /// Store the record under a different top-level key
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whole document, `None` when the file does not exist
    async fn read_document(&self) -> RepoResult<Option<Map<String, Value>>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", self.path));
            }
        };

        match serde_json::from_str::<Value>(&content)
            .with_context(|| format!("Invalid JSON in {:?}", self.path))?
        {
            Value::Object(map) => Ok(Some(map)),
            other => bail!(
                "Credential file {:?} holds a JSON {} instead of an object",
                self.path,
                json_kind(&other)
            ),
        }
    }
}

#[async_trait]
impl CredentialRepository for JsonCredentialStore {
    async fn load(&self) -> RepoResult<Option<CredentialRecord>> {
        let Some(document) = self.read_document().await? else {
            debug!(path = ?self.path, "[Credentials] File not found");
            return Ok(None);
        };

        match document.get(&self.key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => {
                let record = serde_json::from_value::<CredentialRecord>(value.clone())
                    .with_context(|| format!("Malformed '{}' record", self.key))?;
                Ok(Some(record))
            }
        }
    }

    async fn save(&self, record: &CredentialRecord) -> RepoResult<()> {
        // A document that cannot be read is never replaced
        let mut document = self
            .read_document()
            .await
            .map_err(|e| {
                warn!(error = %e, "[Credentials] Existing file unreadable, not saving");
                e.context("Refusing to overwrite unreadable credential file")
            })?
            .unwrap_or_default();

        document.insert(self.key.clone(), serde_json::to_value(record)?);
        let body = serde_json::to_vec_pretty(&Value::Object(document))?;
        write_atomic(&self.path, &body, true).await?;

        debug!(path = ?self.path, expires_at = record.expires_at, "[Credentials] Saved");
        Ok(())
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
