//! Per-project token persistence with a shape gate.
//!
//! Tokens live under the `tokens` key as a `{ projectKey: token }` object,
//! with an RFC 3339 timestamp under `tokensUpdatedAt`. Nothing that fails
//! [`is_valid_token_shape`] is ever written or returned.

mod kv;
mod shape;

pub use kv::{JsonFileStore, KeyValueStore, MemoryStore};
pub use shape::is_valid_token_shape;

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub const TOKENS_KEY: &str = "tokens";
pub const TOKENS_UPDATED_AT_KEY: &str = "tokensUpdatedAt";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRecord {
    pub project_key: String,
    pub token: String,
    pub last_validated_at: Option<DateTime<Utc>>,
    pub last_validation_result: Option<bool>,
}

pub struct CredentialStore {
    store: Arc<dyn KeyValueStore>,
    /// Validation metadata, keyed by project. Also serializes read-modify-write
    /// of the token map.
    records: Mutex<HashMap<String, TokenRecord>>,
}

impl CredentialStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            records: Mutex::new(HashMap::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    fn load_tokens(&self) -> Result<Map<String, Value>> {
        match self.store.get(TOKENS_KEY)? {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => {
                tracing::warn!("Stored token map is not an object, ignoring it");
                Ok(Map::new())
            }
            None => Ok(Map::new()),
        }
    }

    fn save_tokens(&self, tokens: Map<String, Value>) -> Result<()> {
        self.store.set_many(vec![
            (TOKENS_KEY.to_string(), Value::Object(tokens)),
            (
                TOKENS_UPDATED_AT_KEY.to_string(),
                Value::String(Utc::now().to_rfc3339()),
            ),
        ])
    }

    /// Token for `project`, if one is stored and well-formed.
    ///
    /// A stored value that fails the shape check is deleted before returning
    /// `None`.
    pub fn get(&self, project: &str) -> Result<Option<String>> {
        let mut records = self.records.lock();
        let mut tokens = self.load_tokens()?;

        let valid = match tokens.get(project) {
            None => return Ok(None),
            Some(Value::String(token)) if is_valid_token_shape(token) => Some(token.clone()),
            Some(_) => None,
        };

        match valid {
            Some(token) => Ok(Some(token)),
            None => {
                tracing::warn!(
                    "Discarding malformed stored token for project '{}'",
                    project
                );
                tokens.remove(project);
                records.remove(project);
                self.save_tokens(tokens)?;
                Ok(None)
            }
        }
    }

    pub fn set(&self, project: &str, token: &str) -> Result<()> {
        if !is_valid_token_shape(token) {
            return Err(Error::InvalidTokenShape);
        }

        let mut records = self.records.lock();
        let mut tokens = self.load_tokens()?;
        tokens.insert(project.to_string(), Value::String(token.to_string()));
        self.save_tokens(tokens)?;

        let unchanged = records
            .get(project)
            .is_some_and(|record| record.token == token);
        if !unchanged {
            records.insert(
                project.to_string(),
                TokenRecord {
                    project_key: project.to_string(),
                    token: token.to_string(),
                    last_validated_at: None,
                    last_validation_result: None,
                },
            );
        }
        tracing::debug!("Stored token for '{}' ({} chars)", project, token.len());
        Ok(())
    }

    pub fn clear(&self, project: &str) -> Result<()> {
        let mut records = self.records.lock();
        records.remove(project);

        let mut tokens = self.load_tokens()?;
        if tokens.remove(project).is_some() {
            self.save_tokens(tokens)?;
            tracing::debug!("Cleared token for '{}'", project);
        }
        Ok(())
    }

    /// Remove every stored token and the update timestamp.
    pub fn clear_all(&self) -> Result<()> {
        let mut records = self.records.lock();
        self.store
            .delete_many(&[TOKENS_KEY, TOKENS_UPDATED_AT_KEY])?;
        records.clear();
        Ok(())
    }

    pub fn project_keys(&self) -> Result<Vec<String>> {
        let _records = self.records.lock();
        let mut keys: Vec<String> = self.load_tokens()?.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }

    /// When the token map was last written, if ever.
    pub fn updated_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(match self.store.get(TOKENS_UPDATED_AT_KEY)? {
            Some(Value::String(ts)) => DateTime::parse_from_rfc3339(&ts)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        })
    }

    /// Note the outcome of a remote validation of `token`.
    ///
    /// Ignored if `token` is no longer the stored one.
    pub fn record_validation(&self, project: &str, token: &str, valid: bool) {
        let mut records = self.records.lock();
        let record = records
            .entry(project.to_string())
            .or_insert_with(|| TokenRecord {
                project_key: project.to_string(),
                token: token.to_string(),
                last_validated_at: None,
                last_validation_result: None,
            });
        if record.token != token {
            return;
        }
        record.last_validated_at = Some(Utc::now());
        record.last_validation_result = Some(valid);
    }

    pub fn record(&self, project: &str) -> Result<Option<TokenRecord>> {
        let Some(token) = self.get(project)? else {
            return Ok(None);
        };
        let records = self.records.lock();
        Ok(Some(match records.get(project) {
            Some(record) if record.token == token => record.clone(),
            _ => TokenRecord {
                project_key: project.to_string(),
                token,
                last_validated_at: None,
                last_validation_result: None,
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_exact_token() {
        let store = CredentialStore::in_memory();
        store.set("blog", "aaa.bbb.ccc").unwrap();
        assert_eq!(store.get("blog").unwrap().as_deref(), Some("aaa.bbb.ccc"));
        assert!(store.updated_at().unwrap().is_some());
    }

    #[test]
    fn test_invalid_shape_writes_nothing() {
        let store = CredentialStore::in_memory();
        let err = store.set("blog", "not-a-jwt").unwrap_err();
        assert!(matches!(err, Error::InvalidTokenShape));
        assert_eq!(store.get("blog").unwrap(), None);
        assert!(store.updated_at().unwrap().is_none());
    }

    #[test]
    fn test_malformed_stored_value_is_deleted_on_read() {
        let kv = Arc::new(MemoryStore::new());
        kv.set(TOKENS_KEY, json!({ "blog": "garbage", "docs": "a.b.c" }))
            .unwrap();
        let store = CredentialStore::new(kv.clone());

        assert_eq!(store.get("blog").unwrap(), None);
        assert_eq!(
            kv.get(TOKENS_KEY).unwrap(),
            Some(json!({ "docs": "a.b.c" }))
        );
    }

    #[test]
    fn test_tokens_are_scoped_per_project() {
        let store = CredentialStore::in_memory();
        store.set("blog", "a.b.c").unwrap();
        store.set("docs", "d.e.f").unwrap();
        store.clear("blog").unwrap();

        assert_eq!(store.get("blog").unwrap(), None);
        assert_eq!(store.get("docs").unwrap().as_deref(), Some("d.e.f"));
        assert_eq!(store.project_keys().unwrap(), vec!["docs".to_string()]);
    }

    #[test]
    fn test_clear_all_removes_timestamp() {
        let store = CredentialStore::in_memory();
        store.set("blog", "a.b.c").unwrap();
        store.clear_all().unwrap();
        assert!(store.project_keys().unwrap().is_empty());
        assert!(store.updated_at().unwrap().is_none());
    }

    #[test]
    fn test_validation_metadata_follows_token() {
        let store = CredentialStore::in_memory();
        store.set("blog", "a.b.c").unwrap();
        store.record_validation("blog", "a.b.c", true);

        let record = store.record("blog").unwrap().unwrap();
        assert_eq!(record.last_validation_result, Some(true));
        assert!(record.last_validated_at.is_some());

        // Replacing the token drops the old validation
        store.set("blog", "x.y.z").unwrap();
        let record = store.record("blog").unwrap().unwrap();
        assert_eq!(record.token, "x.y.z");
        assert_eq!(record.last_validation_result, None);

        // Stale validation results are ignored
        store.record_validation("blog", "a.b.c", false);
        assert_eq!(store.record("blog").unwrap().unwrap().last_validation_result, None);
    }
}
